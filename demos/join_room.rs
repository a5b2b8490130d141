//! Joins a room using the built-in STUN/broker fallbacks and prints every
//! event until interrupted.
//!
//! ```text
//! cargo run --example join_room -- <room-id> <user-name>
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use meshconf::{
    BrokerSpec, Credentials, CredentialsSource, Error as EngineError, Event, IceServerSpec, Manager,
};

/// Falls through to the engine's built-in STUN/broker lists; a real host
/// would instead call out to whatever credential-issuing backend it has.
struct NoCredentials;

#[async_trait]
impl CredentialsSource for NoCredentials {
    async fn get_session_credentials(&self) -> Result<Option<Credentials>, EngineError> {
        Ok(None)
    }

    async fn get_ice_servers(&self) -> Result<Vec<IceServerSpec>, EngineError> {
        Ok(vec![])
    }

    async fn get_mqtt_brokers(&self) -> Result<Vec<BrokerSpec>, EngineError> {
        Ok(vec![])
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let room_id = args.next().unwrap_or_else(|| "meshconf-demo".to_string());
    let user_name = args.next().unwrap_or_else(|| "guest".to_string());

    let (manager, mut events) = Manager::new(Arc::new(NoCredentials), "meshconf-demo/0.1");

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::PeerJoin { peer_id, user_name, .. } => {
                    log::info!("peer joined: {user_name} ({peer_id})");
                }
                Event::PeerLeave { peer_id, user_name, .. } => {
                    log::info!("peer left: {user_name} ({peer_id})");
                }
                Event::Chat { sender_name, content, .. } => {
                    log::info!("chat [{sender_name}]: {content}");
                }
                Event::Error { error, context } => {
                    log::warn!("engine error ({context:?}): {error}");
                }
                other => log::debug!("event: {other:?}"),
            }
        }
    });

    log::info!("joining room {room_id} as {user_name}");
    if let Err(e) = manager.join_room(&room_id, &user_name).await {
        log::error!("join_room failed: {e}");
        return;
    }

    log::info!("joined; press ctrl-c to leave");
    let _ = tokio::signal::ctrl_c().await;
    manager.leave_room().await;
}
