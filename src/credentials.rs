//! Credentials provider: ICE servers + MQTT brokers, fetched
//! once from the host process and cached.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServerSpec {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSpec {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ice_servers: Vec<IceServerSpec>,
    pub brokers: Vec<BrokerSpec>,
    pub source: String,
}

/// Host-supplied credential source. A real host implements this over
/// whatever IPC it already has to its native shell; tests supply an
/// in-memory stub.
#[async_trait]
pub trait CredentialsSource: Send + Sync {
    /// The secure, single-call session API. `Ok(None)` means this host
    /// doesn't expose it at all (fall through to the legacy API).
    async fn get_session_credentials(&self) -> Result<Option<Credentials>>;

    /// Legacy two-call API, used only when the secure API is absent.
    async fn get_ice_servers(&self) -> Result<Vec<IceServerSpec>>;
    async fn get_mqtt_brokers(&self) -> Result<Vec<BrokerSpec>>;
}

fn builtin_ice_servers() -> Vec<IceServerSpec> {
    vec![IceServerSpec {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
    }]
}

fn builtin_brokers() -> Vec<BrokerSpec> {
    vec![
        BrokerSpec {
            url: "wss://broker1.emqx.io:8084/mqtt".to_string(),
            username: None,
            password: None,
        },
        BrokerSpec {
            url: "wss://test.mosquitto.org:8081".to_string(),
            username: None,
            password: None,
        },
    ]
}

/// Caches the credentials for the process lifetime and coalesces
/// concurrent callers into a single in-flight fetch.
pub struct CredentialsProvider {
    source: Arc<dyn CredentialsSource>,
    cached: Mutex<Option<Credentials>>,
}

impl CredentialsProvider {
    pub fn new(source: Arc<dyn CredentialsSource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    /// Loads (and caches) credentials, fetching from the host on first call.
    pub async fn load(&self) -> Result<Credentials> {
        let mut guard = self.cached.lock().await;
        if let Some(creds) = guard.as_ref() {
            return Ok(creds.clone());
        }

        let creds = self.fetch().await?;
        *guard = Some(creds.clone());
        Ok(creds)
    }

    async fn fetch(&self) -> Result<Credentials> {
        match self.source.get_session_credentials().await? {
            Some(creds) => {
                if creds.ice_servers.is_empty() || creds.brokers.is_empty() {
                    return Err(Error::CredentialsUnavailable);
                }
                Ok(creds)
            }
            None => {
                let ice_servers = self.source.get_ice_servers().await?;
                let brokers = self.source.get_mqtt_brokers().await?;
                let ice_servers = if ice_servers.is_empty() {
                    builtin_ice_servers()
                } else {
                    ice_servers
                };
                let brokers = if brokers.is_empty() {
                    builtin_brokers()
                } else {
                    brokers
                };
                Ok(Credentials {
                    ice_servers,
                    brokers,
                    source: "legacy".to_string(),
                })
            }
        }
    }

    /// Test-only: drops the cache so the next `load()` re-fetches.
    pub async fn reset_for_testing(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubSecure {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CredentialsSource for StubSecure {
        async fn get_session_credentials(&self) -> Result<Option<Credentials>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Credentials {
                ice_servers: vec![IceServerSpec {
                    urls: vec!["stun:example.com".into()],
                    username: None,
                    credential: None,
                }],
                brokers: vec![BrokerSpec {
                    url: "wss://broker.example.com".into(),
                    username: None,
                    password: None,
                }],
                source: "secure".into(),
            }))
        }
        async fn get_ice_servers(&self) -> Result<Vec<IceServerSpec>> {
            Ok(vec![])
        }
        async fn get_mqtt_brokers(&self) -> Result<Vec<BrokerSpec>> {
            Ok(vec![])
        }
    }

    struct StubIncomplete;

    #[async_trait]
    impl CredentialsSource for StubIncomplete {
        async fn get_session_credentials(&self) -> Result<Option<Credentials>> {
            Ok(Some(Credentials {
                ice_servers: vec![],
                brokers: vec![],
                source: "secure".into(),
            }))
        }
        async fn get_ice_servers(&self) -> Result<Vec<IceServerSpec>> {
            Ok(vec![])
        }
        async fn get_mqtt_brokers(&self) -> Result<Vec<BrokerSpec>> {
            Ok(vec![])
        }
    }

    struct StubLegacy;

    #[async_trait]
    impl CredentialsSource for StubLegacy {
        async fn get_session_credentials(&self) -> Result<Option<Credentials>> {
            Ok(None)
        }
        async fn get_ice_servers(&self) -> Result<Vec<IceServerSpec>> {
            Ok(vec![])
        }
        async fn get_mqtt_brokers(&self) -> Result<Vec<BrokerSpec>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn caches_after_first_load() {
        let source = Arc::new(StubSecure {
            calls: AtomicU32::new(0),
        });
        let provider = CredentialsProvider::new(source.clone());
        provider.load().await.unwrap();
        provider.load().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn incomplete_secure_payload_fails_closed() {
        let provider = CredentialsProvider::new(Arc::new(StubIncomplete));
        let err = provider.load().await.unwrap_err();
        assert!(matches!(err, Error::CredentialsUnavailable));
    }

    #[tokio::test]
    async fn legacy_empty_falls_back_to_builtins() {
        let provider = CredentialsProvider::new(Arc::new(StubLegacy));
        let creds = provider.load().await.unwrap();
        assert!(!creds.ice_servers.is_empty());
        assert!(!creds.brokers.is_empty());
    }
}
