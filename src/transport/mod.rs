//! Rendezvous transport: brokers plus an optional in-process multicast bus,
//! both carrying the same envelopes, deduplicated by message id.

pub mod dedup;
pub mod multi_broker;
pub mod multicast;

pub use dedup::DedupCache;
pub use multi_broker::MultiBrokerTransport;
pub use multicast::{MulticastChannel, MulticastSender};
