//! Rendezvous signaling: the wire envelope, the inbound self/target
//! filter, and the pure decision points the per-type handlers rely on.
//! The handlers themselves are orchestrated by [`crate::room::Room`],
//! which owns the state (peers, control plane) they operate over.

pub mod dispatcher;
pub mod envelope;
pub mod handlers;

pub use dispatcher::{route_inbound, Action};
pub use envelope::{Envelope, EnvelopeKind, PROTOCOL_VERSION};
