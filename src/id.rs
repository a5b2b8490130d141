//! Identity and id generation: self id, message ids, session ids.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// A stable-for-process-lifetime, 16-character alphanumeric identifier used
/// as the lexical tiebreaker for offer/answer initiation.
pub fn generate_self_id() -> String {
    random_alphanumeric(16)
}

/// Short random id attached to outbound envelopes when absent.
pub fn generate_msg_id() -> String {
    random_alphanumeric(12)
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Monotonic counter attached to each outbound envelope to distinguish
/// successive joins of the same room by the same self id.
#[derive(Debug, Default)]
pub struct SessionIdGenerator {
    next: AtomicU64,
}

impl SessionIdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_id_is_16_alnum_chars() {
        let id = generate_self_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn session_ids_are_monotonic() {
        let gen = SessionIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert!(b > a);
    }
}
