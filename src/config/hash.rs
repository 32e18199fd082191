//! Intent hashing for change detection.
//!
//! The ledger records the hash of the last intent applied so `plan` can tell
//! a configuration change from remote drift.

use sha2::{Digest, Sha256};

use crate::planner::DesiredIntent;

/// Hasher for computing intent hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of one desired intent.
    ///
    /// Fields are fed in a fixed order and maps are sorted, so equal intents
    /// always hash equally.
    #[must_use]
    pub fn hash_intent(&self, intent: &DesiredIntent) -> String {
        let mut hasher = Sha256::new();

        hasher.update(intent.resource_arn.as_bytes());

        hasher.update(intent.logging.level.to_string().as_bytes());
        hasher.update([u8::from(intent.logging.include_execution_data)]);
        if let Some(destination) = &intent.logging.destination {
            hasher.update(destination.as_bytes());
        }

        // Separator keeps an absent forwarder distinct from an empty one.
        hasher.update([0u8]);
        if let Some(forwarder) = &intent.forwarder_arn {
            hasher.update(forwarder.as_bytes());
        }
        hasher.update(intent.subscription_filter.as_bytes());

        for (key, value) in &intent.tags {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b";");
        }

        hasher.update(intent.policy.name.as_bytes());
        hasher.update(intent.policy.document.as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Returns a short prefix of a hash for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        &hash[..hash.len().min(12)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const SM_ARN: &str = "arn:aws:states:us-east-1:123456789012:stateMachine:orders";

    #[test]
    fn test_equal_intents_hash_equally() {
        let hasher = ConfigHasher::new();
        let a = DesiredIntent::for_state_machine(SM_ARN).unwrap();
        let b = DesiredIntent::for_state_machine(SM_ARN).unwrap();
        assert_eq!(hasher.hash_intent(&a), hasher.hash_intent(&b));
        assert_eq!(hasher.hash_intent(&a).len(), 64);
    }

    #[test]
    fn test_tag_change_changes_hash() {
        let hasher = ConfigHasher::new();
        let base = DesiredIntent::for_state_machine(SM_ARN).unwrap();
        let tagged = base
            .clone()
            .with_tags(BTreeMap::from([(String::from("env"), String::from("prod"))]));
        assert_ne!(hasher.hash_intent(&base), hasher.hash_intent(&tagged));
    }

    #[test]
    fn test_forwarder_change_changes_hash() {
        let hasher = ConfigHasher::new();
        let base = DesiredIntent::for_state_machine(SM_ARN).unwrap();
        let forwarded = base
            .clone()
            .with_forwarder(Some(String::from("arn:aws:lambda:us-east-1:123456789012:function:f")));
        assert_ne!(hasher.hash_intent(&base), hasher.hash_intent(&forwarded));
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(ConfigHasher::short_hash("abcdef0123456789"), "abcdef012345");
        assert_eq!(ConfigHasher::short_hash("abc"), "abc");
    }
}
