//! Per-resource leases guarding concurrent reconciliation.
//!
//! A lease expires on its own so a crashed run never blocks a resource
//! forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;

/// Lease expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300; // 5 minutes

/// Information about a lease.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lease identifier.
    pub lock_id: String,
    /// Leased resource ARN.
    pub resource: String,
    /// Who holds the lease.
    pub holder: String,
    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lease expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lease for a resource.
    #[must_use]
    pub fn new(resource: &str, holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            resource: resource.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lease has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }

    /// The error reported to a contender while this lease is live.
    #[must_use]
    pub fn conflict(&self) -> StateError {
        StateError::LockedByOther {
            resource: self.resource.clone(),
            holder: self.holder.clone(),
            since: self.acquired_at.to_rfc3339(),
        }
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lease_is_live() {
        let lease = LockInfo::new("arn:sm", "test-holder");
        assert!(!lease.is_expired());
        assert!(lease.remaining_secs() > 0);
        assert!(matches!(lease.conflict(), StateError::LockedByOther { ref holder, .. } if holder == "test-holder"));
    }

    #[test]
    fn test_expired_lease() {
        let mut lease = LockInfo::new("arn:sm", "test-holder");
        lease.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(lease.is_expired());
        assert_eq!(lease.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);

        let pid = std::process::id().to_string();
        assert!(id1.contains(&pid));
    }
}
