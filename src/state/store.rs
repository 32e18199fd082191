//! Ledger store trait definition.
//!
//! This module defines the common interface for ledger storage backends.
//! Records and leases are both keyed by resource ARN.

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::ResourceRecord;

/// Trait for ledger storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the record of a resource.
    ///
    /// Returns `None` if the resource has never been reconciled.
    async fn load(&self, resource: &str) -> Result<Option<ResourceRecord>>;

    /// Saves a record.
    async fn save(&self, record: &ResourceRecord) -> Result<()>;

    /// Acquires the lease on a resource.
    ///
    /// Fails with `LockedByOther` while another holder's lease is live.
    async fn acquire_lock(&self, resource: &str, holder: &str) -> Result<LockInfo>;

    /// Releases a lease; a lease held under another id is left alone.
    async fn release_lock(&self, resource: &str, lock_id: &str) -> Result<()>;

    /// Removes a lease regardless of holder.
    async fn force_unlock(&self, resource: &str) -> Result<()>;

    /// Gets current lease information if any.
    async fn get_lock_info(&self, resource: &str) -> Result<Option<LockInfo>>;

    /// Checks if a live lease exists.
    async fn is_locked(&self, resource: &str) -> Result<bool> {
        Ok(self
            .get_lock_info(resource)
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self, resource: &str) -> Result<Option<ResourceRecord>> {
        (**self).load(resource).await
    }

    async fn save(&self, record: &ResourceRecord) -> Result<()> {
        (**self).save(record).await
    }

    async fn acquire_lock(&self, resource: &str, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(resource, holder).await
    }

    async fn release_lock(&self, resource: &str, lock_id: &str) -> Result<()> {
        (**self).release_lock(resource, lock_id).await
    }

    async fn force_unlock(&self, resource: &str) -> Result<()> {
        (**self).force_unlock(resource).await
    }

    async fn get_lock_info(&self, resource: &str) -> Result<Option<LockInfo>> {
        (**self).get_lock_info(resource).await
    }
}
