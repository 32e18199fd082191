//! S3-based ledger backend.
//!
//! This module provides remote ledger storage in AWS S3 (or compatible
//! services) so several machines can share records and leases. Leases are
//! written with conditional puts: a fresh lease only if none exists, and a
//! takeover only if the expired lease is still the object under the key.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{storage_key, ResourceRecord};

/// Condition under which a lease object may be written.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Precondition {
    /// No object exists under the key.
    Absent,
    /// The object under the key still has this ETag.
    Replaces(String),
}

/// Decides how a new lease may be written over what is currently stored.
fn lease_precondition(existing: Option<(LockInfo, Option<String>)>) -> Result<Precondition> {
    match existing {
        None => Ok(Precondition::Absent),
        Some((lock, _)) if !lock.is_expired() => Err(lock.conflict().into()),
        Some((lock, Some(e_tag))) => {
            warn!(resource = %lock.resource, holder = %lock.holder, "Expired lease found, taking over");
            Ok(Precondition::Replaces(e_tag))
        }
        Some((lock, None)) => Err(StateError::LockFailed {
            message: format!("Expired lease {} has no ETag to replace", lock.lock_id),
        }
        .into()),
    }
}

/// S3-based ledger store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

impl S3StateStore {
    /// Creates a new S3 store.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a new S3 store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn record_key(&self, resource: &str) -> String {
        format!("{}{}.json", self.prefix, storage_key(resource))
    }

    fn lock_key(&self, resource: &str) -> String {
        format!("{}{}.lock", self.prefix, storage_key(resource))
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_object_tagged(key).await?.map(|(content, _)| content))
    }

    /// Gets an object from S3 along with its ETag.
    async fn get_object_tagged(&self, key: &str) -> Result<Option<(String, Option<String>)>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let e_tag = response.e_tag().map(String::from);
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::s3(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| StateError::Corrupted {
                    message: format!("Invalid UTF-8 in S3 object: {e}"),
                })?;

                Ok(Some((content, e_tag)))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 put error: {e}")))?;

        Ok(())
    }

    /// Puts an object only if `precondition` holds.
    ///
    /// Returns false when another writer got there first.
    async fn put_object_if(&self, key: &str, content: &str, precondition: &Precondition) -> Result<bool> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json");

        let request = match precondition {
            Precondition::Absent => request.if_none_match("*"),
            Precondition::Replaces(e_tag) => request.if_match(e_tag),
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                // 404 means the object If-Match named was deleted meanwhile.
                let precondition_failed = sdk_err
                    .raw_response()
                    .is_some_and(|r| matches!(r.status().as_u16(), 404 | 412));
                if precondition_failed {
                    Ok(false)
                } else {
                    Err(StateError::s3(format!("S3 conditional put error: {sdk_err}")).into())
                }
            }
        }
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 delete error: {e}")))?;

        Ok(())
    }

    async fn read_lock(&self, resource: &str) -> Result<Option<LockInfo>> {
        Ok(self.read_lock_tagged(resource).await?.map(|(lock, _)| lock))
    }

    async fn read_lock_tagged(&self, resource: &str) -> Result<Option<(LockInfo, Option<String>)>> {
        let Some((content, e_tag)) = self.get_object_tagged(&self.lock_key(resource)).await? else {
            return Ok(None);
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        })?;

        Ok(Some((lock_info, e_tag)))
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self, resource: &str) -> Result<Option<ResourceRecord>> {
        let key = self.record_key(resource);
        debug!("Loading record from s3://{}/{key}", self.bucket);

        let Some(json) = self.get_object(&key).await? else {
            debug!("No record found in S3");
            return Ok(None);
        };

        let record: ResourceRecord = serde_json::from_str(&json).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse record: {e}"),
        })?;
        record.check_version()?;

        Ok(Some(record))
    }

    async fn save(&self, record: &ResourceRecord) -> Result<()> {
        let key = self.record_key(&record.resource_arn);
        info!("Saving record to s3://{}/{key}", self.bucket);

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::serialization(format!("Failed to serialize record: {e}")))?;

        self.put_object(&key, &content).await?;

        debug!("Record saved successfully to S3");
        Ok(())
    }

    async fn acquire_lock(&self, resource: &str, holder: &str) -> Result<LockInfo> {
        let key = self.lock_key(resource);

        let precondition = lease_precondition(self.read_lock_tagged(resource).await?)?;

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(resource, &holder_id);

        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        if !self.put_object_if(&key, &content, &precondition).await? {
            return match self.read_lock(resource).await? {
                Some(winner) => Err(winner.conflict().into()),
                None => Err(StateError::LockFailed {
                    message: String::from("Lease was contended and released during acquisition"),
                }
                .into()),
            };
        }

        info!(
            resource = %resource,
            "Acquired lease: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, resource: &str, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock(resource).await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.lock_key(resource)).await?;
                info!(resource = %resource, "Released lease: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }

        Ok(())
    }

    async fn force_unlock(&self, resource: &str) -> Result<()> {
        warn!(resource = %resource, "Force-removing lease");
        self.delete_object(&self.lock_key(resource)).await
    }

    async fn get_lock_info(&self, resource: &str) -> Result<Option<LockInfo>> {
        self.read_lock(resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("/team/ledger/")), "team/ledger/");
    }

    const ARN: &str = "arn:aws:states:us-east-1:123456789012:stateMachine:orders";

    fn expired_lease(holder: &str) -> LockInfo {
        let mut lock = LockInfo::new(ARN, holder);
        lock.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        lock
    }

    #[test]
    fn test_missing_lease_is_written_if_absent() {
        assert_eq!(lease_precondition(None).unwrap(), Precondition::Absent);
    }

    #[test]
    fn test_live_lease_is_a_conflict() {
        let live = LockInfo::new(ARN, "holder-1");
        let err = lease_precondition(Some((live, Some(String::from("\"abc\""))))).unwrap_err();
        assert!(matches!(
            err,
            crate::error::InstrumentError::State(StateError::LockedByOther { ref holder, .. }) if holder == "holder-1"
        ));
    }

    #[test]
    fn test_expired_lease_is_replaced_only_at_its_etag() {
        let precondition =
            lease_precondition(Some((expired_lease("crashed"), Some(String::from("\"abc\""))))).unwrap();
        assert_eq!(precondition, Precondition::Replaces(String::from("\"abc\"")));
    }

    #[test]
    fn test_expired_lease_without_etag_is_not_taken_over() {
        let err = lease_precondition(Some((expired_lease("crashed"), None))).unwrap_err();
        assert!(matches!(
            err,
            crate::error::InstrumentError::State(StateError::LockFailed { .. })
        ));
    }
}
