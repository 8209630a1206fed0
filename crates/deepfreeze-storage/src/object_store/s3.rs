//! AWS S3 implementation of ArchiveStore
//!
//! Supports standard AWS S3 and S3-compatible endpoints (MinIO, LocalStack).

use super::{ArchiveObject, ArchiveStore, ObjectHead, RestoreOutcome};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::{GlacierJobParameters, RestoreRequest, Tier};
use aws_sdk_s3::{config::Credentials, Client, Config};
use chrono::Utc;
use deepfreeze_core::{CoreError, CoreResult, RetrievalTier, S3Settings, StorageClass};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// S3 connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// AWS region (e.g., "us-west-2")
    pub region: String,
    /// Optional custom endpoint URL (for MinIO compatibility)
    pub endpoint: Option<String>,
    /// Optional access key (for custom S3 endpoints)
    pub access_key: Option<String>,
    /// Optional secret key (for custom S3 endpoints)
    pub secret_key: Option<String>,
}

impl S3Config {
    /// Create config for standard AWS S3 (uses the default credential chain)
    pub fn aws(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            access_key: None,
            secret_key: None,
        }
    }

    /// Create config for MinIO or custom S3-compatible endpoint
    pub fn custom(
        region: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            endpoint: Some(endpoint.into()),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
        }
    }
}

impl From<&S3Settings> for S3Config {
    fn from(settings: &S3Settings) -> Self {
        Self {
            region: settings.region.clone(),
            endpoint: settings.endpoint.clone(),
            access_key: settings.access_key.clone(),
            secret_key: settings.secret_key.clone(),
        }
    }
}

/// AWS S3 archive store
pub struct S3ArchiveStore {
    client: Client,
}

impl S3ArchiveStore {
    /// Create a new S3 archive store
    pub async fn new(config: S3Config) -> CoreResult<Self> {
        let client = if let (Some(endpoint), Some(access), Some(secret)) =
            (&config.endpoint, &config.access_key, &config.secret_key)
        {
            let creds = Credentials::new(access, secret, None, None, "deepfreeze-static");

            let s3_config = Config::builder()
                .endpoint_url(endpoint)
                .credentials_provider(creds)
                .region(aws_sdk_s3::config::Region::new(config.region.clone()))
                .force_path_style(true) // Required for MinIO
                .behavior_version(BehaviorVersion::latest())
                .build();

            Client::from_conf(s3_config)
        } else {
            let aws_config = aws_config::defaults(BehaviorVersion::latest())
                .region(aws_config::Region::new(config.region.clone()))
                .load()
                .await;

            Client::new(&aws_config)
        };

        Ok(Self { client })
    }
}

fn to_sdk_tier(tier: RetrievalTier) -> Tier {
    match tier {
        RetrievalTier::Standard => Tier::Standard,
        RetrievalTier::Expedited => Tier::Expedited,
        RetrievalTier::Bulk => Tier::Bulk,
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> CoreResult<Vec<ArchiveObject>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| CoreError::StorageError(format!("S3 list failed: {}", e)))?;

            objects.extend(resp.contents().iter().filter_map(|obj| {
                let key = obj.key()?;
                let last_modified = obj
                    .last_modified()
                    .and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
                    .unwrap_or_else(Utc::now);

                Some(ArchiveObject {
                    key: key.to_string(),
                    size_bytes: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified,
                    storage_class: obj
                        .storage_class()
                        .map(|class| StorageClass::from_wire(class.as_str())),
                })
            }));

            match (resp.is_truncated(), resp.next_continuation_token()) {
                (Some(true), Some(token)) => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(bucket = %bucket, prefix = %prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> CoreResult<ObjectHead> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    CoreError::not_found("object", key)
                } else {
                    CoreError::StorageError(format!("S3 head failed: {}", e))
                }
            })?;

        // S3 omits the storage class header for STANDARD objects.
        let storage_class = resp
            .storage_class()
            .map_or(StorageClass::Standard, |class| {
                StorageClass::from_wire(class.as_str())
            });

        Ok(ObjectHead {
            key: key.to_string(),
            storage_class,
            restore: resp.restore().map(str::to_string),
        })
    }

    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: u32,
        tier: RetrievalTier,
    ) -> CoreResult<RestoreOutcome> {
        let days = i32::try_from(days)
            .map_err(|_| CoreError::ValidationError(format!("restore days {days} out of range")))?;
        let job = GlacierJobParameters::builder()
            .tier(to_sdk_tier(tier))
            .build()
            .map_err(|e| CoreError::internal(format!("invalid restore parameters: {}", e)))?;
        let request = RestoreRequest::builder()
            .days(days)
            .glacier_job_parameters(job)
            .build();

        let result = self
            .client
            .restore_object()
            .bucket(bucket)
            .key(key)
            .restore_request(request)
            .send()
            .await;

        match result {
            Ok(_) => Ok(RestoreOutcome::Initiated),
            Err(e) => match e.as_service_error().and_then(|se| se.code()) {
                Some("RestoreAlreadyInProgress") => Ok(RestoreOutcome::AlreadyInProgress),
                Some("ObjectAlreadyInActiveTierError") => Ok(RestoreOutcome::AlreadyRestored),
                _ => Err(CoreError::RestoreCallFailed {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_config_aws() {
        let config = S3Config::aws("us-west-2");
        assert_eq!(config.region, "us-west-2");
        assert!(config.endpoint.is_none());
        assert!(config.access_key.is_none());
    }

    #[test]
    fn test_s3_config_custom() {
        let config = S3Config::custom("us-east-1", "http://localhost:9000", "access", "secret");
        assert_eq!(config.endpoint.unwrap(), "http://localhost:9000");
        assert_eq!(config.access_key.unwrap(), "access");
    }

    #[test]
    fn test_s3_config_from_settings() {
        let settings = S3Settings {
            endpoint: Some("http://minio:9000".to_string()),
            ..S3Settings::default()
        };
        let config = S3Config::from(&settings);
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.endpoint.as_deref(), Some("http://minio:9000"));
    }

    #[test]
    fn test_sdk_tier_mapping() {
        assert_eq!(to_sdk_tier(RetrievalTier::Bulk), Tier::Bulk);
        assert_eq!(to_sdk_tier(RetrievalTier::Standard), Tier::Standard);
    }
}
