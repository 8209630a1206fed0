//! Mock ArchiveStore for testing
//!
//! In-memory simulation of an archival object store: objects carry a storage
//! class and a restore state that tests advance explicitly.
//!
//! # Features
//!
//! - **Restore Simulation**: restores start as ongoing and complete on demand
//! - **Deterministic Failures**: failure queue consumed by restore calls
//! - **Per-Key Failures**: make lookups or restores fail for chosen objects
//! - **Call History**: track all operations for assertions
//! - **Concurrency Tracking**: peak number of in-flight head lookups
//!
//! # Examples
//!
//! ```rust
//! use deepfreeze_core::{RetrievalTier, StorageClass};
//! use deepfreeze_storage::object_store::{ArchiveStore, MockArchiveStore};
//!
//! # async fn example() -> deepfreeze_core::CoreResult<()> {
//! let mock = MockArchiveStore::new();
//! mock.put_object("archive", "snapshots/a/0", StorageClass::Glacier);
//!
//! mock.restore_object("archive", "snapshots/a/0", 7, RetrievalTier::Standard).await?;
//! assert_eq!(mock.restore_calls(), 1);
//!
//! mock.complete_all_restores();
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ArchiveObject, ArchiveStore, ObjectHead, RestoreOutcome};
use deepfreeze_core::{CoreError, CoreResult, RetrievalTier, StorageClass};

/// Mock failure pattern for restore calls.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Transient error. Examples: 500, 503, throttling.
    Transient(&'static str),

    /// Permanent error. Examples: 403, 400.
    Permanent(&'static str),

    /// Success (no error).
    Ok,
}

impl MockFailure {
    fn to_error(&self, key: &str) -> Option<CoreError> {
        match self {
            MockFailure::Transient(msg) => Some(CoreError::RestoreCallFailed {
                key: key.to_string(),
                message: format!("Transient: {}", msg),
            }),
            MockFailure::Permanent(msg) => Some(CoreError::RestoreCallFailed {
                key: key.to_string(),
                message: format!("Permanent: {}", msg),
            }),
            MockFailure::Ok => None,
        }
    }
}

/// Mock archive configuration.
#[derive(Debug, Clone)]
pub struct MockArchiveConfig {
    /// Simulated latency per call.
    pub latency: Duration,

    /// Enable call history tracking.
    pub track_history: bool,

    /// Restores finish as soon as they are requested.
    pub complete_restores_immediately: bool,
}

impl Default for MockArchiveConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            track_history: true,
            complete_restores_immediately: false,
        }
    }
}

/// Mock call history entry.
#[derive(Debug, Clone)]
pub struct CallHistoryEntry {
    /// Operation type: "list", "head", "restore".
    pub operation: String,

    /// Object key (or prefix for "list").
    pub key: String,

    /// Whether operation succeeded.
    pub success: bool,

    /// Timestamp of operation.
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
enum MockRestore {
    None,
    Ongoing { days: u32 },
    Restored { expiry: DateTime<Utc> },
}

#[derive(Debug, Clone)]
struct MockObject {
    size_bytes: u64,
    storage_class: StorageClass,
    last_modified: DateTime<Utc>,
    restore: MockRestore,
}

type ObjectKey = (String, String);

/// Mock ArchiveStore implementation for testing.
#[derive(Clone)]
pub struct MockArchiveStore {
    objects: Arc<RwLock<BTreeMap<ObjectKey, MockObject>>>,

    /// Failure pattern queue consumed by restore calls.
    failure_queue: Arc<RwLock<VecDeque<MockFailure>>>,

    head_failures: Arc<RwLock<HashSet<String>>>,
    restore_failures: Arc<RwLock<HashSet<String>>>,
    list_failure: Arc<RwLock<Option<String>>>,

    /// Report storage classes in listings (S3 does; some gateways do not).
    list_reports_class: Arc<RwLock<bool>>,

    config: MockArchiveConfig,
    call_history: Arc<RwLock<Vec<CallHistoryEntry>>>,

    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockArchiveStore {
    /// Create new mock with default config (no failures).
    pub fn new() -> Self {
        Self::new_with_config(MockArchiveConfig::default())
    }

    /// Create new mock with custom config.
    pub fn new_with_config(config: MockArchiveConfig) -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            failure_queue: Arc::new(RwLock::new(VecDeque::new())),
            head_failures: Arc::new(RwLock::new(HashSet::new())),
            restore_failures: Arc::new(RwLock::new(HashSet::new())),
            list_failure: Arc::new(RwLock::new(None)),
            list_reports_class: Arc::new(RwLock::new(true)),
            config,
            call_history: Arc::new(RwLock::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create mock with deterministic restore failure pattern.
    ///
    /// Failures are consumed in order. Once the queue is empty, all restores succeed.
    pub fn new_with_failures(pattern: Vec<MockFailure>) -> Self {
        let mock = Self::new();
        *mock.failure_queue.write() = pattern.into();
        mock
    }

    /// Add an object with no restore on record.
    pub fn put_object(&self, bucket: &str, key: &str, storage_class: StorageClass) {
        self.objects.write().insert(
            (bucket.to_string(), key.to_string()),
            MockObject {
                size_bytes: 1024,
                storage_class,
                last_modified: Utc::now(),
                restore: MockRestore::None,
            },
        );
    }

    /// Add `count` archival objects named `{prefix}{n}`.
    pub fn put_archived_objects(&self, bucket: &str, prefix: &str, count: usize) -> Vec<String> {
        (0..count)
            .map(|n| {
                let key = format!("{prefix}{n:04}");
                self.put_object(bucket, &key, StorageClass::Glacier);
                key
            })
            .collect()
    }

    /// Finish an ongoing restore. Returns false if none was running.
    pub fn complete_restore(&self, bucket: &str, key: &str) -> bool {
        let mut objects = self.objects.write();
        match objects.get_mut(&(bucket.to_string(), key.to_string())) {
            Some(object) => match object.restore {
                MockRestore::Ongoing { days } => {
                    object.restore = MockRestore::Restored {
                        expiry: Utc::now() + ChronoDuration::days(i64::from(days)),
                    };
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    /// Finish every ongoing restore. Returns how many completed.
    pub fn complete_all_restores(&self) -> usize {
        let mut completed = 0;
        for object in self.objects.write().values_mut() {
            if let MockRestore::Ongoing { days } = object.restore {
                object.restore = MockRestore::Restored {
                    expiry: Utc::now() + ChronoDuration::days(i64::from(days)),
                };
                completed += 1;
            }
        }
        completed
    }

    /// Drop every restored copy in a bucket.
    pub fn expire_all_restores(&self, bucket: &str) {
        for ((b, _), object) in self.objects.write().iter_mut() {
            if b == bucket {
                object.restore = MockRestore::None;
            }
        }
    }

    /// Make head lookups of `key` fail.
    pub fn fail_head(&self, key: &str) {
        self.head_failures.write().insert(key.to_string());
    }

    /// Make restore calls for `key` fail.
    pub fn fail_restore(&self, key: &str) {
        self.restore_failures.write().insert(key.to_string());
    }

    /// Make listings fail with `message` (`None` to clear).
    pub fn fail_list(&self, message: Option<&str>) {
        *self.list_failure.write() = message.map(str::to_string);
    }

    /// Whether listings carry storage classes.
    pub fn set_list_reports_class(&self, reports: bool) {
        *self.list_reports_class.write() = reports;
    }

    /// Clear per-key and list failures.
    pub fn clear_failures(&self) {
        self.head_failures.write().clear();
        self.restore_failures.write().clear();
        *self.list_failure.write() = None;
        self.failure_queue.write().clear();
    }

    /// Get call history for assertions.
    pub fn get_call_history(&self) -> Vec<CallHistoryEntry> {
        self.call_history.read().clone()
    }

    fn count_calls(&self, operation: &str) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|entry| entry.operation == operation)
            .count()
    }

    /// Number of restore calls made (successful or not).
    pub fn restore_calls(&self) -> usize {
        self.count_calls("restore")
    }

    /// Number of head lookups made.
    pub fn head_calls(&self) -> usize {
        self.count_calls("head")
    }

    /// Highest number of head lookups observed in flight at once.
    pub fn peak_concurrent_heads(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// True if a restore is running for the object.
    pub fn is_restoring(&self, bucket: &str, key: &str) -> bool {
        matches!(
            self.objects
                .read()
                .get(&(bucket.to_string(), key.to_string()))
                .map(|o| &o.restore),
            Some(MockRestore::Ongoing { .. })
        )
    }

    fn check_failure(&self, key: &str) -> Option<CoreError> {
        let mut queue = self.failure_queue.write();
        queue.pop_front().and_then(|failure| failure.to_error(key))
    }

    fn record_call(&self, operation: &str, key: &str, success: bool) {
        if self.config.track_history {
            self.call_history.write().push(CallHistoryEntry {
                operation: operation.to_string(),
                key: key.to_string(),
                success,
                timestamp: Instant::now(),
            });
        }
    }

    async fn simulate_latency(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }
}

impl Default for MockArchiveStore {
    fn default() -> Self {
        Self::new()
    }
}

fn restore_header(restore: &MockRestore) -> Option<String> {
    match restore {
        MockRestore::None => None,
        MockRestore::Ongoing { .. } => Some("ongoing-request=\"true\"".to_string()),
        MockRestore::Restored { expiry } => Some(format!(
            "ongoing-request=\"false\", expiry-date=\"{}\"",
            expiry.format("%a, %d %b %Y %H:%M:%S GMT")
        )),
    }
}

#[async_trait]
impl ArchiveStore for MockArchiveStore {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> CoreResult<Vec<ArchiveObject>> {
        self.simulate_latency().await;

        if let Some(message) = self.list_failure.read().clone() {
            self.record_call("list", prefix, false);
            return Err(CoreError::StorageError(message));
        }

        let reports_class = *self.list_reports_class.read();
        let objects = self
            .objects
            .read()
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), object)| ArchiveObject {
                key: key.clone(),
                size_bytes: object.size_bytes,
                last_modified: object.last_modified,
                storage_class: reports_class.then(|| object.storage_class.clone()),
            })
            .collect();

        self.record_call("list", prefix, true);
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> CoreResult<ObjectHead> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        self.simulate_latency().await;

        let result = if self.head_failures.read().contains(key) {
            Err(CoreError::StorageError(format!("simulated head failure for {key}")))
        } else {
            self.objects
                .read()
                .get(&(bucket.to_string(), key.to_string()))
                .map(|object| ObjectHead {
                    key: key.to_string(),
                    storage_class: object.storage_class.clone(),
                    restore: restore_header(&object.restore),
                })
                .ok_or_else(|| CoreError::not_found("object", key))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record_call("head", key, result.is_ok());
        result
    }

    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: u32,
        _tier: RetrievalTier,
    ) -> CoreResult<RestoreOutcome> {
        self.simulate_latency().await;

        if let Some(error) = self.check_failure(key) {
            self.record_call("restore", key, false);
            return Err(error);
        }
        if self.restore_failures.read().contains(key) {
            self.record_call("restore", key, false);
            return Err(CoreError::RestoreCallFailed {
                key: key.to_string(),
                message: "simulated restore failure".to_string(),
            });
        }

        let mut objects = self.objects.write();
        let Some(object) = objects.get_mut(&(bucket.to_string(), key.to_string())) else {
            drop(objects);
            self.record_call("restore", key, false);
            return Err(CoreError::RestoreCallFailed {
                key: key.to_string(),
                message: "NoSuchKey".to_string(),
            });
        };

        let outcome = if !object.storage_class.is_archival() {
            RestoreOutcome::AlreadyRestored
        } else {
            match object.restore {
                MockRestore::Ongoing { .. } => RestoreOutcome::AlreadyInProgress,
                MockRestore::Restored { .. } => RestoreOutcome::AlreadyRestored,
                MockRestore::None => {
                    object.restore = if self.config.complete_restores_immediately {
                        MockRestore::Restored {
                            expiry: Utc::now() + ChronoDuration::days(i64::from(days)),
                        }
                    } else {
                        MockRestore::Ongoing { days }
                    };
                    RestoreOutcome::Initiated
                }
            }
        };
        drop(objects);

        self.record_call("restore", key, true);
        Ok(outcome)
    }
}
