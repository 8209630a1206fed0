//! Object-storage restore vocabulary: storage classes, retrieval tiers, the
//! per-object restore indicator, and the aggregate [`RestoreStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Storage class reported by the object-storage service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Standard,
    StandardIa,
    OnezoneIa,
    IntelligentTiering,
    ReducedRedundancy,
    GlacierIr,
    Glacier,
    DeepArchive,
    Other(String),
}

impl StorageClass {
    /// Parses the service's wire name. Unknown names are preserved.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "STANDARD" => Self::Standard,
            "STANDARD_IA" => Self::StandardIa,
            "ONEZONE_IA" => Self::OnezoneIa,
            "INTELLIGENT_TIERING" => Self::IntelligentTiering,
            "REDUCED_REDUNDANCY" => Self::ReducedRedundancy,
            "GLACIER_IR" => Self::GlacierIr,
            "GLACIER" => Self::Glacier,
            "DEEP_ARCHIVE" => Self::DeepArchive,
            _ => Self::Other(value.to_string()),
        }
    }

    /// Returns the service's wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Standard => "STANDARD",
            Self::StandardIa => "STANDARD_IA",
            Self::OnezoneIa => "ONEZONE_IA",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::ReducedRedundancy => "REDUCED_REDUNDANCY",
            Self::GlacierIr => "GLACIER_IR",
            Self::Glacier => "GLACIER",
            Self::DeepArchive => "DEEP_ARCHIVE",
            Self::Other(name) => name,
        }
    }

    /// True for classes that require an explicit restore before reads.
    ///
    /// `GLACIER_IR` is instantly readable and therefore not archival.
    #[must_use]
    pub fn is_archival(&self) -> bool {
        matches!(self, Self::Glacier | Self::DeepArchive)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StorageClass {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StorageClass {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// Retrieval speed tier for restore requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalTier {
    #[default]
    Standard,
    Expedited,
    Bulk,
}

impl RetrievalTier {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Expedited => "expedited",
            Self::Bulk => "bulk",
        }
    }
}

impl fmt::Display for RetrievalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "expedited" => Ok(Self::Expedited),
            "bulk" => Ok(Self::Bulk),
            _ => Err(CoreError::ValidationError(format!(
                "unknown retrieval tier `{s}` (expected standard, expedited or bulk)"
            ))),
        }
    }
}

/// Parsed restore indicator header, e.g.
/// `ongoing-request="false", expiry-date="Fri, 21 Dec 2012 00:00:00 GMT"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreIndicator {
    /// True while the restore is still running.
    pub ongoing: bool,
    /// When the restored copy expires (present once the restore finished).
    pub expiry: Option<DateTime<Utc>>,
}

impl RestoreIndicator {
    /// Parses the header. Returns `None` when no `ongoing-request` field is present.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let ongoing = match quoted_value(header, "ongoing-request")?.trim() {
            v if v.eq_ignore_ascii_case("true") => true,
            v if v.eq_ignore_ascii_case("false") => false,
            _ => return None,
        };
        let expiry = quoted_value(header, "expiry-date")
            .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Some(Self { ongoing, expiry })
    }
}

fn quoted_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("{key}=\"");
    let start = header.find(&needle)? + needle.len();
    let rest = &header[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Restore state of a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectRestoreState {
    /// Archival object with no restore on record.
    NotRequested,
    /// Restore accepted but not finished.
    InProgress,
    /// Readable now (restored copy, or an instantly readable class).
    Restored,
}

impl ObjectRestoreState {
    /// Classifies an object from its storage class and raw restore header.
    ///
    /// Archival objects keep their class after restore, so only the header
    /// tells a finished restore apart from one never requested.
    #[must_use]
    pub fn classify(class: &StorageClass, restore_header: Option<&str>) -> Self {
        if !class.is_archival() {
            return Self::Restored;
        }
        match restore_header.and_then(RestoreIndicator::parse) {
            None => Self::NotRequested,
            Some(indicator) if indicator.ongoing => Self::InProgress,
            Some(_) => Self::Restored,
        }
    }
}

/// Aggregate restore progress for one repository, recomputed on every check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreStatus {
    /// Objects under the repository path.
    pub total: usize,
    /// Objects readable now.
    pub restored: usize,
    /// Objects with a restore running.
    pub in_progress: usize,
    /// Archival objects with no restore on record.
    pub not_requested: usize,
    /// Objects whose metadata lookup failed (counted as not restored).
    pub lookup_errors: usize,
    /// True iff `total > 0` and every object is restored.
    pub complete: bool,
    /// Keys that still need a restore call (not requested or lookup failed).
    #[serde(skip)]
    pub pending_keys: Vec<String>,
}

impl RestoreStatus {
    /// Folds one object's classification into the aggregate.
    ///
    /// Order independent; `complete` is recomputed on every call.
    pub fn record(&mut self, key: &str, state: Option<ObjectRestoreState>) {
        self.total += 1;
        match state {
            Some(ObjectRestoreState::Restored) => self.restored += 1,
            Some(ObjectRestoreState::InProgress) => self.in_progress += 1,
            Some(ObjectRestoreState::NotRequested) => {
                self.not_requested += 1;
                self.pending_keys.push(key.to_string());
            }
            None => {
                self.lookup_errors += 1;
                self.pending_keys.push(key.to_string());
            }
        }
        self.complete = self.total > 0 && self.restored == self.total;
    }

    /// True when no objects were found. Never treated as success.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Objects not yet readable.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.total - self.restored
    }
}
