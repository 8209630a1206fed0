use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::date_range::DateRange;
use crate::error::CoreError;
use crate::ids::RequestId;
use crate::restore::RetrievalTier;

/// Status of a thaw request. Independent of, but correlated with, the
/// per-repository states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThawStatus {
    InProgress,
    Completed,
    Failed,
    Refrozen,
}

impl ThawStatus {
    /// Returns the canonical snake_case string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refrozen => "refrozen",
        }
    }

    /// Requests still needing operator attention (listed by default).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::InProgress | Self::Failed)
    }
}

impl fmt::Display for ThawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThawStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refrozen" => Ok(Self::Refrozen),
            _ => Err(CoreError::ValidationError(format!(
                "unknown thaw request status `{s}`"
            ))),
        }
    }
}

/// A request to bring one or more repositories back from the archival tier.
///
/// Append-only: records are never deleted, only their `status` changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThawRequest {
    /// Generated request id (also the status-store document id).
    pub request_id: RequestId,
    /// Repositories included, in selection order, without duplicates.
    pub repos: Vec<String>,
    /// Request status.
    pub status: ThawStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Start of the index range to mount, if any.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// End of the index range to mount, if any.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Restore retention requested, used to resume the thaw.
    #[serde(default)]
    pub duration_days: Option<u32>,
    /// Retrieval tier requested, used to resume the thaw.
    #[serde(default)]
    pub retrieval_tier: Option<RetrievalTier>,
}

impl ThawRequest {
    /// Constructs a new `in_progress` request with a fresh id.
    #[must_use]
    pub fn new<I, S>(repos: I, range: Option<DateRange>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for repo in repos {
            let repo = repo.into();
            if !unique.contains(&repo) {
                unique.push(repo);
            }
        }

        Self {
            request_id: RequestId::new(),
            repos: unique,
            status: ThawStatus::InProgress,
            created_at: Utc::now(),
            start_date: range.map(|r| r.start),
            end_date: range.map(|r| r.end),
            duration_days: None,
            retrieval_tier: None,
        }
    }

    /// Records the restore parameters so the thaw can be resumed.
    #[must_use]
    pub fn with_restore_params(mut self, duration_days: u32, tier: RetrievalTier) -> Self {
        self.duration_days = Some(duration_days);
        self.retrieval_tier = Some(tier);
        self
    }

    /// Index range to mount. `None` means mount everything available.
    #[must_use]
    pub fn date_range(&self) -> Option<DateRange> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start <= end => Some(DateRange { start, end }),
            _ => None,
        }
    }
}
