use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::date_range::DateRange;
use crate::error::{CoreError, CoreResult};

/// Prefix of indices mounted out of a thawed repository.
pub const MOUNTED_INDEX_PREFIX: &str = "thawed-";

/// Prefix of the per-repository lifecycle policy created for restored data.
pub const RESTORE_POLICY_PREFIX: &str = "deepfreeze-thaw-";

/// Lifecycle state of an archival repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryState {
    /// Repository is attached and its objects are instantly readable.
    Active,
    /// Objects live in the archival tier; nothing is mounted.
    Frozen,
    /// Restore requested; waiting for the object-storage service.
    Thawing,
    /// Objects restored and the repository is mounted.
    Thawed,
    /// Restore window elapsed; awaiting cleanup back to FROZEN.
    Expired,
}

impl RepositoryState {
    /// Returns the canonical lowercase string persisted in the status store.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Thawing => "thawing",
            Self::Thawed => "thawed",
            Self::Expired => "expired",
        }
    }

    /// Returns true if the state machine allows `self -> next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: RepositoryState) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Frozen)
                | (Self::Frozen, Self::Thawing)
                | (Self::Expired, Self::Thawing)
                | (Self::Thawing, Self::Thawed)
                | (Self::Thawed, Self::Expired)
                | (Self::Thawed, Self::Frozen)
                | (Self::Expired, Self::Frozen)
        )
    }

    /// Returns true if a new thaw may start from this state.
    #[must_use]
    pub const fn is_thawable(&self) -> bool {
        matches!(self, Self::Frozen | Self::Expired)
    }
}

impl fmt::Display for RepositoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepositoryState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "frozen" => Ok(Self::Frozen),
            "thawing" => Ok(Self::Thawing),
            "thawed" => Ok(Self::Thawed),
            "expired" => Ok(Self::Expired),
            _ => Err(CoreError::ValidationError(format!(
                "unknown repository state `{s}`"
            ))),
        }
    }
}

/// An archival snapshot repository tracked by the status store.
///
/// Mutated only through the transition methods below, which enforce the
/// state table and keep `expires_at` / `is_mounted` consistent with the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Unique repository name (also the status-store document id).
    pub name: String,
    /// Bucket holding the repository's objects.
    pub bucket: String,
    /// Base path of the repository within the bucket.
    pub base_path: String,
    /// Lifecycle state.
    pub state: RepositoryState,
    /// When restored data reverts to archival-only access.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the repository is registered with the search cluster.
    #[serde(default)]
    pub is_mounted: bool,
    /// Earliest index timestamp held by the repository, if known.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Latest index timestamp held by the repository, if known.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl Repository {
    /// Constructs a new ACTIVE, mounted repository record.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
            base_path: base_path.into(),
            state: RepositoryState::Active,
            expires_at: None,
            is_mounted: true,
            start: None,
            end: None,
        }
    }

    /// Sets the time span covered by the repository's indices.
    #[must_use]
    pub fn with_coverage(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Sets the initial state (used when registering already-frozen repositories).
    #[must_use]
    pub fn with_state(mut self, state: RepositoryState) -> Self {
        self.state = state;
        if state != RepositoryState::Active {
            self.is_mounted = false;
        }
        self
    }

    /// Object-key prefix under which the repository's objects live.
    #[must_use]
    pub fn object_prefix(&self) -> String {
        let trimmed = self.base_path.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        }
    }

    /// Name under which `index` is mounted from this repository.
    #[must_use]
    pub fn mounted_index_name(&self, index: &str) -> String {
        format!("{MOUNTED_INDEX_PREFIX}{}--{index}", self.name)
    }

    /// Pattern matching every index mounted from this repository.
    #[must_use]
    pub fn mounted_index_pattern(&self) -> String {
        format!("{MOUNTED_INDEX_PREFIX}{}--*", self.name)
    }

    /// Name of the per-repository restore lifecycle policy.
    #[must_use]
    pub fn restore_policy_name(&self) -> String {
        format!("{RESTORE_POLICY_PREFIX}{}", self.name)
    }

    /// Returns true if the repository's coverage intersects `range`.
    ///
    /// Repositories with unknown coverage never match.
    #[must_use]
    pub fn covers(&self, range: &DateRange) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => range.overlaps(start, end),
            _ => false,
        }
    }

    /// Returns true if THAWED and `expires_at` is at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state == RepositoryState::Thawed && self.expires_at.is_some_and(|at| at <= now)
    }

    fn transition_to(&mut self, next: RepositoryState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::invalid_state(format!(
                "repository `{}` cannot move from {} to {}",
                self.name, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// ACTIVE -> FROZEN.
    pub fn freeze(&mut self) -> CoreResult<()> {
        self.transition_to(RepositoryState::Frozen)?;
        self.is_mounted = false;
        self.expires_at = None;
        Ok(())
    }

    /// FROZEN | EXPIRED -> THAWING, setting `expires_at = now + duration_days`.
    pub fn begin_thaw(&mut self, now: DateTime<Utc>, duration_days: u32) -> CoreResult<()> {
        if duration_days == 0 {
            return Err(CoreError::ValidationError(
                "thaw duration must be at least one day".to_string(),
            ));
        }
        self.transition_to(RepositoryState::Thawing)?;
        self.expires_at = Some(now + Duration::days(i64::from(duration_days)));
        self.is_mounted = false;
        Ok(())
    }

    /// THAWING -> THAWED. Callers mount before persisting.
    pub fn mark_thawed(&mut self) -> CoreResult<()> {
        self.transition_to(RepositoryState::Thawed)?;
        self.is_mounted = true;
        Ok(())
    }

    /// THAWED -> EXPIRED. `expires_at` is kept until cleanup completes.
    pub fn mark_expired(&mut self) -> CoreResult<()> {
        self.transition_to(RepositoryState::Expired)?;
        self.is_mounted = false;
        Ok(())
    }

    /// THAWED | EXPIRED -> FROZEN, clearing `expires_at`.
    pub fn refreeze(&mut self) -> CoreResult<()> {
        self.transition_to(RepositoryState::Frozen)?;
        self.is_mounted = false;
        self.expires_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frozen() -> Repository {
        Repository::new("deepfreeze-000001", "archive", "snapshots/000001")
            .with_state(RepositoryState::Frozen)
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            RepositoryState::Active,
            RepositoryState::Frozen,
            RepositoryState::Thawing,
            RepositoryState::Thawed,
            RepositoryState::Expired,
        ] {
            assert_eq!(state.as_str().parse::<RepositoryState>().unwrap(), state);
        }
        assert!("melting".parse::<RepositoryState>().is_err());
    }

    #[test]
    fn test_begin_thaw_sets_future_expiry() {
        let mut repo = frozen();
        let now = Utc::now();
        repo.begin_thaw(now, 7).unwrap();
        assert_eq!(repo.state, RepositoryState::Thawing);
        assert_eq!(repo.expires_at, Some(now + Duration::days(7)));
        assert!(!repo.is_mounted);
    }

    #[test]
    fn test_begin_thaw_rejects_zero_days() {
        let mut repo = frozen();
        assert!(repo.begin_thaw(Utc::now(), 0).is_err());
        assert_eq!(repo.state, RepositoryState::Frozen);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut repo = frozen();
        assert!(repo.mark_thawed().is_err());
        assert!(repo.mark_expired().is_err());

        let mut active = Repository::new("r", "b", "p");
        assert!(active.begin_thaw(Utc::now(), 1).is_err());
    }

    #[test]
    fn test_full_cycle_clears_expiry() {
        let mut repo = frozen();
        repo.begin_thaw(Utc::now(), 3).unwrap();
        repo.mark_thawed().unwrap();
        assert!(repo.is_mounted);
        repo.mark_expired().unwrap();
        assert!(!repo.is_mounted);
        assert!(repo.expires_at.is_some());
        repo.refreeze().unwrap();
        assert_eq!(repo.state, RepositoryState::Frozen);
        assert!(repo.expires_at.is_none());
    }

    #[test]
    fn test_expired_can_rethaw() {
        let mut repo = frozen();
        repo.begin_thaw(Utc::now(), 1).unwrap();
        repo.mark_thawed().unwrap();
        repo.mark_expired().unwrap();
        assert!(repo.state.is_thawable());
        repo.begin_thaw(Utc::now(), 2).unwrap();
        assert_eq!(repo.state, RepositoryState::Thawing);
    }

    #[test]
    fn test_is_expired_at() {
        let mut repo = frozen();
        let now = Utc::now();
        repo.begin_thaw(now - Duration::days(2), 1).unwrap();
        assert!(!repo.is_expired_at(now), "THAWING is never reported expired");
        repo.mark_thawed().unwrap();
        assert!(repo.is_expired_at(now));
    }

    #[test]
    fn test_naming_helpers() {
        let repo = frozen();
        assert_eq!(repo.object_prefix(), "snapshots/000001/");
        assert_eq!(
            repo.mounted_index_name("logs-2024.01.01"),
            "thawed-deepfreeze-000001--logs-2024.01.01"
        );
        assert_eq!(repo.mounted_index_pattern(), "thawed-deepfreeze-000001--*");
        assert_eq!(repo.restore_policy_name(), "deepfreeze-thaw-deepfreeze-000001");

        let root = Repository::new("r", "b", "/");
        assert_eq!(root.object_prefix(), "");
    }
}
