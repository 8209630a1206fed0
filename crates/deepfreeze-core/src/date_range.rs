use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Inclusive UTC time range used to pick repositories and indices to thaw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Range start (inclusive).
    pub start: DateTime<Utc>,
    /// Range end (inclusive).
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Creates a range, rejecting `start > end`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ValidationError` when the range is inverted.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if start > end {
            return Err(CoreError::ValidationError(format!(
                "date range start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Returns true if `ts` falls inside the range.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Returns true if `[start, end]` intersects this range.
    #[must_use]
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.end && end >= self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(DateRange::new(day(5), day(1)).is_err());
    }

    #[test]
    fn test_contains_is_inclusive() {
        let range = DateRange::new(day(1), day(5)).unwrap();
        assert!(range.contains(day(1)));
        assert!(range.contains(day(5)));
        assert!(!range.contains(day(5) + Duration::seconds(1)));
    }

    #[test]
    fn test_overlaps() {
        let range = DateRange::new(day(10), day(20)).unwrap();
        assert!(range.overlaps(day(5), day(10)));
        assert!(range.overlaps(day(12), day(15)));
        assert!(range.overlaps(day(1), day(30)));
        assert!(!range.overlaps(day(1), day(9)));
        assert!(!range.overlaps(day(21), day(25)));
    }
}
