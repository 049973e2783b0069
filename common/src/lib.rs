use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod level;
pub use level::LogLevel;

/// Absolute query window. Endpoints are inclusive; a missing endpoint
/// leaves that side unbounded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
	pub start: Option<DateTime<Utc>>,
	pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
	pub fn from_millis(start: Option<i64>, end: Option<i64>) -> Self {
		Self {
			start: start.and_then(DateTime::from_timestamp_millis),
			end: end.and_then(DateTime::from_timestamp_millis),
		}
	}

	/// Window width in seconds, when both endpoints are present.
	pub fn span_seconds(&self) -> Option<i64> {
		match (self.start, self.end) {
			(Some(s), Some(e)) if e > s => Some((e - s).num_seconds()),
			_ => None,
		}
	}
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QueryStats {
	pub execution_time_ms: i64,
	pub rows_read: i64,
	pub bytes_read: i64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_time_range_span() {
		let r = TimeRange::from_millis(Some(1_700_000_000_000), Some(1_700_000_060_000));
		assert_eq!(r.span_seconds(), Some(60));
		let r = TimeRange::from_millis(None, Some(1_700_000_060_000));
		assert_eq!(r.span_seconds(), None);
		let r = TimeRange::from_millis(Some(2_000), Some(1_000));
		assert_eq!(r.span_seconds(), None);
	}
}
