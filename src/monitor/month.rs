use crate::monitor::TimeAdjuster;

/// Last observed adjusted month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonthState {
    #[default]
    Uninitialized,
    /// Zero-based month index
    Month(u32),
}

/// Detects when consecutive blocks fall in different calendar months.
///
/// Timestamps must be fed in non-decreasing order for each month to be
/// reported once.
#[derive(Debug, Default)]
pub struct MonthBoundaryTracker {
    state: MonthState,
}

impl MonthBoundaryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MonthState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state != MonthState::Uninitialized
    }

    /// Returns true when `timestamp` starts a new month. The first observed
    /// block only initializes the tracker.
    pub fn classify(&mut self, timestamp: u32, adjuster: &TimeAdjuster) -> bool {
        let month = adjuster.month_index(timestamp);

        match self.state {
            MonthState::Uninitialized => {
                self.state = MonthState::Month(month);
                false
            }
            MonthState::Month(current) if current == month => false,
            MonthState::Month(_) => {
                self.state = MonthState::Month(month);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn unix(y: i32, m: u32, d: u32, h: u32) -> u32 {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().timestamp() as u32
    }

    #[test]
    fn test_first_block_initializes_without_crossing() {
        let mut tracker = MonthBoundaryTracker::new();
        let adjuster = TimeAdjuster::new(0);

        assert!(!tracker.is_initialized());
        assert!(!tracker.classify(unix(2024, 5, 31, 23), &adjuster));
        assert_eq!(tracker.state(), MonthState::Month(4));
    }

    #[test]
    fn test_crossings_only_on_month_change() {
        let mut tracker = MonthBoundaryTracker::new();
        let adjuster = TimeAdjuster::new(0);

        let blocks = [
            (unix(2024, 1, 10, 0), false),
            (unix(2024, 1, 20, 0), false),
            (unix(2024, 2, 1, 0), true),
            (unix(2024, 2, 1, 1), false),
            (unix(2024, 2, 28, 0), false),
            (unix(2024, 4, 2, 0), true),
            (unix(2025, 1, 1, 0), true),
        ];

        for (timestamp, expected) in blocks {
            assert_eq!(tracker.classify(timestamp, &adjuster), expected, "timestamp {}", timestamp);
        }
    }

    #[test]
    fn test_offset_moves_boundary() {
        let mut tracker = MonthBoundaryTracker::new();
        let adjuster = TimeAdjuster::new(2);

        assert!(!tracker.classify(unix(2024, 1, 31, 21), &adjuster));
        assert!(tracker.classify(unix(2024, 1, 31, 23), &adjuster));
        assert_eq!(tracker.state(), MonthState::Month(1));
    }
}
