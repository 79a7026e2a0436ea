//! Daily subscription quota
//!
//! The downloader gets at most N submissions per calendar day. When the
//! counter is exhausted the API surfaces 429 while internal callers skip
//! quietly and log.

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;

struct QuotaState {
    day: NaiveDate,
    used: u32,
}

pub struct DailyQuota {
    limit: u32,
    state: Mutex<QuotaState>,
}

impl DailyQuota {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new(QuotaState {
                day: Utc::now().date_naive(),
                used: 0,
            }),
        }
    }

    /// Try to take one unit; false means the day's budget is spent.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Utc::now().date_naive())
    }

    fn try_acquire_at(&self, today: NaiveDate) -> bool {
        let mut state = self.state.lock();
        if state.day != today {
            state.day = today;
            state.used = 0;
        }
        if state.used >= self.limit {
            return false;
        }
        state.used += 1;
        true
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        let state = self.state.lock();
        if state.day == Utc::now().date_naive() {
            self.limit.saturating_sub(state.used)
        } else {
            self.limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exhaustion_and_daily_reset() {
        let quota = DailyQuota::new(2);
        let day1 = NaiveDate::from_ymd_opt(2026, 7, 1).expect("valid date");
        let day2 = NaiveDate::from_ymd_opt(2026, 7, 2).expect("valid date");

        assert!(quota.try_acquire_at(day1));
        assert!(quota.try_acquire_at(day1));
        assert!(!quota.try_acquire_at(day1));
        // New day resets the counter.
        assert!(quota.try_acquire_at(day2));
    }

    #[test]
    fn test_zero_limit_blocks_everything() {
        let quota = DailyQuota::new(0);
        assert!(!quota.try_acquire());
        assert_eq!(quota.remaining(), 0);
    }
}
