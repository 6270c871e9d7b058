// Call quota - daily limit on outbound calls to a metered API
//
// The counter belongs to the calendar day on which it started counting.
// The first check made on a later local date starts a fresh day, however
// long the process was idle around midnight.

use chrono::{Local, NaiveDate};

use crate::sources::ScrapeError;

/// Daily call counter with an optional limit
#[derive(Debug, Clone)]
pub struct CallQuota {
    limit: Option<u32>,
    calls: u32,
    day: NaiveDate,
}

impl CallQuota {
    /// Creates a quota starting today; `None` means unlimited
    pub fn new(limit: Option<u32>) -> Self {
        Self::starting(limit, Local::now().date_naive())
    }

    pub(crate) fn starting(limit: Option<u32>, day: NaiveDate) -> Self {
        CallQuota {
            limit,
            calls: 0,
            day,
        }
    }

    /// Checks whether another call may be made today
    ///
    /// # Errors
    /// `CallLimitExceeded` once `limit` calls have been recorded today.
    pub fn check(&mut self) -> Result<(), ScrapeError> {
        self.check_on(Local::now().date_naive())
    }

    /// Same as [`check`](Self::check) for an explicit local date
    pub fn check_on(&mut self, today: NaiveDate) -> Result<(), ScrapeError> {
        if today != self.day {
            self.day = today;
            self.calls = 0;
        }

        match self.limit {
            Some(limit) if self.calls >= limit => Err(ScrapeError::CallLimitExceeded { limit }),
            _ => Ok(()),
        }
    }

    /// Counts one call against today's quota
    pub fn record(&mut self) {
        self.calls = self.calls.saturating_add(1);
    }

    /// Calls made today
    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_limit_is_enforced() {
        let mut quota = CallQuota::starting(Some(2), day(1));

        for _ in 0..2 {
            quota.check_on(day(1)).unwrap();
            quota.record();
        }

        assert!(matches!(
            quota.check_on(day(1)),
            Err(ScrapeError::CallLimitExceeded { limit: 2 })
        ));
        assert_eq!(quota.calls(), 2);
    }

    #[test]
    fn test_new_day_resets_counter() {
        let mut quota = CallQuota::starting(Some(1), day(1));
        quota.record();
        assert!(quota.check_on(day(1)).is_err());

        // Several idle days later the quota is available again
        assert!(quota.check_on(day(4)).is_ok());
        assert_eq!(quota.calls(), 0);
    }

    #[test]
    fn test_unlimited() {
        let mut quota = CallQuota::starting(None, day(1));
        for _ in 0..10_000 {
            quota.record();
        }
        assert!(quota.check_on(day(1)).is_ok());
        assert_eq!(quota.limit(), None);
    }
}
