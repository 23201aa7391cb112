//! Regular trading session window in the exchange's fixed UTC offset.

use crate::config::MarketHoursConfig;
use crate::domain::TimeMs;
use chrono::{Datelike, FixedOffset, NaiveTime, Offset, Utc, Weekday};

#[derive(Debug, Clone, Copy)]
pub struct MarketHours {
    cfg: MarketHoursConfig,
    offset: FixedOffset,
}

impl MarketHours {
    pub fn new(cfg: MarketHoursConfig) -> Self {
        let offset = FixedOffset::east_opt(cfg.utc_offset_hours * 3600).unwrap_or(Utc.fix());
        Self { cfg, offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Weekday inside [open, close). Always true when enforcement is off.
    pub fn is_open(&self, now: TimeMs) -> bool {
        if !self.cfg.enforced {
            return true;
        }
        let Some(utc) = now.to_datetime() else {
            return false;
        };
        let local = utc.with_timezone(&self.offset);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = local.time();
        t >= self.cfg.open && t < self.cfg.close
    }

    /// Session open of the trading day containing `now`.
    pub fn session_open(&self, now: TimeMs) -> TimeMs {
        let midnight = now.start_of_day(self.offset);
        let open_ms = self
            .cfg
            .open
            .signed_duration_since(NaiveTime::MIN)
            .num_milliseconds();
        midnight.saturating_add_ms(open_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kst(y: i32, m: u32, d: u32, h: u32, min: u32) -> TimeMs {
        let offset = FixedOffset::east_opt(9 * 3600).unwrap();
        TimeMs::new(
            offset
                .with_ymd_and_hms(y, m, d, h, min, 0)
                .unwrap()
                .timestamp_millis(),
        )
    }

    #[test]
    fn test_session_window() {
        let hours = MarketHours::new(MarketHoursConfig::default());
        // 2024-03-04 is a Monday
        assert!(!hours.is_open(kst(2024, 3, 4, 8, 59)));
        assert!(hours.is_open(kst(2024, 3, 4, 9, 0)));
        assert!(hours.is_open(kst(2024, 3, 4, 15, 29)));
        assert!(!hours.is_open(kst(2024, 3, 4, 15, 30)));
    }

    #[test]
    fn test_weekend_closed() {
        let hours = MarketHours::new(MarketHoursConfig::default());
        assert!(!hours.is_open(kst(2024, 3, 9, 10, 0)));
        assert!(!hours.is_open(kst(2024, 3, 10, 10, 0)));
    }

    #[test]
    fn test_not_enforced_is_always_open() {
        let hours = MarketHours::new(MarketHoursConfig {
            enforced: false,
            ..MarketHoursConfig::default()
        });
        assert!(hours.is_open(kst(2024, 3, 9, 3, 0)));
    }

    #[test]
    fn test_session_open() {
        let hours = MarketHours::new(MarketHoursConfig::default());
        assert_eq!(hours.session_open(kst(2024, 3, 4, 13, 17)), kst(2024, 3, 4, 9, 0));
        // 08:00 KST is still 23:00 UTC of the previous day
        assert_eq!(hours.session_open(kst(2024, 3, 5, 8, 0)), kst(2024, 3, 5, 9, 0));
    }
}
