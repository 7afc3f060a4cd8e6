use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

use crate::domain::verification::Horizon;

const TW_OFFSET_SECS: i32 = 8 * 3600;

// TWSE closes at 13:30 local time; closes and institutional flows settle a bit later.
const CLOSE_CUTOFF_HOUR_TW: u32 = 14;
const CLOSE_CUTOFF_MINUTE_TW: u32 = 0;

/// Weekends plus a holiday set. Fixed-date closures are seeded for the years the
/// ledger realistically spans; lunar holidays come from `TW_MARKET_HOLIDAYS`.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: HashSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Fixed holidays plus `TW_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD"`.
    pub fn from_env() -> Self {
        let mut out = fixed_holidays();
        if let Ok(s) = std::env::var("TW_MARKET_HOLIDAYS") {
            out.extend(parse_holiday_list(&s));
        }
        Self { holidays: out }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.holidays.contains(&date)
    }

    /// `date` itself if it trades, else the next trading day.
    pub fn roll_forward(&self, mut date: NaiveDate) -> NaiveDate {
        while !self.is_trading_day(date) {
            date += Duration::days(1);
        }
        date
    }

    pub fn roll_back(&self, mut date: NaiveDate) -> NaiveDate {
        while !self.is_trading_day(date) {
            date -= Duration::days(1);
        }
        date
    }

    /// Advances `n` trading days from a trading day.
    pub fn add_trading_days(&self, date: NaiveDate, n: u32) -> NaiveDate {
        let mut d = self.roll_forward(date);
        for _ in 0..n {
            d = self.roll_forward(d + Duration::days(1));
        }
        d
    }

    /// T+0 is the batch date (or the next session if the batch was cut on a closed day);
    /// T+N counts N sessions from there.
    pub fn horizon_date(&self, batch_date: NaiveDate, horizon: Horizon) -> NaiveDate {
        self.add_trading_days(batch_date, horizon.offset())
    }
}

pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
    calendar: &TradingCalendar,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid --as-of-date {s:?}, expected YYYY-MM-DD"));
    }

    let tw = chrono::FixedOffset::east_opt(TW_OFFSET_SECS).context("invalid UTC+8 offset")?;
    let now_tw = now_utc.with_timezone(&tw);

    let cutoff_reached =
        (now_tw.hour(), now_tw.minute()) >= (CLOSE_CUTOFF_HOUR_TW, CLOSE_CUTOFF_MINUTE_TW);
    let mut date = now_tw.date_naive();
    if !cutoff_reached {
        date -= Duration::days(1);
    }

    Ok(calendar.roll_back(date))
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn fixed_holidays() -> HashSet<NaiveDate> {
    // New Year, Peace Memorial Day, Children's Day, National Day.
    let mut out = HashSet::new();
    for y in 2024..=2030 {
        for (m, d) in [(1, 1), (2, 28), (4, 4), (10, 10)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }
    out
}

fn parse_holiday_list(s: &str) -> Vec<NaiveDate> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| match NaiveDate::parse_from_str(p, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => {
                tracing::warn!(value = %p, "ignoring malformed TW_MARKET_HOLIDAYS entry");
                None
            }
        })
        .collect()
}
