//! Weekly time-at-home summary.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::PresenceSession;

const MAX_HOURS_PER_SESSION: f64 = 24.0;
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyStats {
    pub week_start: String,
    pub week_end: String,
    /// Hours at home keyed by `YYYY-MM-DD`, Monday through Sunday.
    pub daily_hours: BTreeMap<String, f64>,
    pub weekly_total: f64,
    pub weekly_average: f64,
}

/// Summarizes the Monday-to-Sunday week containing `now`.
///
/// Sessions are bucketed by the local date they opened on. Open sessions run
/// until `now`, and no single session contributes more than 24 hours.
pub fn weekly_summary(sessions: &[PresenceSession], now: DateTime<FixedOffset>) -> WeeklyStats {
    let offset = *now.offset();
    let today = now.date_naive();
    let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let sunday = monday + Duration::days(6);

    let mut daily_hours: BTreeMap<String, f64> = (0..7)
        .map(|day| (format_date(monday + Duration::days(day)), 0.0))
        .collect();

    for session in sessions {
        let opened = session.opened_at.with_timezone(&offset);
        let opened_on = opened.date_naive();
        if opened_on < monday || opened_on > sunday {
            continue;
        }

        let closed = session
            .closed_at
            .map(|closed| closed.with_timezone(&offset))
            .unwrap_or(now);
        let hours = (closed - opened).num_seconds().max(0) as f64 / 3600.0;
        let hours = hours.min(MAX_HOURS_PER_SESSION);

        if let Some(total) = daily_hours.get_mut(&format_date(opened_on)) {
            *total = round_tenth(*total + hours);
        }
    }

    let weekly_total: f64 = daily_hours.values().sum();
    WeeklyStats {
        week_start: format_date(monday),
        week_end: format_date(sunday),
        daily_hours,
        weekly_total: round_tenth(weekly_total),
        weekly_average: round_tenth(weekly_total / 7.0),
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
