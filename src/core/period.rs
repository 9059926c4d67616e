//! Subscription period calculator (§4.F, §10.3). Grounded in
//! `calculate_next_credit_date`: monthly cycles even for yearly plans,
//! clamping `billing_day` to the target month's last day and keeping the
//! anchor's time-of-day.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 { (year - 1, 12) } else { (year, month - 1) }
}

/// Builds the billing-day occurrence inside `(year, month)`, clamped to the
/// month's last day, at `(hour, minute)` with seconds zeroed.
fn occurrence_in(year: i32, month: u32, billing_day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    let day = billing_day.min(days_in_month(year, month));
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).single().expect("valid calendar date")
}

/// The next monthly occurrence of `billing_day` strictly after `from`'s
/// month, keeping `from`'s time-of-day. Used both for `next_credit_date`
/// advancement and as `period_end` in [`containing_period`].
pub fn next_monthly_date(from: DateTime<Utc>, billing_day: u32) -> DateTime<Utc> {
    let (year, month) = next_month(from.year(), from.month());
    occurrence_in(year, month, billing_day, from.hour(), from.minute())
}

/// Places timestamp `t` into the `[period_start, period_end)` cycle defined
/// by `billing_day`: `period_start` is the most recent billing-day
/// occurrence at or before `t`, `period_end` the next one.
pub fn containing_period(t: DateTime<Utc>, billing_day: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let this_month_occurrence = occurrence_in(t.year(), t.month(), billing_day, t.hour(), t.minute());

    if this_month_occurrence <= t {
        let period_end = next_monthly_date(this_month_occurrence, billing_day);
        (this_month_occurrence, period_end)
    } else {
        let (py, pm) = previous_month(t.year(), t.month());
        let period_start = occurrence_in(py, pm, billing_day, t.hour(), t.minute());
        (period_start, this_month_occurrence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clamps_billing_day_to_short_months() {
        let from = Utc.with_ymd_and_hms(2026, 1, 31, 10, 0, 0).unwrap();
        let next = next_monthly_date(from, 31);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 28, 10, 0, 0).unwrap());
    }

    #[test]
    fn containing_period_before_this_months_occurrence() {
        let t = Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap();
        let (start, end) = containing_period(t, 15);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 2, 15, 9, 30, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn containing_period_after_this_months_occurrence() {
        let t = Utc.with_ymd_and_hms(2026, 3, 20, 9, 30, 0).unwrap();
        let (start, end) = containing_period(t, 15);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 4, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn yearly_anchor_rolls_across_year_boundary() {
        let from = Utc.with_ymd_and_hms(2026, 12, 15, 8, 0, 0).unwrap();
        assert_eq!(next_monthly_date(from, 15), Utc.with_ymd_and_hms(2027, 1, 15, 8, 0, 0).unwrap());
    }
}
