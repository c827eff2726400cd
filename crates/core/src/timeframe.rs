use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::warn;

use crate::fields::{FieldValue, PartialFields, FIELD_END_DATE, FIELD_START_DATE};

/// A concrete UTC window. Both bounds are always set; a half-open pair never
/// leaves this module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Recognizes the fixed vocabulary of relative temporal phrases anywhere in
/// the input and resolves it against `now`. Unrecognized text is `None`,
/// which callers treat as "no range implied", not as an error.
///
/// Resolution never produces a future instant: open-ended phrases ("today",
/// "this month") end at `now`, closed phrases ("yesterday", "last month")
/// cover the full previous cycle.
pub fn resolve_relative_expression(text: &str, now: DateTime<Utc>) -> Option<DateRange> {
    let normalized = normalize(text);
    let today = now.date_naive();

    let tokens: Vec<&str> = normalized.split(' ').collect();
    if let Some(days) = parse_trailing_days(&tokens) {
        let first = today - Duration::days(days - 1);
        return Some(DateRange { start: day_start(first), end: now });
    }

    if contains_phrase(&normalized, "yesterday") {
        return Some(normalize_day_bounds(today - Duration::days(1)));
    }
    if contains_phrase(&normalized, "today") {
        return Some(DateRange { start: day_start(today), end: now });
    }
    if contains_phrase(&normalized, "this week") {
        return Some(DateRange { start: day_start(week_start_day(today)), end: now });
    }
    if contains_phrase(&normalized, "last week") {
        let start = week_start_day(today) - Duration::days(7);
        return Some(DateRange { start: day_start(start), end: day_end(start + Duration::days(6)) });
    }
    if contains_phrase(&normalized, "this month") {
        return Some(DateRange { start: day_start(with_day_one(today)), end: now });
    }
    if contains_phrase(&normalized, "last month") {
        let last_day = with_day_one(today) - Duration::days(1);
        return Some(DateRange { start: day_start(with_day_one(last_day)), end: day_end(last_day) });
    }
    if contains_phrase(&normalized, "this year") {
        return Some(DateRange { start: day_start(year_start_day(today)), end: now });
    }
    if contains_phrase(&normalized, "last year") {
        let last_day = year_start_day(today) - Duration::days(1);
        return Some(DateRange {
            start: day_start(year_start_day(last_day)),
            end: day_end(last_day),
        });
    }

    None
}

/// Maps a plain calendar day to its full UTC bounds,
/// `00:00:00.000Z`..`23:59:59.999Z`.
pub fn normalize_day_bounds(day: NaiveDate) -> DateRange {
    DateRange { start: day_start(day), end: day_end(day) }
}

/// Widens a degenerate midnight-to-midnight pair (a plain calendar date with
/// no time component) to the day's full bounds so the window actually covers
/// that day. Equal instants with a time of day are left alone.
pub fn widen_plain_day(range: DateRange) -> DateRange {
    if range.start == range.end && range.start.time() == NaiveTime::MIN {
        return normalize_day_bounds(range.start.date_naive());
    }
    range
}

/// Defensive normalization against inverted model output. A swap is logged
/// but never surfaced to the user.
pub fn swap_if_inverted(range: DateRange) -> DateRange {
    if range.start > range.end {
        warn!(
            event_name = "timeframe.range_swapped",
            original_start = %range.start,
            original_end = %range.end,
            "inverted date range corrected by swapping bounds"
        );
        return DateRange { start: range.end, end: range.start };
    }
    range
}

/// Caps both bounds at `now`. Resolved and extracted instants must never sit
/// in the future.
pub fn clamp_range_to_now(range: DateRange, now: DateTime<Utc>) -> DateRange {
    DateRange { start: range.start.min(now), end: range.end.min(now) }
}

/// A lone half of a start/end pair is stripped so downstream sees either a
/// complete range or none at all. Returns the dropped field name, if any.
pub fn enforce_pairing(fields: &mut PartialFields) -> Option<&'static str> {
    let has_start = fields.get(FIELD_START_DATE).is_some();
    let has_end = fields.get(FIELD_END_DATE).is_some();

    match (has_start, has_end) {
        (true, false) => {
            fields.remove(FIELD_START_DATE);
            Some(FIELD_START_DATE)
        }
        (false, true) => {
            fields.remove(FIELD_END_DATE);
            Some(FIELD_END_DATE)
        }
        _ => None,
    }
}

pub fn range_of(fields: &PartialFields) -> Option<DateRange> {
    let start = fields.instant(FIELD_START_DATE)?;
    let end = fields.instant(FIELD_END_DATE)?;
    Some(DateRange { start, end })
}

pub fn apply_range(fields: &mut PartialFields, range: DateRange) {
    fields.insert(FIELD_START_DATE, FieldValue::Instant(range.start));
    fields.insert(FIELD_END_DATE, FieldValue::Instant(range.end));
}

/// Calendar bounds of the month containing `now`, used for prompt context.
/// The end may lie in the future; resolved ranges are clamped separately.
pub fn month_bounds(now: DateTime<Utc>) -> DateRange {
    let first = with_day_one(now.date_naive());
    let last = first.checked_add_months(Months::new(1)).unwrap_or(first) - Duration::days(1);
    DateRange { start: day_start(first), end: day_end(last) }
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

fn day_end(day: NaiveDate) -> DateTime<Utc> {
    let end = day.and_hms_milli_opt(23, 59, 59, 999).unwrap_or_else(|| day.and_time(NaiveTime::MIN));
    Utc.from_utc_datetime(&end)
}

fn week_start_day(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

fn with_day_one(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn year_start_day(day: NaiveDate) -> NaiveDate {
    with_day_one(day.with_month(1).unwrap_or(day))
}

fn parse_trailing_days(tokens: &[&str]) -> Option<i64> {
    tokens.windows(3).find_map(|window| match window {
        [lead, count, unit]
            if matches!(*lead, "past" | "last") && matches!(*unit, "day" | "days") =>
        {
            count.parse::<i64>().ok().filter(|days| *days >= 1)
        }
        _ => None,
    })
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    format!(" {normalized} ").contains(&format!(" {phrase} "))
}

fn normalize(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            cleaned.extend(ch.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
