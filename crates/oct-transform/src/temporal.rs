//! Temporal features derived from the collision date and clock time.
//!
//! Collision times are local clock readings without a zone. Daylight saving
//! is decided from the calendar rule in force for the year, and the zone
//! label and UTC timestamp follow from it.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use oct_common::{opt_string_column, parse_i64, set_bool_column, set_i64_column, set_string_column};
use oct_model::{DstRule, RushHourPolicy, TemporalConfig, TimeInterval};
use tracing::{debug, warn};

use crate::error::{Result, TransformError};
use crate::frame::EntityFrame;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];
const ISO_DATE: &str = "%Y-%m-%d";

/// Rows whose date/time combination did not parse, per source year.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemporalReport {
    pub invalid_by_year: BTreeMap<i32, u64>,
}

impl TemporalReport {
    pub fn total_invalid(&self) -> u64 {
        self.invalid_by_year.values().sum()
    }
}

/// Formats an `HHMM` clock reading as `HH:MM:SS`.
///
/// One and two digits are minutes past midnight, three digits carry a
/// single-digit hour. Values of 2400 and above, minutes of 60 and above
/// and anything non-numeric are rejected. `HH:MM` input is accepted as is.
pub fn format_coll_time(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.contains(':') {
        let time = NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
            .ok()?;
        return Some(time.format("%H:%M:%S").to_string());
    }
    let value = parse_i64(trimmed)?;
    if !(0..2400).contains(&value) {
        return None;
    }
    let (hour, minute) = (value / 100, value % 100);
    if minute >= 60 {
        return None;
    }
    Some(format!("{hour:02}:{minute:02}:00"))
}

pub fn parse_coll_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or(trimmed);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let mut day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    while day.weekday() != weekday {
        day = day.pred_opt()?;
    }
    Some(day)
}

/// Local start and end of daylight saving time for a year under the US rule.
///
/// From 2007: second Sunday in March to first Sunday in November.
/// Before 2007: first Sunday in April to last Sunday in October.
/// Both transitions happen at 02:00 local time.
pub fn us_dst_bounds(year: i32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let two_am = NaiveTime::from_hms_opt(2, 0, 0)?;
    let (start, end) = if year >= 2007 {
        (
            NaiveDate::from_weekday_of_month_opt(year, 3, Weekday::Sun, 2)?,
            NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Sun, 1)?,
        )
    } else {
        (
            NaiveDate::from_weekday_of_month_opt(year, 4, Weekday::Sun, 1)?,
            last_weekday_of_month(year, 10, Weekday::Sun)?,
        )
    };
    Some((start.and_time(two_am), end.and_time(two_am)))
}

pub fn is_dst(local: NaiveDateTime, rule: DstRule) -> bool {
    match rule {
        DstRule::None => false,
        DstRule::Us => us_dst_bounds(local.year())
            .is_some_and(|(start, end)| local >= start && local < end),
    }
}

/// Label of the half-open interval containing `hour`.
pub fn time_interval(hour: u32, intervals: &[TimeInterval]) -> Option<&str> {
    intervals
        .iter()
        .find(|i| hour >= i.start_hour && hour < i.end_hour)
        .map(|i| i.label.as_str())
}

/// Rush-hour label and indicator for a valid timestamp.
pub fn rush_hour(policy: &RushHourPolicy, local: NaiveDateTime) -> (&str, i64) {
    let weekday = local.weekday().number_from_monday();
    let hour = local.hour();
    if policy.weekdays.contains(&weekday) {
        if policy.morning.contains(hour) {
            return (&policy.morning_label, 1);
        }
        if policy.evening.contains(hour) {
            return (&policy.evening_label, 1);
        }
    }
    (&policy.none_label, 0)
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn iso(date: NaiveDate) -> String {
    date.format(ISO_DATE).to_string()
}

/// Accumulates one output value per row for every derived column.
#[derive(Default)]
struct TemporalColumns {
    coll_date: Vec<Option<String>>,
    coll_time: Vec<Option<String>>,
    datetime: Vec<Option<String>>,
    datetime_utc: Vec<Option<String>>,
    valid: Vec<bool>,
    year: Vec<Option<i64>>,
    quarter: Vec<Option<i64>>,
    month: Vec<Option<i64>>,
    year_week: Vec<Option<i64>>,
    week_day: Vec<Option<String>>,
    month_day: Vec<Option<i64>>,
    year_day: Vec<Option<i64>>,
    hour: Vec<Option<i64>>,
    minute: Vec<Option<i64>>,
    dst: Vec<Option<i64>>,
    zone: Vec<Option<String>>,
    date_year: Vec<Option<String>>,
    date_quarter: Vec<Option<String>>,
    date_month: Vec<Option<String>>,
    date_week: Vec<Option<String>>,
    date_day: Vec<Option<String>>,
    intervals: Vec<Option<String>>,
    rush: Vec<Option<String>>,
    rush_bin: Vec<Option<i64>>,
}

impl TemporalColumns {
    fn push_valid(&mut self, local: NaiveDateTime, config: &TemporalConfig) {
        let date = local.date();
        let dst = is_dst(local, config.dst_rule);
        let offset = i64::from(config.utc_offset_hours) + i64::from(dst);
        let utc = local - Duration::hours(offset);
        let quarter = (date.month() - 1) / 3 + 1;
        let week = date.iso_week();
        let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
        let (rush, rush_bin) = rush_hour(&config.rush_hours, local);

        self.coll_date.push(Some(iso(date)));
        self.coll_time.push(Some(local.format("%H:%M:%S").to_string()));
        self.datetime.push(Some(local.format("%Y-%m-%dT%H:%M:%S").to_string()));
        self.datetime_utc.push(Some(utc.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        self.valid.push(true);
        self.year.push(Some(i64::from(date.year())));
        self.quarter.push(Some(i64::from(quarter)));
        self.month.push(Some(i64::from(date.month())));
        self.year_week.push(Some(i64::from(week.week())));
        self.week_day.push(Some(weekday_name(date.weekday()).to_string()));
        self.month_day.push(Some(i64::from(date.day())));
        self.year_day.push(Some(i64::from(date.ordinal())));
        self.hour.push(Some(i64::from(local.hour())));
        self.minute.push(Some(i64::from(local.minute())));
        self.dst.push(Some(i64::from(dst)));
        let zone = if dst {
            &config.daylight_zone
        } else {
            &config.standard_zone
        };
        self.zone.push(Some(zone.clone()));
        self.date_year
            .push(NaiveDate::from_ymd_opt(date.year(), 1, 1).map(iso));
        self.date_quarter
            .push(NaiveDate::from_ymd_opt(date.year(), (quarter - 1) * 3 + 1, 1).map(iso));
        self.date_month
            .push(NaiveDate::from_ymd_opt(date.year(), date.month(), 1).map(iso));
        self.date_week.push(Some(iso(monday)));
        self.date_day.push(Some(iso(date)));
        self.intervals
            .push(time_interval(local.hour(), &config.intervals).map(str::to_string));
        self.rush.push(Some(rush.to_string()));
        self.rush_bin.push(Some(rush_bin));
    }

    fn push_invalid(
        &mut self,
        raw_date: Option<String>,
        time: Option<String>,
        config: &TemporalConfig,
    ) {
        self.coll_date.push(raw_date);
        self.coll_time.push(time);
        self.valid.push(false);
        self.rush.push(Some(config.rush_hours.unknown_label.clone()));
        for column in [
            &mut self.datetime,
            &mut self.datetime_utc,
            &mut self.week_day,
            &mut self.zone,
            &mut self.date_year,
            &mut self.date_quarter,
            &mut self.date_month,
            &mut self.date_week,
            &mut self.date_day,
            &mut self.intervals,
        ] {
            column.push(None);
        }
        for column in [
            &mut self.year,
            &mut self.quarter,
            &mut self.month,
            &mut self.year_week,
            &mut self.month_day,
            &mut self.year_day,
            &mut self.hour,
            &mut self.minute,
            &mut self.dst,
            &mut self.rush_bin,
        ] {
            column.push(None);
        }
    }
}

/// Adds the temporal feature columns to the crash table.
///
/// Rows with an unparseable date or time are kept with `dt_valid = false`,
/// null features and the unknown rush-hour label.
pub fn derive_temporal(frame: &mut EntityFrame, config: &TemporalConfig) -> Result<TemporalReport> {
    for column in [&config.date_column, &config.time_column] {
        if frame.data.column(column).is_err() {
            return Err(TransformError::MissingColumn {
                entity: frame.entity,
                column: column.clone(),
            });
        }
    }
    let dates = opt_string_column(&frame.data, &config.date_column)?;
    let times = opt_string_column(&frame.data, &config.time_column)?;
    let years = frame.years()?;

    let mut out = TemporalColumns::default();
    let mut report = TemporalReport::default();
    for (row, (raw_date, raw_time)) in dates.into_iter().zip(times).enumerate() {
        let date = raw_date.as_deref().and_then(parse_coll_date);
        let time = raw_time.as_deref().and_then(format_coll_time);
        let local = match (date, time.as_deref()) {
            (Some(d), Some(t)) => NaiveTime::parse_from_str(t, "%H:%M:%S")
                .ok()
                .map(|t| d.and_time(t)),
            _ => None,
        };
        match local {
            Some(local) => out.push_valid(local, config),
            None => {
                if let Some(year) = years[row] {
                    *report.invalid_by_year.entry(year).or_insert(0) += 1;
                }
                let date_value = date.map(iso).or(raw_date);
                out.push_invalid(date_value, time, config);
            }
        }
    }

    let df = &mut frame.data;
    set_string_column(df, &config.date_column, out.coll_date)?;
    set_string_column(df, &config.time_column, out.coll_time)?;
    set_string_column(df, "date_datetime", out.datetime)?;
    set_string_column(df, "date_datetime_utc", out.datetime_utc)?;
    set_bool_column(df, "dt_valid", out.valid)?;
    set_string_column(df, "date_year", out.date_year)?;
    set_string_column(df, "date_quarter", out.date_quarter)?;
    set_string_column(df, "date_month", out.date_month)?;
    set_string_column(df, "date_week", out.date_week)?;
    set_string_column(df, "date_day", out.date_day)?;
    set_i64_column(df, "dt_year", out.year)?;
    set_i64_column(df, "dt_quarter", out.quarter)?;
    set_i64_column(df, "dt_month", out.month)?;
    set_i64_column(df, "dt_year_week", out.year_week)?;
    set_string_column(df, "dt_week_day", out.week_day)?;
    set_i64_column(df, "dt_month_day", out.month_day)?;
    set_i64_column(df, "dt_year_day", out.year_day)?;
    set_i64_column(df, "dt_hour", out.hour)?;
    set_i64_column(df, "dt_minute", out.minute)?;
    set_i64_column(df, "dt_dst", out.dst)?;
    set_string_column(df, "dt_zone", out.zone)?;
    set_string_column(df, "coll_time_intervals", out.intervals)?;
    set_string_column(df, "rush_hours", out.rush)?;
    set_i64_column(df, "rush_hours_bin", out.rush_bin)?;

    if df.column(&config.process_date_column).is_ok() {
        let process: Vec<Option<String>> = opt_string_column(df, &config.process_date_column)?
            .into_iter()
            .map(|v| v.as_deref().and_then(parse_coll_date).map(iso))
            .collect();
        set_string_column(df, "date_process", process)?;
    }

    for (year, invalid) in &report.invalid_by_year {
        debug!(year, invalid, "unparseable collision date/time");
    }
    if report.total_invalid() > 0 {
        warn!(
            invalid = report.total_invalid(),
            "crashes with unparseable date/time kept with dt_valid = false"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn coll_time_digit_forms() {
        assert_eq!(format_coll_time("5").as_deref(), Some("00:05:00"));
        assert_eq!(format_coll_time("45").as_deref(), Some("00:45:00"));
        assert_eq!(format_coll_time("730").as_deref(), Some("07:30:00"));
        assert_eq!(format_coll_time("1645").as_deref(), Some("16:45:00"));
        assert_eq!(format_coll_time("0730").as_deref(), Some("07:30:00"));
        assert_eq!(format_coll_time("1645.0").as_deref(), Some("16:45:00"));
        assert_eq!(format_coll_time("2400"), None);
        assert_eq!(format_coll_time("1275"), None);
        assert_eq!(format_coll_time("noon"), None);
        assert_eq!(format_coll_time("08:15").as_deref(), Some("08:15:00"));
    }

    #[test]
    fn us_dst_rule_changes_in_2007() {
        // 2020: March 8 to November 1.
        assert!(!is_dst(at(2020, 3, 8, 1, 59), DstRule::Us));
        assert!(is_dst(at(2020, 3, 8, 2, 0), DstRule::Us));
        assert!(is_dst(at(2020, 11, 1, 1, 59), DstRule::Us));
        assert!(!is_dst(at(2020, 11, 1, 2, 0), DstRule::Us));
        // 2006: April 2 to October 29.
        assert!(!is_dst(at(2006, 3, 20, 12, 0), DstRule::Us));
        assert!(is_dst(at(2006, 4, 2, 3, 0), DstRule::Us));
        assert!(!is_dst(at(2006, 10, 29, 2, 0), DstRule::Us));
        assert!(!is_dst(at(2020, 7, 1, 12, 0), DstRule::None));
    }

    #[test]
    fn rush_hours_respect_weekdays_and_windows() {
        let policy = RushHourPolicy::default();
        // 2020-03-09 is a Monday.
        assert_eq!(rush_hour(&policy, at(2020, 3, 9, 8, 0)).1, 1);
        assert_eq!(rush_hour(&policy, at(2020, 3, 9, 10, 59)).0, policy.morning_label);
        assert_eq!(rush_hour(&policy, at(2020, 3, 9, 17, 0)).0, policy.evening_label);
        assert_eq!(rush_hour(&policy, at(2020, 3, 9, 12, 0)), (policy.none_label.as_str(), 0));
        // Saturday.
        assert_eq!(rush_hour(&policy, at(2020, 3, 14, 8, 0)).1, 0);
    }

    #[test]
    fn intervals_are_half_open() {
        let config = TemporalConfig::default();
        assert_eq!(time_interval(0, &config.intervals), Some("Night (00:00-06:00)"));
        assert_eq!(time_interval(6, &config.intervals), Some("Morning (06:00-12:00)"));
        assert_eq!(time_interval(23, &config.intervals), Some("Evening (18:00-24:00)"));
    }
}
