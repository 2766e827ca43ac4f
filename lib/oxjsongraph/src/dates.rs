//! Regex-based parsing of the date string layouts the dialect accepts, and
//! formatting support for the writer's date-format option.
//!
//! Accepted date layouts: `YYYY-MM-DD` (also `/` and `.` separators),
//! `MM/DD/YYYY`, `DD Mon YYYY`, `Mon DD, YYYY`, `YYYY Mon DD` and the
//! Unix-style `Day Mon DD HH:MM:SS TZ YYYY`. Times are `HH:MM`, `HH:MM:SS`
//! or `HH:MM:SS.fff`, each with an optional zone suffix (`Z`, `±hh:mm`,
//! `±hhmm` or `GMT±hh:mm`). A day-of-week token anywhere is ignored.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

static YMD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})[./-](\d{1,2})[./-](\d{1,2})$").unwrap()
});
static MDY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[./-](\d{1,2})[./-](\d{4})$").unwrap()
});
static DMY_ALPHA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{1,2})\s+([a-z]{3,9})\.?,?\s+(\d{4})$").unwrap()
});
static MDY_ALPHA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z]{3,9})\.?\s+(\d{1,2}),?\s+(\d{4})$").unwrap()
});
static YMD_ALPHA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{4})\s+([a-z]{3,9})\.?\s+(\d{1,2})$").unwrap()
});
static UNIX_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(sun|mon|tue|wed|thu|fri|sat)[a-z]*\s+([a-z]{3})[a-z]*\s+(\d{1,2})\s+(\d{2}):(\d{2}):(\d{2})\s+([A-Za-z]{1,5})\s+(\d{4})$",
    )
    .unwrap()
});
static TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[T\s](\d{2}):(\d{2})(?::(\d{2}))?(?:\.(\d+))?\s*(Z|GMT[+-]\d{2}:?\d{2}|[+-]\d{2}:?\d{2})?$").unwrap()
});
static DAY_OF_WEEK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(sunday|monday|tuesday|wednesday|thursday|friday|saturday|sun|mon|tue|wed|thu|fri|sat)\b,?")
        .unwrap()
});

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    Some(match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    })
}

/// Offsets for the timezone abbreviations the Unix-style layout can carry.
/// Anything unrecognized is read as UTC.
fn named_zone_offset(name: &str) -> i32 {
    match name.to_ascii_uppercase().as_str() {
        "EST" => -5 * 3600,
        "EDT" => -4 * 3600,
        "CST" => -6 * 3600,
        "CDT" => -5 * 3600,
        "MST" => -7 * 3600,
        "MDT" => -6 * 3600,
        "PST" => -8 * 3600,
        "PDT" => -7 * 3600,
        _ => 0,
    }
}

fn zone_offset(suffix: &str) -> Result<i32, String> {
    let text = suffix.trim();
    if text.eq_ignore_ascii_case("z") {
        return Ok(0);
    }
    let text = text
        .strip_prefix("GMT")
        .or_else(|| text.strip_prefix("gmt"))
        .unwrap_or(text);
    let (sign, rest) = match text.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(format!("Invalid timezone offset '{suffix}'")),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Invalid timezone offset '{suffix}'"));
    }
    let hours: i32 = digits[..2].parse().map_err(|_| "bad offset hours")?;
    let minutes: i32 = digits[2..].parse().map_err(|_| "bad offset minutes")?;
    Ok(sign * (hours * 3600 + minutes * 60))
}

struct TimeParts {
    hour: u32,
    minute: u32,
    second: u32,
    millisecond: u32,
    offset_seconds: i32,
}

fn check_range(what: &str, value: u32, min: u32, max: u32) -> Result<(), String> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(format!("{what} must be between {min} and {max}, got {value}"))
    }
}

fn assemble(
    year: i32,
    month: u32,
    day: u32,
    time: Option<TimeParts>,
) -> Result<DateTime<Utc>, String> {
    check_range("month", month, 1, 12)?;
    check_range("day", day, 1, 31)?;
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| format!("Invalid calendar date {year}-{month}-{day}"))?;
    let (time_of_day, offset_seconds) = match time {
        Some(parts) => {
            check_range("hour", parts.hour, 0, 23)?;
            check_range("minute", parts.minute, 0, 59)?;
            check_range("second", parts.second, 0, 59)?;
            (
                NaiveTime::from_hms_milli_opt(
                    parts.hour,
                    parts.minute,
                    parts.second,
                    parts.millisecond,
                )
                .ok_or("Invalid time of day")?,
                parts.offset_seconds,
            )
        }
        None => (NaiveTime::MIN, 0),
    };
    let offset =
        FixedOffset::east_opt(offset_seconds).ok_or("Timezone offset out of range")?;
    let local = NaiveDateTime::new(date, time_of_day);
    match offset.from_local_datetime(&local) {
        chrono::LocalResult::Single(moment) => Ok(moment.with_timezone(&Utc)),
        _ => Err("Ambiguous date-time".into()),
    }
}

fn milliseconds_from_fraction(fraction: &str) -> u32 {
    let mut digits: String = fraction.chars().take(3).collect();
    while digits.len() < 3 {
        digits.push('0');
    }
    digits.parse().unwrap_or(0)
}

/// Parses one of the accepted date string layouts into a UTC instant.
pub(crate) fn parse_date(text: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("Empty date string".into());
    }

    if let Some(m) = UNIX_STYLE.captures(trimmed) {
        let month = month_number(&m[2]).ok_or_else(|| format!("Unknown month '{}'", &m[2]))?;
        let time = TimeParts {
            hour: m[4].parse().map_err(|_| "bad hour")?,
            minute: m[5].parse().map_err(|_| "bad minute")?,
            second: m[6].parse().map_err(|_| "bad second")?,
            millisecond: 0,
            offset_seconds: named_zone_offset(&m[7]),
        };
        return assemble(
            m[8].parse().map_err(|_| "bad year")?,
            month,
            m[3].parse().map_err(|_| "bad day")?,
            Some(time),
        );
    }

    // Split off the trailing time-of-day, if any, then drop day-of-week noise.
    let (date_text, time) = match TIME.captures(trimmed) {
        Some(m) => {
            let all = m.get(0).map_or(0..0, |g| g.range());
            let offset_seconds = match m.get(5) {
                Some(zone) => zone_offset(zone.as_str())?,
                None => 0,
            };
            let time = TimeParts {
                hour: m[1].parse().map_err(|_| "bad hour")?,
                minute: m[2].parse().map_err(|_| "bad minute")?,
                second: m.get(3).map_or(Ok(0), |s| {
                    s.as_str().parse().map_err(|_| "bad second")
                })?,
                millisecond: m.get(4).map_or(0, |f| milliseconds_from_fraction(f.as_str())),
                offset_seconds,
            };
            (trimmed[..all.start].trim(), Some(time))
        }
        None => (trimmed, None),
    };
    let date_text = DAY_OF_WEEK.replace_all(date_text, "");
    let date_text = date_text.trim().trim_matches(',').trim();

    if let Some(m) = YMD.captures(date_text) {
        return assemble(
            m[1].parse().map_err(|_| "bad year")?,
            m[2].parse().map_err(|_| "bad month")?,
            m[3].parse().map_err(|_| "bad day")?,
            time,
        );
    }
    if let Some(m) = MDY.captures(date_text) {
        return assemble(
            m[3].parse().map_err(|_| "bad year")?,
            m[1].parse().map_err(|_| "bad month")?,
            m[2].parse().map_err(|_| "bad day")?,
            time,
        );
    }
    if let Some(m) = DMY_ALPHA.captures(date_text) {
        let month = month_number(&m[2]).ok_or_else(|| format!("Unknown month '{}'", &m[2]))?;
        return assemble(
            m[3].parse().map_err(|_| "bad year")?,
            month,
            m[1].parse().map_err(|_| "bad day")?,
            time,
        );
    }
    if let Some(m) = MDY_ALPHA.captures(date_text) {
        let month = month_number(&m[1]).ok_or_else(|| format!("Unknown month '{}'", &m[1]))?;
        return assemble(
            m[3].parse().map_err(|_| "bad year")?,
            month,
            m[2].parse().map_err(|_| "bad day")?,
            time,
        );
    }
    if let Some(m) = YMD_ALPHA.captures(date_text) {
        let month = month_number(&m[2]).ok_or_else(|| format!("Unknown month '{}'", &m[2]))?;
        return assemble(
            m[1].parse().map_err(|_| "bad year")?,
            month,
            m[3].parse().map_err(|_| "bad day")?,
            time,
        );
    }
    Err(format!("Unable to parse date: '{text}'"))
}

/// Formats an instant with a strftime-style pattern (the writer's
/// date-format option).
pub(crate) fn format_date(moment: &DateTime<Utc>, pattern: &str) -> String {
    moment.format(pattern).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn numeric_layouts() {
        assert_eq!(parse_date("2014-06-13").unwrap(), date(2014, 6, 13));
        assert_eq!(parse_date("2014/06/13").unwrap(), date(2014, 6, 13));
        assert_eq!(parse_date("2014.06.13").unwrap(), date(2014, 6, 13));
        assert_eq!(parse_date("06/13/2014").unwrap(), date(2014, 6, 13));
        assert_eq!(parse_date("6-13-2014").unwrap(), date(2014, 6, 13));
    }

    #[test]
    fn alpha_month_layouts() {
        assert_eq!(parse_date("13 June 2014").unwrap(), date(2014, 6, 13));
        assert_eq!(parse_date("June 13, 2014").unwrap(), date(2014, 6, 13));
        assert_eq!(parse_date("2014 Jun 13").unwrap(), date(2014, 6, 13));
        assert_eq!(parse_date("jun 13 2014").unwrap(), date(2014, 6, 13));
    }

    #[test]
    fn unix_style_layout() {
        let moment = parse_date("Thu Jun 13 05:03:25 GMT 2014").unwrap();
        assert_eq!(
            moment,
            Utc.with_ymd_and_hms(2014, 6, 13, 5, 3, 25).unwrap()
        );
        let eastern = parse_date("Thu Jun 13 05:03:25 EST 2014").unwrap();
        assert_eq!(
            eastern,
            Utc.with_ymd_and_hms(2014, 6, 13, 10, 3, 25).unwrap()
        );
    }

    #[test]
    fn time_of_day_with_zone_and_millis() {
        let moment = parse_date("2014-06-13 05:03:25.123+02:00").unwrap();
        assert_eq!(
            moment,
            Utc.with_ymd_and_hms(2014, 6, 13, 3, 3, 25).unwrap()
                + chrono::Duration::milliseconds(123)
        );
        let short = parse_date("2014-06-13T05:03Z").unwrap();
        assert_eq!(short.hour(), 5);
        assert_eq!(short.second(), 0);
    }

    #[test]
    fn day_of_week_is_ignored() {
        assert_eq!(
            parse_date("Friday, 13 June 2014").unwrap(),
            date(2014, 6, 13)
        );
        assert_eq!(parse_date("2014-06-13 Fri").unwrap(), date(2014, 6, 13));
    }

    #[test]
    fn field_validation() {
        assert!(parse_date("2014-13-01").unwrap_err().contains("month"));
        assert!(parse_date("2014-01-32").unwrap_err().contains("day"));
        assert!(parse_date("2014-06-13 24:00:00").unwrap_err().contains("hour"));
        assert!(parse_date("2014-06-13 05:61:00").unwrap_err().contains("minute"));
        assert!(parse_date("garbage").is_err());
    }

    #[test]
    fn formatting_uses_the_pattern() {
        let moment = Utc.with_ymd_and_hms(2014, 6, 13, 5, 3, 25).unwrap();
        assert_eq!(format_date(&moment, "%Y-%m-%d"), "2014-06-13");
        assert_eq!(
            format_date(&moment, "%Y-%m-%dT%H:%M:%S"),
            "2014-06-13T05:03:25"
        );
    }
}
