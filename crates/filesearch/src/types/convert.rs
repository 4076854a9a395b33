//! Size, time and duration parsing and formatting.

use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

use crate::error::{Result, SearchError};

const UNITS: [&str; 9] = ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_WEEK: i64 = 604_800;
const SECONDS_PER_MONTH: i64 = 2_592_000; // 30 days
const SECONDS_PER_YEAR: i64 = 31_536_000; // 365 days

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y%m%d%H%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

// ---------------------------------------------------------------------------
// Sizes
// ---------------------------------------------------------------------------

/// Formats a byte count with one decimal place below 10 and a unit suffix.
///
/// With `base == 1000` the unit carries a trailing `B` (`1.5MB`), otherwise
/// the binary unit letter is used alone (`1.5M`).
pub fn format_size(number: u64, base: u64) -> String {
    if number < base {
        return number.to_string();
    }

    let mut value = number as f64;
    let mut unit = UNITS[UNITS.len() - 1];
    for candidate in UNITS {
        if value < base as f64 {
            unit = candidate;
            break;
        }
        value = round_one_decimal(value / base as f64);
    }

    let suffix = if base == 1000 { "B" } else { "" };
    if value < 10.0 {
        format!("{value:.1}{unit}{suffix}")
    } else {
        format!("{}{unit}{suffix}", value as u64)
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Parses a size like `100`, `10b`, `1.5M`, `2KB` (1000-based) or `2KiB`.
pub fn parse_size(raw: &str) -> Result<u64> {
    let upper = raw.trim().to_ascii_uppercase();
    let split = upper
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(upper.len());
    let (number, unit) = upper.split_at(split);

    if number.is_empty() {
        return Err(invalid_size(raw));
    }

    if unit.is_empty() || unit == "B" {
        return number.parse::<u64>().map_err(|_| invalid_size(raw));
    }

    let mut chars = unit.chars();
    let prefix = chars.next().ok_or_else(|| invalid_size(raw))?;
    let exponent = UNITS
        .iter()
        .skip(1)
        .position(|candidate| candidate.starts_with(prefix))
        .map(|index| index as i32 + 1)
        .ok_or_else(|| invalid_size(raw))?;
    let base: f64 = match chars.as_str() {
        "" | "IB" => 1024.0,
        "B" => 1000.0,
        _ => return Err(invalid_size(raw)),
    };

    let number: f64 = number.parse().map_err(|_| invalid_size(raw))?;
    let bytes = number * base.powi(exponent);
    // u64::MAX as f64 rounds up to 2^64, which is already out of range.
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(SearchError::Usage(format!("size {raw:?} is too large")));
    }
    Ok(bytes as u64)
}

fn invalid_size(raw: &str) -> SearchError {
    SearchError::Usage(format!("invalid size {raw:?}"))
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Formats seconds as `1h02m05s`, or `2m05s` below one hour.
pub fn format_duration(seconds: i64) -> String {
    let hours = seconds / SECONDS_PER_HOUR;
    let minutes = (seconds % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
    let seconds = seconds % SECONDS_PER_MINUTE;

    if hours > 0 {
        format!("{hours}h{minutes:02}m{seconds:02}s")
    } else {
        format!("{minutes}m{seconds:02}s")
    }
}

/// Parses a duration into seconds.
///
/// A bare integer is a number of minutes. Otherwise the input is a sequence
/// of `<count><unit>` pairs with units `s`, `m`, `h`, `d`, `w`, `M` (30 days)
/// and `y` (365 days), e.g. `1h30m`.
pub fn parse_duration(raw: &str) -> Result<i64> {
    let invalid = || SearchError::Usage(format!("unable to parse {raw:?}"));
    let overflow = || SearchError::Usage(format!("duration {raw:?} is too large"));

    if let Ok(minutes) = raw.parse::<i64>() {
        return minutes.checked_mul(SECONDS_PER_MINUTE).ok_or_else(overflow);
    }

    if raw.is_empty() {
        return Err(invalid());
    }

    let mut total: i64 = 0;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let count: i64 = rest[..digits].parse().map_err(|_| invalid())?;
        let unit = rest[digits..].chars().next().ok_or_else(invalid)?;
        let factor = match unit {
            's' => 1,
            'm' => SECONDS_PER_MINUTE,
            'h' => SECONDS_PER_HOUR,
            'd' => SECONDS_PER_DAY,
            'w' => SECONDS_PER_WEEK,
            'M' => SECONDS_PER_MONTH,
            'y' => SECONDS_PER_YEAR,
            _ => return Err(invalid()),
        };
        total = count
            .checked_mul(factor)
            .and_then(|seconds| total.checked_add(seconds))
            .ok_or_else(overflow)?;
        rest = &rest[digits + unit.len_utf8()..];
    }

    Ok(total)
}

// ---------------------------------------------------------------------------
// Times
// ---------------------------------------------------------------------------

/// Formats an epoch timestamp as local `%Y-%m-%d %H:%M:%S`.
pub fn format_time(seconds: i64) -> String {
    match Local.timestamp_opt(seconds, 0).single() {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => seconds.to_string(),
    }
}

/// Parses a point in time into seconds since the epoch.
///
/// Accepted inputs, in order of precedence:
/// - compact `YYYYMMDD` and `YYYYMMDDHHMM` dates
/// - a plain (possibly fractional) epoch timestamp
/// - local dates and datetimes (`2020-05-12`, `2020-05-12 14:00`)
/// - a time of day (`14:00`), today or yesterday if that lies in the future
/// - a duration (`1d12h`), counted backwards from now
pub fn parse_time(raw: &str) -> Result<i64> {
    let trimmed = raw.trim();
    let compact = trimmed.len() == 8 || trimmed.len() == 12;

    if !(compact && trimmed.bytes().all(|b| b.is_ascii_digit())) {
        if let Ok(number) = trimmed.parse::<f64>() {
            // i64::MAX as f64 rounds up to 2^63, which is already out of range.
            if !number.is_finite() || number.abs() >= i64::MAX as f64 {
                return Err(SearchError::Usage(format!("{raw:?} is no valid time")));
            }
            return Ok(number as i64);
        }
    }

    if trimmed.len() >= 4 {
        if let Some(seconds) = parse_calendar_time(trimmed) {
            return Ok(seconds);
        }
    }

    parse_duration(trimmed)
        .ok()
        .and_then(|duration| Local::now().timestamp().checked_sub(duration))
        .ok_or_else(|| SearchError::Usage(format!("{raw:?} is no valid time")))
}

fn parse_calendar_time(value: &str) -> Option<i64> {
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return local_timestamp(datetime);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).and_then(local_timestamp);
        }
    }

    for format in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(value, format) {
            let now = Local::now().naive_local();
            let mut datetime = now.date().and_time(time);
            if datetime > now {
                datetime -= ChronoDuration::days(1);
            }
            return local_timestamp(datetime);
        }
    }

    None
}

fn local_timestamp(datetime: NaiveDateTime) -> Option<i64> {
    Local
        .from_local_datetime(&datetime)
        .earliest()
        .map(|local| local.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_binary_and_decimal() {
        assert_eq!(format_size(1000, 1024), "1000");
        assert_eq!(format_size(2048, 1024), "2.0K");
        assert_eq!(format_size(1536, 1024), "1.5K");
        assert_eq!(format_size(20 * 1024 * 1024, 1024), "20M");
        assert_eq!(format_size(1500, 1000), "1.5KB");
        assert_eq!(format_size(999, 1000), "999");
    }

    #[test]
    fn parse_size_units() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("10b").unwrap(), 10);
        assert_eq!(parse_size("1k").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1000);
        assert_eq!(parse_size("1KiB").unwrap(), 1024);
        assert_eq!(parse_size("1.5M").unwrap(), 1_572_864);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("1.5").is_err());
        assert!(parse_size("K").is_err());
        assert!(parse_size("10Q").is_err());
        assert!(parse_size("10KX").is_err());
    }

    #[test]
    fn duration_round_trip_values() {
        assert_eq!(parse_duration("10").unwrap(), 600);
        assert_eq!(parse_duration("1h30m").unwrap(), 5400);
        assert_eq!(parse_duration("2d").unwrap(), 172_800);
        assert_eq!(parse_duration("1w1s").unwrap(), 604_801);
        assert_eq!(parse_duration("1M").unwrap(), SECONDS_PER_MONTH);
        assert_eq!(parse_duration("1y").unwrap(), SECONDS_PER_YEAR);
    }

    #[test]
    fn duration_rejects_incomplete_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("1h30").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("1x").is_err());
    }

    #[test]
    fn duration_overflow_is_an_error() {
        assert!(matches!(
            parse_duration("9000000000000000000"),
            Err(SearchError::Usage(_))
        ));
        assert!(matches!(
            parse_duration("999999999999999y"),
            Err(SearchError::Usage(_))
        ));
        assert!(parse_duration("1s9223372036854775807s").is_err());
        assert!(parse_time("999999999999999y").is_err());
    }

    #[test]
    fn size_overflow_is_an_error() {
        assert_eq!(parse_size("15E").unwrap(), 15 << 60);
        assert!(matches!(parse_size("20E"), Err(SearchError::Usage(_))));
        assert!(parse_size("99999999999999999999").is_err());
        assert!(parse_size("16E").is_err());
    }

    #[test]
    fn format_duration_with_and_without_hours() {
        assert_eq!(format_duration(125), "2m05s");
        assert_eq!(format_duration(3725), "1h02m05s");
        assert_eq!(format_duration(0), "0m00s");
    }

    #[test]
    fn parse_time_epoch_and_dates() {
        assert_eq!(parse_time("1589234400").unwrap(), 1_589_234_400);
        assert_eq!(parse_time("1589234400.7").unwrap(), 1_589_234_400);

        let dashed = parse_time("2020-05-12").unwrap();
        let compact = parse_time("20200512").unwrap();
        assert_eq!(dashed, compact);

        let with_minutes = parse_time("2020-05-12 14:30").unwrap();
        assert_eq!(with_minutes - dashed, 14 * 3600 + 30 * 60);
        assert_eq!(parse_time("202005121430").unwrap(), with_minutes);
    }

    #[test]
    fn parse_time_relative_and_time_of_day() {
        let now = Local::now().timestamp();
        let day_ago = parse_time("1d").unwrap();
        assert!((now - SECONDS_PER_DAY - day_ago).abs() <= 2);

        let today = parse_time("00:00").unwrap();
        assert!(today <= now);
        assert!(now - today <= SECONDS_PER_DAY + 3600);

        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn parse_time_rejects_non_finite_numbers() {
        assert!(parse_time("nan").is_err());
        assert!(parse_time("inf").is_err());
        assert!(parse_time("-infinity").is_err());
        assert!(parse_time("1e300").is_err());
    }
}
