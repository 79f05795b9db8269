//! Date/time conversion routines.
//!
//! Text routines understand the ISO `DateStyle` output; binary routines
//! decode the microsecond-based send format with the 2000-01-01 epoch.

use bytes::Buf;
use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};

use super::caster::{CastContext, CastError};
use super::decode::utf8;
use super::types::{Interval, Oid, Value};

type CastResult = Result<Value, CastError>;

const USECS_PER_SEC: i64 = 1_000_000;

fn pg_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Refuse to guess when the server is not sending ISO dates.
fn ensure_iso(ctx: &CastContext<'_>) -> Result<(), CastError> {
    match ctx.parameter("DateStyle") {
        Some(style) if !style.trim_start().starts_with("ISO") => {
            Err(CastError::DateStyle(style.to_string()))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Text helpers
// ============================================================================

/// Split a trailing " BC" marker off a date, returning the text and whether it was BC.
fn strip_era(text: &str) -> (&str, bool) {
    match text.strip_suffix(" BC") {
        Some(rest) => (rest, true),
        None => (text, false),
    }
}

fn parse_date_text(text: &str) -> Result<NaiveDate, CastError> {
    let (text, bc) = strip_era(text);
    let mut parts = text.splitn(3, '-');
    let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(CastError::parse("date", text.as_bytes()));
    };
    let parse = |s: &str| s.parse::<i32>().map_err(|_| CastError::parse("date", text.as_bytes()));
    let mut year = parse(y)?;
    if bc {
        // 1 BC is year 0 in the proleptic calendar
        year = 1 - year;
    }
    let month = u32::try_from(parse(m)?).map_err(|_| CastError::parse("date", text.as_bytes()))?;
    let day = u32::try_from(parse(d)?).map_err(|_| CastError::parse("date", text.as_bytes()))?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or(CastError::OutOfRange { type_name: "date" })
}

/// `24:00:00` is a valid server time; it maps to the last representable instant.
fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN)
}

fn is_end_of_day(text: &str) -> bool {
    let (clock, frac) = text.split_once('.').unwrap_or((text, ""));
    matches!(clock, "24:00:00" | "24:00") && frac.bytes().all(|b| b == b'0')
}

fn parse_time_text(text: &str) -> Result<NaiveTime, CastError> {
    if is_end_of_day(text) {
        return Ok(end_of_day());
    }
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .map_err(|_| CastError::parse("time", text.as_bytes()))
}

/// Parse "+HH", "-HH:MM" or "+HH:MM:SS".
fn parse_offset(text: &str) -> Result<FixedOffset, CastError> {
    let err = || CastError::parse("time zone", text.as_bytes());
    let (sign, rest) = match text.as_bytes().first() {
        Some(b'+') => (1, &text[1..]),
        Some(b'-') => (-1, &text[1..]),
        _ => return Err(err()),
    };
    let mut seconds = 0i32;
    let mut scale = 3600;
    for part in rest.split(':') {
        if scale == 0 {
            return Err(err());
        }
        seconds += part.parse::<i32>().map_err(|_| err())? * scale;
        scale /= 60;
    }
    FixedOffset::east_opt(sign * seconds).ok_or_else(err)
}

/// Split "10:23:54.5+02:00" into the time and the offset part, if any.
fn split_offset(text: &str) -> (&str, Option<&str>) {
    match text.rfind(['+', '-']) {
        Some(pos) if pos > 0 => (&text[..pos], Some(&text[pos..])),
        _ => (text, None),
    }
}

// ============================================================================
// Text format
// ============================================================================

pub fn cast_date(data: &[u8], ctx: &CastContext<'_>) -> CastResult {
    ensure_iso(ctx)?;
    let text = utf8(data)?.trim();
    match text {
        "infinity" => Ok(Value::Date(NaiveDate::MAX)),
        "-infinity" => Ok(Value::Date(NaiveDate::MIN)),
        _ => parse_date_text(text).map(Value::Date),
    }
}

/// `time` and `timetz`; a zone suffix selects [`Value::TimeTz`].
pub fn cast_time(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    let text = utf8(data)?.trim();
    match split_offset(text) {
        (time, Some(offset)) => Ok(Value::TimeTz(parse_time_text(time)?, parse_offset(offset)?)),
        (time, None) => parse_time_text(time).map(Value::Time),
    }
}

/// `timestamp` and `timestamptz`; a zone suffix selects [`Value::TimestampTz`].
pub fn cast_datetime(data: &[u8], ctx: &CastContext<'_>) -> CastResult {
    ensure_iso(ctx)?;
    let text = utf8(data)?.trim();
    let with_tz = ctx.type_oid == Oid::TIMESTAMPTZ;
    match text {
        "infinity" => return Ok(infinite_timestamp(NaiveDateTime::MAX, with_tz)),
        "-infinity" => return Ok(infinite_timestamp(NaiveDateTime::MIN, with_tz)),
        _ => {}
    }

    let (text, bc) = strip_era(text);
    let (date_part, time_part) = text
        .split_once([' ', 'T'])
        .ok_or_else(|| CastError::parse("timestamp", data))?;
    let date_text = if bc { format!("{date_part} BC") } else { date_part.to_string() };
    let date = parse_date_text(&date_text)?;

    let (time_text, offset) = split_offset(time_part);
    let naive = date.and_time(parse_time_text(time_text)?);
    match offset {
        Some(offset) => {
            let offset = parse_offset(offset)?;
            offset
                .from_local_datetime(&naive)
                .single()
                .map(Value::TimestampTz)
                .ok_or(CastError::OutOfRange {
                    type_name: "timestamptz",
                })
        }
        None => Ok(Value::Timestamp(naive)),
    }
}

fn infinite_timestamp(bound: NaiveDateTime, with_tz: bool) -> Value {
    if with_tz {
        Value::TimestampTz(Utc.from_utc_datetime(&bound).fixed_offset())
    } else {
        Value::Timestamp(bound)
    }
}

/// `interval` in the default `postgres` IntervalStyle,
/// e.g. "1 year 2 mons -3 days +04:05:06.5".
pub fn cast_interval(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    let text = utf8(data)?.trim();
    let err = || CastError::parse("interval", data);
    let mut interval = Interval::default();
    let mut tokens = text.split_whitespace();

    while let Some(token) = tokens.next() {
        if token.contains(':') {
            interval.microseconds = interval
                .microseconds
                .checked_add(parse_interval_time(token)?)
                .ok_or(CastError::OutOfRange { type_name: "interval" })?;
            continue;
        }
        let amount: i32 = token.parse().map_err(|_| err())?;
        let unit = tokens.next().ok_or_else(err)?;
        let overflow = || CastError::OutOfRange { type_name: "interval" };
        match unit {
            "year" | "years" => {
                interval.months = amount
                    .checked_mul(12)
                    .and_then(|m| interval.months.checked_add(m))
                    .ok_or_else(overflow)?;
            }
            "mon" | "mons" => {
                interval.months = interval.months.checked_add(amount).ok_or_else(overflow)?;
            }
            "day" | "days" => {
                interval.days = interval.days.checked_add(amount).ok_or_else(overflow)?;
            }
            _ => return Err(err()),
        }
    }
    Ok(Value::Interval(interval))
}

/// "[+-]HH:MM:SS[.ffffff]" to microseconds.
///
/// Accumulated with the token's sign so the most negative interval the
/// server prints (`i64::MIN` microseconds) still fits.
fn parse_interval_time(token: &str) -> Result<i64, CastError> {
    let err = || CastError::parse("interval", token.as_bytes());
    let overflow = || CastError::OutOfRange { type_name: "interval" };
    let (negative, body) = match token.as_bytes().first() {
        Some(b'-') => (true, &token[1..]),
        Some(b'+') => (false, &token[1..]),
        _ => (false, token),
    };
    let mut parts = body.split(':');
    let field = |part: Option<&str>| -> Result<i64, CastError> {
        part.ok_or_else(err)?.parse::<i64>().map_err(|_| err())
    };
    let hours = field(parts.next())?;
    let minutes = field(parts.next())?;
    let seconds_text = parts.next().unwrap_or("0");
    if parts.next().is_some() {
        return Err(err());
    }
    let (secs, frac) = seconds_text.split_once('.').unwrap_or((seconds_text, ""));
    let secs: i64 = secs.parse().map_err(|_| err())?;
    let mut micros = 0i64;
    if !frac.is_empty() {
        let digits: String = frac.chars().chain(std::iter::repeat('0')).take(6).collect();
        micros = digits.parse().map_err(|_| err())?;
    }

    let step = |acc: i64, scale: i64, amount: i64| -> Result<i64, CastError> {
        let scaled = acc.checked_mul(scale).ok_or_else(overflow)?;
        if negative {
            scaled.checked_sub(amount)
        } else {
            scaled.checked_add(amount)
        }
        .ok_or_else(overflow)
    };
    let total = step(0, 1, hours)?;
    let total = step(total, 60, minutes)?;
    let total = step(total, 60, secs)?;
    step(total, USECS_PER_SEC, micros)
}

// ============================================================================
// Binary format
// ============================================================================

fn expect_len(data: &[u8], type_name: &'static str, len: usize) -> Result<(), CastError> {
    if data.len() == len {
        Ok(())
    } else {
        Err(CastError::InvalidLength {
            type_name,
            len: data.len(),
        })
    }
}

pub fn bin_date(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    expect_len(data, "DATE", 4)?;
    let mut buf = data;
    let days = buf.get_i32();
    match days {
        i32::MAX => Ok(Value::Date(NaiveDate::MAX)),
        i32::MIN => Ok(Value::Date(NaiveDate::MIN)),
        _ => pg_epoch()
            .date()
            .checked_add_signed(Duration::days(i64::from(days)))
            .map(Value::Date)
            .ok_or(CastError::OutOfRange { type_name: "DATE" }),
    }
}

const USECS_PER_DAY: i64 = 86_400 * USECS_PER_SEC;

fn time_from_micros(micros: i64) -> Result<NaiveTime, CastError> {
    if micros == USECS_PER_DAY {
        return Ok(end_of_day());
    }
    let secs = u32::try_from(micros.div_euclid(USECS_PER_SEC))
        .map_err(|_| CastError::OutOfRange { type_name: "TIME" })?;
    let nanos = u32::try_from(micros.rem_euclid(USECS_PER_SEC) * 1000)
        .map_err(|_| CastError::OutOfRange { type_name: "TIME" })?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or(CastError::OutOfRange { type_name: "TIME" })
}

/// `time` (8 bytes) and `timetz` (8 bytes + zone in seconds west of UTC).
pub fn bin_time(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    let mut buf = data;
    match data.len() {
        8 => time_from_micros(buf.get_i64()).map(Value::Time),
        12 => {
            let time = time_from_micros(buf.get_i64())?;
            let west = buf.get_i32();
            let offset = FixedOffset::east_opt(-west)
                .ok_or(CastError::OutOfRange { type_name: "TIMETZ" })?;
            Ok(Value::TimeTz(time, offset))
        }
        len => Err(CastError::InvalidLength {
            type_name: "TIME",
            len,
        }),
    }
}

/// `timestamp` and `timestamptz`; the column type decides which value comes back.
pub fn bin_datetime(data: &[u8], ctx: &CastContext<'_>) -> CastResult {
    expect_len(data, "TIMESTAMP", 8)?;
    let mut buf = data;
    let micros = buf.get_i64();
    let with_tz = ctx.type_oid == Oid::TIMESTAMPTZ;
    let naive = match micros {
        i64::MAX => NaiveDateTime::MAX,
        i64::MIN => NaiveDateTime::MIN,
        _ => pg_epoch()
            .checked_add_signed(Duration::microseconds(micros))
            .ok_or(CastError::OutOfRange {
                type_name: "TIMESTAMP",
            })?,
    };
    Ok(if with_tz {
        Value::TimestampTz(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).fixed_offset())
    } else {
        Value::Timestamp(naive)
    })
}

pub fn bin_interval(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    expect_len(data, "INTERVAL", 16)?;
    let mut buf = data;
    let microseconds = buf.get_i64();
    let days = buf.get_i32();
    let months = buf.get_i32();
    Ok(Value::Interval(Interval {
        months,
        days,
        microseconds,
    }))
}

// ============================================================================
// ISO text passthrough
// ============================================================================

/// Keep temporal values as their ISO text, for applications doing their own parsing.
pub fn cast_iso_text(data: &[u8], ctx: &CastContext<'_>) -> CastResult {
    ensure_iso(ctx)?;
    Ok(Value::Text(utf8(data)?.to_string()))
}
