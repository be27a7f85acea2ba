//! Shared building blocks for the per-dialect value formatters.
//!
//! Dialect formatters are exhaustive matches over [`CanonicalType`] whose
//! arms call the helpers below. Pipe helpers turn a driver value into the
//! pipe-file text; parse helpers read that text back in the final-file and
//! SQL formatters.
//!
//! Pipe-file conventions:
//! - integers and floats use their shortest round-trip decimal form
//! - `datetime`, `datetimetz`, `date` and `time` are RFC 3339 with nanosecond
//!   precision trimmed of trailing zeros; `datetimetz` is always in UTC
//! - binary is lowercase hex
//! - booleans are `true` / `false`

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Timelike, Utc,
};

use crate::core::value::SqlValue;
use crate::dialect::CanonicalType;
use crate::error::{PipeError, Result};

fn mismatch(ty: CanonicalType, value: &SqlValue<'_>) -> PipeError {
    PipeError::format(
        ty,
        value.to_string(),
        format!("cannot format {} value as {}", value.kind(), ty),
    )
}

// ===== Pipe helpers (driver value -> pipe text) =====

/// Any value as plain text.
pub fn text(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::Text(s) => Ok(s.to_string()),
        SqlValue::Bytes(b) => String::from_utf8(b.to_vec())
            .map_err(|e| PipeError::format(ty, value.to_string(), e)),
        SqlValue::Json(j) => Ok(j.to_string()),
        SqlValue::Null => Err(mismatch(ty, value)),
        other => Ok(other.to_string()),
    }
}

/// Integer value.
pub fn integer(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::I16(v) => Ok(v.to_string()),
        SqlValue::I32(v) => Ok(v.to_string()),
        SqlValue::I64(v) => Ok(v.to_string()),
        SqlValue::U64(v) => Ok(v.to_string()),
        SqlValue::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        SqlValue::Decimal(d) if d.fract().is_zero() => Ok(d.trunc().normalize().to_string()),
        SqlValue::F64(f) if f.fract() == 0.0 && f.is_finite() => Ok(format!("{:.0}", f)),
        SqlValue::Text(_) | SqlValue::Bytes(_) => parse_integer_text(value)
            .map(|n| n.to_string())
            .ok_or_else(|| mismatch(ty, value)),
        _ => Err(mismatch(ty, value)),
    }
}

fn parse_integer_text(value: &SqlValue<'_>) -> Option<i128> {
    match value {
        SqlValue::Text(s) => s.trim().parse::<i128>().ok(),
        SqlValue::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse::<i128>().ok(),
        _ => None,
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        f.to_string()
    }
}

/// Floating-point value.
pub fn float(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::F32(f) => Ok(if f.is_finite() {
            f.to_string()
        } else {
            format_float(*f as f64)
        }),
        SqlValue::F64(f) => Ok(format_float(*f)),
        SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_) | SqlValue::U64(_) => {
            Ok(value.to_string())
        }
        SqlValue::Decimal(d) => Ok(d.normalize().to_string()),
        SqlValue::Text(_) | SqlValue::Bytes(_) => numeric_text(ty, value),
        _ => Err(mismatch(ty, value)),
    }
}

/// Exact decimal value, kept as its canonical digit string.
pub fn decimal(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::Decimal(d) => Ok(d.to_string()),
        SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_) | SqlValue::U64(_) => {
            Ok(value.to_string())
        }
        SqlValue::F32(_) | SqlValue::F64(_) => float(ty, value),
        SqlValue::Text(_) | SqlValue::Bytes(_) => numeric_text(ty, value),
        _ => Err(mismatch(ty, value)),
    }
}

/// Validate numeric text (drivers that hand numbers over as strings).
fn numeric_text(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    let s = text(ty, value)?;
    let trimmed = s.trim();
    let valid = !trimmed.is_empty()
        && (trimmed.parse::<f64>().is_ok()
            || matches!(trimmed, "NaN" | "Infinity" | "-Infinity"));
    if valid {
        Ok(trimmed.to_string())
    } else if ty == CanonicalType::Money {
        // Money columns may carry a currency symbol or grouping
        let cleaned: String = trimmed
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
            .collect();
        if cleaned.parse::<f64>().is_ok() {
            Ok(cleaned)
        } else {
            Err(mismatch(ty, value))
        }
    } else {
        Err(mismatch(ty, value))
    }
}

/// RFC 3339 with trimmed nanoseconds and a `Z` suffix for UTC.
pub fn rfc3339(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn naive_as_utc(dt: &NaiveDateTime) -> DateTime<FixedOffset> {
    DateTime::<Utc>::from_naive_utc_and_offset(*dt, Utc).fixed_offset()
}

/// Wall-clock timestamp. Naive values are written with a `Z` suffix.
pub fn timestamp(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::DateTime(dt) => Ok(rfc3339(&naive_as_utc(dt))),
        SqlValue::DateTimeOffset(dt) => Ok(rfc3339(dt)),
        SqlValue::Date(d) => Ok(rfc3339(&naive_as_utc(&d.and_time(NaiveTime::MIN)))),
        SqlValue::Text(_) | SqlValue::Bytes(_) => {
            let s = text(ty, value)?;
            Ok(rfc3339(&parse_timestamp(ty, &s)?))
        }
        _ => Err(mismatch(ty, value)),
    }
}

/// Instant, normalized to UTC.
pub fn timestamptz(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::DateTimeOffset(dt) => Ok(rfc3339(&dt.with_timezone(&Utc).fixed_offset())),
        SqlValue::DateTime(dt) => Ok(rfc3339(&naive_as_utc(dt))),
        SqlValue::Text(_) | SqlValue::Bytes(_) => {
            let s = text(ty, value)?;
            let parsed = parse_timestamp(ty, &s)?;
            Ok(rfc3339(&parsed.with_timezone(&Utc).fixed_offset()))
        }
        _ => Err(mismatch(ty, value)),
    }
}

/// Date, written as midnight UTC.
pub fn date(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    let d = match value {
        SqlValue::Date(d) => *d,
        SqlValue::DateTime(dt) => dt.date(),
        SqlValue::DateTimeOffset(dt) => dt.date_naive(),
        SqlValue::Text(_) | SqlValue::Bytes(_) => parse_date(ty, &text(ty, value)?)?,
        _ => return Err(mismatch(ty, value)),
    };
    Ok(rfc3339(&naive_as_utc(&d.and_time(NaiveTime::MIN))))
}

/// Time of day, written on 0000-01-01 UTC.
pub fn time(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    let t = match value {
        SqlValue::Time(t) => *t,
        SqlValue::DateTime(dt) => dt.time(),
        SqlValue::DateTimeOffset(dt) => dt.time(),
        SqlValue::Text(_) | SqlValue::Bytes(_) => parse_time(ty, &text(ty, value)?)?,
        _ => return Err(mismatch(ty, value)),
    };
    Ok(time_of_day_rfc3339(t))
}

/// RFC 3339 form of a time of day.
pub fn time_of_day_rfc3339(t: NaiveTime) -> String {
    let epoch = NaiveDate::from_ymd_opt(0, 1, 1).unwrap_or(NaiveDate::MIN);
    rfc3339(&naive_as_utc(&epoch.and_time(t)))
}

/// Lowercase hex of a byte string.
pub fn hex(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::Bytes(b) => Ok(hex::encode(b)),
        SqlValue::Uuid(u) => Ok(hex::encode(u.as_bytes())),
        SqlValue::Text(s) => {
            let trimmed = s.trim().trim_start_matches("0x").trim_start_matches("\\x");
            if hex::decode(trimmed).is_ok() {
                Ok(trimmed.to_lowercase())
            } else {
                Ok(hex::encode(s.as_bytes()))
            }
        }
        _ => Err(mismatch(ty, value)),
    }
}

/// Hyphenated lowercase UUID.
pub fn uuid(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::Uuid(u) => Ok(u.hyphenated().to_string()),
        SqlValue::Bytes(b) => uuid::Uuid::from_slice(b)
            .map(|u| u.hyphenated().to_string())
            .map_err(|e| PipeError::format(ty, value.to_string(), e)),
        SqlValue::Text(s) => uuid::Uuid::parse_str(s.trim())
            .map(|u| u.hyphenated().to_string())
            .map_err(|e| PipeError::format(ty, s.to_string(), e)),
        _ => Err(mismatch(ty, value)),
    }
}

/// `true` / `false`.
pub fn boolean(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    let b = match value {
        SqlValue::Bool(b) => *b,
        SqlValue::I16(v) => *v != 0,
        SqlValue::I32(v) => *v != 0,
        SqlValue::I64(v) => *v != 0,
        SqlValue::U64(v) => *v != 0,
        SqlValue::Bytes(b) if b.len() == 1 => b[0] != 0 && b[0] != b'0',
        SqlValue::Text(s) => parse_bool(ty, s)?,
        _ => return Err(mismatch(ty, value)),
    };
    Ok(b.to_string())
}

/// JSON document text.
pub fn json(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::Json(j) => Ok(j.to_string()),
        SqlValue::Text(_) | SqlValue::Bytes(_) => text(ty, value),
        _ => Err(mismatch(ty, value)),
    }
}

/// Bit string of `0`/`1` characters.
pub fn bits(ty: CanonicalType, value: &SqlValue<'_>) -> Result<String> {
    match value {
        SqlValue::Text(s) if s.chars().all(|c| c == '0' || c == '1') => Ok(s.to_string()),
        SqlValue::Bytes(b) => Ok(bytes_to_bit_string(b)),
        SqlValue::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        SqlValue::I64(v) => Ok(format!("{:b}", v)),
        SqlValue::U64(v) => Ok(format!("{:b}", v)),
        _ => Err(mismatch(ty, value)),
    }
}

/// Big-endian bytes as binary digits with leading zeros trimmed.
pub fn bytes_to_bit_string(bytes: &[u8]) -> String {
    let digits: String = bytes.iter().map(|b| format!("{:08b}", b)).collect();
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

// ===== Parse helpers (pipe text -> typed value) =====

/// Parse a pipe timestamp. Accepts RFC 3339 and `YYYY-MM-DD HH:MM:SS[.f]`
/// (read as UTC).
pub fn parse_timestamp(ty: CanonicalType, value: &str) -> Result<DateTime<FixedOffset>> {
    let v = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Ok(dt);
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%.f%#z",
        "%Y-%m-%d %H:%M:%S%.f %:z",
        "%Y-%m-%d %H:%M:%S%.f %z",
    ] {
        if let Ok(dt) = DateTime::parse_from_str(v, fmt) {
            return Ok(dt);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(v, fmt) {
            return Ok(naive_as_utc(&dt));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        return Ok(naive_as_utc(&d.and_time(NaiveTime::MIN)));
    }
    Err(PipeError::format(ty, value, "not a timestamp"))
}

/// Parse a pipe date.
pub fn parse_date(ty: CanonicalType, value: &str) -> Result<NaiveDate> {
    let v = value.trim();
    if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        return Ok(d);
    }
    parse_timestamp(ty, v).map(|dt| dt.date_naive())
}

/// Parse a pipe time of day.
pub fn parse_time(ty: CanonicalType, value: &str) -> Result<NaiveTime> {
    let v = value.trim();
    if let Ok(t) = NaiveTime::parse_from_str(v, "%H:%M:%S%.f") {
        return Ok(t);
    }
    parse_timestamp(ty, v).map(|dt| dt.time())
}

/// Parse a pipe boolean.
pub fn parse_bool(ty: CanonicalType, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "y" | "yes" => Ok(true),
        "false" | "f" | "0" | "n" | "no" => Ok(false),
        _ => Err(PipeError::format(ty, value, "not a boolean")),
    }
}

/// Wall-clock part of a parsed timestamp.
pub fn wall_clock(dt: &DateTime<FixedOffset>) -> NaiveDateTime {
    dt.naive_local()
}

/// UTC instant of a parsed timestamp.
pub fn utc(dt: &DateTime<FixedOffset>) -> NaiveDateTime {
    dt.naive_utc()
}

// ===== Rendering helpers =====

/// `YYYY-MM-DD HH:MM:SS.ffffff`
pub fn datetime_micros(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// `HH:MM:SS.ffffff`
pub fn time_micros(t: &NaiveTime) -> String {
    t.format("%H:%M:%S%.6f").to_string()
}

/// Fractional seconds with at most `digits` digits and trailing zeros
/// removed, including the dot; empty when the fraction is zero.
pub fn trimmed_fraction(nanos: u32, digits: usize) -> String {
    let digits = digits.clamp(1, 9);
    let full = format!("{:09}", nanos % 1_000_000_000);
    let kept = full[..digits].trim_end_matches('0');
    if kept.is_empty() {
        String::new()
    } else {
        format!(".{}", kept)
    }
}

/// `YYYY-MM-DD HH:MM:SS[.f…]` with up to `digits` trimmed fraction digits.
pub fn datetime_trimmed(dt: &NaiveDateTime, digits: usize) -> String {
    format!(
        "{}{}",
        dt.format("%Y-%m-%d %H:%M:%S"),
        trimmed_fraction(dt.nanosecond(), digits)
    )
}

/// `HH:MM:SS[.f…]` with up to `digits` trimmed fraction digits.
pub fn time_trimmed(t: &NaiveTime, digits: usize) -> String {
    format!(
        "{}{}",
        t.format("%H:%M:%S"),
        trimmed_fraction(t.nanosecond(), digits)
    )
}

/// Decode pipe hex.
pub fn decode_hex(ty: CanonicalType, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim()).map_err(|e| PipeError::format(ty, value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const T: CanonicalType = CanonicalType::Datetime;

    #[test]
    fn test_timestamp_naive_gets_z_suffix() {
        let dt = NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_milli_opt(12, 34, 56, 789)
            .unwrap();
        assert_eq!(
            timestamp(T, &SqlValue::DateTime(dt)).unwrap(),
            "2024-06-15T12:34:56.789Z"
        );
    }

    #[test]
    fn test_timestamptz_normalizes_to_utc() {
        let dt = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 2, 0, 0)
            .unwrap();
        assert_eq!(
            timestamptz(CanonicalType::Datetimetz, &SqlValue::DateTimeOffset(dt)).unwrap(),
            "2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_time_and_date_roundtrip_through_parse() {
        let t = NaiveTime::from_hms_micro_opt(23, 59, 58, 123_456).unwrap();
        let s = time(CanonicalType::Time, &SqlValue::Time(t)).unwrap();
        assert_eq!(s, "0000-01-01T23:59:58.123456Z");
        assert_eq!(parse_time(CanonicalType::Time, &s).unwrap(), t);

        let d = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let s = date(CanonicalType::Date, &SqlValue::Date(d)).unwrap();
        assert_eq!(s, "2024-06-15T00:00:00Z");
        assert_eq!(parse_date(CanonicalType::Date, &s).unwrap(), d);
    }

    #[test]
    fn test_integer_rejects_non_numbers() {
        assert_eq!(integer(CanonicalType::Int32, &SqlValue::I32(-7)).unwrap(), "-7");
        assert_eq!(
            integer(CanonicalType::Int64, &SqlValue::text(" 42 ")).unwrap(),
            "42"
        );
        let err = integer(CanonicalType::Int32, &SqlValue::text("abc")).unwrap_err();
        assert!(matches!(err, PipeError::Format { .. }));
    }

    #[test]
    fn test_float_shortest_form_and_specials() {
        assert_eq!(float(CanonicalType::Float64, &SqlValue::F64(1.5)).unwrap(), "1.5");
        assert_eq!(
            float(CanonicalType::Float64, &SqlValue::F64(f64::INFINITY)).unwrap(),
            "Infinity"
        );
        assert_eq!(float(CanonicalType::Float32, &SqlValue::F32(0.1)).unwrap(), "0.1");
    }

    #[test]
    fn test_money_text_drops_currency_symbol_and_grouping() {
        let money = CanonicalType::Money;
        assert_eq!(decimal(money, &SqlValue::text("$1,234.50")).unwrap(), "1234.50");
        assert_eq!(decimal(money, &SqlValue::text("-12.00")).unwrap(), "-12.00");
        assert!(decimal(money, &SqlValue::text("free")).is_err());
        // Only money columns are cleaned
        assert!(decimal(CanonicalType::Decimal, &SqlValue::text("$1,234.50")).is_err());
    }

    #[test]
    fn test_bits_from_bytes_trims_leading_zeros() {
        assert_eq!(bytes_to_bit_string(&[0x00, 0x05]), "101");
        assert_eq!(bytes_to_bit_string(&[0x00]), "0");
    }

    #[test]
    fn test_trimmed_fraction() {
        assert_eq!(trimmed_fraction(0, 7), "");
        assert_eq!(trimmed_fraction(789_000_000, 7), ".789");
        assert_eq!(trimmed_fraction(123_456_789, 7), ".1234567");
    }

    #[test]
    fn test_parse_timestamp_accepts_space_separated() {
        let dt = parse_timestamp(T, "2024-01-01 10:00:00.5").unwrap();
        assert_eq!(datetime_micros(&wall_clock(&dt)), "2024-01-01 10:00:00.500000");
        assert!(parse_timestamp(T, "yesterday").is_err());
    }

    #[test]
    fn test_boolean_variants() {
        let b = CanonicalType::Bool;
        assert_eq!(boolean(b, &SqlValue::Bool(true)).unwrap(), "true");
        assert_eq!(boolean(b, &SqlValue::I16(0)).unwrap(), "false");
        assert_eq!(boolean(b, &SqlValue::text("t")).unwrap(), "true");
        assert!(boolean(b, &SqlValue::text("maybe")).is_err());
    }
}
