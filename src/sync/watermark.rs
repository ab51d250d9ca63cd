//! Conversions between row values and cursor watermarks.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use checkpoint::TIMESTAMP_FORMAT;
use mysql_async::Value;

use crate::mysql::ColumnInfo;

/// A primary-key value as stored in a cursor.
pub fn cursor_id(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Int(i) => Some(i.to_string()),
        Value::UInt(u) => Some(u.to_string()),
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Float(f) => Some(f.to_string()),
        Value::Double(d) => Some(d.to_string()),
        Value::Date(..) => row_timestamp(value).map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()),
        other => Some(other.as_sql(true).trim_matches('\'').to_string()),
    }
}

/// A stored primary-key watermark as a value comparable with the column.
pub fn primary_key_value(column: &ColumnInfo, raw: &str) -> Value {
    if column.is_integer() {
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(u) = raw.parse::<u64>() {
            return Value::UInt(u);
        }
    }
    Value::Bytes(raw.as_bytes().to_vec())
}

pub fn timestamp_value(ts: NaiveDateTime) -> Value {
    Value::Date(
        ts.year() as u16,
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        ts.nanosecond() / 1_000,
    )
}

/// The timestamp held by a row value, if any. Zero dates have none.
pub fn row_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Date(y, mo, d, h, mi, s, us) => {
            NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*mo), u32::from(*d))?
                .and_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us)
        }
        Value::Bytes(bytes) => {
            let text = std::str::from_utf8(bytes).ok()?;
            NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}
