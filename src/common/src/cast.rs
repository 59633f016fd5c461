// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Conversion from JSON-shaped record values into table column values.
//!
//! Conversions are idempotent for inputs that already have the target type
//! and lenient for the string spellings commonly produced by upstream
//! converters. Anything else is a [`CastError`], which the worker surfaces
//! as a task failure so the framework retries the offset.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("cannot cast {input} to {target}")]
pub struct CastError {
    input: String,
    target: &'static str,
}

impl CastError {
    fn new(input: impl ToString, target: &'static str) -> Self {
        Self {
            input: input.to_string(),
            target,
        }
    }
}

type Result<T> = std::result::Result<T, CastError>;

/// Primitive column types of the destination table schema. Nested types
/// (lists, maps, structs) are handled by the file-format writer itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    /// Timestamp without zone.
    Timestamp,
    /// Timestamp with zone, normalized to UTC.
    Timestamptz,
    String,
    Uuid,
    Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Timestamptz(DateTime<Utc>),
    String(String),
    Uuid(Uuid),
    Binary(Vec<u8>),
}

/// Days between 0001-01-01 (CE) and the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub fn str_to_bool(elem: &str) -> Result<bool> {
    match elem.trim().to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CastError::new(elem, "boolean")),
    }
}

pub fn str_to_date(elem: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(elem.trim(), "%Y-%m-%d")
        .map_err(|_| CastError::new(elem, "date"))
}

pub fn str_to_time(elem: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(elem.trim(), "%H:%M:%S%.f")
        .map_err(|_| CastError::new(elem, "time"))
}

/// Parse a timestamp with zone. Accepts RFC 3339 with `T` or space as the
/// date-time separator, `Z` or an explicit offset for the zone, and a naked
/// local date-time which is taken as UTC.
pub fn str_to_timestamptz(elem: &str) -> Result<DateTime<Utc>> {
    let s = elem.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // The space-separated spelling only differs in the byte at position 10.
    let normalized = if s.len() > 10 && s.as_bytes()[10] == b' ' {
        let mut t = s.to_owned();
        t.replace_range(10..11, "T");
        t
    } else {
        s.to_owned()
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    Err(CastError::new(elem, "timestamptz"))
}

pub fn str_to_timestamp(elem: &str) -> Result<NaiveDateTime> {
    str_to_timestamptz(elem)
        .map(|dt| dt.naive_utc())
        .map_err(|_| CastError::new(elem, "timestamp"))
}

pub fn str_to_decimal(elem: &str) -> Result<Decimal> {
    elem.trim()
        .parse()
        .map_err(|_| CastError::new(elem, "decimal"))
}

pub fn str_to_uuid(elem: &str) -> Result<Uuid> {
    Uuid::parse_str(elem.trim()).map_err(|_| CastError::new(elem, "uuid"))
}

/// Convert one record-value field into the given column type.
pub fn cast_value(value: &Value, ty: &FieldType) -> Result<Literal> {
    match ty {
        FieldType::Boolean => match value {
            Value::Bool(b) => Ok(Literal::Boolean(*b)),
            Value::String(s) => str_to_bool(s).map(Literal::Boolean),
            _ => Err(CastError::new(value, "boolean")),
        },
        FieldType::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Literal::Int)
                .ok_or_else(|| CastError::new(value, "int")),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Literal::Int)
                .map_err(|_| CastError::new(value, "int")),
            _ => Err(CastError::new(value, "int")),
        },
        FieldType::Long => match value {
            Value::Number(n) => n
                .as_i64()
                .map(Literal::Long)
                .ok_or_else(|| CastError::new(value, "long")),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Literal::Long)
                .map_err(|_| CastError::new(value, "long")),
            _ => Err(CastError::new(value, "long")),
        },
        FieldType::Float => match value {
            Value::Number(n) => n
                .as_f64()
                .map(|v| Literal::Float(v as f32))
                .ok_or_else(|| CastError::new(value, "float")),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Literal::Float)
                .map_err(|_| CastError::new(value, "float")),
            _ => Err(CastError::new(value, "float")),
        },
        FieldType::Double => match value {
            Value::Number(n) => n
                .as_f64()
                .map(Literal::Double)
                .ok_or_else(|| CastError::new(value, "double")),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Literal::Double)
                .map_err(|_| CastError::new(value, "double")),
            _ => Err(CastError::new(value, "double")),
        },
        FieldType::Decimal => match value {
            Value::Number(n) => str_to_decimal(&n.to_string()).map(Literal::Decimal),
            Value::String(s) => str_to_decimal(s).map(Literal::Decimal),
            _ => Err(CastError::new(value, "decimal")),
        },
        FieldType::Date => match value {
            Value::String(s) => str_to_date(s).map(Literal::Date),
            // Integer dates count days since the Unix epoch.
            Value::Number(n) => n
                .as_i64()
                .and_then(|days| i32::try_from(days).ok())
                .and_then(|days| {
                    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                })
                .map(Literal::Date)
                .ok_or_else(|| CastError::new(value, "date")),
            _ => Err(CastError::new(value, "date")),
        },
        FieldType::Time => match value {
            Value::String(s) => str_to_time(s).map(Literal::Time),
            // Integer times count milliseconds of the day.
            Value::Number(n) => n
                .as_i64()
                .filter(|ms| (0..86_400_000).contains(ms))
                .and_then(|ms| {
                    NaiveTime::from_num_seconds_from_midnight_opt(
                        (ms / 1000) as u32,
                        ((ms % 1000) * 1_000_000) as u32,
                    )
                })
                .map(Literal::Time)
                .ok_or_else(|| CastError::new(value, "time")),
            _ => Err(CastError::new(value, "time")),
        },
        FieldType::Timestamp => match value {
            Value::String(s) => str_to_timestamp(s).map(Literal::Timestamp),
            Value::Number(n) => epoch_millis(n, value, "timestamp")
                .map(|dt| Literal::Timestamp(dt.naive_utc())),
            _ => Err(CastError::new(value, "timestamp")),
        },
        FieldType::Timestamptz => match value {
            Value::String(s) => str_to_timestamptz(s).map(Literal::Timestamptz),
            Value::Number(n) => {
                epoch_millis(n, value, "timestamptz").map(Literal::Timestamptz)
            }
            _ => Err(CastError::new(value, "timestamptz")),
        },
        FieldType::String => match value {
            Value::String(s) => Ok(Literal::String(s.clone())),
            Value::Number(n) => Ok(Literal::String(n.to_string())),
            Value::Bool(b) => Ok(Literal::String(b.to_string())),
            _ => Err(CastError::new(value, "string")),
        },
        FieldType::Uuid => match value {
            Value::String(s) => str_to_uuid(s).map(Literal::Uuid),
            _ => Err(CastError::new(value, "uuid")),
        },
        FieldType::Binary => match value {
            Value::String(s) => BASE64
                .decode(s.trim())
                .map(Literal::Binary)
                .map_err(|_| CastError::new(value, "binary")),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_i64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| CastError::new(value, "binary"))
                })
                .collect::<Result<Vec<u8>>>()
                .map(Literal::Binary),
            _ => Err(CastError::new(value, "binary")),
        },
    }
}

fn epoch_millis(
    n: &serde_json::Number,
    value: &Value,
    target: &'static str,
) -> Result<DateTime<Utc>> {
    n.as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| CastError::new(value, target))
}
