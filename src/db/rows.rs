//! JSON shaping for result rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use uuid::Uuid;

/// Column names plus one JSON object per row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

pub fn row_to_json(row: &PgRow) -> Result<Map<String, Value>, sqlx::Error> {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = column_value(row, index, column.type_info().name())?;
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

fn column_value(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| float_value(f64::from(v))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(float_value),
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(index)?.map(decimal_value),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(date_value),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(timestamp_value),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(timestamptz_value),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)?
            .map(|id| Value::String(id.to_string())),
        // Text types decode directly; anything else we cannot decode is null.
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

pub fn float_value(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// NUMERIC becomes a JSON float.
pub fn decimal_value(value: Decimal) -> Value {
    value.to_f64().map_or(Value::Null, float_value)
}

pub fn date_value(value: NaiveDate) -> Value {
    Value::String(value.format("%Y-%m-%d").to_string())
}

/// Midnight timestamps render as plain dates, which chart nicer.
pub fn timestamp_value(value: NaiveDateTime) -> Value {
    if is_midnight(&value) {
        date_value(value.date())
    } else {
        Value::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
    }
}

pub fn timestamptz_value(value: DateTime<Utc>) -> Value {
    if is_midnight(&value.naive_utc()) {
        date_value(value.date_naive())
    } else {
        Value::String(value.to_rfc3339())
    }
}

fn is_midnight(value: &NaiveDateTime) -> bool {
    value.hour() == 0 && value.minute() == 0 && value.second() == 0 && value.nanosecond() == 0
}
