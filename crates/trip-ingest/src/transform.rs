//! Raw field array to [`TripRecord`] conversion
//!
//! The transformer is a pure function of its input: it never logs and never
//! touches the store. Failures come back as [`TransformError`] so the
//! orchestrator decides what to do with the record.
//!
//! # Grammar
//!
//! - Timestamps follow a fixed `chrono` format string (default
//!   `%m/%d/%Y %I:%M:%S %p`) and are read as wall-clock time in the source
//!   zone, then converted to UTC. Times skipped by a daylight-saving jump are
//!   rejected; repeated times resolve to the later (standard time) instant.
//! - Integers are plain base-10 with an optional sign.
//! - Decimals accept an optional sign, digits and a single `.` separator, and
//!   are rounded half-up to two fractional digits.

use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::TransformError;
use crate::extract::RawRecord;
use crate::record::{StoreAndFwdFlag, TripRecord, DECIMAL_INTEGER_DIGITS, DECIMAL_SCALE};

/// Default timestamp layout of the source feed
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Default source time zone
pub const DEFAULT_SOURCE_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Source column names for each trip field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumns {
    pub pickup_time: String,
    pub dropoff_time: String,
    pub passenger_count: String,
    pub trip_distance: String,
    pub store_and_fwd_flag: String,
    pub pu_location_id: String,
    pub do_location_id: String,
    pub fare_amount: String,
    pub tip_amount: String,
}

impl Default for SourceColumns {
    fn default() -> Self {
        Self {
            pickup_time: "tpep_pickup_datetime".to_string(),
            dropoff_time: "tpep_dropoff_datetime".to_string(),
            passenger_count: "passenger_count".to_string(),
            trip_distance: "trip_distance".to_string(),
            store_and_fwd_flag: "store_and_fwd_flag".to_string(),
            pu_location_id: "PULocationID".to_string(),
            do_location_id: "DOLocationID".to_string(),
            fare_amount: "fare_amount".to_string(),
            tip_amount: "tip_amount".to_string(),
        }
    }
}

impl SourceColumns {
    fn in_order(&self) -> [&str; 9] {
        [
            self.pickup_time.as_str(),
            self.dropoff_time.as_str(),
            self.passenger_count.as_str(),
            self.trip_distance.as_str(),
            self.store_and_fwd_flag.as_str(),
            self.pu_location_id.as_str(),
            self.do_location_id.as_str(),
            self.fare_amount.as_str(),
            self.tip_amount.as_str(),
        ]
    }
}

/// Transformer settings
#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub columns: SourceColumns,
    pub timestamp_format: String,
    pub source_timezone: Tz,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            columns: SourceColumns::default(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            source_timezone: DEFAULT_SOURCE_TIMEZONE,
        }
    }
}

impl TransformConfig {
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    pub fn with_source_timezone(mut self, tz: Tz) -> Self {
        self.source_timezone = tz;
        self
    }

    pub fn with_columns(mut self, columns: SourceColumns) -> Self {
        self.columns = columns;
        self
    }
}

/// Converts raw field arrays into normalized trip records
#[derive(Debug, Clone, Default)]
pub struct RecordTransformer {
    config: TransformConfig,
}

impl RecordTransformer {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    pub fn transform(&self, raw: &RawRecord) -> Result<TripRecord, TransformError> {
        let columns = self.config.columns.in_order();

        // Every required field must be present before any is parsed
        let mut values = [""; 9];
        for (slot, column) in values.iter_mut().zip(columns) {
            *slot = required(raw, column)?;
        }
        let [pickup, dropoff, passengers, distance, flag, pu, dropoff_loc, fare, tip] = values;
        let [c_pickup, c_dropoff, c_passengers, c_distance, c_flag, c_pu, c_do, c_fare, c_tip] =
            columns;

        Ok(TripRecord {
            pickup_time: self.parse_timestamp(c_pickup, pickup)?,
            dropoff_time: self.parse_timestamp(c_dropoff, dropoff)?,
            passenger_count: parse_int(c_passengers, passengers)?,
            trip_distance: parse_decimal(c_distance, distance)?,
            store_and_fwd_flag: parse_flag(c_flag, flag)?,
            pu_location_id: parse_int(c_pu, pu)?,
            do_location_id: parse_int(c_do, dropoff_loc)?,
            fare_amount: parse_decimal(c_fare, fare)?,
            tip_amount: parse_decimal(c_tip, tip)?,
        })
    }

    fn parse_timestamp(&self, column: &str, value: &str) -> Result<DateTime<Utc>, TransformError> {
        let naive = NaiveDateTime::parse_from_str(value, &self.config.timestamp_format)
            .map_err(|e| TransformError::malformed(column, value, e))?;

        let tz = self.config.source_timezone;
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
            LocalResult::Ambiguous(_, standard) => Ok(standard.with_timezone(&Utc)),
            LocalResult::None => Err(TransformError::malformed(
                column,
                value,
                format!("wall-clock time does not exist in {}", tz.name()),
            )),
        }
    }
}

fn required<'a>(raw: &'a RawRecord, column: &str) -> Result<&'a str, TransformError> {
    match raw.get(column).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(TransformError::EmptyField {
            column: column.to_string(),
        }),
    }
}

fn parse_int(column: &str, value: &str) -> Result<i32, TransformError> {
    value
        .parse::<i32>()
        .map_err(|e| TransformError::malformed(column, value, e))
}

fn parse_decimal(column: &str, value: &str) -> Result<BigDecimal, TransformError> {
    if !is_plain_decimal(value) {
        return Err(TransformError::malformed(column, value, "invalid decimal"));
    }
    let rounded = BigDecimal::from_str(value)
        .map(|d| d.with_scale_round(DECIMAL_SCALE, RoundingMode::HalfUp))
        .map_err(|e| TransformError::malformed(column, value, e))?;

    if rounded.abs() >= BigDecimal::from(10_i64.pow(DECIMAL_INTEGER_DIGITS)) {
        return Err(TransformError::malformed(column, value, "exceeds NUMERIC(10,2)"));
    }
    Ok(rounded)
}

/// `[+-]? digits [. digits]` with at least one digit; no exponent, no grouping
fn is_plain_decimal(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    !(int_part.is_empty() && frac_part.is_empty()) && all_digits(int_part) && all_digits(frac_part)
}

fn parse_flag(column: &str, value: &str) -> Result<StoreAndFwdFlag, TransformError> {
    StoreAndFwdFlag::from_code(value).ok_or_else(|| {
        TransformError::malformed(column, value, "store-and-forward code must be 'Y' or 'N'")
    })
}
