//! Normalized trip record model

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fractional digits kept for distance and money columns
pub const DECIMAL_SCALE: i64 = 2;

/// Integer digits that fit the committed `NUMERIC(10, 2)` columns
pub const DECIMAL_INTEGER_DIGITS: u32 = 8;

/// Canonical column order for the committed store and quarantine export
pub const TRIP_COLUMNS: [&str; 9] = [
    "PickupDateTime",
    "DropoffDateTime",
    "PassengerCount",
    "TripDistance",
    "StoreAndFwdFlag",
    "PULocationID",
    "DOLocationID",
    "FareAmount",
    "TipAmount",
];

/// Timestamp layout used when rendering UTC instants as text
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Store-and-forward flag, decoded from the single-letter source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreAndFwdFlag {
    Yes,
    No,
}

impl StoreAndFwdFlag {
    /// Decode a raw `Y`/`N` code; anything else is unknown
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "Y" => Some(StoreAndFwdFlag::Yes),
            "N" => Some(StoreAndFwdFlag::No),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreAndFwdFlag::Yes => "Yes",
            StoreAndFwdFlag::No => "No",
        }
    }
}

impl std::str::FromStr for StoreAndFwdFlag {
    type Err = String;

    /// Parse the stored form (`Yes`/`No`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Yes" => Ok(StoreAndFwdFlag::Yes),
            "No" => Ok(StoreAndFwdFlag::No),
            other => Err(format!("unknown store-and-forward value '{}'", other)),
        }
    }
}

impl std::fmt::Display for StoreAndFwdFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity used for duplicate detection.
///
/// Deliberately narrow: distance, fares, flag and locations are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DuplicateKey {
    pub pickup_time: DateTime<Utc>,
    pub dropoff_time: DateTime<Utc>,
    pub passenger_count: i32,
}

/// A typed, normalized trip. Built once by the transformer and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripRecord {
    pub pickup_time: DateTime<Utc>,
    pub dropoff_time: DateTime<Utc>,
    pub passenger_count: i32,
    pub trip_distance: BigDecimal,
    pub store_and_fwd_flag: StoreAndFwdFlag,
    pub pu_location_id: i32,
    pub do_location_id: i32,
    pub fare_amount: BigDecimal,
    pub tip_amount: BigDecimal,
}

impl TripRecord {
    pub fn duplicate_key(&self) -> DuplicateKey {
        DuplicateKey {
            pickup_time: self.pickup_time,
            dropoff_time: self.dropoff_time,
            passenger_count: self.passenger_count,
        }
    }

    /// Textual values in [`TRIP_COLUMNS`] order
    pub fn export_values(&self) -> [String; 9] {
        [
            self.pickup_time.format(EXPORT_TIMESTAMP_FORMAT).to_string(),
            self.dropoff_time.format(EXPORT_TIMESTAMP_FORMAT).to_string(),
            self.passenger_count.to_string(),
            self.trip_distance.with_scale(DECIMAL_SCALE).to_string(),
            self.store_and_fwd_flag.as_str().to_string(),
            self.pu_location_id.to_string(),
            self.do_location_id.to_string(),
            self.fare_amount.with_scale(DECIMAL_SCALE).to_string(),
            self.tip_amount.with_scale(DECIMAL_SCALE).to_string(),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn sample() -> TripRecord {
        TripRecord {
            pickup_time: Utc.with_ymd_and_hms(2020, 1, 1, 5, 28, 15).unwrap(),
            dropoff_time: Utc.with_ymd_and_hms(2020, 1, 1, 5, 33, 3).unwrap(),
            passenger_count: 1,
            trip_distance: BigDecimal::from_str("1.2").unwrap(),
            store_and_fwd_flag: StoreAndFwdFlag::No,
            pu_location_id: 238,
            do_location_id: 239,
            fare_amount: BigDecimal::from_str("6").unwrap(),
            tip_amount: BigDecimal::from_str("1.47").unwrap(),
        }
    }

    #[test]
    fn test_flag_codes() {
        assert_eq!(StoreAndFwdFlag::from_code("Y"), Some(StoreAndFwdFlag::Yes));
        assert_eq!(StoreAndFwdFlag::from_code("N"), Some(StoreAndFwdFlag::No));
        assert_eq!(StoreAndFwdFlag::from_code("X"), None);
        assert_eq!(StoreAndFwdFlag::from_code("y"), None);
        assert_eq!("Yes".parse::<StoreAndFwdFlag>().unwrap(), StoreAndFwdFlag::Yes);
    }

    #[test]
    fn test_export_values_use_canonical_order() {
        let values = sample().export_values();
        assert_eq!(
            values.join(","),
            "2020-01-01 05:28:15,2020-01-01 05:33:03,1,1.20,No,238,239,6.00,1.47"
        );
    }

    #[test]
    fn test_duplicate_key_ignores_fare() {
        let a = sample();
        let mut b = sample();
        b.fare_amount = BigDecimal::from_str("99.99").unwrap();
        b.pu_location_id = 1;
        assert_eq!(a.duplicate_key(), b.duplicate_key());
    }
}
