//! Business-rule checks for transformed trips

use bigdecimal::BigDecimal;

use crate::error::BusinessRuleViolation;
use crate::record::TripRecord;

/// Check a trip against the load rules, stopping at the first violation
pub fn validate(record: &TripRecord) -> Result<(), BusinessRuleViolation> {
    let zero = BigDecimal::from(0);

    if record.pickup_time > record.dropoff_time {
        return Err(BusinessRuleViolation::DropoffBeforePickup);
    }
    if record.passenger_count < 0 {
        return Err(BusinessRuleViolation::NegativePassengerCount);
    }
    if record.fare_amount < zero {
        return Err(BusinessRuleViolation::NegativeFareAmount);
    }
    if record.tip_amount < zero {
        return Err(BusinessRuleViolation::NegativeTipAmount);
    }

    Ok(())
}
