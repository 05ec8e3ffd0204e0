pub mod money;
pub mod promo;

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geo;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{PackageType, Priority};
use crate::pricing::money::{to_decimal, to_f64};

/// Per-mile rate applied to the great-circle distance.
const PER_MILE_RATE: Decimal = Decimal::from_parts(125, 0, 0, false, 2);
/// Flat fee charged at full weight utilization.
const WEIGHT_FEE_AT_CAPACITY: Decimal = Decimal::from_parts(5, 0, 0, false, 0);
/// Minutes of travel estimated per mile.
const MINUTES_PER_MILE: f64 = 5.0;

/// Business tunables read from system settings at call time.
#[derive(Debug, Clone, Copy)]
pub struct PricingSettings {
    pub base_price_multiplier: f64,
    pub urgent_price_multiplier: f64,
    pub express_price_multiplier: f64,
    pub tax_rate: f64,
}

/// Deterministic cost breakdown; every component rounded to the cent,
/// half away from zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub base_fee: f64,
    pub distance_fee: f64,
    pub weight_fee: f64,
    pub priority_fee: f64,
    pub tax: f64,
    pub distance_miles: f64,
    pub estimated_duration_minutes: i64,
}

impl Quote {
    /// Pre-discount order amount.
    pub fn subtotal(&self) -> f64 {
        money::round2(self.base_fee + self.distance_fee + self.weight_fee + self.priority_fee + self.tax)
    }
}

/// Pure function of its inputs; no store access, no side effects.
pub fn quote(
    pickup: &GeoPoint,
    dropoff: &GeoPoint,
    package_type: &PackageType,
    weight: f64,
    priority: Priority,
    settings: &PricingSettings,
) -> Quote {
    let distance_miles = geo::distance_miles(pickup, dropoff);
    let estimated_duration_minutes = (distance_miles * MINUTES_PER_MILE).round() as i64;

    let base_fee = to_decimal(package_type.base_price) * to_decimal(settings.base_price_multiplier);
    let base_fee = round(base_fee);

    let distance_fee = round(to_decimal(distance_miles) * PER_MILE_RATE);

    let weight_fee = if package_type.max_weight > 0.0 && weight > 0.5 * package_type.max_weight {
        round(to_decimal(weight) / to_decimal(package_type.max_weight) * WEIGHT_FEE_AT_CAPACITY)
    } else {
        Decimal::ZERO
    };

    let multiplier = match priority {
        Priority::Urgent => settings.urgent_price_multiplier,
        Priority::Express => settings.express_price_multiplier,
        Priority::Standard => 1.0,
    };
    let priority_fee = round(base_fee * (to_decimal(multiplier) - Decimal::ONE));
    let priority_fee = priority_fee.max(Decimal::ZERO);

    let taxable = base_fee + distance_fee + weight_fee + priority_fee;
    let tax = round(taxable * to_decimal(settings.tax_rate));

    Quote {
        base_fee: to_f64(base_fee),
        distance_fee: to_f64(distance_fee),
        weight_fee: to_f64(weight_fee),
        priority_fee: to_f64(priority_fee),
        tax: to_f64(tax),
        distance_miles: money::round2(distance_miles),
        estimated_duration_minutes,
    }
}

fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::{quote, PricingSettings};
    use crate::models::courier::GeoPoint;
    use crate::models::delivery::{PackageType, Priority};
    use uuid::Uuid;

    fn settings() -> PricingSettings {
        PricingSettings {
            base_price_multiplier: 1.0,
            urgent_price_multiplier: 1.5,
            express_price_multiplier: 1.25,
            tax_rate: 0.0875,
        }
    }

    fn medium_box() -> PackageType {
        PackageType {
            id: Uuid::from_u128(2),
            name: "medium".to_string(),
            base_price: 9.99,
            max_weight: 10.0,
        }
    }

    fn pickup() -> GeoPoint {
        GeoPoint {
            lat: 37.7897,
            lng: -122.3972,
        }
    }

    fn dropoff() -> GeoPoint {
        GeoPoint {
            lat: 37.7663,
            lng: -122.4005,
        }
    }

    #[test]
    fn standard_quote_breakdown() {
        let q = quote(
            &pickup(),
            &dropoff(),
            &medium_box(),
            3.5,
            Priority::Standard,
            &settings(),
        );

        assert_eq!(q.base_fee, 9.99);
        assert_eq!(q.weight_fee, 0.0, "3.5 lb is under half of 10 lb capacity");
        assert_eq!(q.priority_fee, 0.0);
        assert!(q.distance_miles > 1.0 && q.distance_miles < 2.0);
        assert_eq!(
            q.estimated_duration_minutes,
            (q.distance_miles * 5.0).round() as i64
        );

        let expected_tax =
            ((q.base_fee + q.distance_fee + q.weight_fee + q.priority_fee) * 0.0875 * 100.0)
                .round()
                / 100.0;
        assert!((q.tax - expected_tax).abs() < 0.011);
    }

    #[test]
    fn weight_fee_kicks_in_above_half_capacity() {
        let q = quote(
            &pickup(),
            &dropoff(),
            &medium_box(),
            8.0,
            Priority::Standard,
            &settings(),
        );
        assert_eq!(q.weight_fee, 4.0, "8/10 of capacity at $5 flat");

        let at_half = quote(
            &pickup(),
            &dropoff(),
            &medium_box(),
            5.0,
            Priority::Standard,
            &settings(),
        );
        assert_eq!(at_half.weight_fee, 0.0, "exactly half does not trigger");
    }

    #[test]
    fn urgent_priority_fee_is_half_the_base() {
        let q = quote(
            &pickup(),
            &dropoff(),
            &medium_box(),
            1.0,
            Priority::Urgent,
            &settings(),
        );
        assert_eq!(q.priority_fee, 5.0, "9.99 * (1.5 - 1) rounded half up");
    }

    #[test]
    fn quote_is_pure() {
        let a = quote(
            &pickup(),
            &dropoff(),
            &medium_box(),
            3.5,
            Priority::Express,
            &settings(),
        );
        let b = quote(
            &pickup(),
            &dropoff(),
            &medium_box(),
            3.5,
            Priority::Express,
            &settings(),
        );
        assert_eq!(a.subtotal(), b.subtotal());
        assert_eq!(a.distance_miles, b.distance_miles);
    }
}
