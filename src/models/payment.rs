use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pricing::money;

/// Advances monotonically: pending -> authorized -> captured,
/// authorized -> refunded, or pending -> failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    Refunded,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub base_fee: f64,
    pub distance_fee: f64,
    pub weight_fee: f64,
    pub priority_fee: f64,
    pub tax: f64,
    pub discount: f64,
}

impl CostBreakdown {
    /// Amount due: component sum less the discount, to the cent.
    pub fn total(&self) -> f64 {
        money::round2(
            self.base_fee + self.distance_fee + self.weight_fee + self.priority_fee + self.tax
                - self.discount,
        )
    }
}

/// One per delivery; keyed by delivery id in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub delivery_id: Uuid,
    pub status: PaymentStatus,
    pub amount: f64,
    pub tip: f64,
    pub breakdown: CostBreakdown,
    pub payment_method: Option<String>,
    pub promo_code: Option<String>,
    pub transaction_id: Option<String>,
    pub refund_amount: f64,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}
