use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub minimum_order_amount: f64,
    pub maximum_discount: Option<f64>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_one_time: bool,
    pub is_first_time_user: bool,
    pub usage_limit: Option<u32>,
    pub current_usage: u32,
    pub is_active: bool,
}

/// One per (user, code, delivery); blocks one-time reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoUsage {
    pub user_id: Uuid,
    pub code: String,
    pub delivery_id: Uuid,
    pub used_at: DateTime<Utc>,
}
