use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::chat::Message;
use crate::models::courier::CourierProfile;
use crate::models::delivery::{Delivery, DeliveryStatus, PackageType, StatusEvent};
use crate::models::location::LocationSample;
use crate::models::notification::Notification;
use crate::models::payment::{Payment, Payout};
use crate::models::promo::{PromoCode, PromoUsage};
use crate::models::rating::{DeliveryIssue, Rating};
use crate::models::tracking::TrackingToken;

/// Single source of truth. Tables are DashMaps keyed by id; cross-entity
/// mutations for one delivery are serialized by that delivery's lock
/// (`delivery_lock`), and courier exclusivity is a compare-and-set on
/// `active_delivery_id` (`reserve_courier`).
pub struct Store {
    pub deliveries: DashMap<Uuid, Delivery>,
    pub delivery_events: DashMap<Uuid, Vec<StatusEvent>>,
    pub couriers: DashMap<Uuid, CourierProfile>,
    pub payments: DashMap<Uuid, Payment>,
    pub promo_codes: DashMap<String, PromoCode>,
    pub promo_usages: DashMap<(Uuid, String), PromoUsage>,
    pub tracking_tokens: DashMap<String, TrackingToken>,
    pub messages: DashMap<Uuid, Message>,
    pub messages_by_delivery: DashMap<Uuid, Vec<Uuid>>,
    pub notifications: DashMap<Uuid, Notification>,
    pub notifications_by_user: DashMap<Uuid, Vec<Uuid>>,
    pub ratings: DashMap<(Uuid, Uuid), Rating>,
    pub issues: DashMap<Uuid, DeliveryIssue>,
    pub location_samples: DashMap<Uuid, Vec<LocationSample>>,
    pub payouts: DashMap<Uuid, Vec<Payout>>,
    pub package_types: DashMap<Uuid, PackageType>,
    pub settings: DashMap<String, String>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

pub mod setting_keys {
    pub const BASE_PRICE_MULTIPLIER: &str = "base_price_multiplier";
    pub const URGENT_PRICE_MULTIPLIER: &str = "urgent_price_multiplier";
    pub const EXPRESS_PRICE_MULTIPLIER: &str = "express_price_multiplier";
    pub const TAX_RATE: &str = "tax_rate";
    pub const COURIER_COMMISSION_RATE: &str = "courier_commission_rate";
    pub const MAX_DELIVERY_DISTANCE: &str = "max_delivery_distance";
    pub const MIN_COURIER_RATING: &str = "min_courier_rating";
    pub const MAX_SEARCH_TIME: &str = "max_search_time";
    pub const COURIER_IDLE_TIMEOUT: &str = "courier_idle_timeout";
}

impl Store {
    pub fn new() -> Self {
        let store = Self {
            deliveries: DashMap::new(),
            delivery_events: DashMap::new(),
            couriers: DashMap::new(),
            payments: DashMap::new(),
            promo_codes: DashMap::new(),
            promo_usages: DashMap::new(),
            tracking_tokens: DashMap::new(),
            messages: DashMap::new(),
            messages_by_delivery: DashMap::new(),
            notifications: DashMap::new(),
            notifications_by_user: DashMap::new(),
            ratings: DashMap::new(),
            issues: DashMap::new(),
            location_samples: DashMap::new(),
            payouts: DashMap::new(),
            package_types: DashMap::new(),
            settings: DashMap::new(),
            locks: DashMap::new(),
        };
        store.seed_settings();
        store.seed_package_types();
        store
    }

    fn seed_settings(&self) {
        let defaults = [
            (setting_keys::BASE_PRICE_MULTIPLIER, "1.0"),
            (setting_keys::URGENT_PRICE_MULTIPLIER, "1.5"),
            (setting_keys::EXPRESS_PRICE_MULTIPLIER, "1.25"),
            (setting_keys::TAX_RATE, "0.0875"),
            (setting_keys::COURIER_COMMISSION_RATE, "0.8"),
            (setting_keys::MAX_DELIVERY_DISTANCE, "50"),
            (setting_keys::MIN_COURIER_RATING, "0"),
            (setting_keys::MAX_SEARCH_TIME, "30"),
            (setting_keys::COURIER_IDLE_TIMEOUT, "120"),
        ];
        for (key, value) in defaults {
            self.settings.insert(key.to_string(), value.to_string());
        }
    }

    fn seed_package_types(&self) {
        let types = [
            (1u128, "small", 5.99, 5.0),
            (2, "medium", 9.99, 10.0),
            (3, "large", 19.99, 30.0),
        ];
        for (seed, name, base_price, max_weight) in types {
            let id = Uuid::from_u128(seed);
            self.package_types.insert(
                id,
                PackageType {
                    id,
                    name: name.to_string(),
                    base_price,
                    max_weight,
                },
            );
        }
    }

    pub fn setting_f64(&self, key: &str, default: f64) -> f64 {
        self.settings
            .get(key)
            .and_then(|v| v.value().parse().ok())
            .unwrap_or(default)
    }

    pub fn setting_i64(&self, key: &str, default: i64) -> i64 {
        self.settings
            .get(key)
            .and_then(|v| v.value().parse().ok())
            .unwrap_or(default)
    }

    /// The per-delivery row lock; every lifecycle transition runs under it.
    pub fn delivery_lock(&self, delivery_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(delivery_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn get_delivery(&self, id: Uuid) -> Result<Delivery, AppError> {
        self.deliveries
            .get(&id)
            .map(|d| d.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("delivery {id}")))
    }

    pub fn get_package_type(&self, id: Uuid) -> Result<PackageType, AppError> {
        self.package_types
            .get(&id)
            .map(|t| t.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("package type {id}")))
    }

    pub fn get_payment(&self, delivery_id: Uuid) -> Result<Payment, AppError> {
        self.payments
            .get(&delivery_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("payment for delivery {delivery_id}")))
    }

    /// Fetch-or-create; profile details are owned by the external profile
    /// service, so a fresh row carries workable defaults.
    pub fn courier_profile(&self, user_id: Uuid) -> CourierProfile {
        self.couriers
            .entry(user_id)
            .or_insert_with(|| CourierProfile::new(user_id))
            .value()
            .clone()
    }

    pub fn get_courier(&self, user_id: Uuid) -> Result<CourierProfile, AppError> {
        self.couriers
            .get(&user_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("courier {user_id}")))
    }

    /// Conditional write backing invariant "at most one active delivery per
    /// courier": succeeds only when `active_delivery_id` is currently null.
    pub fn reserve_courier(&self, courier_id: Uuid, delivery_id: Uuid) -> Result<(), AppError> {
        let mut entry = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id}")))?;

        if entry.active_delivery_id.is_some() {
            return Err(AppError::Conflict(
                "courier already has an active delivery".to_string(),
            ));
        }
        entry.active_delivery_id = Some(delivery_id);
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Clears the reservation only if it still points at `delivery_id`.
    pub fn release_courier(&self, courier_id: Uuid, delivery_id: Uuid) {
        if let Some(mut entry) = self.couriers.get_mut(&courier_id) {
            if entry.active_delivery_id == Some(delivery_id) {
                entry.active_delivery_id = None;
                entry.updated_at = Utc::now();
            }
        }
    }

    pub fn append_status_event(&self, event: StatusEvent) {
        self.delivery_events
            .entry(event.delivery_id)
            .or_default()
            .push(event);
    }

    pub fn events_for(&self, delivery_id: Uuid) -> Vec<StatusEvent> {
        self.delivery_events
            .get(&delivery_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Records usage and bumps the counter; the caller holds the delivery
    /// lock, which makes this atomic with payment authorization.
    pub fn commit_promo_usage(
        &self,
        code: &str,
        user_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<(), AppError> {
        let mut promo = self
            .promo_codes
            .get_mut(code)
            .ok_or_else(|| AppError::NotFound(format!("promo code {code}")))?;

        if let Some(limit) = promo.usage_limit {
            if promo.current_usage >= limit {
                return Err(AppError::Conflict("promo code usage limit reached".to_string()));
            }
        }
        if promo.is_one_time && self.promo_usages.contains_key(&(user_id, code.to_string())) {
            return Err(AppError::Conflict("promo code already used".to_string()));
        }
        promo.current_usage += 1;
        drop(promo);

        self.promo_usages.insert(
            (user_id, code.to_string()),
            PromoUsage {
                user_id,
                code: code.to_string(),
                delivery_id,
                used_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn has_promo_usage(&self, user_id: Uuid, code: &str) -> bool {
        self.promo_usages.contains_key(&(user_id, code.to_string()))
    }

    pub fn user_has_delivered_order(&self, user_id: Uuid) -> bool {
        self.deliveries.iter().any(|d| {
            d.value().sender_id == user_id && d.value().status == DeliveryStatus::Delivered
        })
    }

    pub fn insert_message(&self, message: Message) {
        self.messages_by_delivery
            .entry(message.delivery_id)
            .or_default()
            .push(message.id);
        self.messages.insert(message.id, message);
    }

    pub fn messages_for(&self, delivery_id: Uuid) -> Vec<Message> {
        let ids = self
            .messages_by_delivery
            .get(&delivery_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.value().clone()))
            .collect()
    }

    pub fn insert_notification(&self, notification: Notification) {
        self.notifications_by_user
            .entry(notification.user_id)
            .or_default()
            .push(notification.id);
        self.notifications.insert(notification.id, notification);
    }

    pub fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        let ids = self
            .notifications_by_user
            .get(&user_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        let mut rows: Vec<Notification> = ids
            .iter()
            .filter_map(|id| self.notifications.get(id).map(|n| n.value().clone()))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    pub fn credit_courier(&self, courier_id: Uuid, amount: f64) {
        if let Some(mut entry) = self.couriers.get_mut(&courier_id) {
            entry.account_balance = crate::pricing::money::round2(entry.account_balance + amount);
            entry.updated_at = Utc::now();
        }
    }

    pub fn payouts_for(&self, courier_id: Uuid) -> Vec<Payout> {
        self.payouts
            .get(&courier_id)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    pub fn record_location(&self, sample: LocationSample) {
        self.location_samples
            .entry(sample.user_id)
            .or_default()
            .push(sample);
    }

    /// Deliveries visible to `user_id` in the given role, newest first.
    pub fn deliveries_for_user(
        &self,
        user_id: Uuid,
        as_courier: bool,
        status: Option<DeliveryStatus>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Delivery> {
        let mut rows: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|d| {
                let d = d.value();
                let owned = if as_courier {
                    d.courier_id == Some(user_id)
                } else {
                    d.sender_id == user_id
                };
                owned
                    && status.map_or(true, |s| d.status == s)
                    && from.map_or(true, |f| d.created_at >= f)
                    && to.map_or(true, |t| d.created_at <= t)
            })
            .map(|d| d.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    pub fn searching_deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .iter()
            .filter(|d| d.value().status == DeliveryStatus::SearchingCourier)
            .map(|d| d.value().clone())
            .collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Store;
    use uuid::Uuid;

    #[test]
    fn reserve_courier_is_exclusive() {
        let store = Store::new();
        let courier = Uuid::new_v4();
        store.courier_profile(courier);

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(store.reserve_courier(courier, first).is_ok());
        assert!(store.reserve_courier(courier, second).is_err());

        // Releasing against the wrong delivery is a no-op.
        store.release_courier(courier, second);
        assert!(store.reserve_courier(courier, second).is_err());

        store.release_courier(courier, first);
        assert!(store.reserve_courier(courier, second).is_ok());
    }

    #[test]
    fn promo_usage_respects_the_cap() {
        use crate::models::promo::{DiscountType, PromoCode};
        use chrono::{Duration, Utc};

        let store = Store::new();
        store.promo_codes.insert(
            "CAPPED".to_string(),
            PromoCode {
                code: "CAPPED".to_string(),
                discount_type: DiscountType::FixedAmount,
                discount_value: 5.0,
                minimum_order_amount: 0.0,
                maximum_discount: None,
                valid_from: Utc::now() - Duration::days(1),
                valid_until: Utc::now() + Duration::days(1),
                is_one_time: false,
                is_first_time_user: false,
                usage_limit: Some(1),
                current_usage: 0,
                is_active: true,
            },
        );

        let user = Uuid::new_v4();
        assert!(store
            .commit_promo_usage("CAPPED", user, Uuid::new_v4())
            .is_ok());
        assert!(store
            .commit_promo_usage("CAPPED", Uuid::new_v4(), Uuid::new_v4())
            .is_err());
        assert_eq!(store.promo_codes.get("CAPPED").unwrap().current_usage, 1);
    }

    #[test]
    fn settings_are_seeded_with_defaults() {
        let store = Store::new();
        assert_eq!(store.setting_f64(super::setting_keys::TAX_RATE, 0.0), 0.0875);
        assert_eq!(
            store.setting_i64(super::setting_keys::MAX_SEARCH_TIME, 0),
            30
        );
    }
}
