use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::payment::{CostBreakdown, Payment, PaymentStatus};
use crate::pricing::money;
use crate::store::Store;

const GATEWAY_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway declined: {0}")]
    Declined(String),

    #[error("gateway timeout")]
    Timeout,
}

/// Seam to the external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(&self, method: &str, amount: f64) -> Result<String, GatewayError>;
    async fn capture(&self, transaction_id: &str, amount: f64) -> Result<(), GatewayError>;
    async fn refund(
        &self,
        transaction_id: &str,
        amount: f64,
        reason: &str,
    ) -> Result<(), GatewayError>;
}

/// In-process gateway. Declines the `card_declined` method so failure
/// paths stay testable end to end; everything else authorizes.
pub struct SimGateway;

#[async_trait]
impl PaymentGateway for SimGateway {
    async fn authorize(&self, method: &str, _amount: f64) -> Result<String, GatewayError> {
        if method == "card_declined" {
            return Err(GatewayError::Declined("card declined".to_string()));
        }
        Ok(format!("txn_{}", Uuid::new_v4().simple()))
    }

    async fn capture(&self, _transaction_id: &str, _amount: f64) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn refund(
        &self,
        _transaction_id: &str,
        _amount: f64,
        _reason: &str,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Wraps the gateway and owns the Payment rows. One Payment per delivery;
/// every status move respects the pending -> authorized -> captured /
/// refunded lattice, and gateway timeouts are retried against the same
/// transaction id.
pub struct PaymentAdapter {
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentAdapter {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }

    /// Idempotent per delivery: a second authorize call returns the row
    /// already on file.
    pub async fn authorize(
        &self,
        store: &Store,
        delivery_id: Uuid,
        method: &str,
        breakdown: CostBreakdown,
        promo_code: Option<String>,
    ) -> Result<Payment, AppError> {
        if let Some(existing) = store.payments.get(&delivery_id) {
            let existing = existing.value().clone();
            if existing.status != PaymentStatus::Failed {
                return Ok(existing);
            }
        }

        let amount = breakdown.total();
        let now = Utc::now();
        let mut payment = Payment {
            delivery_id,
            status: PaymentStatus::Pending,
            amount,
            tip: 0.0,
            breakdown,
            payment_method: Some(method.to_string()),
            promo_code,
            transaction_id: None,
            refund_amount: 0.0,
            refund_reason: None,
            created_at: now,
            updated_at: now,
        };

        for attempt in 1..=GATEWAY_ATTEMPTS {
            match self.gateway.authorize(method, amount).await {
                Ok(txn_id) => {
                    payment.transaction_id = Some(txn_id);
                    payment.status = PaymentStatus::Authorized;
                    payment.updated_at = Utc::now();
                    store.payments.insert(delivery_id, payment.clone());
                    return Ok(payment);
                }
                Err(GatewayError::Declined(reason)) => {
                    payment.status = PaymentStatus::Failed;
                    payment.updated_at = Utc::now();
                    store.payments.insert(delivery_id, payment);
                    return Err(AppError::Payment(reason));
                }
                Err(GatewayError::Timeout) => {
                    warn!(delivery_id = %delivery_id, attempt, "payment gateway timeout");
                }
            }
        }

        // Outcome unknown; keep the row pending so the lifecycle stays
        // parked before searching_courier.
        store.payments.insert(delivery_id, payment);
        Err(AppError::PaymentPending)
    }

    pub async fn capture(&self, store: &Store, delivery_id: Uuid) -> Result<Payment, AppError> {
        let payment = store.get_payment(delivery_id)?;
        match payment.status {
            PaymentStatus::Captured => return Ok(payment),
            PaymentStatus::Authorized => {}
            other => {
                return Err(AppError::Payment(format!(
                    "cannot capture a payment in status {other:?}"
                )))
            }
        }

        let txn_id = payment
            .transaction_id
            .clone()
            .ok_or_else(|| AppError::Internal("authorized payment without txn id".to_string()))?;
        let amount = money::round2(payment.amount + payment.tip);

        retry_gateway(delivery_id, || self.gateway.capture(&txn_id, amount)).await?;

        let mut entry = store
            .payments
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("payment for delivery {delivery_id}")))?;
        entry.status = PaymentStatus::Captured;
        entry.updated_at = Utc::now();
        Ok(entry.value().clone())
    }

    /// `amount` of zero records the refusal-free void case (nothing owed
    /// back) without a gateway round trip.
    pub async fn refund(
        &self,
        store: &Store,
        delivery_id: Uuid,
        amount: f64,
        reason: &str,
    ) -> Result<Payment, AppError> {
        let payment = store.get_payment(delivery_id)?;
        match payment.status {
            PaymentStatus::Refunded => return Ok(payment),
            PaymentStatus::Authorized | PaymentStatus::Captured => {}
            other => {
                return Err(AppError::Payment(format!(
                    "cannot refund a payment in status {other:?}"
                )))
            }
        }

        let amount = money::round2(amount.clamp(0.0, payment.amount + payment.tip));
        if amount > 0.0 {
            let txn_id = payment.transaction_id.clone().ok_or_else(|| {
                AppError::Internal("authorized payment without txn id".to_string())
            })?;
            retry_gateway(delivery_id, || self.gateway.refund(&txn_id, amount, reason)).await?;
        }

        let mut entry = store
            .payments
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("payment for delivery {delivery_id}")))?;
        entry.status = PaymentStatus::Refunded;
        entry.refund_amount = amount;
        entry.refund_reason = Some(reason.to_string());
        entry.updated_at = Utc::now();
        Ok(entry.value().clone())
    }

    /// Post-delivery tip: captures the delta on the stored transaction and
    /// updates the row. Only meaningful on captured payments.
    pub async fn add_tip(
        &self,
        store: &Store,
        delivery_id: Uuid,
        tip_delta: f64,
    ) -> Result<Payment, AppError> {
        let payment = store.get_payment(delivery_id)?;
        if payment.status != PaymentStatus::Captured {
            return Err(AppError::Payment(
                "tips can only be added after the payment is captured".to_string(),
            ));
        }
        let txn_id = payment
            .transaction_id
            .clone()
            .ok_or_else(|| AppError::Internal("captured payment without txn id".to_string()))?;

        retry_gateway(delivery_id, || self.gateway.capture(&txn_id, tip_delta)).await?;

        let mut entry = store
            .payments
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("payment for delivery {delivery_id}")))?;
        entry.tip = money::round2(entry.tip + tip_delta);
        entry.updated_at = Utc::now();
        Ok(entry.value().clone())
    }
}

/// Bounded retry on gateway timeouts; the caller keeps using the same
/// transaction id across attempts.
async fn retry_gateway<F, Fut>(delivery_id: Uuid, mut call: F) -> Result<(), AppError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), GatewayError>>,
{
    for attempt in 1..=GATEWAY_ATTEMPTS {
        match call().await {
            Ok(()) => return Ok(()),
            Err(GatewayError::Declined(reason)) => return Err(AppError::Payment(reason)),
            Err(GatewayError::Timeout) => {
                warn!(delivery_id = %delivery_id, attempt, "payment gateway timeout");
            }
        }
    }
    Err(AppError::PaymentPending)
}

#[cfg(test)]
mod tests {
    use super::{PaymentAdapter, PaymentGateway, SimGateway};
    use crate::models::payment::{CostBreakdown, PaymentStatus};
    use crate::store::Store;
    use std::sync::Arc;
    use uuid::Uuid;

    fn breakdown() -> CostBreakdown {
        CostBreakdown {
            base_fee: 9.99,
            distance_fee: 2.03,
            weight_fee: 0.0,
            priority_fee: 0.0,
            tax: 1.05,
            discount: 0.0,
        }
    }

    fn adapter() -> PaymentAdapter {
        PaymentAdapter::new(Arc::new(SimGateway) as Arc<dyn PaymentGateway>)
    }

    #[tokio::test]
    async fn authorize_is_idempotent_per_delivery() {
        let store = Store::new();
        let adapter = adapter();
        let delivery = Uuid::new_v4();

        let first = adapter
            .authorize(&store, delivery, "card", breakdown(), None)
            .await
            .unwrap();
        let second = adapter
            .authorize(&store, delivery, "card", breakdown(), None)
            .await
            .unwrap();

        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(store.payments.len(), 1);
    }

    #[tokio::test]
    async fn declined_card_fails_the_payment_row() {
        let store = Store::new();
        let adapter = adapter();
        let delivery = Uuid::new_v4();

        let err = adapter
            .authorize(&store, delivery, "card_declined", breakdown(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "payment_error");
        assert_eq!(
            store.get_payment(delivery).unwrap().status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn capture_follows_authorize_and_is_idempotent() {
        let store = Store::new();
        let adapter = adapter();
        let delivery = Uuid::new_v4();

        adapter
            .authorize(&store, delivery, "card", breakdown(), None)
            .await
            .unwrap();
        let captured = adapter.capture(&store, delivery).await.unwrap();
        assert_eq!(captured.status, PaymentStatus::Captured);

        let again = adapter.capture(&store, delivery).await.unwrap();
        assert_eq!(again.status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn refund_cannot_exceed_the_charge() {
        let store = Store::new();
        let adapter = adapter();
        let delivery = Uuid::new_v4();

        let payment = adapter
            .authorize(&store, delivery, "card", breakdown(), None)
            .await
            .unwrap();
        let refunded = adapter
            .refund(&store, delivery, payment.amount + 100.0, "cancelled")
            .await
            .unwrap();

        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(refunded.refund_amount, payment.amount);
    }

    #[tokio::test]
    async fn capture_refuses_a_failed_payment() {
        let store = Store::new();
        let adapter = adapter();
        let delivery = Uuid::new_v4();

        let _ = adapter
            .authorize(&store, delivery, "card_declined", breakdown(), None)
            .await;
        assert!(adapter.capture(&store, delivery).await.is_err());
    }
}
