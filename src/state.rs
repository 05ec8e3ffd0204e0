use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::events::bus::EventBus;
use crate::observability::metrics::Metrics;
use crate::payments::{PaymentAdapter, PaymentGateway, SimGateway};
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub bus: EventBus,
    pub payments: PaymentAdapter,
    /// Feed into the dispatcher loop: ids of deliveries entering
    /// `searching_courier`.
    pub dispatch_tx: mpsc::Sender<Uuid>,
    pub metrics: Metrics,
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<Uuid>) {
        Self::with_gateway(config, Arc::new(SimGateway))
    }

    pub fn with_gateway(
        config: &Config,
        gateway: Arc<dyn PaymentGateway>,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);

        (
            Self {
                store: Store::new(),
                bus: EventBus::new(config.event_buffer_size),
                payments: PaymentAdapter::new(gateway),
                dispatch_tx,
                metrics: Metrics::new(),
                jwt_secret: config.jwt_secret.clone(),
            },
            dispatch_rx,
        )
    }
}
