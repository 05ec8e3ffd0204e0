use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub deliveries_total: IntCounterVec,
    pub transitions_total: IntCounterVec,
    pub dispatch_offers_total: IntCounter,
    pub deliveries_searching: IntGauge,
    pub transition_latency_seconds: HistogramVec,
    pub ws_connections: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let deliveries_total = IntCounterVec::new(
            Opts::new("deliveries_total", "Deliveries reaching a terminal status"),
            &["status"],
        )
        .expect("valid deliveries_total metric");

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Lifecycle transitions by outcome"),
            &["outcome"],
        )
        .expect("valid transitions_total metric");

        let dispatch_offers_total = IntCounter::new(
            "dispatch_offers_total",
            "Delivery offers pushed to couriers",
        )
        .expect("valid dispatch_offers_total metric");

        let deliveries_searching = IntGauge::new(
            "deliveries_searching",
            "Deliveries currently waiting for a courier",
        )
        .expect("valid deliveries_searching metric");

        let transition_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "transition_latency_seconds",
                "Latency of lifecycle transition processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid transition_latency_seconds metric");

        let ws_connections = IntGauge::new(
            "ws_connections",
            "Currently connected realtime subscribers",
        )
        .expect("valid ws_connections metric");

        registry
            .register(Box::new(deliveries_total.clone()))
            .expect("register deliveries_total");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(dispatch_offers_total.clone()))
            .expect("register dispatch_offers_total");
        registry
            .register(Box::new(deliveries_searching.clone()))
            .expect("register deliveries_searching");
        registry
            .register(Box::new(transition_latency_seconds.clone()))
            .expect("register transition_latency_seconds");
        registry
            .register(Box::new(ws_connections.clone()))
            .expect("register ws_connections");

        Self {
            registry,
            deliveries_total,
            transitions_total,
            dispatch_offers_total,
            deliveries_searching,
            transition_latency_seconds,
            ws_connections,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
