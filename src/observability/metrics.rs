use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub messages_sent_total: IntCounterVec,
    pub messages_dropped_total: IntCounterVec,
    pub messages_received_total: IntCounterVec,
    pub reconnects_total: IntCounter,
    pub heartbeats_total: IntCounterVec,
    pub manifest_orders: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_sent_total = IntCounterVec::new(
            Opts::new(
                "dispatch_messages_sent_total",
                "Messages written to the dispatch connection by type",
            ),
            &["type"],
        )
        .expect("valid dispatch_messages_sent_total metric");

        let messages_dropped_total = IntCounterVec::new(
            Opts::new(
                "dispatch_messages_dropped_total",
                "Messages dropped because the dispatch connection was not open",
            ),
            &["type"],
        )
        .expect("valid dispatch_messages_dropped_total metric");

        let messages_received_total = IntCounterVec::new(
            Opts::new(
                "dispatch_messages_received_total",
                "Inbound dispatch messages by type",
            ),
            &["type"],
        )
        .expect("valid dispatch_messages_received_total metric");

        let reconnects_total = IntCounter::new(
            "dispatch_reconnects_total",
            "Reconnection attempts fired after a lost connection",
        )
        .expect("valid dispatch_reconnects_total metric");

        let heartbeats_total = IntCounterVec::new(
            Opts::new("heartbeats_total", "Heartbeat ticks by outcome"),
            &["outcome"],
        )
        .expect("valid heartbeats_total metric");

        let manifest_orders = IntGauge::new("manifest_orders", "Active orders in the manifest")
            .expect("valid manifest_orders metric");

        registry
            .register(Box::new(messages_sent_total.clone()))
            .expect("register dispatch_messages_sent_total");
        registry
            .register(Box::new(messages_dropped_total.clone()))
            .expect("register dispatch_messages_dropped_total");
        registry
            .register(Box::new(messages_received_total.clone()))
            .expect("register dispatch_messages_received_total");
        registry
            .register(Box::new(reconnects_total.clone()))
            .expect("register dispatch_reconnects_total");
        registry
            .register(Box::new(heartbeats_total.clone()))
            .expect("register heartbeats_total");
        registry
            .register(Box::new(manifest_orders.clone()))
            .expect("register manifest_orders");

        Self {
            registry,
            messages_sent_total,
            messages_dropped_total,
            messages_received_total,
            reconnects_total,
            heartbeats_total,
            manifest_orders,
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
