use prometheus::{
    register_counter_with_registry, register_gauge_with_registry, register_histogram_with_registry,
    Counter, Gauge, Histogram, Registry,
};
use std::sync::Arc;

pub struct RelayMetrics {
    pub published_keys: Gauge,
    pub live_connections: Gauge,
    pub pending_messages: Gauge,
    pub groups: Gauge,
    pub messages_pushed: Counter,
    pub messages_queued: Counter,
    pub messages_fetched: Counter,
    pub pending_dropped: Counter,
    pub history_evicted: Counter,
    pub fanout_recipients: Histogram,
    pub error_counts: Counter,
    pub registry: Arc<Registry>,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let published_keys = register_gauge_with_registry!(
            "seguro_relay_published_keys",
            "Number of client ids with a published key",
            registry
        )?;

        let live_connections = register_gauge_with_registry!(
            "seguro_relay_live_connections",
            "Number of registered push connections",
            registry
        )?;

        let pending_messages = register_gauge_with_registry!(
            "seguro_relay_pending_messages",
            "Messages waiting in pending queues",
            registry
        )?;

        let groups = register_gauge_with_registry!(
            "seguro_relay_groups",
            "Number of groups",
            registry
        )?;

        let messages_pushed = register_counter_with_registry!(
            "seguro_relay_messages_pushed_total",
            "Messages handed to a live connection",
            registry
        )?;

        let messages_queued = register_counter_with_registry!(
            "seguro_relay_messages_queued_total",
            "Messages stored for a later pull",
            registry
        )?;

        let messages_fetched = register_counter_with_registry!(
            "seguro_relay_messages_fetched_total",
            "Pending messages consumed by a pull",
            registry
        )?;

        let pending_dropped = register_counter_with_registry!(
            "seguro_relay_pending_dropped_total",
            "Pending messages dropped because the queue was full",
            registry
        )?;

        let history_evicted = register_counter_with_registry!(
            "seguro_relay_history_evicted_total",
            "History entries evicted by the retention limit",
            registry
        )?;

        let fanout_recipients = register_histogram_with_registry!(
            "seguro_relay_fanout_recipients",
            "Recipients per group message",
            vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0],
            registry
        )?;

        let error_counts = register_counter_with_registry!(
            "seguro_relay_errors_total",
            "Total number of rejected requests",
            registry
        )?;

        Ok(Self {
            published_keys,
            live_connections,
            pending_messages,
            groups,
            messages_pushed,
            messages_queued,
            messages_fetched,
            pending_dropped,
            history_evicted,
            fanout_recipients,
            error_counts,
            registry,
        })
    }

    pub fn export_prometheus(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
