use prometheus::{IntCounter, IntGauge, IntGaugeVec, Opts, Registry};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Message counters
    pub messages_sent: IntCounter,
    pub messages_received: IntCounter,
    pub messages_deleted: IntCounter,

    // Queue gauges
    pub queues: IntGauge,
    pub queue_depth: IntGaugeVec,

    pub connections: IntGauge,
}

impl BrokerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_sent = IntCounter::new("dq_messages_sent_total", "Messages accepted by send")?;
        registry.register(Box::new(messages_sent.clone()))?;

        let messages_received =
            IntCounter::new("dq_messages_received_total", "Messages handed out by receive")?;
        registry.register(Box::new(messages_received.clone()))?;

        let messages_deleted =
            IntCounter::new("dq_messages_deleted_total", "Messages deleted by receipt")?;
        registry.register(Box::new(messages_deleted.clone()))?;

        let queues = IntGauge::new("dq_queues", "Number of existing queues")?;
        registry.register(Box::new(queues.clone()))?;

        // In-flight messages included
        let queue_depth = IntGaugeVec::new(
            Opts::new("dq_queue_depth", "Messages stored per queue"),
            &["owner", "queue"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let connections = IntGauge::new("dq_connections", "Open client connections")?;
        registry.register(Box::new(connections.clone()))?;

        Ok(BrokerMetrics {
            registry,
            messages_sent,
            messages_received,
            messages_deleted,
            queues,
            queue_depth,
            connections,
        })
    }

    pub fn set_depth(&self, owner: &str, queue: &str, depth: usize) {
        self.queue_depth
            .with_label_values(&[owner, queue])
            .set(depth as i64);
    }

    pub fn forget_queue(&self, owner: &str, queue: &str) {
        // Absent labels are fine
        let _ = self.queue_depth.remove_label_values(&[owner, queue]);
    }
}
