use crate::queue::TaskQueue;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// Prometheus metrics for the dispatcher
pub struct DispatchMetrics {
    pub registry: Registry,

    // Item counters
    pub items_completed: IntCounter,
    pub items_requeued: IntCounter,

    // Item gauges
    pub items_pending: IntGauge,
    pub items_in_flight: IntGauge,

    // Session metrics
    pub sessions_opened: IntCounter,
    pub sessions_rejected: IntCounter,
    pub sessions_active: IntGauge,
    pub session_failures: IntCounterVec,

    // Request/response latency
    pub exchange_duration: Histogram,

    // Checkpoint metrics
    pub checkpoints_total: IntCounterVec,
    pub checkpoint_index: IntGauge,
}

impl DispatchMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let items_completed = IntCounter::new("gd_items_completed_total", "Items with a recorded result")?;
        registry.register(Box::new(items_completed.clone()))?;

        let items_requeued = IntCounter::new("gd_items_requeued_total", "Items returned to the queue after a failed delivery")?;
        registry.register(Box::new(items_requeued.clone()))?;

        let items_pending = IntGauge::new("gd_items_pending", "Items waiting for a session")?;
        registry.register(Box::new(items_pending.clone()))?;

        let items_in_flight = IntGauge::new("gd_items_in_flight", "Items checked out to a session")?;
        registry.register(Box::new(items_in_flight.clone()))?;

        let sessions_opened = IntCounter::new("gd_sessions_opened_total", "Worker sessions started")?;
        registry.register(Box::new(sessions_opened.clone()))?;

        let sessions_rejected = IntCounter::new("gd_sessions_rejected_total", "Connections refused by the session limit")?;
        registry.register(Box::new(sessions_rejected.clone()))?;

        let sessions_active = IntGauge::new("gd_sessions_active", "Worker sessions currently running")?;
        registry.register(Box::new(sessions_active.clone()))?;

        let session_failures = IntCounterVec::new(
            Opts::new("gd_session_failures_total", "Sessions ended by a failed exchange"),
            &["kind"],
        )?;
        registry.register(Box::new(session_failures.clone()))?;

        let exchange_duration = Histogram::with_opts(HistogramOpts::new(
            "gd_exchange_duration_seconds",
            "Time from sending a request to receiving its reply",
        ))?;
        registry.register(Box::new(exchange_duration.clone()))?;

        let checkpoints_total = IntCounterVec::new(
            Opts::new("gd_checkpoints_total", "Checkpoint flushes by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(checkpoints_total.clone()))?;

        let checkpoint_index = IntGauge::new("gd_checkpoint_index", "Last persisted checkpoint index")?;
        registry.register(Box::new(checkpoint_index.clone()))?;

        Ok(DispatchMetrics {
            registry,
            items_completed,
            items_requeued,
            items_pending,
            items_in_flight,
            sessions_opened,
            sessions_rejected,
            sessions_active,
            session_failures,
            exchange_duration,
            checkpoints_total,
            checkpoint_index,
        })
    }

    /// Refresh queue depth gauges
    pub fn update_queue(&self, queue: &TaskQueue) {
        self.items_pending.set(queue.len() as i64);
        self.items_in_flight.set(queue.in_flight() as i64);
    }

    pub fn inc_session_failure(&self, kind: &str) {
        self.session_failures.with_label_values(&[kind]).inc();
    }

    pub fn inc_checkpoint(&self, outcome: &str) {
        self.checkpoints_total.with_label_values(&[outcome]).inc();
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
