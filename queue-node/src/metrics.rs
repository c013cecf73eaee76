use std::time::Instant;

use sync_common::MetricsSnapshot;

pub struct QueueMetrics {
    started_at: Instant,
}

impl QueueMetrics {
    pub fn new() -> Self {
        QueueMetrics { started_at: Instant::now() }
    }

    pub fn render(&self, node_id: &str) -> String {
        MetricsSnapshot::new()
            .info("queue_node_status", vec![("node_id", node_id.to_string()), ("node_status", "running".to_string())])
            .gauge("uptime_seconds", self.started_at.elapsed().as_secs_f64())
            .render()
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}
