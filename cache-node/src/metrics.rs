use std::time::Instant;

use sync_common::{metrics::hit_rate, MetricsSnapshot};

use crate::cache::CacheSnapshot;

pub struct CacheMetrics {
    started_at: Instant,
}

impl CacheMetrics {
    pub fn new() -> Self {
        CacheMetrics { started_at: Instant::now() }
    }

    pub fn render(&self, node_id: &str, snapshot: &CacheSnapshot) -> String {
        MetricsSnapshot::new()
            .info("cache_node_info", vec![("node_id", node_id.to_string())])
            .gauge("cache_hits", snapshot.hits as f64)
            .gauge("cache_misses", snapshot.misses as f64)
            .gauge("cache_invalidations_sent", snapshot.invalidations_sent as f64)
            .gauge("cache_invalidations_received", snapshot.invalidations_received as f64)
            .gauge("cache_writebacks", snapshot.writebacks as f64)
            .gauge("cache_hit_ratio", hit_rate(snapshot.hits, snapshot.misses))
            .gauge("cache_size", snapshot.size as f64)
            .gauge("cache_capacity", snapshot.capacity as f64)
            .gauge("uptime_seconds", self.started_at.elapsed().as_secs_f64())
            .render()
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}
