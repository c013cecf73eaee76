//! Text metrics exposition shared by every node role.
//!
//! Deliberately hand-formatted rather than routed through a metrics
//! registry crate: the surface is a handful of gauges and labeled info
//! lines, in the Prometheus text exposition format.

use std::fmt::Write as _;

/// One metric sample: either a bare numeric gauge, or a labeled info line
/// fixed at value 1 (the Prometheus convention for carrying string-valued
/// fields such as a role name).
pub enum Metric {
    Gauge { name: &'static str, value: f64 },
    Info { name: &'static str, labels: Vec<(&'static str, String)> },
}

/// Accumulates metrics for a single node and renders them as Prometheus
/// text exposition (`# HELP`/`# TYPE` preamble then one line per metric).
#[derive(Default)]
pub struct MetricsSnapshot {
    metrics: Vec<Metric>,
}

impl MetricsSnapshot {
    pub fn new() -> Self {
        MetricsSnapshot::default()
    }

    pub fn gauge(mut self, name: &'static str, value: f64) -> Self {
        self.metrics.push(Metric::Gauge { name, value });
        self
    }

    pub fn info(mut self, name: &'static str, labels: Vec<(&'static str, String)>) -> Self {
        self.metrics.push(Metric::Info { name, labels });
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# HELP distributed_sync_metrics Metrics reported by the node.\n");
        out.push_str("# TYPE distributed_sync_metrics gauge\n");

        for metric in &self.metrics {
            match metric {
                Metric::Gauge { name, value } => {
                    let _ = writeln!(out, "{name} {value}");
                }
                Metric::Info { name, labels } => {
                    let rendered_labels = labels
                        .iter()
                        .map(|(k, v)| format!("{k}=\"{v}\""))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let _ = writeln!(out, "{name}{{{rendered_labels}}} 1");
                }
            }
        }

        out.trim_end().to_string()
    }
}

/// Ratio of hits to total accesses, 0 when there have been none yet.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
