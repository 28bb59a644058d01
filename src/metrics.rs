// LocalAgent Gate - Metrics
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Prometheus collectors observed by the HTTP layer, chat flow and tool
// registry. Observation only: nothing here alters a request's outcome.
//
// | Metric                                   | Type      | Labels           |
// |------------------------------------------|-----------|------------------|
// | localagent_loop_detections_total         | Counter   |                  |
// | localagent_requests_active               | Gauge     |                  |
// | localagent_requests_total                | Counter   | endpoint, status |
// | localagent_request_duration_seconds      | Histogram | endpoint         |
// | localagent_tool_executions_total         | Counter   | tool, status     |
// | localagent_generation_calls_total        | Counter   | model, status    |

use prometheus::core::Collector;
use prometheus::proto::Metric;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Request latency buckets in seconds. Tool runs and generations dominate.
pub const REQUEST_DURATION_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 120.0];

pub struct Metrics {
    registry: Registry,
    loop_detections: IntCounter,
    active_requests: IntGauge,
    requests: IntCounterVec,
    request_duration: HistogramVec,
    tools: IntCounterVec,
    generations: IntCounterVec,
}

/// Point-in-time copy served by GET /metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub loop_detections: u64,
    pub active_requests: u64,
    pub requests: BTreeMap<String, u64>,
    pub request_duration: BTreeMap<String, DurationSummary>,
    pub tool_executions: BTreeMap<String, u64>,
    pub generation_calls: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationSummary {
    pub count: u64,
    pub sum_seconds: f64,
}

impl Metrics {
    /// Collectors on a fresh registry.
    ///
    /// # Errors
    ///
    /// Fails only when two collectors share a name.
    pub fn try_new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let loop_detections =
            IntCounter::new("localagent_loop_detections_total", "Prompts answered with the loop notice")?;
        registry.register(Box::new(loop_detections.clone()))?;

        let active_requests = IntGauge::new("localagent_requests_active", "HTTP requests in flight")?;
        registry.register(Box::new(active_requests.clone()))?;

        let requests = IntCounterVec::new(
            Opts::new("localagent_requests_total", "HTTP requests by endpoint and status"),
            &["endpoint", "status"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("localagent_request_duration_seconds", "HTTP request handling time")
                .buckets(REQUEST_DURATION_BUCKETS.to_vec()),
            &["endpoint"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let tools = IntCounterVec::new(
            Opts::new("localagent_tool_executions_total", "Tool invocations by outcome"),
            &["tool", "status"],
        )?;
        registry.register(Box::new(tools.clone()))?;

        let generations = IntCounterVec::new(
            Opts::new("localagent_generation_calls_total", "Model generation calls by outcome"),
            &["model", "status"],
        )?;
        registry.register(Box::new(generations.clone()))?;

        Ok(Self { registry, loop_detections, active_requests, requests, request_duration, tools, generations })
    }

    pub fn new() -> Self {
        // Names and label sets are fixed above; registration cannot collide.
        Self::try_new().expect("static metric definitions")
    }

    pub fn record_loop_detection(&self) {
        self.loop_detections.inc();
    }

    pub fn record_request(&self, endpoint: &str, status: &str) {
        self.requests.with_label_values(&[endpoint, status]).inc();
    }

    pub fn observe_request_duration(&self, endpoint: &str, seconds: f64) {
        self.request_duration.with_label_values(&[endpoint]).observe(seconds);
    }

    pub fn record_tool(&self, tool: &str, status: &str) {
        self.tools.with_label_values(&[tool, status]).inc();
    }

    pub fn record_generation(&self, model: &str, success: bool) {
        let status = if success { "success" } else { "failed" };
        self.generations.with_label_values(&[model, status]).inc();
    }

    /// Gauge guard: counts the request as active until dropped.
    pub fn track_active(&self) -> ActiveRequest<'_> {
        self.active_requests.inc();
        ActiveRequest { metrics: self }
    }

    pub fn loop_detections(&self) -> u64 {
        self.loop_detections.get()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loop_detections: self.loop_detections(),
            active_requests: self.active_requests.get().max(0) as u64,
            requests: counts_by(&self.requests, "endpoint", "status"),
            request_duration: durations_by(&self.request_duration, "endpoint"),
            tool_executions: counts_by(&self.tools, "tool", "status"),
            generation_calls: counts_by(&self.generations, "model", "status"),
        }
    }

    /// Prometheus text exposition of every collector.
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("snapshot", &self.snapshot()).finish()
    }
}

pub struct ActiveRequest<'a> {
    metrics: &'a Metrics,
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.metrics.active_requests.dec();
    }
}

// ============================================================================
// SNAPSHOT HELPERS
// ============================================================================

fn label<'a>(metric: &'a Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|pair| pair.get_name() == name)
        .map(|pair| pair.get_value())
        .unwrap_or("")
}

/// Flatten a two-label counter into "first:second" keys.
fn counts_by(vec: &IntCounterVec, first: &str, second: &str) -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    for family in vec.collect() {
        for metric in family.get_metric() {
            let key = format!("{}:{}", label(metric, first), label(metric, second));
            out.insert(key, metric.get_counter().get_value() as u64);
        }
    }
    out
}

fn durations_by(vec: &HistogramVec, name: &str) -> BTreeMap<String, DurationSummary> {
    let mut out = BTreeMap::new();
    for family in vec.collect() {
        for metric in family.get_metric() {
            let h = metric.get_histogram();
            out.insert(
                label(metric, name).to_string(),
                DurationSummary { count: h.get_sample_count(), sum_seconds: h.get_sample_sum() },
            );
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.record_tool("write_file", "success");
        m.record_tool("write_file", "success");
        m.record_tool("run_shell", "blocked_dangerous");
        m.record_loop_detection();

        let snap = m.snapshot();
        assert_eq!(snap.loop_detections, 1);
        assert_eq!(snap.tool_executions["write_file:success"], 2);
        assert_eq!(snap.tool_executions["run_shell:blocked_dangerous"], 1);
    }

    #[test]
    fn active_gauge_follows_guard() {
        let m = Metrics::new();
        {
            let _a = m.track_active();
            let _b = m.track_active();
            assert_eq!(m.snapshot().active_requests, 2);
        }
        assert_eq!(m.snapshot().active_requests, 0);
    }

    #[test]
    fn generation_status_labels() {
        let m = Metrics::new();
        m.record_generation("llama3", true);
        m.record_generation("llama3", false);
        m.record_generation("llama3", false);

        let snap = m.snapshot();
        assert_eq!(snap.generation_calls["llama3:success"], 1);
        assert_eq!(snap.generation_calls["llama3:failed"], 2);
    }

    #[test]
    fn request_duration_is_observed_per_endpoint() {
        let m = Metrics::new();
        m.observe_request_duration("/health", 0.002);
        m.observe_request_duration("/health", 0.004);
        m.observe_request_duration("/test", 1.5);

        let snap = m.snapshot();
        assert_eq!(snap.request_duration["/health"].count, 2);
        assert!((snap.request_duration["/health"].sum_seconds - 0.006).abs() < 1e-9);
        assert_eq!(snap.request_duration["/test"].count, 1);
    }

    #[test]
    fn text_exposition_names_every_family() {
        let m = Metrics::new();
        m.record_loop_detection();
        m.record_request("/health", "200");
        m.observe_request_duration("/health", 0.01);
        m.record_tool("read_file", "success");
        m.record_generation("llama3", true);

        let text = m.encode_text().unwrap();
        assert!(text.contains("localagent_loop_detections_total 1"));
        assert!(text.contains("localagent_requests_active 0"));
        assert!(text.contains("localagent_requests_total{"));
        assert!(text.contains(r#"endpoint="/health""#));
        assert!(text.contains("localagent_request_duration_seconds_bucket"));
        assert!(text.contains(r#"tool="read_file""#));
        assert!(text.contains("localagent_generation_calls_total"));
    }
}
