//! # Prometheus Metrics
//!
//! Operational metrics for the claim node, scraped at `/metrics` on the
//! metrics port. All metrics live in a dedicated [`prometheus::Registry`]
//! with the `tribune` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use tribune_protocol::Amount;

/// Metric handles for the node. Cloning shares the underlying metrics.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Committed calls, labelled by the emitted event.
    pub transitions_total: IntCounterVec,
    /// Rejected calls, labelled by error reason.
    pub rejected_calls_total: IntCounterVec,
    /// Claims ever created.
    pub claims_count: IntGauge,
    /// Stake currently held in custody.
    pub custody_held: IntGauge,
    /// Write-request latency, lock acquisition included.
    pub request_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tribune".into()), None)?;

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Committed claim calls by emitted event"),
            &["event"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let rejected_calls_total = IntCounterVec::new(
            Opts::new("rejected_calls_total", "Rejected calls by error reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_calls_total.clone()))?;

        let claims_count = IntGauge::new("claims_count", "Number of claims ever created")?;
        registry.register(Box::new(claims_count.clone()))?;

        let custody_held = IntGauge::new(
            "custody_held",
            "Stake currently held in custody, in the token's smallest unit",
        )?;
        registry.register(Box::new(custody_held.clone()))?;

        let request_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "request_latency_seconds",
                "Write request handling latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )?;
        registry.register(Box::new(request_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            transitions_total,
            rejected_calls_total,
            claims_count,
            custody_held,
            request_latency_seconds,
        })
    }

    /// Refreshes the ledger gauges.
    pub fn observe_ledger(&self, claims: u64, held: Amount) {
        self.claims_count.set(i64::try_from(claims).unwrap_or(i64::MAX));
        self.custody_held.set(i64::try_from(held).unwrap_or(i64::MAX));
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
