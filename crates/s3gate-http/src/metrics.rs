//! Per-stage outcome counters and request latency.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use s3gate_model::S3Action;

use crate::error::FailureKind;

/// A pipeline stage, as reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Canonical decoding and routing.
    Decode,
    /// Signature verification.
    Authenticate,
    /// aws-chunked decoding setup.
    Stream,
    /// Digest collection.
    Integrity,
    /// ACL evaluation.
    Authorize,
    /// The handler, including body consumption.
    Dispatch,
}

impl Stage {
    /// Stable label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Authenticate => "authenticate",
            Self::Stream => "stream",
            Self::Integrity => "integrity",
            Self::Authorize => "authorize",
            Self::Dispatch => "dispatch",
        }
    }
}

/// Receives stage outcomes and request latencies.
pub trait MetricsSink: Send + Sync + 'static {
    /// Record one stage outcome.
    fn record_stage(&self, stage: Stage, outcome: Result<(), FailureKind>);

    /// Record the total latency of a request.
    fn record_latency(&self, action: Option<S3Action>, elapsed: Duration);

    /// Text exposition of the collected metrics, if the sink keeps any.
    fn render(&self) -> Option<String> {
        None
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_stage(&self, _stage: Stage, _outcome: Result<(), FailureKind>) {}

    fn record_latency(&self, _action: Option<S3Action>, _elapsed: Duration) {}
}

#[derive(Debug, Default)]
struct LatencyStats {
    count: AtomicU64,
    total_micros: AtomicU64,
}

/// Counters kept in memory and rendered in Prometheus text format.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    stages: DashMap<(Stage, Option<FailureKind>), AtomicU64>,
    latency: DashMap<&'static str, LatencyStats>,
}

impl InMemoryMetrics {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outcomes recorded for `stage`; `None` counts successes.
    #[must_use]
    pub fn stage_count(&self, stage: Stage, failure: Option<FailureKind>) -> u64 {
        self.stages
            .get(&(stage, failure))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Number of requests recorded for `action`.
    #[must_use]
    pub fn request_count(&self, action: Option<S3Action>) -> u64 {
        self.latency
            .get(action_label(action))
            .map_or(0, |s| s.count.load(Ordering::Relaxed))
    }
}

fn action_label(action: Option<S3Action>) -> &'static str {
    action.map_or("unrouted", |a| a.as_str())
}

impl MetricsSink for InMemoryMetrics {
    fn record_stage(&self, stage: Stage, outcome: Result<(), FailureKind>) {
        self.stages
            .entry((stage, outcome.err()))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, action: Option<S3Action>, elapsed: Duration) {
        let stats = self.latency.entry(action_label(action)).or_default();
        stats.count.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        stats.total_micros.fetch_add(micros, Ordering::Relaxed);
    }

    fn render(&self) -> Option<String> {
        let mut stages: Vec<(String, String, u64)> = self
            .stages
            .iter()
            .map(|entry| {
                let (stage, failure) = *entry.key();
                let outcome = failure.map_or("ok", FailureKind::as_str);
                (
                    stage.as_str().to_owned(),
                    outcome.to_owned(),
                    entry.value().load(Ordering::Relaxed),
                )
            })
            .collect();
        stages.sort();

        let mut out = String::new();
        out.push_str("# TYPE s3gate_stage_total counter\n");
        for (stage, outcome, count) in &stages {
            let _ = writeln!(
                out,
                "s3gate_stage_total{{stage=\"{stage}\",outcome=\"{outcome}\"}} {count}"
            );
        }

        let mut latency: Vec<(&'static str, u64, u64)> = self
            .latency
            .iter()
            .map(|entry| {
                (
                    *entry.key(),
                    entry.count.load(Ordering::Relaxed),
                    entry.total_micros.load(Ordering::Relaxed),
                )
            })
            .collect();
        latency.sort_unstable();

        out.push_str("# TYPE s3gate_request_duration_seconds summary\n");
        for (action, count, micros) in &latency {
            #[allow(clippy::cast_precision_loss)]
            let seconds = *micros as f64 / 1_000_000.0;
            let _ = writeln!(
                out,
                "s3gate_request_duration_seconds_sum{{action=\"{action}\"}} {seconds}"
            );
            let _ = writeln!(
                out,
                "s3gate_request_duration_seconds_count{{action=\"{action}\"}} {count}"
            );
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_count_stage_outcomes() {
        let metrics = InMemoryMetrics::new();
        metrics.record_stage(Stage::Authenticate, Ok(()));
        metrics.record_stage(Stage::Authenticate, Ok(()));
        metrics.record_stage(Stage::Authenticate, Err(FailureKind::SignatureMismatch));
        metrics.record_stage(Stage::Authorize, Err(FailureKind::AccessDenied));

        assert_eq!(metrics.stage_count(Stage::Authenticate, None), 2);
        assert_eq!(
            metrics.stage_count(Stage::Authenticate, Some(FailureKind::SignatureMismatch)),
            1
        );
        assert_eq!(
            metrics.stage_count(Stage::Stream, Some(FailureKind::ChunkSignatureMismatch)),
            0
        );
    }

    #[test]
    fn test_should_render_prometheus_text() {
        let metrics = InMemoryMetrics::new();
        metrics.record_stage(Stage::Stream, Err(FailureKind::ChunkSignatureMismatch));
        metrics.record_latency(Some(S3Action::PutObject), Duration::from_millis(1500));

        let text = metrics.render().expect("rendered");
        assert!(text.contains(
            "s3gate_stage_total{stage=\"stream\",outcome=\"chunk_signature_mismatch\"} 1"
        ));
        assert!(text.contains("s3gate_request_duration_seconds_count{action=\"PutObject\"} 1"));
        assert!(text.contains("s3gate_request_duration_seconds_sum{action=\"PutObject\"} 1.5"));
        assert_eq!(metrics.request_count(Some(S3Action::PutObject)), 1);
    }

    #[test]
    fn test_should_render_nothing_for_noop_sink() {
        assert!(NoopMetrics.render().is_none());
    }
}
