//! Observability hooks
//!
//! The engine emits one event per fetched message and one per terminal
//! disposition through an injected trait; it does not own metric
//! registration or a process-wide registry.

use prometheus::{IntCounterVec, Opts, Registry};

use crate::message::ProcessingOutcome;

/// Counter interface injected at pool construction
pub trait ConsumerMetrics: Send + Sync {
    /// A message was fetched from the broker
    fn message_received(&self, class: &str);

    /// A message reached a terminal disposition
    fn outcome_recorded(&self, class: &str, outcome: ProcessingOutcome);
}

/// Discards all observations; for tests and metric-less embedders
#[derive(Debug, Default, Clone)]
pub struct NoopMetrics;

impl ConsumerMetrics for NoopMetrics {
    fn message_received(&self, _class: &str) {}
    fn outcome_recorded(&self, _class: &str, _outcome: ProcessingOutcome) {}
}

/// Prometheus-backed counters scoped to one engine instance.
///
/// Registered on a caller-supplied registry rather than the process default,
/// so embedding services keep control of their metric namespace.
pub struct PrometheusMetrics {
    received: IntCounterVec,
    outcomes: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let received = IntCounterVec::new(
            Opts::new(
                "consumer_messages_received_total",
                "Total messages fetched from broker sources",
            ),
            &["class"],
        )?;
        let outcomes = IntCounterVec::new(
            Opts::new(
                "consumer_message_outcomes_total",
                "Terminal message dispositions by class and outcome",
            ),
            &["class", "outcome"],
        )?;

        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;

        Ok(Self { received, outcomes })
    }
}

impl ConsumerMetrics for PrometheusMetrics {
    fn message_received(&self, class: &str) {
        self.received.with_label_values(&[class]).inc();
    }

    fn outcome_recorded(&self, class: &str, outcome: ProcessingOutcome) {
        self.outcomes
            .with_label_values(&[class, outcome.as_str()])
            .inc();
    }
}
