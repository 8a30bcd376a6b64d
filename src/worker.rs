//! Worker processing loop
//!
//! One worker drives one broker source through a strictly sequential
//! fetch → decode → validate → handle → dispose cycle. A worker never holds
//! more than one in-flight message; parallelism comes from running multiple
//! workers, not from pipelining within one.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{error, info, warn};
use validator::Validate;

use crate::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::error::{ConsumerError, Result};
use crate::message::{InboundMessage, ProcessingOutcome};
use crate::metrics::ConsumerMetrics;
use crate::retry::{RetryError, RetryPolicy};
use crate::source::BrokerSource;

/// Business handler for one message class, supplied at pool construction.
///
/// The handler classifies its own errors: `HandlerError::Transient` consumes
/// retry budget, `HandlerError::Terminal` rejects the message immediately.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Message: DeserializeOwned + Validate + Send + Sync;

    async fn handle(&self, msg: &Self::Message) -> std::result::Result<(), crate::error::HandlerError>;
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl WorkerState {
    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Starting => 0,
            WorkerState::Running => 1,
            WorkerState::Draining => 2,
            WorkerState::Stopped => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Starting,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

/// Worker identity and observable lifecycle: pool name plus ordinal
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pool: Arc<str>,
    ordinal: usize,
    state: Arc<AtomicU8>,
}

impl WorkerHandle {
    pub fn new(pool: impl Into<Arc<str>>, ordinal: usize) -> Self {
        Self {
            pool: pool.into(),
            ordinal,
            state: Arc::new(AtomicU8::new(WorkerState::Starting.as_u8())),
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Single sequential processing loop bound to one source
pub struct Worker<S, H>
where
    S: BrokerSource,
    H: MessageHandler,
{
    handle: WorkerHandle,
    source: S,
    handler: Arc<H>,
    retry: RetryPolicy,
    sink: Arc<dyn DeadLetterSink>,
    metrics: Arc<dyn ConsumerMetrics>,
    shutdown: watch::Receiver<bool>,
}

impl<S, H> Worker<S, H>
where
    S: BrokerSource,
    H: MessageHandler,
{
    pub fn new(
        handle: WorkerHandle,
        source: S,
        handler: Arc<H>,
        retry: RetryPolicy,
        sink: Arc<dyn DeadLetterSink>,
        metrics: Arc<dyn ConsumerMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handle,
            source,
            handler,
            retry,
            sink,
            metrics,
            shutdown,
        }
    }

    /// Run the fetch-dispose loop until shutdown or a fatal source error.
    ///
    /// The cancellation sentinel from `fetch` is the only graceful exit; any
    /// other fetch error is fatal to this worker and surfaced to the pool.
    pub async fn run(mut self) -> Result<()> {
        self.handle.set_state(WorkerState::Running);
        info!(
            pool = %self.handle.pool(),
            worker = self.handle.ordinal(),
            "worker started"
        );

        loop {
            match self.source.fetch().await {
                Ok(msg) => {
                    self.metrics.message_received(self.handle.pool());
                    info!(
                        pool = %self.handle.pool(),
                        worker = self.handle.ordinal(),
                        position = %msg.identity(),
                        redelivered = msg.redelivered,
                        "message received"
                    );
                    self.process(msg).await;
                }
                Err(ConsumerError::SourceClosed) => {
                    self.handle.set_state(WorkerState::Draining);
                    if let Err(e) = self.source.close().await {
                        warn!(
                            pool = %self.handle.pool(),
                            worker = self.handle.ordinal(),
                            error = %e,
                            "source close failed during drain"
                        );
                    }
                    self.handle.set_state(WorkerState::Stopped);
                    info!(
                        pool = %self.handle.pool(),
                        worker = self.handle.ordinal(),
                        "worker stopped"
                    );
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        pool = %self.handle.pool(),
                        worker = self.handle.ordinal(),
                        error = %e,
                        "fetch failed, worker exiting"
                    );
                    let _ = self.source.close().await;
                    self.handle.set_state(WorkerState::Stopped);
                    return Err(e);
                }
            }
        }
    }

    /// Take one message through decode, validation, the retried handler and
    /// its terminal disposition
    async fn process(&mut self, msg: InboundMessage) {
        let decoded: H::Message = match serde_json::from_slice(&msg.payload) {
            Ok(d) => d,
            Err(e) => {
                // permanently malformed, the handler is never invoked
                warn!(
                    pool = %self.handle.pool(),
                    position = %msg.identity(),
                    error = %e,
                    "payload failed to decode, dead-lettering"
                );
                self.dispose_dead_letter(&msg, ConsumerError::Decode(e)).await;
                return;
            }
        };

        if let Err(e) = decoded.validate() {
            warn!(
                pool = %self.handle.pool(),
                position = %msg.identity(),
                error = %e,
                "payload failed validation, dead-lettering"
            );
            self.dispose_dead_letter(&msg, ConsumerError::Validation(e.to_string()))
                .await;
            return;
        }

        let decoded = Arc::new(decoded);
        let handler = Arc::clone(&self.handler);
        let outcome = self
            .retry
            .execute(&mut self.shutdown, move || {
                let handler = Arc::clone(&handler);
                let decoded = Arc::clone(&decoded);
                async move { handler.handle(&decoded).await }
            })
            .await;

        match outcome {
            Ok(()) => {
                self.dispose_committed(&msg).await;
            }
            Err(RetryError::Terminal(e)) => {
                warn!(
                    pool = %self.handle.pool(),
                    position = %msg.identity(),
                    error = %e,
                    "terminal handler error, rejecting"
                );
                self.dispose_rejected(&msg).await;
            }
            Err(err @ RetryError::Exhausted { .. }) => {
                error!(
                    pool = %self.handle.pool(),
                    position = %msg.identity(),
                    error = %err,
                    "retries exhausted, dead-lettering"
                );
                self.dispose_dead_letter(&msg, err).await;
            }
            Err(RetryError::Cancelled) => {
                // left unacknowledged on purpose: the broker redelivers it
                // after restart, and the next fetch returns the sentinel
                info!(
                    pool = %self.handle.pool(),
                    position = %msg.identity(),
                    "retry aborted by shutdown, message left unacknowledged"
                );
            }
        }
    }

    async fn dispose_committed(&mut self, msg: &InboundMessage) {
        if let Err(e) = self.source.acknowledge(msg).await {
            // does not re-trigger processing: duplicate delivery after
            // restart is the accepted at-least-once trade-off
            warn!(
                pool = %self.handle.pool(),
                position = %msg.identity(),
                error = %e,
                "acknowledge failed after successful handling"
            );
        }
        self.metrics
            .outcome_recorded(self.handle.pool(), ProcessingOutcome::Committed);
    }

    /// Dead-letter then acknowledge, in that order. A failed dead-letter
    /// write leaves the message unacknowledged so the broker redelivers it;
    /// it is never silently dropped.
    async fn dispose_dead_letter(&mut self, msg: &InboundMessage, reason: impl std::fmt::Display) {
        let record = DeadLetterRecord::from_message(msg, reason);

        if let Err(e) = self.sink.publish(&record).await {
            error!(
                pool = %self.handle.pool(),
                position = %msg.identity(),
                record_id = %record.record_id,
                error = %e,
                "dead letter write failed, leaving message unacknowledged"
            );
            return;
        }

        if let Err(e) = self.source.acknowledge(msg).await {
            warn!(
                pool = %self.handle.pool(),
                position = %msg.identity(),
                error = %e,
                "acknowledge failed after dead-lettering"
            );
        }
        self.metrics
            .outcome_recorded(self.handle.pool(), ProcessingOutcome::DeadLettered);
    }

    async fn dispose_rejected(&mut self, msg: &InboundMessage) {
        if let Err(e) = self.source.reject(msg, false).await {
            warn!(
                pool = %self.handle.pool(),
                position = %msg.identity(),
                error = %e,
                "reject failed"
            );
        }
        self.metrics
            .outcome_recorded(self.handle.pool(), ProcessingOutcome::Rejected);
    }
}
