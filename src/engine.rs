//! Top-level consumption engine
//!
//! Owns the shutdown signal and one worker pool per logical message class.
//! Pools are started independently, so a stalled handler in one class never
//! blocks intake for another. Shutdown is cooperative: workers observe the
//! signal at their next fetch or retry-sleep boundary, finish any disposal
//! already underway, and the engine reports completion once every pool has
//! drained.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::config::PoolOptions;
use crate::dead_letter::DeadLetterSink;
use crate::error::Result;
use crate::metrics::ConsumerMetrics;
use crate::pool::WorkerPool;
use crate::source::SourceFactory;
use crate::worker::MessageHandler;

/// Orchestrator for a set of worker pools under one cancellation signal
pub struct ConsumptionEngine {
    shutdown_tx: watch::Sender<bool>,
    pools: Vec<WorkerPool>,
}

impl Default for ConsumptionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumptionEngine {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            pools: Vec::new(),
        }
    }

    /// Shutdown signal for callers that build their own sources or need to
    /// tie other tasks to the engine lifecycle
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Start a pool for one message class. Non-blocking: workers run on the
    /// runtime until shutdown.
    pub async fn spawn_pool<F, H>(
        &mut self,
        options: PoolOptions,
        factory: F,
        handler: Arc<H>,
        sink: Arc<dyn DeadLetterSink>,
        metrics: Arc<dyn ConsumerMetrics>,
    ) -> Result<()>
    where
        F: SourceFactory,
        H: MessageHandler,
    {
        let pool = WorkerPool::start(
            options,
            factory,
            handler,
            sink,
            metrics,
            self.shutdown_tx.subscribe(),
        )
        .await?;

        self.pools.push(pool);
        Ok(())
    }

    pub fn pool_names(&self) -> Vec<&str> {
        self.pools.iter().map(|p| p.name()).collect()
    }

    /// Broadcast cancellation to every pool. Idempotent.
    pub fn shutdown(&self) {
        info!("consumption engine shutting down");
        // send_replace stores the value even with no receivers left, so
        // is_shutting_down() and later subscribers still observe it
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Wait for every pool to drain. Returns the first worker error observed
    /// across all pools, but only after each pool has fully stopped, so no
    /// message is abandoned mid-disposition.
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;

        for pool in self.pools {
            if let Err(e) = pool.join().await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        info!("consumption engine stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Convenience for callers reacting to an external stop signal
    pub async fn shutdown_and_join(self) -> Result<()> {
        self.shutdown();
        self.join().await
    }
}
