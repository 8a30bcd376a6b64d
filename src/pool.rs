//! Worker pool: fixed-size set of workers for one message class
//!
//! All sources are connected before any worker is spawned, so a connect
//! failure aborts the pool start without leaving orphan tasks. Every worker
//! is registered against the same shutdown signal and joined as a unit.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::PoolOptions;
use crate::dead_letter::DeadLetterSink;
use crate::error::Result;
use crate::metrics::ConsumerMetrics;
use crate::source::SourceFactory;
use crate::worker::{MessageHandler, Worker, WorkerHandle, WorkerState};

/// A running set of workers sharing one message class, one dead-letter sink
/// and one shutdown signal
pub struct WorkerPool {
    name: String,
    handles: Vec<WorkerHandle>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    /// Connect one source per worker, then spawn the workers.
    ///
    /// The dead-letter sink is shared across the pool's workers;
    /// implementations must be safe for concurrent publishes.
    pub async fn start<F, H>(
        options: PoolOptions,
        factory: F,
        handler: Arc<H>,
        sink: Arc<dyn DeadLetterSink>,
        metrics: Arc<dyn ConsumerMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self>
    where
        F: SourceFactory,
        H: MessageHandler,
    {
        let mut sources = Vec::with_capacity(options.workers);
        for _ in 0..options.workers {
            sources.push(factory.connect(shutdown.clone()).await?);
        }

        let mut handles = Vec::with_capacity(options.workers);
        let mut tasks = Vec::with_capacity(options.workers);

        for (ordinal, source) in sources.into_iter().enumerate() {
            let handle = WorkerHandle::new(options.name.as_str(), ordinal);
            let worker = Worker::new(
                handle.clone(),
                source,
                Arc::clone(&handler),
                options.retry.clone(),
                Arc::clone(&sink),
                Arc::clone(&metrics),
                shutdown.clone(),
            );
            handles.push(handle);
            tasks.push(tokio::spawn(worker.run()));
        }

        info!(
            pool = %options.name,
            workers = options.workers,
            max_attempts = options.retry.max_attempts,
            "worker pool started"
        );

        Ok(Self {
            name: options.name,
            handles,
            tasks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle handles for every worker; clones stay observable after the
    /// pool has been joined
    pub fn worker_handles(&self) -> Vec<WorkerHandle> {
        self.handles.clone()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.handles.iter().map(|h| h.state()).collect()
    }

    /// Block until every worker has reached `Stopped`.
    ///
    /// A worker past disposal completes its acknowledge/reject before this
    /// returns; a worker in retry-sleep aborts within one delay bound. The
    /// first fatal worker error is returned, after all workers have joined.
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;

        for (ordinal, task) in self.tasks.into_iter().enumerate() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(pool = %self.name, worker = ordinal, error = %e, "worker failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_err) => {
                    error!(pool = %self.name, worker = ordinal, error = %join_err, "worker panicked");
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!(join_err).into());
                    }
                }
            }
        }

        info!(pool = %self.name, "worker pool drained");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
