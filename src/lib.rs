//! Reliable broker consumption for at-least-once pipelines.
//!
//! One engine owns a set of worker pools, each pool binds a fixed number of
//! workers to independent broker sources (Kafka consumer-group members or
//! AMQP channels), and every worker runs the same sequential loop: fetch,
//! decode, validate, handle with bounded retry, then dispose. Messages that
//! cannot be processed are written to a dead-letter sink before their source
//! position is acknowledged, so nothing is dropped silently.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use reliable_consumer::{
//!     ConsumptionEngine, DeadLetterConfig, HandlerError, KafkaDeadLetterSink,
//!     KafkaSourceConfig, MessageHandler, NoopMetrics, PoolOptions,
//! };
//! use serde::Deserialize;
//! use validator::Validate;
//!
//! #[derive(Debug, Deserialize, Validate)]
//! struct CreateProduct {
//!     #[validate(length(min = 1))]
//!     name: String,
//! }
//!
//! struct CreateProductHandler;
//!
//! #[async_trait::async_trait]
//! impl MessageHandler for CreateProductHandler {
//!     type Message = CreateProduct;
//!
//!     async fn handle(&self, msg: &CreateProduct) -> Result<(), HandlerError> {
//!         tracing::info!(name = %msg.name, "creating product");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let kafka = KafkaSourceConfig::from_env();
//!     let dead_letter = DeadLetterConfig::from_env();
//!
//!     let mut engine = ConsumptionEngine::new();
//!     engine
//!         .spawn_pool(
//!             PoolOptions::new("create_product").workers(16),
//!             kafka.with_topic("create_product"),
//!             Arc::new(CreateProductHandler),
//!             Arc::new(KafkaDeadLetterSink::new(dead_letter)?),
//!             Arc::new(NoopMetrics),
//!         )
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     engine.shutdown_and_join().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dead_letter;
pub mod engine;
pub mod error;
pub mod message;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod source;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AmqpSourceConfig, DeadLetterConfig, KafkaSourceConfig, PoolOptions};
pub use dead_letter::{DeadLetterRecord, DeadLetterSink, KafkaDeadLetterSink};
pub use engine::ConsumptionEngine;
pub use error::{ConsumerError, HandlerError, Result};
pub use message::{InboundMessage, Position, ProcessingOutcome};
pub use metrics::{ConsumerMetrics, NoopMetrics, PrometheusMetrics};
pub use pool::WorkerPool;
pub use retry::{RetryError, RetryPolicy};
pub use source::{AmqpSource, BrokerSource, KafkaSource, SourceFactory};
pub use worker::{MessageHandler, Worker, WorkerHandle, WorkerState};
