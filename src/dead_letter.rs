//! Dead-letter routing for permanently failed messages
//!
//! Messages that fail decode/validation or exhaust their retry budget are
//! preserved for manual inspection instead of being discarded. The record is
//! written before the originating message is acknowledged; if the write
//! fails, the message is left unacknowledged and redelivered after restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::DeadLetterConfig;
use crate::error::{ConsumerError, Result};
use crate::message::{InboundMessage, Position};

/// Immutable record of a permanently failed message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Identity of this record
    pub record_id: Uuid,
    /// Topic or queue the message arrived on
    pub topic: String,
    /// Partition, for log sources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    /// Offset, for log sources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Delivery tag, for queue sources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_tag: Option<u64>,
    /// Serialized failure reason
    pub error: String,
    /// Original arrival time of the failed message
    pub received_at: DateTime<Utc>,
    /// When the record was enqueued to the sink
    pub enqueued_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    /// Build a record from a failed message and its final error
    pub fn from_message(msg: &InboundMessage, error: impl std::fmt::Display) -> Self {
        let (topic, partition, offset, delivery_tag) = match &msg.position {
            Position::Log {
                topic,
                partition,
                offset,
            } => (topic.clone(), Some(*partition), Some(*offset), None),
            Position::Queue {
                queue,
                delivery_tag,
            } => (queue.clone(), None, None, Some(*delivery_tag)),
        };

        Self {
            record_id: Uuid::new_v4(),
            topic,
            partition,
            offset,
            delivery_tag,
            error: error.to_string(),
            received_at: msg.received_at,
            enqueued_at: Utc::now(),
        }
    }

    /// Producer key: stable per source position so broker-side compaction
    /// and inspection group redeliveries of the same message together
    pub fn key(&self) -> String {
        match (self.partition, self.offset, self.delivery_tag) {
            (Some(p), Some(o), _) => format!("{}-{}-{}", self.topic, p, o),
            (_, _, Some(tag)) => format!("{}-{}", self.topic, tag),
            _ => self.topic.clone(),
        }
    }
}

/// Write-only fan-in target for permanently failed messages.
///
/// One sink is shared per pool; implementations must be safe for concurrent
/// publishes from all of the pool's workers.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<()>;
}

/// Kafka-backed sink publishing records to a dead-letter topic
pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    config: DeadLetterConfig,
}

impl KafkaDeadLetterSink {
    /// Create the sink. The underlying producer connects lazily on first
    /// publish, so pools pay nothing for classes that never fail.
    pub fn new(config: DeadLetterConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.send_timeout_ms.to_string())
            .create()?;

        Ok(Self { producer, config })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let key = record.key();

        let delivery = self
            .producer
            .send(
                FutureRecord::to(&self.config.topic)
                    .key(&key)
                    .payload(&payload),
                self.config.send_timeout(),
            )
            .await;

        match delivery {
            Ok((partition, offset)) => {
                debug!(
                    topic = %self.config.topic,
                    partition,
                    offset,
                    record_id = %record.record_id,
                    "dead letter record published"
                );
                Ok(())
            }
            Err((e, _)) => {
                error!(
                    topic = %self.config.topic,
                    record_id = %record.record_id,
                    error = %e,
                    "failed to publish dead letter record"
                );
                Err(ConsumerError::DeadLetter(e.to_string()))
            }
        }
    }
}
