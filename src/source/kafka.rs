//! Log-topic source over a Kafka consumer group
//!
//! Manual commits only: an offset is committed when the worker acknowledges,
//! after the message's disposition is fully determined. Auto-commit would
//! move the group position past messages that were never dispositioned.

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::KafkaSourceConfig;
use crate::error::{ConsumerError, Result};
use crate::message::{InboundMessage, Position};
use crate::source::{BrokerSource, SourceFactory};

/// Consumer-group member bound to one topic
pub struct KafkaSource {
    consumer: StreamConsumer,
    shutdown: watch::Receiver<bool>,
    topic: String,
}

impl KafkaSource {
    /// Create a group member and subscribe to the configured topic
    pub fn connect(config: &KafkaSourceConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("fetch.min.bytes", config.min_fetch_bytes.to_string())
            .set("fetch.message.max.bytes", config.max_fetch_bytes.to_string())
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("socket.timeout.ms", config.socket_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[&config.topic])?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "kafka source subscribed"
        );

        Ok(Self {
            consumer,
            shutdown,
            topic: config.topic.clone(),
        })
    }

    /// Commit the group position past `msg`
    fn commit_past(&self, msg: &InboundMessage) -> Result<()> {
        let Position::Log {
            topic,
            partition,
            offset,
        } = &msg.position
        else {
            return Err(ConsumerError::Transport(format!(
                "queue position handed to kafka source: {}",
                msg.identity()
            )));
        };

        // committed offset is the next offset to read
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, *partition, Offset::Offset(*offset + 1))?;
        self.consumer.commit(&tpl, CommitMode::Sync)?;
        Ok(())
    }
}

#[async_trait]
impl BrokerSource for KafkaSource {
    async fn fetch(&mut self) -> Result<InboundMessage> {
        loop {
            if *self.shutdown.borrow() {
                return Err(ConsumerError::SourceClosed);
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return Err(ConsumerError::SourceClosed);
                    }
                }
                received = self.consumer.recv() => {
                    let record = received?;
                    let msg = InboundMessage {
                        payload: record.payload().unwrap_or_default().to_vec(),
                        position: Position::Log {
                            topic: record.topic().to_string(),
                            partition: record.partition(),
                            offset: record.offset(),
                        },
                        received_at: Utc::now(),
                        redelivered: false,
                    };
                    debug!(position = %msg.identity(), "fetched kafka message");
                    return Ok(msg);
                }
            }
        }
    }

    async fn acknowledge(&mut self, msg: &InboundMessage) -> Result<()> {
        self.commit_past(msg)
    }

    /// Kafka has no per-message negative ack. Dropping commits past the
    /// message; requeueing leaves the offset uncommitted so the group
    /// re-reads it after restart or rebalance.
    async fn reject(&mut self, msg: &InboundMessage, requeue: bool) -> Result<()> {
        if requeue {
            warn!(
                position = %msg.identity(),
                "leaving offset uncommitted for redelivery"
            );
            return Ok(());
        }
        self.commit_past(msg)
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "kafka source closed");
        Ok(())
    }
}

/// Each worker joins the group as its own member; the broker assigns it a
/// disjoint set of partitions
#[async_trait]
impl SourceFactory for KafkaSourceConfig {
    type Source = KafkaSource;

    async fn connect(&self, shutdown: watch::Receiver<bool>) -> Result<KafkaSource> {
        KafkaSource::connect(self, shutdown)
    }
}
