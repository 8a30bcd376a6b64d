//! Queue source over an AMQP channel
//!
//! Declares its own topology at connect time: durable direct exchange,
//! durable queue, binding. `basic_qos` caps unacknowledged deliveries per
//! channel, which is the backpressure mechanism: a slow or retry-looping
//! worker throttles intake instead of buffering unboundedly.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::AmqpSourceConfig;
use crate::error::{ConsumerError, Result};
use crate::message::{InboundMessage, Position};
use crate::source::{BrokerSource, SourceFactory};

/// One consumer on a bound, durable queue with manual acks
pub struct AmqpSource {
    _connection: Connection,
    channel: Channel,
    consumer: lapin::Consumer,
    shutdown: watch::Receiver<bool>,
    queue: String,
}

impl AmqpSource {
    /// Dial the broker, declare topology, cap prefetch and start consuming
    pub async fn connect(
        config: &AmqpSourceConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let connection =
            Connection::connect(&config.uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let queue = channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %queue.name(),
            messages = queue.message_count(),
            consumers = queue.consumer_count(),
            exchange = %config.exchange,
            binding_key = %config.binding_key,
            "declared queue, binding to exchange"
        );

        channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                &config.binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                &config.queue,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %config.queue,
            consumer_tag = %config.consumer_tag,
            prefetch = config.prefetch_count,
            "amqp source consuming"
        );

        Ok(Self {
            _connection: connection,
            channel,
            consumer,
            shutdown,
            queue: config.queue.clone(),
        })
    }

    fn delivery_tag(msg: &InboundMessage) -> Result<u64> {
        match &msg.position {
            Position::Queue { delivery_tag, .. } => Ok(*delivery_tag),
            Position::Log { .. } => Err(ConsumerError::Transport(format!(
                "log position handed to amqp source: {}",
                msg.identity()
            ))),
        }
    }
}

#[async_trait]
impl BrokerSource for AmqpSource {
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
                delivery = self.consumer.next() => {
                    let delivery = match delivery {
                        Some(Ok(d)) => d,
                        Some(Err(e)) => return Err(ConsumerError::Amqp(e)),
                        // stream ended without a shutdown request: the
                        // channel or connection dropped underneath us
                        None => {
                            return Err(ConsumerError::Transport(format!(
                                "deliveries channel closed for queue {}",
                                self.queue
                            )))
                        }
                    };

                    let msg = InboundMessage {
                        payload: delivery.data.clone(),
                        position: Position::Queue {
                            queue: self.queue.clone(),
                            delivery_tag: delivery.delivery_tag,
                        },
                        received_at: Utc::now(),
                        redelivered: delivery.redelivered,
                    };
                    debug!(position = %msg.identity(), "fetched amqp delivery");
                    return Ok(msg);
                }
            }
        }
    }

    async fn acknowledge(&mut self, msg: &InboundMessage) -> Result<()> {
        let tag = Self::delivery_tag(msg)?;
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn reject(&mut self, msg: &InboundMessage, requeue: bool) -> Result<()> {
        let tag = Self::delivery_tag(msg)?;
        self.channel
            .basic_reject(tag, BasicRejectOptions { requeue })
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.channel.close(200, "worker stopped").await?;
        info!(queue = %self.queue, "amqp source closed");
        Ok(())
    }
}

/// Each worker dials its own connection and channel, so one worker's
/// prefetch window never starves another's
#[async_trait]
impl SourceFactory for AmqpSourceConfig {
    type Source = AmqpSource;

    async fn connect(&self, shutdown: watch::Receiver<bool>) -> Result<AmqpSource> {
        AmqpSource::connect(self, shutdown).await
    }
}
