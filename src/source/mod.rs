//! Broker source abstraction
//!
//! A `BrokerSource` is one inbound channel of messages: a partitioned log
//! topic consumed within a group, or a bound queue consumed with manual
//! acks. Workers drive it strictly sequentially; a source never has more
//! than one message outstanding per worker beyond its own prefetch window.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::message::InboundMessage;

pub mod amqp;
pub mod kafka;

pub use amqp::AmqpSource;
pub use kafka::KafkaSource;

/// One inbound message channel from a broker.
///
/// `fetch` blocks until a message is available, shutdown is signalled
/// (`Err(ConsumerError::SourceClosed)`, the only sanctioned worker exit), or
/// the underlying connection fails. `acknowledge` durably marks the
/// message's position processed and must be called at most once per fetched
/// message, only after its disposition is fully determined.
#[async_trait]
pub trait BrokerSource: Send {
    async fn fetch(&mut self) -> Result<InboundMessage>;

    async fn acknowledge(&mut self, msg: &InboundMessage) -> Result<()>;

    /// Negatively acknowledge: requeue on transient infra failure, drop for
    /// poison messages. Queue sources map this to a broker nack; log sources
    /// approximate it (see `KafkaSource::reject`).
    async fn reject(&mut self, msg: &InboundMessage, requeue: bool) -> Result<()>;

    /// Release broker resources at worker exit
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Connects one `BrokerSource` per worker.
///
/// Each worker owns an independently dialed source: a queue worker gets its
/// own channel and prefetch window; a log worker joins the consumer group as
/// its own member and the broker assigns it partitions, so at most one
/// worker consumes a partition at a time.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    type Source: BrokerSource + 'static;

    async fn connect(&self, shutdown: watch::Receiver<bool>) -> Result<Self::Source>;
}
