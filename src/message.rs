//! Inbound message model shared by all broker sources

use chrono::{DateTime, Utc};

/// Broker-assigned position token for a fetched message.
///
/// A log source identifies a message by topic/partition/offset; a queue
/// source by queue name and delivery tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    Log {
        topic: String,
        partition: i32,
        offset: i64,
    },
    Queue {
        queue: String,
        delivery_tag: u64,
    },
}

/// A single unit of work handed from a broker source to a worker
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Opaque payload bytes
    pub payload: Vec<u8>,
    /// Broker-assigned position (offset or delivery tag)
    pub position: Position,
    /// When the message was fetched by this process
    pub received_at: DateTime<Utc>,
    /// Broker-maintained redelivery flag (always false for log sources,
    /// which do not expose per-message redelivery counts)
    pub redelivered: bool,
}

impl InboundMessage {
    /// Render the broker position for log lines, e.g. `orders/2/1481`
    /// or `emails/tag-17`
    pub fn identity(&self) -> String {
        match &self.position {
            Position::Log {
                topic,
                partition,
                offset,
            } => format!("{}/{}/{}", topic, partition, offset),
            Position::Queue {
                queue,
                delivery_tag,
            } => format!("{}/tag-{}", queue, delivery_tag),
        }
    }
}

/// Terminal (and in-flight) disposition of a processed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Handler succeeded, message acknowledged
    Committed,
    /// Attempt N of M failed, handler will be re-invoked in-process
    Retrying,
    /// Attempts exhausted or payload permanently malformed; routed to the
    /// dead-letter sink, then acknowledged
    DeadLettered,
    /// Handler signalled a non-retryable business error; negatively
    /// acknowledged at the broker without a dead-letter record
    Rejected,
}

impl ProcessingOutcome {
    /// Metric label for this outcome
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingOutcome::Committed => "committed",
            ProcessingOutcome::Retrying => "retrying",
            ProcessingOutcome::DeadLettered => "dead_lettered",
            ProcessingOutcome::Rejected => "rejected",
        }
    }

    /// True for dispositions that end a message's fetch-dispose cycle
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessingOutcome::Retrying)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_identity() {
        let msg = InboundMessage {
            payload: b"{}".to_vec(),
            position: Position::Log {
                topic: "create_product".to_string(),
                partition: 3,
                offset: 42,
            },
            received_at: Utc::now(),
            redelivered: false,
        };
        assert_eq!(msg.identity(), "create_product/3/42");
    }

    #[test]
    fn test_queue_identity() {
        let msg = InboundMessage {
            payload: b"{}".to_vec(),
            position: Position::Queue {
                queue: "emails".to_string(),
                delivery_tag: 17,
            },
            received_at: Utc::now(),
            redelivered: true,
        };
        assert_eq!(msg.identity(), "emails/tag-17");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ProcessingOutcome::Committed.as_str(), "committed");
        assert_eq!(ProcessingOutcome::DeadLettered.as_str(), "dead_lettered");
        assert!(ProcessingOutcome::Committed.is_terminal());
        assert!(!ProcessingOutcome::Retrying.is_terminal());
    }
}
