//! Error types for the consumption engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ConsumerError>;

/// Errors surfaced by sources, sinks and workers
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Sentinel returned by `BrokerSource::fetch` once shutdown has been
    /// signalled. This is the only graceful exit path for a worker loop.
    #[error("source closed")]
    SourceClosed,

    /// Kafka client error (consume, commit, produce)
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// AMQP client error (connect, declare, ack/reject)
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Connection-level failure that is not a client error value, e.g. a
    /// delivery stream ending while shutdown was not requested
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload failed to deserialize; permanently malformed, never retried
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Decoded payload failed schema/business invariant checks
    #[error("validation error: {0}")]
    Validation(String),

    /// Dead-letter record could not be published
    #[error("dead letter publish failed: {0}")]
    DeadLetter(String),

    /// Invalid or missing configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConsumerError {
    /// True for the shutdown sentinel from `BrokerSource::fetch`
    pub fn is_closed(&self) -> bool {
        matches!(self, ConsumerError::SourceClosed)
    }
}

/// Error classification returned by business handlers.
///
/// The engine does not inspect error content; handlers classify their own
/// failures as retryable or terminal.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Transient failure, e.g. a momentarily unavailable datastore.
    /// Retried up to the policy's attempt budget.
    #[error("transient handler error: {0}")]
    Transient(#[source] anyhow::Error),

    /// Non-retryable business failure, e.g. a duplicate key.
    /// Rejected at the broker without consuming retry budget.
    #[error("terminal handler error: {0}")]
    Terminal(#[source] anyhow::Error),
}

impl HandlerError {
    /// Wrap any error as transient
    pub fn transient<E: Into<anyhow::Error>>(err: E) -> Self {
        HandlerError::Transient(err.into())
    }

    /// Wrap any error as terminal
    pub fn terminal<E: Into<anyhow::Error>>(err: E) -> Self {
        HandlerError::Terminal(err.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandlerError::Terminal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_sentinel() {
        assert!(ConsumerError::SourceClosed.is_closed());
        assert!(!ConsumerError::Validation("bad".to_string()).is_closed());
    }

    #[test]
    fn test_handler_error_classification() {
        let transient = HandlerError::transient(anyhow::anyhow!("db unavailable"));
        let terminal = HandlerError::terminal(anyhow::anyhow!("duplicate key"));

        assert!(!transient.is_terminal());
        assert!(terminal.is_terminal());
        assert!(terminal.to_string().contains("terminal"));
    }
}
