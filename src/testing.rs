//! In-memory broker doubles shared by the unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use validator::Validate;

use crate::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::error::{ConsumerError, HandlerError, Result};
use crate::message::{InboundMessage, Position, ProcessingOutcome};
use crate::metrics::ConsumerMetrics;
use crate::source::{BrokerSource, SourceFactory};
use crate::worker::MessageHandler;

/// Observation point shared by the fake source and sink, so tests can
/// assert cross-component ordering (dead-letter write before acknowledge)
#[derive(Default)]
pub(crate) struct Probe {
    pub acks: Mutex<Vec<String>>,
    pub rejects: Mutex<Vec<(String, bool)>>,
    pub dead_letters: Mutex<Vec<DeadLetterRecord>>,
    /// Interleaved `dlq:<id>` / `ack:<id>` / `reject:<id>` events
    pub timeline: Mutex<Vec<String>>,
    pub fail_dead_letter: AtomicBool,
    pub source_closed: AtomicBool,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ack_count(&self) -> usize {
        self.acks.lock().unwrap().len()
    }

    pub fn reject_count(&self) -> usize {
        self.rejects.lock().unwrap().len()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().unwrap().len()
    }

    pub fn timeline(&self) -> Vec<String> {
        self.timeline.lock().unwrap().clone()
    }
}

/// Scripted in-memory source: yields its queued messages in order, then
/// either blocks until shutdown (the normal case) or fails fetch
pub(crate) struct MockSource {
    queue: VecDeque<InboundMessage>,
    probe: Arc<Probe>,
    shutdown: watch::Receiver<bool>,
    fail_when_empty: bool,
}

impl MockSource {
    pub fn new(
        messages: Vec<InboundMessage>,
        probe: Arc<Probe>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue: messages.into(),
            probe,
            shutdown,
            fail_when_empty: false,
        }
    }

    /// Simulate a dropped connection once the script runs out
    pub fn failing_when_empty(mut self) -> Self {
        self.fail_when_empty = true;
        self
    }
}

#[async_trait]
impl BrokerSource for MockSource {
    async fn fetch(&mut self) -> Result<InboundMessage> {
        if let Some(msg) = self.queue.pop_front() {
            return Ok(msg);
        }
        if self.fail_when_empty {
            return Err(ConsumerError::Transport("connection dropped".to_string()));
        }
        loop {
            if *self.shutdown.borrow() {
                return Err(ConsumerError::SourceClosed);
            }
            if self.shutdown.changed().await.is_err() {
                return Err(ConsumerError::SourceClosed);
            }
        }
    }

    async fn acknowledge(&mut self, msg: &InboundMessage) -> Result<()> {
        let id = msg.identity();
        self.probe.acks.lock().unwrap().push(id.clone());
        self.probe.timeline.lock().unwrap().push(format!("ack:{id}"));
        Ok(())
    }

    async fn reject(&mut self, msg: &InboundMessage, requeue: bool) -> Result<()> {
        let id = msg.identity();
        self.probe.rejects.lock().unwrap().push((id.clone(), requeue));
        self.probe
            .timeline
            .lock()
            .unwrap()
            .push(format!("reject:{id}"));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.probe.source_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing one scripted source per worker; each worker drains its
/// own copy of the script
pub(crate) struct MockSourceFactory {
    messages: Vec<InboundMessage>,
    probe: Arc<Probe>,
}

impl MockSourceFactory {
    pub fn new(messages: Vec<InboundMessage>, probe: Arc<Probe>) -> Self {
        Self { messages, probe }
    }
}

#[async_trait]
impl SourceFactory for MockSourceFactory {
    type Source = MockSource;

    async fn connect(&self, shutdown: watch::Receiver<bool>) -> Result<MockSource> {
        Ok(MockSource::new(
            self.messages.clone(),
            self.probe.clone(),
            shutdown,
        ))
    }
}

/// Fault-injectable dead-letter sink recording every published record
pub(crate) struct RecordingSink {
    probe: Arc<Probe>,
}

impl RecordingSink {
    pub fn new(probe: Arc<Probe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl DeadLetterSink for RecordingSink {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<()> {
        if self.probe.fail_dead_letter.load(Ordering::SeqCst) {
            return Err(ConsumerError::DeadLetter("sink unavailable".to_string()));
        }
        self.probe.dead_letters.lock().unwrap().push(record.clone());
        self.probe
            .timeline
            .lock()
            .unwrap()
            .push(format!("dlq:{}", record.key()));
        Ok(())
    }
}

/// Message type used by the tests
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub(crate) struct TestEvent {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
}

impl TestEvent {
    pub fn valid_payload() -> Vec<u8> {
        serde_json::to_vec(&TestEvent {
            name: "widget".to_string(),
            quantity: 5,
        })
        .unwrap()
    }

    /// Decodes fine but fails the range rule
    pub fn invalid_payload() -> Vec<u8> {
        serde_json::to_vec(&TestEvent {
            name: "widget".to_string(),
            quantity: 0,
        })
        .unwrap()
    }
}

pub(crate) enum HandlerScript {
    AlwaysSucceed,
    AlwaysTransient,
    AlwaysTerminal,
    /// Fail transiently this many times, then succeed
    TransientFailures(u32),
}

/// Handler with a scripted failure mode and an invocation counter
pub(crate) struct ScriptedHandler {
    pub invocations: AtomicU32,
    script: HandlerScript,
}

impl ScriptedHandler {
    pub fn new(script: HandlerScript) -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicU32::new(0),
            script,
        })
    }

    pub fn invocation_count(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    type Message = TestEvent;

    async fn handle(&self, _msg: &TestEvent) -> std::result::Result<(), HandlerError> {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.script {
            HandlerScript::AlwaysSucceed => Ok(()),
            HandlerScript::AlwaysTransient => {
                Err(HandlerError::transient(anyhow::anyhow!("datastore down")))
            }
            HandlerScript::AlwaysTerminal => {
                Err(HandlerError::terminal(anyhow::anyhow!("duplicate key")))
            }
            HandlerScript::TransientFailures(failures) => {
                if n < failures {
                    Err(HandlerError::transient(anyhow::anyhow!("datastore down")))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Metrics double capturing every observation
#[derive(Default)]
pub(crate) struct CapturingMetrics {
    pub received: AtomicU32,
    pub outcomes: Mutex<Vec<(String, ProcessingOutcome)>>,
}

impl CapturingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn outcomes(&self) -> Vec<(String, ProcessingOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl ConsumerMetrics for CapturingMetrics {
    fn message_received(&self, _class: &str) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    fn outcome_recorded(&self, class: &str, outcome: ProcessingOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .push((class.to_string(), outcome));
    }
}

pub(crate) fn log_message(offset: i64, payload: Vec<u8>) -> InboundMessage {
    InboundMessage {
        payload,
        position: Position::Log {
            topic: "create_product".to_string(),
            partition: 0,
            offset,
        },
        received_at: Utc::now(),
        redelivered: false,
    }
}

pub(crate) fn queue_message(delivery_tag: u64, payload: Vec<u8>) -> InboundMessage {
    InboundMessage {
        payload,
        position: Position::Queue {
            queue: "email_queue".to_string(),
            delivery_tag,
        },
        received_at: Utc::now(),
        redelivered: false,
    }
}
