//! Queue consumer: turns enrichment messages into ack/retry decisions.
//!
//! Messages arrive at least once. Each names an ISBN and the capability to
//! resolve for it. The consumer groups a delivery by capability, sends
//! metadata requests through the batch resolver, and settles every message:
//!
//! | Outcome                         | Action                         |
//! |---------------------------------|--------------------------------|
//! | Found                           | persist, then ack              |
//! | Confirmed absent                | negative cache entry, then ack |
//! | Provider failure / sink failure | retry                          |
//! | Malformed ISBN                  | ack                            |
//!
//! Retries are bounded by the queue: [`MemoryQueue`] dead-letters a message
//! once it has been delivered `max_attempts` times.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookforged_common::{Isbn, MessageId, Priority};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::capability::Capability;
use super::provider::{Candidate, ResolveContext};
use super::service::BookResolver;
use super::sink::{EnrichmentPayload, EnrichmentSink};

/// One enrichment request as delivered by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: MessageId,
    /// Raw identifier as published; validated by the consumer.
    pub isbn: String,
    pub capability: Capability,
    #[serde(default)]
    pub priority: Priority,
    /// Where the request came from; informational only.
    #[serde(default)]
    pub source_hint: Option<String>,
    /// Delivery count, including this one.
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("message {0} is not in flight")]
    UnknownMessage(MessageId),
}

/// An at-least-once message queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Take up to `max` messages. Each stays in flight until acked or retried.
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    async fn ack(&self, id: MessageId) -> Result<(), QueueError>;

    /// Return the message for redelivery.
    async fn retry(&self, id: MessageId) -> Result<(), QueueError>;
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueMessage>,
    in_flight: HashMap<MessageId, QueueMessage>,
    dead_letters: Vec<QueueMessage>,
}

/// In-process [`MessageQueue`] with a dead-letter list.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    max_attempts: u32,
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn publish(
        &self,
        isbn: impl Into<String>,
        capability: Capability,
        priority: Priority,
        source_hint: Option<String>,
    ) -> MessageId {
        let message = QueueMessage {
            id: MessageId::new(),
            isbn: isbn.into(),
            capability,
            priority,
            source_hint,
            attempt: 0,
        };
        let id = message.id;
        self.state.lock().pending.push_back(message);
        id
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn dead_letters(&self) -> Vec<QueueMessage> {
        self.state.lock().dead_letters.clone()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.state.lock();
        let take = max.min(state.pending.len());
        let batch: Vec<QueueMessage> = state
            .pending
            .drain(..take)
            .map(|mut message| {
                message.attempt += 1;
                message
            })
            .collect();
        for message in &batch {
            state.in_flight.insert(message.id, message.clone());
        }
        Ok(batch)
    }

    async fn ack(&self, id: MessageId) -> Result<(), QueueError> {
        self.state
            .lock()
            .in_flight
            .remove(&id)
            .map(|_| ())
            .ok_or(QueueError::UnknownMessage(id))
    }

    async fn retry(&self, id: MessageId) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let message = state
            .in_flight
            .remove(&id)
            .ok_or(QueueError::UnknownMessage(id))?;

        if message.attempt >= self.max_attempts {
            warn!(
                message_id = %id,
                isbn = %message.isbn,
                attempts = message.attempt,
                "Message exceeded max attempts; dead-lettering"
            );
            state.dead_letters.push(message);
        } else {
            state.pending.push_back(message);
        }
        Ok(())
    }
}

/// Per-delivery tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeReport {
    pub received: usize,
    pub acked: usize,
    pub retried: usize,
    pub persisted: usize,
    pub not_found: usize,
    pub invalid: usize,
}

enum Settlement {
    Ack,
    Retry,
}

pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    resolver: Arc<BookResolver>,
    sink: Arc<dyn EnrichmentSink>,
    batch_size: usize,
    poll_interval: Duration,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        resolver: Arc<BookResolver>,
        sink: Arc<dyn EnrichmentSink>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            resolver,
            sink,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// Receive one delivery and settle every message in it.
    pub async fn consume_once(&self, ctx: &ResolveContext) -> Result<ConsumeReport, QueueError> {
        let messages = self.queue.receive(self.batch_size).await?;
        let mut report = ConsumeReport {
            received: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            return Ok(report);
        }

        let mut groups: BTreeMap<Capability, Vec<(QueueMessage, Isbn)>> = BTreeMap::new();
        for message in messages {
            match Isbn::parse(&message.isbn) {
                Ok(isbn) => groups
                    .entry(message.capability)
                    .or_default()
                    .push((message, isbn)),
                Err(e) => {
                    warn!(
                        message_id = %message.id,
                        identifier = %message.isbn,
                        error = %e,
                        "Acking message with invalid ISBN"
                    );
                    report.invalid += 1;
                    self.settle(&message, Settlement::Ack, &mut report).await;
                }
            }
        }

        for (capability, mut group) in groups {
            // Stable: equal priorities keep delivery order.
            group.sort_by(|a, b| b.0.priority.cmp(&a.0.priority));
            match capability {
                Capability::FetchMetadata => self.consume_metadata(group, ctx, &mut report).await,
                Capability::ResolveIsbn | Capability::GenerateBooks | Capability::BatchFetchMetadata => {
                    for (message, _) in group {
                        warn!(
                            message_id = %message.id,
                            capability = %capability,
                            "Capability is not keyed on an ISBN; acking"
                        );
                        report.invalid += 1;
                        self.settle(&message, Settlement::Ack, &mut report).await;
                    }
                }
                _ => {
                    for (message, isbn) in group {
                        self.consume_single(capability, message, isbn, ctx, &mut report)
                            .await;
                    }
                }
            }
        }

        info!(
            received = report.received,
            acked = report.acked,
            retried = report.retried,
            persisted = report.persisted,
            not_found = report.not_found,
            invalid = report.invalid,
            "Queue batch processed"
        );
        Ok(report)
    }

    async fn consume_metadata(
        &self,
        group: Vec<(QueueMessage, Isbn)>,
        ctx: &ResolveContext,
        report: &mut ConsumeReport,
    ) {
        let isbns: Vec<Isbn> = group.iter().map(|(_, isbn)| isbn.clone()).collect();
        let outcome = self.resolver.batch_until_done(isbns.as_slice(), ctx).await;

        for (message, isbn) in group {
            debug!(message_id = %message.id, source = ?message.source_hint, "Settling metadata message");
            let settlement = if let Some(candidate) = outcome.found.get(&isbn) {
                self.persist(Capability::FetchMetadata, &isbn, candidate, report)
                    .await
            } else if outcome.failed.contains(&isbn) {
                Settlement::Retry
            } else {
                if !outcome.unconfirmed.contains(&isbn) {
                    self.resolver
                        .remember_absent(Capability::FetchMetadata, &isbn)
                        .await;
                }
                report.not_found += 1;
                Settlement::Ack
            };
            self.settle(&message, settlement, report).await;
        }
    }

    async fn consume_single(
        &self,
        capability: Capability,
        message: QueueMessage,
        isbn: Isbn,
        ctx: &ResolveContext,
        report: &mut ConsumeReport,
    ) {
        debug!(message_id = %message.id, source = ?message.source_hint, "Settling message");
        let settlement = match self.resolver.resolve_json(capability, &isbn, ctx).await {
            Some(resolution) if resolution.is_transient() => Settlement::Retry,
            Some(resolution) => {
                if resolution.is_definitive_absence() {
                    self.resolver.remember_absent(capability, &isbn).await;
                }
                match resolution.candidate {
                    Some(candidate) => self.persist(capability, &isbn, &candidate, report).await,
                    None => {
                        report.not_found += 1;
                        Settlement::Ack
                    }
                }
            }
            None => Settlement::Ack,
        };
        self.settle(&message, settlement, report).await;
    }

    async fn persist<T: Serialize>(
        &self,
        capability: Capability,
        isbn: &Isbn,
        candidate: &Candidate<T>,
        report: &mut ConsumeReport,
    ) -> Settlement {
        let payload = match EnrichmentPayload::from_candidate(capability, candidate) {
            Ok(payload) => payload,
            Err(e) => {
                error!(isbn = %isbn, capability = %capability, error = %e, "Failed to encode enrichment");
                return Settlement::Retry;
            }
        };
        match self.sink.enrich_record(isbn, &payload).await {
            Ok(()) => {
                report.persisted += 1;
                Settlement::Ack
            }
            Err(e) => {
                error!(isbn = %isbn, capability = %capability, error = %e, "Failed to persist enrichment");
                Settlement::Retry
            }
        }
    }

    async fn settle(&self, message: &QueueMessage, settlement: Settlement, report: &mut ConsumeReport) {
        let result = match settlement {
            Settlement::Ack => {
                report.acked += 1;
                self.queue.ack(message.id).await
            }
            Settlement::Retry => {
                report.retried += 1;
                self.queue.retry(message.id).await
            }
        };
        if let Err(e) = result {
            error!(message_id = %message.id, error = %e, "Failed to settle message");
        }
    }

    /// Poll until a shutdown signal arrives.
    pub async fn run(&self, ctx: ResolveContext, mut shutdown_rx: mpsc::Receiver<()>) {
        info!("Queue consumer started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Queue consumer shutting down");
                    break;
                }
                result = self.consume_once(&ctx) => {
                    match result {
                        Ok(report) if report.received > 0 => continue,
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Failed to receive from queue"),
                    }
                }
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Queue consumer shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
