// Copyright (c) 2025 - Cowboy AI, Inc.

//! In-memory adapters
//!
//! Thread-safe, process-local implementations of every port. State is lost
//! on restart.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, Notify};
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::entity::EntityRecord;
use crate::envelope::{CommandEnvelope, EventEnvelope};
use crate::errors::{PublishError, QueueError, RepositoryError};
use crate::ports::{CommandQueue, EntityRepository, EventPublisher, ExpectedVersion, OutboxEntry, OutboxStore};

/// Default broadcast buffer for [`InMemoryEventPublisher`]
pub const DEFAULT_BUS_CAPACITY: usize = 1000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct RepositoryState {
    records: HashMap<(String, String), EntityRecord>,
    outbox: VecDeque<OutboxEntry>,
}

/// Versioned record store with an outbox, saved atomically under one lock
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<RepositoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backing store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Stored record, bypassing the port
    pub fn record(&self, entity_type: &str, id: &str) -> Option<EntityRecord> {
        lock(&self.state)
            .records
            .get(&(entity_type.to_string(), id.to_string()))
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        lock(&self.state).records.len()
    }

    /// Outbox entries not yet marked published
    pub fn pending_count(&self) -> usize {
        lock(&self.state).outbox.len()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntityRepository for InMemoryRepository {
    async fn load(&self, entity_type: &str, id: &str) -> Result<Option<EntityRecord>, RepositoryError> {
        self.check_available()?;
        Ok(self.record(entity_type, id))
    }

    async fn save(
        &self,
        record: &EntityRecord,
        expected: ExpectedVersion,
        outbox: Vec<OutboxEntry>,
    ) -> Result<u64, RepositoryError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let key = (record.entity_type.clone(), record.id.clone());
        let actual = state.records.get(&key).map(|r| r.version);

        if !expected.matches(actual) {
            return Err(RepositoryError::Conflict {
                entity_type: record.entity_type.clone(),
                id: record.id.clone(),
                expected: expected.as_option(),
                actual,
            });
        }

        let version = actual.unwrap_or(0) + 1;
        let mut stored = record.clone();
        stored.version = version;
        state.records.insert(key, stored);
        state.outbox.extend(outbox);

        debug!(entity = %record.entity_type, id = %record.id, version, "Record saved");
        Ok(version)
    }
}

#[async_trait]
impl OutboxStore for InMemoryRepository {
    async fn stage(&self, entries: Vec<OutboxEntry>) -> Result<(), RepositoryError> {
        self.check_available()?;
        lock(&self.state).outbox.extend(entries);
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, RepositoryError> {
        self.check_available()?;
        Ok(lock(&self.state).outbox.iter().take(limit).cloned().collect())
    }

    async fn mark_published(&self, event_ids: &[Uuid]) -> Result<(), RepositoryError> {
        self.check_available()?;
        lock(&self.state)
            .outbox
            .retain(|entry| !event_ids.contains(&entry.event_id()));
        Ok(())
    }
}

/// Broadcast event bus that also records everything it delivered
pub struct InMemoryEventPublisher {
    sender: broadcast::Sender<EventEnvelope>,
    history: Mutex<Vec<EventEnvelope>>,
    failing: AtomicBool,
    budget: Mutex<Option<usize>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            budget: Mutex::new(None),
        }
    }

    /// Live stream of published events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Every event delivered so far, in delivery order
    pub fn published(&self) -> Vec<EventEnvelope> {
        lock(&self.history).clone()
    }

    /// Fail every publish until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
        if !failing {
            *lock(&self.budget) = None;
        }
    }

    /// Deliver `count` more events, then start failing
    pub fn fail_after(&self, count: usize) {
        *lock(&self.budget) = Some(count);
    }
}

impl Default for InMemoryEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("in-memory bus switched off".to_string()));
        }
        {
            let mut budget = lock(&self.budget);
            match *budget {
                Some(0) => {
                    return Err(PublishError::Unavailable("in-memory bus budget exhausted".to_string()))
                }
                Some(remaining) => *budget = Some(remaining - 1),
                None => {}
            }
        }

        lock(&self.history).push(event.clone());
        // No live subscribers is not a delivery failure
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<CommandEnvelope>,
    closed: bool,
}

struct QueueShared {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

/// Bounded FIFO command queue
///
/// Work can be cancelled by message id until a receiver takes it.
#[derive(Clone)]
pub struct InMemoryCommandQueue {
    shared: Arc<QueueShared>,
}

impl InMemoryCommandQueue {
    /// Queue bounded by `queue_capacity`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.queue_capacity)
    }

    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                capacity,
            }),
        }
    }

    /// Consuming half of the queue
    pub fn receiver(&self) -> CommandReceiver {
        CommandReceiver {
            shared: self.shared.clone(),
        }
    }

    /// Remove a not yet dequeued command
    ///
    /// Returns false when it was already taken or never queued.
    pub fn cancel(&self, message_id: Uuid) -> bool {
        let mut state = lock(&self.shared.state);
        let before = state.items.len();
        state.items.retain(|envelope| envelope.message_id != message_id);
        let removed = state.items.len() != before;
        if removed {
            debug!(%message_id, "Queued command cancelled");
        }
        removed
    }

    /// Refuse new work; receivers drain what is left, then stop
    pub fn close(&self) {
        lock(&self.shared.state).closed = true;
        self.shared.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CommandQueue for InMemoryCommandQueue {
    async fn publish(&self, envelope: CommandEnvelope) -> Result<(), QueueError> {
        {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.items.len() >= self.shared.capacity {
                return Err(QueueError::Full);
            }
            state.items.push_back(envelope);
        }
        self.shared.notify.notify_one();
        Ok(())
    }
}

/// Consuming half of an [`InMemoryCommandQueue`]
#[derive(Clone)]
pub struct CommandReceiver {
    shared: Arc<QueueShared>,
}

impl CommandReceiver {
    /// Next command, waiting for one; `None` once closed and drained
    pub async fn recv(&self) -> Option<CommandEnvelope> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.shared.state);
                if let Some(envelope) = state.items.pop_front() {
                    return Some(envelope);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Next command if one is ready
    pub fn try_recv(&self) -> Option<CommandEnvelope> {
        lock(&self.shared.state).items.pop_front()
    }
}
