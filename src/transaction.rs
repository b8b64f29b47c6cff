// Copyright (c) 2025 - Cowboy AI, Inc.
//! Transaction Coordinator
//!
//! Owns the phase machine of one execution attempt and performs the commit:
//!
//! ```text
//! COMMITTING
//!   1. save(root record, expected version, outbox entries)   ← atomic
//!        └─ stateless: outbox.stage(entries)
//!   2. publish buffered events in raise order
//!   3. mark delivered entries published
//! COMMITTED
//! ```
//!
//! A failure in step 1 writes nothing and rolls back. A failure in step 2
//! stops publishing (order is preserved), leaves the remaining entries in
//! the outbox for the sweeper and still counts as committed.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::entity::{EntityKey, EntityRecord};
use crate::envelope::EventEnvelope;
use crate::errors::{EngineError, RepositoryError};
use crate::ports::{EntityRepository, EventPublisher, ExpectedVersion, OutboxEntry, OutboxStore};
use crate::schema::ValidatedPayload;
use crate::state_machine::{PhaseInput, Recorded, TransactionPhase};

/// One execution attempt's transaction handle
#[derive(Debug, Clone)]
pub struct Transaction {
    id: Uuid,
    started_at: DateTime<Utc>,
    fsm: Recorded<TransactionPhase>,
}

impl Transaction {
    /// Open a transaction in `PENDING`
    pub fn begin(context: &ExecutionContext) -> Self {
        Self {
            id: context.transaction_id,
            started_at: Utc::now(),
            fsm: Recorded::new(TransactionPhase::Pending),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn phase(&self) -> TransactionPhase {
        self.fsm.state()
    }

    /// Pass `VALIDATING` with a payload validated before the first attempt
    ///
    /// Validation runs once per command, outside any transaction; every
    /// attempt presents the same [`ValidatedPayload`] and moves on to
    /// `RESOLVING`.
    pub fn accept_validated(
        &mut self,
        payload: &ValidatedPayload,
    ) -> Result<TransactionPhase, EngineError> {
        self.advance()?;
        debug!(transaction_id = %self.id, schema = payload.schema(), "Payload already validated");
        self.advance()
    }

    /// Step to the next phase
    pub fn advance(&mut self) -> Result<TransactionPhase, EngineError> {
        self.fsm
            .apply(PhaseInput::Advance, Utc::now())
            .map_err(|err| EngineError::Fatal(anyhow::Error::new(err).context("transaction phase")))
    }

    /// Roll back unless already terminal
    pub fn rollback(&mut self) {
        if !self.phase().is_terminal() {
            let from = self.phase();
            if self
                .fsm
                .apply(PhaseInput::Abort, Utc::now())
                .is_ok()
            {
                debug!(transaction_id = %self.id, %from, "Transaction rolled back");
            }
        }
    }

    /// Every phase visited, starting with `PENDING`
    pub fn path(&self) -> Vec<TransactionPhase> {
        self.fsm.path()
    }
}

/// Entity write staged by a successful execution
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub key: EntityKey,
    pub record: EntityRecord,
    pub expected: ExpectedVersion,
}

/// Everything a commit makes durable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    /// `None` for stateless executions
    pub write: Option<PendingWrite>,

    /// Buffered events in raise order
    pub events: Vec<EventEnvelope>,
}

/// How far event delivery got after the entity write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    /// Every event reached the publisher
    Published,

    /// Publishing stopped early; the rest waits in the outbox
    Deferred { pending: usize },
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    /// Stored version of the root record, when there was a write
    pub version: Option<u64>,
    pub events: Vec<EventEnvelope>,
    pub publication: Publication,
}

/// Persists and publishes a unit of work
#[derive(Clone)]
pub struct TransactionCoordinator {
    repository: Arc<dyn EntityRepository>,
    outbox: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl TransactionCoordinator {
    pub fn new(
        repository: Arc<dyn EntityRepository>,
        outbox: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repository,
            outbox,
            publisher,
        }
    }

    /// Persist state and outbox together, then publish
    ///
    /// # Errors
    ///
    /// Only the persistence step can fail; on error nothing was written.
    pub async fn commit(&self, work: UnitOfWork) -> Result<CommitReceipt, RepositoryError> {
        let UnitOfWork { write, events } = work;
        let entries: Vec<OutboxEntry> = events.iter().cloned().map(OutboxEntry::new).collect();

        let version = match write {
            Some(write) => {
                let version = self
                    .repository
                    .save(&write.record, write.expected, entries)
                    .await?;
                debug!(entity = %write.key, version, "Entity persisted");
                Some(version)
            }
            None if !entries.is_empty() => {
                self.outbox.stage(entries).await?;
                None
            }
            None => None,
        };

        let publication = self.publish(&events).await;
        Ok(CommitReceipt {
            version,
            events,
            publication,
        })
    }

    async fn publish(&self, events: &[EventEnvelope]) -> Publication {
        let mut delivered = Vec::with_capacity(events.len());
        for event in events {
            match self.publisher.publish(event).await {
                Ok(()) => delivered.push(event.event_id),
                Err(err) => {
                    warn!(
                        event_type = %event.event_type,
                        event_id = %event.event_id,
                        trace_id = %event.trace_id,
                        error = %err,
                        "Event publication deferred to outbox"
                    );
                    break;
                }
            }
        }

        if !delivered.is_empty() {
            if let Err(err) = self.outbox.mark_published(&delivered).await {
                // Entries stay pending and are delivered again by the sweeper
                warn!(error = %err, count = delivered.len(), "Failed to mark outbox entries published");
            }
        }

        match events.len() - delivered.len() {
            0 => Publication::Published,
            pending => Publication::Deferred { pending },
        }
    }
}
