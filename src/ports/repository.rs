// Copyright (c) 2025 - Cowboy AI, Inc.
//! Entity repository and outbox ports

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityRecord;
use crate::envelope::EventEnvelope;
use crate::errors::RepositoryError;

/// Optimistic concurrency expectation for a save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// The record must not exist yet
    NoRecord,

    /// The stored record must be at exactly this version
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation matching a loaded (or never saved) record
    pub fn of(record: &EntityRecord) -> Self {
        match record.version {
            0 => ExpectedVersion::NoRecord,
            v => ExpectedVersion::Exact(v),
        }
    }

    pub fn as_option(&self) -> Option<u64> {
        match self {
            ExpectedVersion::NoRecord => None,
            ExpectedVersion::Exact(v) => Some(*v),
        }
    }

    /// Whether a stored version (None = absent) satisfies this expectation
    pub fn matches(&self, actual: Option<u64>) -> bool {
        self.as_option() == actual
    }
}

/// An event staged for publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub event: EventEnvelope,
    pub staged_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(event: EventEnvelope) -> Self {
        Self {
            event,
            staged_at: Utc::now(),
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event.event_id
    }
}

/// Entity persistence with optimistic concurrency
///
/// Implementations must make `save` atomic: the record write and the
/// outbox staging either both happen or neither does.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Load a root record
    ///
    /// # Returns
    ///
    /// `None` when no record exists for (`entity_type`, `id`)
    async fn load(&self, entity_type: &str, id: &str) -> Result<Option<EntityRecord>, RepositoryError>;

    /// Persist a root record and stage its events
    ///
    /// # Arguments
    ///
    /// * `record` - Root record including children
    /// * `expected` - Version the caller loaded
    /// * `outbox` - Events to stage in the same write, in raise order
    ///
    /// # Returns
    ///
    /// The new stored version
    ///
    /// # Errors
    ///
    /// - `Conflict` if the stored version does not match `expected`
    /// - `Unavailable` if the backing store cannot be reached
    async fn save(
        &self,
        record: &EntityRecord,
        expected: ExpectedVersion,
        outbox: Vec<OutboxEntry>,
    ) -> Result<u64, RepositoryError>;
}

/// Durable staging of events awaiting publication
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Stage events without an entity write (stateless executions)
    async fn stage(&self, entries: Vec<OutboxEntry>) -> Result<(), RepositoryError>;

    /// Unpublished entries in staging order
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, RepositoryError>;

    /// Remove entries once delivered
    async fn mark_published(&self, event_ids: &[Uuid]) -> Result<(), RepositoryError>;
}
