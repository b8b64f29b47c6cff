// Copyright (c) 2025 - Cowboy AI, Inc.
//! Ports
//!
//! Narrow interfaces the engine calls. Infrastructure supplies the
//! implementations once at boot and shares them across concurrent
//! executions, so every port is `Send + Sync`.
//!
//! ```text
//! Engine ──► EntityRepository  (load / save + outbox, optimistic versions)
//!        ──► OutboxStore       (stateless staging, sweeper reads)
//!        ──► EventPublisher    (after commit, raise order)
//!        ──► CommandQueue      (enqueue path)
//! ```

pub mod publisher;
pub mod queue;
pub mod repository;

pub use publisher::EventPublisher;
pub use queue::CommandQueue;
pub use repository::{EntityRepository, ExpectedVersion, OutboxEntry, OutboxStore};
