// Copyright (c) 2025 - Cowboy AI, Inc.

//! Port adapter implementations
//!
//! - `memory`: process-local repository, outbox, event bus and command
//!   queue. Used by tests and single-process deployments.
//! - `nats`: event publishing, command queueing and command consumption
//!   over NATS subjects.

pub mod memory;
pub mod nats;

pub use memory::{CommandReceiver, InMemoryCommandQueue, InMemoryEventPublisher, InMemoryRepository};
pub use nats::{NatsClient, NatsCommandConsumer, NatsCommandQueue, NatsConfig, NatsEventPublisher};
