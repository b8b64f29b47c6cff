// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event publisher port

use async_trait::async_trait;

use crate::envelope::EventEnvelope;
use crate::errors::PublishError;

/// Outbound delivery of committed events
///
/// Called only after the entity write succeeded, once per event, in raise
/// order. A failure is never surfaced to the handler: the event stays in
/// the outbox for the sweeper.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), PublishError>;
}
