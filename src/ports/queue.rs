// Copyright (c) 2025 - Cowboy AI, Inc.
//! Command queue port

use async_trait::async_trait;

use crate::envelope::CommandEnvelope;
use crate::errors::QueueError;

/// Hand-off point for deferred execution
///
/// Acceptance by the queue means the command will run later through the
/// same pipeline as `execute`; it says nothing about the outcome.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    async fn publish(&self, envelope: CommandEnvelope) -> Result<(), QueueError>;
}
