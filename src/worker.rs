// Copyright (c) 2025 - Cowboy AI, Inc.
//! Deferred execution worker
//!
//! Drains an [`InMemoryCommandQueue`](crate::adapters::InMemoryCommandQueue)
//! and runs every dequeued envelope through the same pipeline as an
//! immediate `execute`. Nobody awaits a deferred command, so failures are
//! logged with their trace id instead of being returned.

use std::future::Future;
use tracing::{error, info, warn};

use crate::adapters::CommandReceiver;
use crate::dispatcher::{Engine, ExecutionOutcome};
use crate::envelope::CommandEnvelope;
use crate::errors::EngineError;

/// Result of processing one dequeued command
#[derive(Debug)]
pub struct Processed {
    pub envelope: CommandEnvelope,
    pub result: Result<ExecutionOutcome, EngineError>,
}

pub struct CommandWorker {
    engine: Engine,
    receiver: CommandReceiver,
}

impl CommandWorker {
    pub fn new(engine: Engine, receiver: CommandReceiver) -> Self {
        Self { engine, receiver }
    }

    /// Execute the next queued command if one is ready
    pub async fn process_next(&self) -> Option<Processed> {
        let envelope = self.receiver.try_recv()?;
        Some(self.process(envelope).await)
    }

    /// Wait for the next command and execute it; `None` once the queue is
    /// closed and drained
    pub async fn process_wait(&self) -> Option<Processed> {
        let envelope = self.receiver.recv().await?;
        Some(self.process(envelope).await)
    }

    /// Process until the queue closes or `shutdown` resolves
    ///
    /// Returns the number of commands processed. A command already
    /// executing when shutdown fires runs to completion.
    pub async fn run<S>(self, shutdown: S) -> usize
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut processed = 0;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = self.receiver.recv() => match next {
                    Some(envelope) => {
                        self.process(envelope).await;
                        processed += 1;
                    }
                    None => break,
                },
            }
        }

        info!(processed, "Command worker stopped");
        processed
    }

    async fn process(&self, envelope: CommandEnvelope) -> Processed {
        let result = self.engine.execute_envelope(envelope.clone()).await;

        if let Err(err) = &result {
            if err.is_business() {
                warn!(
                    command = %envelope.command_type,
                    trace_id = %envelope.trace_id,
                    message_id = %envelope.message_id,
                    code = err.code().unwrap_or_default(),
                    error = %err,
                    "Deferred command refused"
                );
            } else {
                error!(
                    command = %envelope.command_type,
                    trace_id = %envelope.trace_id,
                    message_id = %envelope.message_id,
                    error = %err,
                    "Deferred command failed"
                );
            }
        }

        Processed { envelope, result }
    }
}
