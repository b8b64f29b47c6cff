// Copyright (c) 2025 - Cowboy AI, Inc.
//! Outbox sweeper
//!
//! Re-delivers events whose publication was deferred at commit time. Entries
//! are read in staging order and published one by one; the sweep stops at
//! the first failure so a later event never overtakes an earlier one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::errors::RepositoryError;
use crate::ports::{EventPublisher, OutboxStore};

#[derive(Clone)]
pub struct OutboxSweeper {
    outbox: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: usize,
    interval: Duration,
}

impl OutboxSweeper {
    pub fn new(outbox: Arc<dyn OutboxStore>, publisher: Arc<dyn EventPublisher>, config: &EngineConfig) -> Self {
        Self {
            outbox,
            publisher,
            batch_size: config.outbox_batch_size,
            interval: config.outbox_sweep_interval,
        }
    }

    /// Publish one batch of pending entries
    ///
    /// Returns how many were delivered and marked published.
    pub async fn sweep_once(&self) -> Result<usize, RepositoryError> {
        let pending = self.outbox.pending(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut delivered: Vec<Uuid> = Vec::with_capacity(pending.len());
        for entry in &pending {
            match self.publisher.publish(&entry.event).await {
                Ok(()) => delivered.push(entry.event_id()),
                Err(err) => {
                    warn!(
                        event_type = %entry.event.event_type,
                        event_id = %entry.event_id(),
                        trace_id = %entry.event.trace_id,
                        error = %err,
                        "Outbox sweep stopped at undeliverable event"
                    );
                    break;
                }
            }
        }

        if !delivered.is_empty() {
            self.outbox.mark_published(&delivered).await?;
        }
        debug!(delivered = delivered.len(), pending = pending.len(), "Outbox sweep");
        Ok(delivered.len())
    }

    /// Sweep every interval until `shutdown` resolves
    pub async fn run<S>(self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        warn!(error = %err, "Outbox sweep failed");
                    }
                }
            }
        }
        info!("Outbox sweeper stopped");
    }
}
