// Copyright (c) 2025 - Cowboy AI, Inc.
//! Inbound event delivery
//!
//! Multi-entity workflows are chains of single-entity transactions: an
//! [`EventHandler`] reacts to a committed event and issues follow-up
//! commands through the [`Engine`], usually with
//! [`Engine::execute_caused_by`] so the trace continues and the event is
//! recorded as the cause.
//!
//! ```text
//! CardRedeemed ─► EventRouter ─► LoyaltyHandler ─► engine.execute_caused_by("AwardPoints", ..)
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Engine;
use crate::envelope::EventEnvelope;
use crate::errors::EngineError;

/// Error types for event handling
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Follow-up command failed: {0}")]
    Command(#[from] EngineError),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Handler error: {0}")]
    Handler(String),
}

/// Reacts to committed events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a received event
    async fn handle(&self, engine: &Engine, event: &EventEnvelope) -> Result<(), SubscribeError>;

    /// Handle error during event processing
    async fn handle_error(&self, event: &EventEnvelope, error: SubscribeError) {
        error!(
            event_type = %event.event_type,
            event_id = %event.event_id,
            trace_id = %event.trace_id,
            error = %error,
            "Event handler error"
        );
    }
}

/// Function-based event handler
pub struct FnEventHandler<F> {
    handler: F,
}

impl<F, Fut> FnEventHandler<F>
where
    F: Fn(Engine, EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SubscribeError>> + Send,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(Engine, EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SubscribeError>> + Send,
{
    async fn handle(&self, engine: &Engine, event: &EventEnvelope) -> Result<(), SubscribeError> {
        (self.handler)(engine.clone(), event.clone()).await
    }
}

/// Routes events by type to their handlers
#[derive(Clone)]
pub struct EventRouter {
    engine: Engine,
    routes: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl EventRouter {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            routes: HashMap::new(),
        }
    }

    /// Register a handler for one event type
    pub fn route(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.routes.entry(event_type.into()).or_default().push(handler);
        self
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    /// Deliver one event to every handler routed for its type
    ///
    /// Handlers run in registration order; a failing handler does not stop
    /// the others. Returns the number of handlers that succeeded.
    pub async fn dispatch(&self, event: &EventEnvelope) -> usize {
        let Some(handlers) = self.routes.get(&event.event_type) else {
            debug!(event_type = %event.event_type, "No route for event");
            return 0;
        };

        let mut succeeded = 0;
        for handler in handlers {
            match handler.handle(&self.engine, event).await {
                Ok(()) => succeeded += 1,
                Err(err) => handler.handle_error(event, err).await,
            }
        }
        succeeded
    }

    /// Dispatch everything from a broadcast bus until it closes or
    /// `shutdown` resolves
    pub async fn pump<S>(self, mut events: broadcast::Receiver<EventEnvelope>, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(routes = self.routes.len(), "Event router started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        self.dispatch(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event router lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!("Event router stopped");
    }
}
