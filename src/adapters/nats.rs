// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS adapters
//!
//! Events and deferred commands travel as JSON envelopes on the subjects
//! built by [`SubjectBuilder`]:
//!
//! ```text
//! Engine::enqueue ─► NatsCommandQueue ─► {root}.commands.{command}
//!                                              │ (queue group)
//!                                              ▼
//!                                     NatsCommandConsumer ─► Engine::execute_envelope
//!                                              │
//! TransactionCoordinator ─► NatsEventPublisher ─► {root}.events.{entity}.{event}
//! ```
//!
//! When a command message carries a reply subject the consumer answers
//! with a [`CommandReply`].

use async_nats::{Client, ConnectOptions, Subscriber};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{Engine, ExecutionOutcome};
use crate::envelope::{CommandEnvelope, EventEnvelope};
use crate::errors::{EngineError, NatsError, PublishError, QueueError};
use crate::ports::{CommandQueue, EventPublisher};
use crate::subjects::SubjectBuilder;

/// Configuration for NATS connection
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URLs
    pub servers: Vec<String>,
    /// Client name
    pub name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// Root token of every subject
    pub subject_root: String,
    /// Queue group shared by command consumers
    pub queue_group: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            name: "cim-command-engine".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            subject_root: crate::subjects::DEFAULT_ROOT.to_string(),
            queue_group: "cim-command-workers".to_string(),
        }
    }
}

impl NatsConfig {
    /// Defaults overridden by `NATS_URL`, `NATS_CLIENT_NAME`,
    /// `CIM_SUBJECT_ROOT` and `CIM_QUEUE_GROUP`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(urls) = lookup("NATS_URL") {
            config.servers = urls.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(name) = lookup("NATS_CLIENT_NAME") {
            config.name = name;
        }
        if let Some(root) = lookup("CIM_SUBJECT_ROOT") {
            config.subject_root = root;
        }
        if let Some(group) = lookup("CIM_QUEUE_GROUP") {
            config.queue_group = group;
        }
        config
    }

    pub fn subjects(&self) -> SubjectBuilder {
        SubjectBuilder::new(self.subject_root.clone())
    }
}

/// NATS client wrapper speaking JSON
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect with the given configuration
    pub async fn connect(config: &NatsConfig) -> Result<Self, NatsError> {
        let connect_options = ConnectOptions::new()
            .name(&config.name)
            .connection_timeout(config.connect_timeout)
            .request_timeout(Some(config.request_timeout));

        let client = async_nats::connect_with_options(config.servers.join(","), connect_options)
            .await
            .map_err(|e| NatsError::Connection(e.to_string()))?;

        info!(servers = ?config.servers, "Connected to NATS");
        Ok(Self { client })
    }

    /// Publish a JSON message to a subject
    pub async fn publish<T>(&self, subject: &str, message: &T) -> Result<(), NatsError>
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| NatsError::Publish(e.to_string()))?;

        debug!(subject, "Published message");
        Ok(())
    }

    /// Subscribe as a member of a queue group
    pub async fn queue_subscribe(&self, subject: &str, queue_group: &str) -> Result<Subscriber, NatsError> {
        let subscriber = self
            .client
            .queue_subscribe(subject.to_string(), queue_group.to_string())
            .await
            .map_err(|e| NatsError::Subscribe(e.to_string()))?;

        info!(subject, queue_group, "Subscribed to subject");
        Ok(subscriber)
    }
}

/// Publishes committed events to `{root}.events.{entity}.{event}`
#[derive(Clone)]
pub struct NatsEventPublisher {
    client: NatsClient,
    subjects: SubjectBuilder,
}

impl NatsEventPublisher {
    pub fn new(client: NatsClient, subjects: SubjectBuilder) -> Self {
        Self { client, subjects }
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), PublishError> {
        let subject = self
            .subjects
            .event(event.entity_type.as_deref(), &event.event_type);
        self.client.publish(&subject, event).await?;
        Ok(())
    }
}

/// Enqueues commands on `{root}.commands.{command}`
#[derive(Clone)]
pub struct NatsCommandQueue {
    client: NatsClient,
    subjects: SubjectBuilder,
}

impl NatsCommandQueue {
    pub fn new(client: NatsClient, subjects: SubjectBuilder) -> Self {
        Self { client, subjects }
    }
}

#[async_trait]
impl CommandQueue for NatsCommandQueue {
    async fn publish(&self, envelope: CommandEnvelope) -> Result<(), QueueError> {
        let subject = self.subjects.command(&envelope.command_type);
        self.client.publish(&subject, &envelope).await?;
        Ok(())
    }
}

/// Answer sent to a command message's reply subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReply {
    pub message_id: Uuid,
    pub trace_id: String,
    pub committed: bool,

    /// Committed root version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    #[serde(default)]
    pub event_ids: Vec<Uuid>,

    /// Business code of a failure, if it had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandReply {
    pub fn from_result(envelope: &CommandEnvelope, result: &Result<ExecutionOutcome, EngineError>) -> Self {
        match result {
            Ok(outcome) => Self {
                message_id: envelope.message_id,
                trace_id: envelope.trace_id.clone(),
                committed: true,
                version: outcome.entity.as_ref().map(|e| e.version),
                event_ids: outcome.events.iter().map(|e| e.event_id).collect(),
                code: None,
                error: None,
            },
            Err(err) => Self {
                message_id: envelope.message_id,
                trace_id: envelope.trace_id.clone(),
                committed: false,
                version: None,
                event_ids: Vec::new(),
                code: err.code().map(str::to_string),
                error: Some(err.to_string()),
            },
        }
    }
}

/// Executes commands delivered on `{root}.commands.>`
///
/// Every consumer joins the same queue group, so each message is
/// executed by exactly one of them.
pub struct NatsCommandConsumer {
    client: NatsClient,
    engine: Engine,
    subjects: SubjectBuilder,
    queue_group: String,
}

impl NatsCommandConsumer {
    pub fn new(client: NatsClient, engine: Engine, config: &NatsConfig) -> Self {
        Self {
            client,
            engine,
            subjects: config.subjects(),
            queue_group: config.queue_group.clone(),
        }
    }

    /// Consume until `shutdown` resolves or the subscription ends
    pub async fn run<S>(self, shutdown: S) -> Result<(), NatsError>
    where
        S: Future<Output = ()>,
    {
        let subject = self.subjects.all_commands();
        let mut subscriber = self.client.queue_subscribe(&subject, &self.queue_group).await?;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(%subject, "Command consumer shutting down");
                    break;
                }
                message = subscriber.next() => match message {
                    Some(message) => {
                        let reply = message.reply.as_ref().map(|r| r.to_string());
                        self.process(&message.payload, reply).await;
                    }
                    None => {
                        warn!(%subject, "Command subscription ended");
                        break;
                    }
                },
            }
        }

        let _ = subscriber.unsubscribe().await;
        Ok(())
    }

    async fn process(&self, payload: &[u8], reply: Option<String>) {
        let envelope: CommandEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = %err, "Discarding undecodable command message");
                return;
            }
        };

        let result = self.engine.execute_envelope(envelope.clone()).await;
        if let Err(err) = &result {
            if err.is_business() {
                warn!(command = %envelope.command_type, trace_id = %envelope.trace_id, error = %err, "Deferred command refused");
            } else {
                error!(command = %envelope.command_type, trace_id = %envelope.trace_id, error = %err, "Deferred command failed");
            }
        }

        if let Some(reply) = reply {
            let answer = CommandReply::from_result(&envelope, &result);
            if let Err(err) = self.client.publish(&reply, &answer).await {
                warn!(trace_id = %envelope.trace_id, error = %err, "Failed to send command reply");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_from_lookup() {
        let config = NatsConfig::from_lookup(|key| match key {
            "NATS_URL" => Some("nats://a:4222, nats://b:4222".to_string()),
            "CIM_SUBJECT_ROOT" => Some("billing".to_string()),
            _ => None,
        });

        assert_eq!(config.servers, vec!["nats://a:4222", "nats://b:4222"]);
        assert_eq!(config.subjects().command("IssueCard"), "billing.commands.IssueCard");
        assert_eq!(config.queue_group, "cim-command-workers");
    }

    #[test]
    fn test_reply_for_failure_carries_code() {
        let envelope = CommandEnvelope::new("RedeemCard", json!({}), "t-1");
        let result: Result<ExecutionOutcome, EngineError> = Err(EngineError::Rejected {
            code: "card_frozen".to_string(),
            message: "Card is frozen".to_string(),
        });

        let reply = CommandReply::from_result(&envelope, &result);
        assert!(!reply.committed);
        assert_eq!(reply.code.as_deref(), Some("card_frozen"));
        assert_eq!(reply.message_id, envelope.message_id);

        let wire = serde_json::to_value(&reply).unwrap();
        assert_eq!(wire["traceId"], "t-1");
        assert!(wire.get("version").is_none());
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_nats_connection() {
        let client = NatsClient::connect(&NatsConfig::default()).await;
        assert!(client.is_ok());
    }
}
