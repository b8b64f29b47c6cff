// Copyright (c) 2025 - Cowboy AI, Inc.
//! Gift Card Command Service
//!
//! Runs the command engine for a small gift-card domain behind NATS:
//! - Commands → {root}.commands.> (queue group) → Engine → state + outbox
//! - Committed events → {root}.events.gift_card.{event}
//!
//! Entity state is held in process memory; restart loses it.
//!
//! Run with: cargo run --bin gift-card-service
//!
//! Environment:
//! - NATS_URL (default: nats://localhost:4222)
//! - CIM_SUBJECT_ROOT, CIM_QUEUE_GROUP
//! - CIM_ENGINE_* engine tuning, CIM_LOG / CIM_LOG_JSON / RUST_LOG logging

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use cim_command_engine::adapters::{
    InMemoryRepository, NatsClient, NatsCommandConsumer, NatsCommandQueue, NatsConfig,
    NatsEventPublisher,
};
use cim_command_engine::entity::{target_field, EntityDefinition};
use cim_command_engine::handler::{typed_handler, HandlerError, HandlerScope};
use cim_command_engine::invariant::Invariant;
use cim_command_engine::outbox::OutboxSweeper;
use cim_command_engine::registry::{CommandDefinition, EventDefinition, HandlerRegistration};
use cim_command_engine::resolver::CreationPolicy;
use cim_command_engine::schema::{FieldSchema, Schema};
use cim_command_engine::telemetry::init_tracing;
use cim_command_engine::{
    Engine, EngineBuilder, EngineConfig, EnginePorts, ExecutionContext, TelemetryConfig,
};

#[derive(Debug, Serialize, Deserialize)]
struct GiftCard {
    card_id: String,
    #[serde(default)]
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct CardAmount {
    card_id: String,
    amount: i64,
}

fn amount_schema(name: &str) -> Schema {
    Schema::new(name)
        .field(FieldSchema::string("card_id").non_blank())
        .field(FieldSchema::integer("amount").min(1.0))
}

fn issue(
    _: &ExecutionContext,
    cmd: CardAmount,
    card: &mut GiftCard,
    scope: &mut HandlerScope<'_>,
) -> Result<(), HandlerError> {
    card.balance = cmd.amount;
    scope.raise("CardIssued", json!({"card_id": cmd.card_id, "amount": cmd.amount}))?;
    Ok(())
}

fn redeem(
    _: &ExecutionContext,
    cmd: CardAmount,
    card: &mut GiftCard,
    scope: &mut HandlerScope<'_>,
) -> Result<(), HandlerError> {
    card.balance -= cmd.amount;
    scope.raise("CardRedeemed", json!({"card_id": cmd.card_id, "amount": cmd.amount}))?;
    Ok(())
}

fn register(builder: EngineBuilder) -> EngineBuilder {
    builder
        .entity(
            EntityDefinition::new(
                "gift_card",
                Schema::new("GiftCard")
                    .field(FieldSchema::string("card_id"))
                    .field(FieldSchema::integer("balance").optional()),
            )
            .key_field("card_id")
            .invariant(Invariant::after(
                "non_negative_balance",
                "Balance must not go negative",
                |input| input.state_i64("balance").unwrap_or(0) >= 0,
            )),
        )
        .command(
            CommandDefinition::new("IssueCard", amount_schema("IssueCard"))
                .targeting(target_field("card_id")),
        )
        .command(
            CommandDefinition::new("RedeemCard", amount_schema("RedeemCard"))
                .targeting(target_field("card_id")),
        )
        .event(EventDefinition::new("CardIssued", amount_schema("CardIssued")))
        .event(EventDefinition::new("CardRedeemed", amount_schema("CardRedeemed")))
        .handler(HandlerRegistration::for_entity(
            "IssueCard",
            "gift_card",
            CreationPolicy::Always,
            typed_handler::<CardAmount, GiftCard, _>(issue),
        ))
        .handler(
            HandlerRegistration::for_entity(
                "RedeemCard",
                "gift_card",
                CreationPolicy::Never,
                typed_handler::<CardAmount, GiftCard, _>(redeem),
            )
            .invariant(
                Invariant::before("insufficient_balance", "Insufficient balance", |input| {
                    input.state_i64("balance").unwrap_or(0) >= input.payload_i64("amount").unwrap_or(0)
                })
                .for_command("RedeemCard"),
            ),
        )
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&TelemetryConfig::from_env())?;

    info!("🚀 Starting Gift Card Command Service");

    let engine_config = EngineConfig::from_env().context("Invalid CIM_ENGINE_* settings")?;
    let nats_config = NatsConfig::from_env();
    info!(servers = ?nats_config.servers, root = %nats_config.subject_root, "📋 Configuration loaded");

    let client = NatsClient::connect(&nats_config)
        .await
        .context("Failed to connect to NATS")?;
    let subjects = nats_config.subjects();

    let repository = Arc::new(InMemoryRepository::new());
    let publisher = Arc::new(NatsEventPublisher::new(client.clone(), subjects.clone()));
    let ports = EnginePorts::new(repository.clone(), repository.clone(), publisher.clone())
        .with_queue(Arc::new(NatsCommandQueue::new(client.clone(), subjects)));

    let engine = register(Engine::builder(ports))
        .config(engine_config.clone())
        .build()
        .context("Invalid command wiring")?;

    let (stop_tx, stop_rx) = watch::channel(false);

    let sweeper = OutboxSweeper::new(repository, publisher, &engine_config);
    let sweeper_task = tokio::spawn(sweeper.run(stopped(stop_rx.clone())));

    let consumer = NatsCommandConsumer::new(client, engine, &nats_config);
    let consumer_task = tokio::spawn(consumer.run(stopped(stop_rx)));

    info!("🎧 Consuming commands");
    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown")?;
    info!("Shutdown requested");
    let _ = stop_tx.send(true);

    match consumer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Command consumer failed: {}", e),
        Err(e) => error!("Command consumer panicked: {}", e),
    }
    if let Err(e) = sweeper_task.await {
        error!("Outbox sweeper panicked: {}", e);
    }

    info!("Gift Card Command Service stopped");
    Ok(())
}
