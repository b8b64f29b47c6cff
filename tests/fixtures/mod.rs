// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for cim-command-engine
//!
//! A small gift-card domain plus an order/order-line pair for child
//! entities. Every integration test wires its engine through [`Harness`],
//! so adapters are always in-memory and inspectable.
//!
//! # Commands
//! - `IssueCard` (always): creates a card with an opening balance
//! - `RedeemCard` (never): guarded by `insufficient_balance` (before) and
//!   the entity rule `non_negative_balance` (after)
//! - `FreezeCard` (never): rejects a second freeze from the handler
//! - `AwardPoints` (if_missing): loyalty account keyed by card id
//! - `Ping` (stateless)
//! - `CreateOrder` (always) / `AddOrderLine` (always, child of order)

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use cim_command_engine::adapters::{InMemoryCommandQueue, InMemoryEventPublisher, InMemoryRepository};
use cim_command_engine::config::EngineConfig;
use cim_command_engine::entity::{child_target_fields, target_field, EntityDefinition};
use cim_command_engine::handler::{fn_handler, typed_handler, HandlerError, HandlerScope};
use cim_command_engine::invariant::Invariant;
use cim_command_engine::registry::{CommandDefinition, EventDefinition, HandlerRegistration};
use cim_command_engine::resolver::CreationPolicy;
use cim_command_engine::schema::{FieldSchema, FieldType, Schema};
use cim_command_engine::{Engine, EngineBuilder, EnginePorts, ExecutionContext};

pub const CARD_ID: &str = "card-0001";
pub const OTHER_CARD_ID: &str = "card-0002";
pub const ORDER_ID: &str = "order-0001";
pub const TRACE_ID: &str = "trace-fixture-0001";

/// Typed gift card state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftCard {
    pub card_id: String,
    #[serde(default)]
    pub balance: i64,
    #[serde(default)]
    pub frozen: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueCard {
    pub card_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemCard {
    pub card_id: String,
    pub amount: i64,
}

/// In-memory adapters shared with the engine under test
pub struct Harness {
    pub repository: Arc<InMemoryRepository>,
    pub publisher: Arc<InMemoryEventPublisher>,
    pub queue: InMemoryCommandQueue,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    /// Harness whose queue is sized from `config`
    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            repository: Arc::new(InMemoryRepository::new()),
            publisher: Arc::new(InMemoryEventPublisher::new()),
            queue: InMemoryCommandQueue::from_config(config),
        }
    }

    pub fn ports(&self) -> EnginePorts {
        EnginePorts::new(
            self.repository.clone(),
            self.repository.clone(),
            self.publisher.clone(),
        )
        .with_queue(Arc::new(self.queue.clone()))
    }

    /// Builder with the full gift-card domain registered
    pub fn gift_cards(&self) -> EngineBuilder {
        gift_card_domain(Engine::builder(self.ports()))
    }

    pub fn engine(&self) -> Engine {
        self.gift_cards()
            .build()
            .expect("gift card domain should wire")
    }

    pub fn engine_with(&self, config: EngineConfig) -> Engine {
        self.gift_cards()
            .config(config)
            .build()
            .expect("gift card domain should wire")
    }

    /// Stored card state, bypassing the engine
    pub fn card(&self, id: &str) -> Option<GiftCard> {
        self.repository
            .record("gift_card", id)
            .map(|record| serde_json::from_value(record.state).expect("stored card decodes"))
    }

    pub fn published_types(&self) -> Vec<String> {
        self.publisher
            .published()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

pub fn gift_card_entity() -> EntityDefinition {
    EntityDefinition::new(
        "gift_card",
        Schema::new("GiftCard")
            .field(FieldSchema::string("card_id").non_blank())
            .field(FieldSchema::integer("balance").optional())
            .field(FieldSchema::boolean("frozen").optional()),
    )
    .key_field("card_id")
    .invariant(Invariant::after(
        "non_negative_balance",
        "Balance must not go negative",
        |input| input.state_i64("balance").unwrap_or(0) >= 0,
    ))
}

fn card_command(name: &str) -> CommandDefinition {
    CommandDefinition::new(
        name,
        Schema::new(name)
            .field(FieldSchema::string("card_id").non_blank())
            .field(FieldSchema::integer("amount").min(1.0)),
    )
    .targeting(target_field("card_id"))
}

fn card_event(name: &str) -> EventDefinition {
    EventDefinition::new(
        name,
        Schema::new(name)
            .field(FieldSchema::string("card_id"))
            .field(FieldSchema::integer("amount")),
    )
}

/// Register the whole fixture domain on a builder
pub fn gift_card_domain(builder: EngineBuilder) -> EngineBuilder {
    builder
        .entity(gift_card_entity())
        .entity(
            EntityDefinition::new(
                "loyalty_account",
                Schema::new("LoyaltyAccount")
                    .field(FieldSchema::string("card_id"))
                    .field(FieldSchema::integer("points").optional()),
            )
            .key_field("card_id"),
        )
        .entity(
            EntityDefinition::new(
                "order",
                Schema::new("Order")
                    .field(FieldSchema::string("order_id"))
                    .field(FieldSchema::string("customer").optional()),
            )
            .key_field("order_id"),
        )
        .entity(
            EntityDefinition::new(
                "order_line",
                Schema::new("OrderLine")
                    .field(FieldSchema::string("line_id"))
                    .field(FieldSchema::string("sku").optional())
                    .field(FieldSchema::integer("quantity").optional().min(1.0)),
            )
            .key_field("line_id")
            .child_of("order"),
        )
        .command(card_command("IssueCard"))
        .command(card_command("RedeemCard"))
        .command(
            CommandDefinition::new(
                "FreezeCard",
                Schema::new("FreezeCard").field(FieldSchema::string("card_id")),
            )
            .targeting(target_field("card_id")),
        )
        .command(
            CommandDefinition::new(
                "AwardPoints",
                Schema::new("AwardPoints")
                    .field(FieldSchema::string("card_id"))
                    .field(FieldSchema::integer("points").min(0.0)),
            )
            .targeting(target_field("card_id")),
        )
        .command(CommandDefinition::new(
            "Ping",
            Schema::new("Ping").field(FieldSchema::string("note").optional()),
        ))
        .command(
            CommandDefinition::new(
                "CreateOrder",
                Schema::new("CreateOrder")
                    .field(FieldSchema::string("order_id"))
                    .field(FieldSchema::string("customer")),
            )
            .targeting(target_field("order_id")),
        )
        .command(
            CommandDefinition::new(
                "AddOrderLine",
                Schema::new("AddOrderLine")
                    .field(FieldSchema::string("order_id"))
                    .field(FieldSchema::string("line_id"))
                    .field(FieldSchema::string("sku"))
                    .field(FieldSchema::integer("quantity").min(1.0)),
            )
            .targeting(child_target_fields("order_id", "line_id")),
        )
        .event(card_event("CardIssued"))
        .event(card_event("CardRedeemed"))
        .event(EventDefinition::new(
            "CardFrozen",
            Schema::new("CardFrozen").field(FieldSchema::string("card_id")),
        ))
        .event(EventDefinition::new(
            "PointsAwarded",
            Schema::new("PointsAwarded")
                .field(FieldSchema::string("card_id"))
                .field(FieldSchema::integer("points")),
        ))
        .event(EventDefinition::new(
            "Ponged",
            Schema::new("Ponged").field(FieldSchema::any("note").optional()),
        ))
        .event(EventDefinition::new(
            "OrderCreated",
            Schema::new("OrderCreated").field(FieldSchema::string("order_id")),
        ))
        .event(EventDefinition::new(
            "OrderLineAdded",
            Schema::new("OrderLineAdded")
                .field(FieldSchema::string("order_id"))
                .field(FieldSchema::string("line_id"))
                .field(FieldSchema::array("skus", FieldType::String).optional()),
        ))
        .handler(HandlerRegistration::for_entity(
            "IssueCard",
            "gift_card",
            CreationPolicy::Always,
            typed_handler::<IssueCard, GiftCard, _>(issue_card),
        ))
        .handler(
            HandlerRegistration::for_entity(
                "RedeemCard",
                "gift_card",
                CreationPolicy::Never,
                typed_handler::<RedeemCard, GiftCard, _>(redeem_card),
            )
            .invariant(
                Invariant::before("insufficient_balance", "Insufficient balance", |input| {
                    input.state_i64("balance").unwrap_or(0) >= input.payload_i64("amount").unwrap_or(0)
                })
                .for_command("RedeemCard"),
            ),
        )
        .handler(HandlerRegistration::for_entity(
            "FreezeCard",
            "gift_card",
            CreationPolicy::Never,
            fn_handler(freeze_card),
        ))
        .handler(HandlerRegistration::for_entity(
            "AwardPoints",
            "loyalty_account",
            CreationPolicy::IfMissing,
            fn_handler(award_points),
        ))
        .handler(HandlerRegistration::stateless(
            "Ping",
            fn_handler(|_, command, scope| {
                scope.raise("Ponged", json!({"note": command.get("note").cloned()}))?;
                Ok(())
            }),
        ))
        .handler(HandlerRegistration::for_entity(
            "CreateOrder",
            "order",
            CreationPolicy::Always,
            fn_handler(|_, command, scope| {
                let order_id = command.get("order_id").cloned().unwrap_or(Value::Null);
                if let Some(order) = scope.entity() {
                    order["customer"] = command.get("customer").cloned().unwrap_or(Value::Null);
                }
                scope.raise("OrderCreated", json!({"order_id": order_id}))?;
                Ok(())
            }),
        ))
        .handler(HandlerRegistration::for_entity(
            "AddOrderLine",
            "order_line",
            CreationPolicy::Always,
            fn_handler(|_, command, scope| {
                if let Some(line) = scope.entity() {
                    line["sku"] = command.get("sku").cloned().unwrap_or(Value::Null);
                    line["quantity"] = command.get("quantity").cloned().unwrap_or(Value::Null);
                }
                scope.raise(
                    "OrderLineAdded",
                    json!({
                        "order_id": command.get("order_id"),
                        "line_id": command.get("line_id"),
                    }),
                )?;
                Ok(())
            }),
        ))
}

fn issue_card(
    _ctx: &ExecutionContext,
    command: IssueCard,
    card: &mut GiftCard,
    scope: &mut HandlerScope<'_>,
) -> Result<(), HandlerError> {
    card.balance = command.amount;
    scope.raise(
        "CardIssued",
        json!({"card_id": command.card_id, "amount": command.amount}),
    )?;
    Ok(())
}

fn redeem_card(
    _ctx: &ExecutionContext,
    command: RedeemCard,
    card: &mut GiftCard,
    scope: &mut HandlerScope<'_>,
) -> Result<(), HandlerError> {
    if card.frozen {
        return Err(HandlerError::rejected("card_frozen", "Card is frozen"));
    }
    card.balance -= command.amount;
    scope.raise(
        "CardRedeemed",
        json!({"card_id": command.card_id, "amount": command.amount}),
    )?;
    Ok(())
}

fn freeze_card(
    _ctx: &ExecutionContext,
    command: &cim_command_engine::schema::ValidatedPayload,
    scope: &mut HandlerScope<'_>,
) -> Result<(), HandlerError> {
    let Some(card) = scope.entity() else {
        return Err(HandlerError::rejected("no_card", "FreezeCard needs a card"));
    };
    if card["frozen"] == json!(true) {
        return Err(HandlerError::rejected("already_frozen", "Card is already frozen"));
    }
    card["frozen"] = json!(true);
    scope.raise("CardFrozen", json!({"card_id": command.get("card_id")}))?;
    Ok(())
}

fn award_points(
    _ctx: &ExecutionContext,
    command: &cim_command_engine::schema::ValidatedPayload,
    scope: &mut HandlerScope<'_>,
) -> Result<(), HandlerError> {
    let points = command.get("points").and_then(Value::as_i64).unwrap_or(0);
    if let Some(account) = scope.entity() {
        let total = account["points"].as_i64().unwrap_or(0) + points;
        account["points"] = json!(total);
    }
    scope.raise(
        "PointsAwarded",
        json!({"card_id": command.get("card_id"), "points": points}),
    )?;
    Ok(())
}

pub fn issue(card_id: &str, amount: i64) -> Value {
    json!({"card_id": card_id, "amount": amount})
}

pub fn redeem(card_id: &str, amount: i64) -> Value {
    json!({"card_id": card_id, "amount": amount})
}
