// Copyright (c) 2025 - Cowboy AI, Inc.
//! Invariant ordering and concurrent execution tests
//!
//! Concurrent redemptions are forced to overlap with a barrier inside an
//! asynchronous before-check, so both executions load the same version
//! before either saves.

mod fixtures;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

use cim_command_engine::config::EngineConfig;
use cim_command_engine::entity::{target_field, EntityDefinition};
use cim_command_engine::errors::EngineError;
use cim_command_engine::handler::fn_handler;
use cim_command_engine::invariant::{Invariant, InvariantCheck, InvariantInput, Timing};
use cim_command_engine::registry::{CommandDefinition, EventDefinition, HandlerRegistration};
use cim_command_engine::resolver::CreationPolicy;
use cim_command_engine::schema::{FieldSchema, Schema};
use cim_command_engine::Engine;

use fixtures::{gift_card_domain, issue, redeem, Harness, CARD_ID};

/// Waits at the barrier on the first attempt only
struct Rendezvous(Arc<Barrier>);

#[async_trait]
impl InvariantCheck for Rendezvous {
    async fn check(&self, input: InvariantInput<'_>) -> anyhow::Result<bool> {
        if input.context.attempt == 1 {
            self.0.wait().await;
        }
        Ok(true)
    }
}

fn racing_engine(harness: &Harness, config: EngineConfig, barrier: Arc<Barrier>) -> Engine {
    gift_card_domain(Engine::builder(harness.ports()))
        .command(
            CommandDefinition::new(
                "RacingRedeem",
                Schema::new("RacingRedeem")
                    .field(FieldSchema::string("card_id"))
                    .field(FieldSchema::integer("amount")),
            )
            .targeting(target_field("card_id")),
        )
        .handler(
            HandlerRegistration::for_entity(
                "RacingRedeem",
                "gift_card",
                CreationPolicy::Never,
                fn_handler(|_, command, scope| {
                    let amount = command.get("amount").and_then(|a| a.as_i64()).unwrap_or(0);
                    if let Some(card) = scope.entity() {
                        let balance = card["balance"].as_i64().unwrap_or(0);
                        card["balance"] = json!(balance - amount);
                    }
                    scope.raise("CardRedeemed", json!({"card_id": CARD_ID, "amount": amount}))?;
                    Ok(())
                }),
            )
            .invariant(
                Invariant::before("insufficient_balance", "Insufficient balance", |input| {
                    input.state_i64("balance").unwrap_or(0) >= input.payload_i64("amount").unwrap_or(0)
                })
                .for_command("RacingRedeem"),
            )
            .invariant(
                Invariant::with_check("rendezvous", "Rendezvous", Timing::Before, Rendezvous(barrier))
                    .for_command("RacingRedeem"),
            ),
        )
        .config(config)
        .build()
        .unwrap()
}

/// Scenario: two concurrent redemptions of 60 against balance 100
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_redemptions_never_overdraw() {
    let harness = Harness::new();
    let engine = racing_engine(&harness, EngineConfig::default(), Arc::new(Barrier::new(2)));
    engine.execute("IssueCard", issue(CARD_ID, 100)).await.unwrap();

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.execute("RacingRedeem", redeem(CARD_ID, 60)).await }
    });
    let second = tokio::spawn({
        let engine = engine.clone();
        async move { engine.execute("RacingRedeem", redeem(CARD_ID, 60)).await }
    });
    let results = vec![first.await.unwrap(), second.await.unwrap()];

    let committed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let failed: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(committed.len(), 1);
    assert_eq!(failed.len(), 1);

    // The loser conflicted, reloaded balance 40 and failed its before-check
    assert_eq!(failed[0].code(), Some("insufficient_balance"));
    assert_eq!(harness.card(CARD_ID).unwrap().balance, 40);
    assert_eq!(harness.published_types(), vec!["CardIssued", "CardRedeemed"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conflict_without_retries_is_retryable_error() {
    let harness = Harness::new();
    let config = EngineConfig {
        max_conflict_retries: 0,
        ..EngineConfig::default()
    };
    let engine = racing_engine(&harness, config, Arc::new(Barrier::new(2)));
    engine.execute("IssueCard", issue(CARD_ID, 100)).await.unwrap();

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.execute("RacingRedeem", redeem(CARD_ID, 10)).await }
    });
    let second = tokio::spawn({
        let engine = engine.clone();
        async move { engine.execute("RacingRedeem", redeem(CARD_ID, 10)).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let conflict = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one execution conflicts");
    assert!(matches!(
        conflict,
        EngineError::ConcurrencyConflict { attempts: 1, .. }
    ));
    assert!(conflict.is_retryable());
    assert_eq!(harness.card(CARD_ID).unwrap().balance, 90);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conflict_retry_succeeds_when_state_allows() {
    let harness = Harness::new();
    let engine = racing_engine(&harness, EngineConfig::default(), Arc::new(Barrier::new(2)));
    engine.execute("IssueCard", issue(CARD_ID, 100)).await.unwrap();

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.execute("RacingRedeem", redeem(CARD_ID, 30)).await }
    });
    let second = tokio::spawn({
        let engine = engine.clone();
        async move { engine.execute("RacingRedeem", redeem(CARD_ID, 30)).await }
    });
    let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

    let mut attempts: Vec<u32> = outcomes.iter().map(|o| o.context.attempt).collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(harness.card(CARD_ID).unwrap().balance, 40);
    assert_eq!(harness.repository.record("gift_card", CARD_ID).unwrap().version, 3);
}

/// Engine whose single command records the order invariants run in
fn ordering_engine(harness: &Harness, log: Arc<Mutex<Vec<String>>>, fail: Option<&'static str>) -> Engine {
    let rule = |code: &'static str, timing: Timing| {
        let log = log.clone();
        let check = move |_: &InvariantInput<'_>| {
            log.lock().unwrap().push(code.to_string());
            fail != Some(code)
        };
        match timing {
            Timing::Before => Invariant::before(code, code, check),
            Timing::After => Invariant::after(code, code, check),
        }
    };

    let handler_log = log.clone();
    Engine::builder(harness.ports())
        .entity(
            EntityDefinition::new("ledger", Schema::new("Ledger"))
                .invariant(rule("entity_before", Timing::Before))
                .invariant(rule("entity_after", Timing::After))
                .invariant(rule("event_after", Timing::After).for_event("Posted")),
        )
        .command(
            CommandDefinition::new("Post", Schema::new("Post").field(FieldSchema::string("id")))
                .targeting(target_field("id")),
        )
        .event(EventDefinition::new("Posted", Schema::new("Posted")))
        .handler(
            HandlerRegistration::for_entity(
                "Post",
                "ledger",
                CreationPolicy::IfMissing,
                fn_handler(move |_, _, scope| {
                    handler_log.lock().unwrap().push("handler".to_string());
                    scope.raise("Posted", json!({}))?;
                    scope.raise("Posted", json!({}))?;
                    Ok(())
                }),
            )
            .invariant(rule("command_before", Timing::Before).for_command("Post"))
            .invariant(rule("command_after", Timing::After).for_command("Post")),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_invariant_ordering() {
    let harness = Harness::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = ordering_engine(&harness, log.clone(), None);

    engine.execute("Post", json!({"id": "l-1"})).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "entity_before",
            "command_before",
            "handler",
            "command_after",
            "event_after",
            "event_after",
            "entity_after",
        ]
    );
}

#[tokio::test]
async fn test_invariants_fail_fast() {
    let harness = Harness::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = ordering_engine(&harness, log.clone(), Some("entity_before"));

    let err = engine.execute("Post", json!({"id": "l-1"})).await.unwrap_err();

    assert_eq!(err.code(), Some("entity_before"));
    assert_eq!(*log.lock().unwrap(), vec!["entity_before"]);
    assert_eq!(harness.repository.record_count(), 0);
}

#[tokio::test]
async fn test_after_violation_rolls_back_everything() {
    let harness = Harness::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = ordering_engine(&harness, log.clone(), Some("command_after"));

    let err = engine.execute("Post", json!({"id": "l-1"})).await.unwrap_err();

    let EngineError::InvariantViolation(violation) = err else {
        panic!("expected invariant violation");
    };
    assert_eq!(violation.timing, Timing::After);
    assert_eq!(harness.repository.record_count(), 0);
    assert_eq!(harness.repository.pending_count(), 0);
    assert!(harness.publisher.published().is_empty());
}

#[test]
fn test_backoff_is_linear() {
    let config = EngineConfig::default();
    assert_eq!(config.backoff_for(1), Duration::from_millis(10));
    assert_eq!(config.backoff_for(3), Duration::from_millis(30));
}
