// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Transactional Execution
//!
//! Random issue/redeem sequences are run against one card and compared to
//! a trivial balance model. Every failed execution must leave the stored
//! record and the event stream exactly as they were.

use proptest::prelude::*;

use cim_command_engine::errors::EngineError;

use crate::fixtures::{issue, redeem, Harness, CARD_ID};

#[derive(Debug, Clone)]
enum Op {
    Issue(i64),
    Redeem(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => (1i64..500).prop_map(Op::Issue),
        3 => (1i64..300).prop_map(Op::Redeem),
    ]
}

/// Expected outcome under the balance model
fn expected(balance: Option<i64>, op: &Op) -> Result<i64, &'static str> {
    match (balance, op) {
        (None, Op::Issue(amount)) => Ok(*amount),
        (Some(_), Op::Issue(_)) => Err("creation_conflict"),
        (None, Op::Redeem(_)) => Err("entity_not_found"),
        (Some(balance), Op::Redeem(amount)) if *amount > balance => Err("insufficient_balance"),
        (Some(balance), Op::Redeem(amount)) => Ok(balance - amount),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: failures change nothing, successes write once and publish once
    #[test]
    fn prop_failed_executions_leave_no_trace(ops in prop::collection::vec(op_strategy(), 1..20)) {
        runtime().block_on(async {
            let harness = Harness::new();
            let engine = harness.engine();
            let mut model: Option<i64> = None;

            for op in &ops {
                let before_record = harness.repository.record("gift_card", CARD_ID);
                let before_events = harness.publisher.published().len();

                let result = match op {
                    Op::Issue(amount) => engine.execute("IssueCard", issue(CARD_ID, *amount)).await,
                    Op::Redeem(amount) => engine.execute("RedeemCard", redeem(CARD_ID, *amount)).await,
                };

                match (expected(model, op), result) {
                    (Ok(balance), Ok(outcome)) => {
                        model = Some(balance);
                        let version = before_record.map_or(0, |r| r.version) + 1;
                        prop_assert_eq!(outcome.entity.map(|e| e.version), Some(version));
                        prop_assert_eq!(harness.publisher.published().len(), before_events + 1);
                    }
                    (Err(code), Err(err)) => {
                        prop_assert!(err.is_business(), "unexpected failure: {}", err);
                        prop_assert_eq!(err.code(), Some(code));
                        prop_assert_eq!(harness.repository.record("gift_card", CARD_ID), before_record);
                        prop_assert_eq!(harness.publisher.published().len(), before_events);
                    }
                    (want, got) => {
                        let got = got.map(|_| ()).map_err(|e: EngineError| e.to_string());
                        prop_assert!(false, "model expected {:?}, engine returned {:?}", want, got);
                    }
                }

                let stored = harness.card(CARD_ID).map(|c| c.balance);
                prop_assert_eq!(stored, model);
                prop_assert!(stored.unwrap_or(0) >= 0);
            }
            Ok(())
        })?;
    }

    /// Property: published events follow commits, in commit order
    #[test]
    fn prop_published_events_match_commits(amounts in prop::collection::vec(1i64..50, 1..10)) {
        runtime().block_on(async {
            let harness = Harness::new();
            let engine = harness.engine();
            engine.execute("IssueCard", issue(CARD_ID, 1_000)).await.unwrap();

            for amount in &amounts {
                engine.execute("RedeemCard", redeem(CARD_ID, *amount)).await.unwrap();
            }

            let redeemed: Vec<i64> = harness
                .publisher
                .published()
                .iter()
                .filter(|e| e.event_type == "CardRedeemed")
                .filter_map(|e| e.payload["amount"].as_i64())
                .collect();
            prop_assert_eq!(&redeemed, &amounts);
            prop_assert_eq!(
                harness.card(CARD_ID).unwrap().balance,
                1_000 - amounts.iter().sum::<i64>()
            );
            Ok(())
        })?;
    }
}
