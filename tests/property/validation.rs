// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Schema Validation
//!
//! Validation is a pure function of payload and schema: the same payload
//! always yields the same verdict and the same violations, and a rejected
//! command never reaches the repository.

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use cim_command_engine::schema::{FieldSchema, FieldType, Schema};

use crate::fixtures::Harness;

fn order_schema() -> Schema {
    Schema::new("PlaceOrder")
        .field(FieldSchema::string("order_id").non_blank())
        .field(FieldSchema::integer("quantity").min(1.0).max(100.0))
        .field(FieldSchema::string("channel").one_of(["web", "store"]).optional())
        .field(FieldSchema::array("tags", FieldType::String).optional())
        .field(
            FieldSchema::object(
                "shipping",
                Schema::new("Shipping")
                    .field(FieldSchema::string("country").min_length(2).max_length(2)),
            )
            .optional(),
        )
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-50i64..150).prop_map(|n| json!(n)),
        "[a-z]{0,4}".prop_map(Value::String),
        Just(json!("web")),
    ]
}

fn field_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => scalar(),
        1 => prop::collection::vec(scalar(), 0..3).prop_map(Value::Array),
        1 => "[A-Z]{0,3}".prop_map(|country| json!({"country": country})),
    ]
}

/// Objects over the schema's field names plus a stray one
fn payload() -> impl Strategy<Value = Value> {
    let names = prop::sample::select(vec!["order_id", "quantity", "channel", "tags", "shipping", "note"]);
    prop::collection::vec((names, field_value()), 0..6).prop_map(|pairs| {
        let mut object = Map::new();
        for (name, value) in pairs {
            object.insert(name.to_string(), value);
        }
        Value::Object(object)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: validating twice gives identical results
    #[test]
    fn prop_validation_is_idempotent(payload in payload()) {
        let schema = order_schema();
        prop_assert_eq!(schema.validate(&payload), schema.validate(&payload));
    }

    /// Property: an accepted payload carries exactly the input
    #[test]
    fn prop_accepted_payload_is_unchanged(payload in payload()) {
        if let Ok(validated) = order_schema().validate(&payload) {
            prop_assert_eq!(validated.value(), &payload);
        }
    }

    /// Property: every reported violation names a declared or nested path
    #[test]
    fn prop_violations_point_at_fields(payload in payload()) {
        if let Err(err) = order_schema().validate(&payload) {
            prop_assert!(!err.violations.is_empty());
            for violation in &err.violations {
                let head = violation.path.split(['.', '[']).next().unwrap_or_default();
                prop_assert!(
                    ["order_id", "quantity", "channel", "tags", "shipping"].contains(&head),
                    "unexpected path {}",
                    violation.path
                );
            }
        }
    }

    /// Property: invalid commands never open a transaction
    #[test]
    fn prop_rejected_commands_write_nothing(amount in prop::option::of(-5i64..5)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let harness = Harness::new();
            let engine = harness.engine();
            let mut payload = json!({"card_id": "card-prop"});
            if let Some(amount) = amount {
                payload["amount"] = json!(amount);
            }

            let accepted = engine.execute("IssueCard", payload).await.is_ok();
            prop_assert_eq!(accepted, matches!(amount, Some(a) if a >= 1));
            prop_assert_eq!(harness.repository.record_count(), usize::from(accepted));
            Ok(())
        })?;
    }
}
