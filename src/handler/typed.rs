// Copyright (c) 2025 - Cowboy AI, Inc.
//! Typed handler adapter
//!
//! Decodes the validated command into `C` and the entity state into `S`,
//! runs the closure, then writes `S` back into the scope. `S` must decode
//! from blank state (`{ <key_field>: id }`), so its other fields usually
//! carry `#[serde(default)]`.

use anyhow::anyhow;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{CommandHandler, HandlerError, HandlerScope};
use crate::context::ExecutionContext;
use crate::schema::ValidatedPayload;

struct TypedHandler<C, S, F> {
    f: F,
    _types: PhantomData<fn() -> (C, S)>,
}

#[async_trait]
impl<C, S, F> CommandHandler for TypedHandler<C, S, F>
where
    C: DeserializeOwned + Send + 'static,
    S: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(&ExecutionContext, C, &mut S, &mut HandlerScope<'_>) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(
        &self,
        context: &ExecutionContext,
        command: &ValidatedPayload,
        mut scope: HandlerScope<'_>,
    ) -> Result<(), HandlerError> {
        let command: C = command.to_typed()?;
        let current = scope
            .state()
            .cloned()
            .ok_or_else(|| anyhow!("typed handler for {} needs an entity", context.command_type))?;
        let mut state: S = serde_json::from_value(current)?;

        (self.f)(context, command, &mut state, &mut scope)?;

        let updated = serde_json::to_value(&state)?;
        if let Some(entity) = scope.entity() {
            *entity = updated;
        }
        Ok(())
    }
}

/// Wrap a closure over typed command and entity state
pub fn typed_handler<C, S, F>(f: F) -> Arc<dyn CommandHandler>
where
    C: DeserializeOwned + Send + 'static,
    S: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(&ExecutionContext, C, &mut S, &mut HandlerScope<'_>) -> Result<(), HandlerError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(TypedHandler {
        f,
        _types: PhantomData,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSeed;
    use crate::handler::EventBuffer;
    use crate::registry::{EventCatalog, EventDefinition};
    use crate::schema::{FieldSchema, Schema};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Redeem {
        amount: i64,
    }

    #[derive(Serialize, Deserialize)]
    struct Card {
        card_id: String,
        #[serde(default)]
        balance: i64,
    }

    #[derive(Serialize)]
    struct Redeemed {
        amount: i64,
    }

    #[tokio::test]
    async fn test_typed_handler_round_trips_state() {
        let envelope = ContextSeed::new().into_envelope("RedeemCard", json!({"amount": 40}));
        let ctx = ExecutionContext::for_envelope(&envelope, 1);
        let command = Schema::new("RedeemCard")
            .field(FieldSchema::integer("amount"))
            .validate(&envelope.payload)
            .unwrap();

        let mut catalog = EventCatalog::new();
        catalog.insert(
            "CardRedeemed".to_string(),
            EventDefinition::new("CardRedeemed", Schema::new("CardRedeemed").field(FieldSchema::integer("amount"))),
        );
        let mut events = EventBuffer::new(Arc::new(catalog), &ctx, None);
        let mut state = json!({"card_id": "c-1", "balance": 100});

        let handler = typed_handler::<Redeem, Card, _>(|_ctx, cmd, card, scope| {
            card.balance -= cmd.amount;
            scope.raise_typed("CardRedeemed", &Redeemed { amount: cmd.amount })
        });

        handler
            .handle(&ctx, &command, HandlerScope::new(Some(&mut state), false, &mut events))
            .await
            .unwrap();

        assert_eq!(state, json!({"card_id": "c-1", "balance": 60}));
        assert_eq!(events.events()[0].payload, json!({"amount": 40}));
    }
}
