// Copyright (c) 2025 - Cowboy AI, Inc.

//! NATS subject hierarchy for commands and events
//!
//! # Subject Pattern
//!
//! ```text
//! {root}.commands.{command}
//! {root}.events.{entity}.{event}
//! ```
//!
//! This allows for:
//! - Precise subscriptions (`cim.events.gift_card.CardIssued`)
//! - Entity-level wildcards (`cim.events.gift_card.>`)
//! - Queue-group consumers for every command (`cim.commands.>`)
//!
//! Events raised by stateless handlers use the `stateless` entity token.
//!
//! # Examples
//!
//! ```rust
//! use cim_command_engine::subjects::SubjectBuilder;
//!
//! let subjects = SubjectBuilder::new("cim");
//! assert_eq!(subjects.command("RedeemCard"), "cim.commands.RedeemCard");
//! assert_eq!(
//!     subjects.event(Some("gift_card"), "CardRedeemed"),
//!     "cim.events.gift_card.CardRedeemed"
//! );
//! assert_eq!(subjects.entity_events("gift_card"), "cim.events.gift_card.>");
//! ```

/// Default root namespace
pub const DEFAULT_ROOT: &str = "cim";

/// Entity token for events without an entity
pub const STATELESS_ENTITY: &str = "stateless";

/// Builder for command and event subjects under one root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectBuilder {
    root: String,
}

impl SubjectBuilder {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: token(&root.into()),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Returns: `{root}.commands.{command}`
    pub fn command(&self, command_type: &str) -> String {
        format!("{}.commands.{}", self.root, token(command_type))
    }

    /// Returns: `{root}.commands.>`
    pub fn all_commands(&self) -> String {
        format!("{}.commands.>", self.root)
    }

    /// Returns: `{root}.events.{entity}.{event}`
    pub fn event(&self, entity_type: Option<&str>, event_type: &str) -> String {
        format!(
            "{}.events.{}.{}",
            self.root,
            token(entity_type.unwrap_or(STATELESS_ENTITY)),
            token(event_type)
        )
    }

    /// Returns: `{root}.events.{entity}.>`
    pub fn entity_events(&self, entity_type: &str) -> String {
        format!("{}.events.{}.>", self.root, token(entity_type))
    }

    /// Returns: `{root}.events.>`
    pub fn all_events(&self) -> String {
        format!("{}.events.>", self.root)
    }
}

impl Default for SubjectBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

/// Replace characters NATS reserves inside a token
fn token(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_subject() {
        let subjects = SubjectBuilder::default();
        assert_eq!(subjects.command("IssueCard"), "cim.commands.IssueCard");
        assert_eq!(subjects.all_commands(), "cim.commands.>");
    }

    #[test]
    fn test_event_subjects() {
        let subjects = SubjectBuilder::new("billing");
        assert_eq!(
            subjects.event(Some("gift_card"), "CardIssued"),
            "billing.events.gift_card.CardIssued"
        );
        assert_eq!(subjects.event(None, "Pinged"), "billing.events.stateless.Pinged");
        assert_eq!(subjects.all_events(), "billing.events.>");
    }

    #[test]
    fn test_reserved_characters_are_replaced() {
        let subjects = SubjectBuilder::new("acme.prod");
        assert_eq!(subjects.root(), "acme_prod");
        assert_eq!(subjects.command("Close Account*"), "acme_prod.commands.Close_Account_");
    }
}
