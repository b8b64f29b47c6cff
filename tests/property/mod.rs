// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! - `atomicity`: failed executions leave no trace; balances never go
//!   negative; events follow commits in raise order
//! - `validation`: schema validation is pure

mod atomicity;
mod validation;
