// Copyright (c) 2025 - Cowboy AI, Inc.
//! Tracing subscriber setup
//!
//! The engine only emits `tracing` spans and events. Each execution opens a
//! `command.execute` span with one child span per pipeline stage:
//!
//! ```text
//! command.execute
//! ├── command.validate
//! ├── command.resolve
//! ├── command.pre_check
//! ├── command.handle
//! ├── command.post_check
//! └── command.commit
//! ```
//!
//! Exporters (OTLP, Jaeger, ...) attach as additional `tracing-subscriber`
//! layers; [`init_tracing`] installs the plain formatter.

use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Install the global formatter
///
/// `RUST_LOG` wins over `config.level`. Returns an error when a global
/// subscriber is already installed or the filter does not parse.
pub fn init_tracing(config: &TelemetryConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.json {
        builder
            .json()
            .try_init()
            .map_err(|err| anyhow::anyhow!(err))?;
    } else {
        builder.try_init().map_err(|err| anyhow::anyhow!(err))?;
    }
    Ok(())
}
