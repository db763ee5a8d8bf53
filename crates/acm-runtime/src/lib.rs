// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ACM Runtime - automation composition coordinator
//!
//! The runtime holds the authoritative view of composition definitions,
//! instances and participant replicas. It turns operator intent into
//! commands on the participant topic, collects the acks and folds the
//! outcome back into persisted state.
//!
//! # Command outcomes
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | `Success` | Every expected replica acked with success |
//! | `AlreadyInState` | Nothing to do, no message sent |
//! | `Failed` | At least one replica reported failure |
//! | `Incomplete` | Budget ran out while replicas were still silent |
//!
//! `Incomplete` is not a failure: participants may still converge, and a
//! retry of the same command is safe.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `ACM_COMMAND_TIMEOUT_MS` | No | `30000` | Ack collection budget per command |
//! | `ACM_SUPERVISION_INTERVAL_MS` | No | `10000` | Heartbeat check period |
//! | `ACM_PARTICIPANT_TIMEOUT_MS` | No | `60000` | Silence before NOT_HEALTHY |
//! | `ACM_ENCRYPTION_ENABLED` | No | `false` | Encrypt sensitive properties |
//! | `ACM_ENCRYPTION_PASS_PHRASE` | When encrypting | - | Key derivation input |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types with stable error codes
//! - [`persistence`]: Storage interface and in-memory provider
//! - [`supervision`]: Coordinator, ack tracking and heartbeat supervision
//! - [`runtime`]: Embeddable runtime wiring it all to a bus

pub mod config;
pub mod error;
pub mod persistence;
pub mod runtime;
pub mod supervision;

pub use config::{ConfigError, RuntimeConfig};
pub use error::{Result, RuntimeError};
pub use runtime::{AcmRuntime, AcmRuntimeBuilder, AcmRuntimeConfig};
pub use supervision::{CommandOutcome, CommandStatus, Coordinator, InstanceView};
