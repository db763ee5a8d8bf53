// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Participant library for automation composition lifecycle management.
//!
//! A participant owns a set of element types. It registers with the
//! runtime, receives lifecycle commands for the elements it holds, drives
//! them through an [`ElementListener`] and acknowledges every command.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `ACM_PARTICIPANT_ID` | Yes | - | Participant UUID |
//! | `ACM_REPLICA_ID` | No | random | Replica UUID |
//! | `ACM_HEARTBEAT_INTERVAL_MS` | No | `20000` | Status period, `0` disables |
//! | `ACM_SUPPORTED_ELEMENT_TYPES` | No | - | `type:version` list |
//! | `ACM_ENCRYPTION_PASS_PHRASE` | No | - | Decrypt sensitive properties |

mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod listener;
pub mod runtime;
pub mod simulator;

pub use config::ParticipantConfig;
pub use error::{ParticipantError, Result};
pub use handler::ParticipantHandler;
pub use listener::ElementListener;
pub use runtime::{ParticipantRuntime, ParticipantRuntimeBuilder, ParticipantRuntimeConfig};
pub use simulator::{Journal, ListenerCall, ListenerOperation, SimulatorListener};
