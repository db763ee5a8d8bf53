// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command coordination and participant supervision.

pub mod coordinator;
pub mod participants;
pub mod tracker;

pub use coordinator::{Coordinator, ElementView, InstanceView, LastCommand, stage_plan};
pub use participants::{ParticipantSupervisor, SupervisorConfig};
pub use tracker::{
    AckDisposition, CommandKind, CommandOutcome, CommandSpec, CommandStatus, CommandTracker,
    CompletedCommand,
};
