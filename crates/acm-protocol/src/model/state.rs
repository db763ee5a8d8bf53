// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle state enumerations shared by the runtime and participants.
//!
//! Composition state moves along a fixed path:
//!
//! ```text
//! UNINITIALISED ─► UNINITIALISED2PASSIVE ─► PASSIVE ─► PASSIVE2RUNNING ─► RUNNING
//!       ▲                                    │  ▲                          │
//!       └──────── PASSIVE2UNINITIALISED ◄────┘  └───── RUNNING2PASSIVE ◄───┘
//! ```
//!
//! Transitional values only exist while convergence is pending. The ordered
//! (desired) state is always one of the three stable values, which is why it
//! has its own type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Actual state of an automation composition or one of its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AcState {
    /// Not deployed to any participant.
    #[serde(rename = "UNINITIALISED")]
    Uninitialised,
    /// Moving from UNINITIALISED to PASSIVE.
    #[serde(rename = "UNINITIALISED2PASSIVE")]
    Uninitialised2Passive,
    /// Deployed but not running.
    #[serde(rename = "PASSIVE")]
    Passive,
    /// Moving from PASSIVE to RUNNING.
    #[serde(rename = "PASSIVE2RUNNING")]
    Passive2Running,
    /// Deployed and running.
    #[serde(rename = "RUNNING")]
    Running,
    /// Moving from RUNNING back to PASSIVE.
    #[serde(rename = "RUNNING2PASSIVE")]
    Running2Passive,
    /// Moving from PASSIVE back to UNINITIALISED.
    #[serde(rename = "PASSIVE2UNINITIALISED")]
    Passive2Uninitialised,
}

impl AcState {
    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialised => "UNINITIALISED",
            Self::Uninitialised2Passive => "UNINITIALISED2PASSIVE",
            Self::Passive => "PASSIVE",
            Self::Passive2Running => "PASSIVE2RUNNING",
            Self::Running => "RUNNING",
            Self::Running2Passive => "RUNNING2PASSIVE",
            Self::Passive2Uninitialised => "PASSIVE2UNINITIALISED",
        }
    }

    /// Whether this is one of the three stable states.
    pub fn is_stable(&self) -> bool {
        self.as_ordered().is_some()
    }

    /// The ordered state this value corresponds to, if it is stable.
    pub fn as_ordered(&self) -> Option<OrderedState> {
        match self {
            Self::Uninitialised => Some(OrderedState::Uninitialised),
            Self::Passive => Some(OrderedState::Passive),
            Self::Running => Some(OrderedState::Running),
            _ => None,
        }
    }

    /// Stable state a transition started from. Stable states map to
    /// themselves.
    pub fn source(&self) -> AcState {
        match self {
            Self::Uninitialised2Passive => Self::Uninitialised,
            Self::Passive2Running | Self::Passive2Uninitialised => Self::Passive,
            Self::Running2Passive => Self::Running,
            stable => *stable,
        }
    }

    /// Transitional state used while converging from `self` towards `target`.
    ///
    /// Returns `None` when `self` is not stable, when it already equals the
    /// target, or when the move skips a step (RUNNING can only reach
    /// UNINITIALISED through PASSIVE, and vice versa).
    pub fn transition_to(&self, target: OrderedState) -> Option<AcState> {
        match (self, target) {
            (Self::Uninitialised, OrderedState::Passive) => Some(Self::Uninitialised2Passive),
            (Self::Passive, OrderedState::Running) => Some(Self::Passive2Running),
            (Self::Running, OrderedState::Passive) => Some(Self::Running2Passive),
            (Self::Passive, OrderedState::Uninitialised) => Some(Self::Passive2Uninitialised),
            _ => None,
        }
    }
}

impl fmt::Display for AcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired state requested by the runtime. Always stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderedState {
    /// Not deployed.
    Uninitialised,
    /// Deployed, not running.
    Passive,
    /// Deployed and running.
    Running,
}

impl OrderedState {
    /// The matching stable [`AcState`].
    pub fn as_state(&self) -> AcState {
        match self {
            Self::Uninitialised => AcState::Uninitialised,
            Self::Passive => AcState::Passive,
            Self::Running => AcState::Running,
        }
    }
}

impl fmt::Display for OrderedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_state().as_str())
    }
}

/// Administrative state of a participant replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    /// Registered but never acknowledged.
    #[default]
    Unknown,
    /// Registered and idle.
    Passive,
    /// Safe mode.
    Safe,
    /// Test mode.
    Test,
    /// Actively serving.
    Active,
    /// Deregistered or declared lost by the runtime.
    Terminated,
}

impl ParticipantState {
    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Passive => "PASSIVE",
            Self::Safe => "SAFE",
            Self::Test => "TEST",
            Self::Active => "ACTIVE",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a participant replica as seen by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// No heartbeat seen yet.
    #[default]
    Unknown,
    /// Heartbeats arriving on schedule.
    Healthy,
    /// Heartbeat overdue, status requested.
    NotHealthy,
    /// Declared lost.
    OffLine,
}

/// Lifecycle state of a composition definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefinitionState {
    /// Commissioned, not pushed to participants.
    #[default]
    Unprimed,
    /// Prime in flight.
    Priming,
    /// Every owning participant holds the definition.
    Primed,
    /// Deprime in flight.
    Depriming,
}

impl fmt::Display for DefinitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unprimed => "UNPRIMED",
            Self::Priming => "PRIMING",
            Self::Primed => "PRIMED",
            Self::Depriming => "DEPRIMING",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [AcState; 7] = [
        AcState::Uninitialised,
        AcState::Uninitialised2Passive,
        AcState::Passive,
        AcState::Passive2Running,
        AcState::Running,
        AcState::Running2Passive,
        AcState::Passive2Uninitialised,
    ];

    #[test]
    fn test_only_three_states_are_stable() {
        let stable: Vec<_> = ALL_STATES.iter().filter(|s| s.is_stable()).collect();
        assert_eq!(
            stable,
            vec![&AcState::Uninitialised, &AcState::Passive, &AcState::Running]
        );
    }

    #[test]
    fn test_transitions_follow_the_lifecycle_path() {
        assert_eq!(
            AcState::Uninitialised.transition_to(OrderedState::Passive),
            Some(AcState::Uninitialised2Passive)
        );
        assert_eq!(
            AcState::Passive.transition_to(OrderedState::Running),
            Some(AcState::Passive2Running)
        );
        assert_eq!(
            AcState::Running.transition_to(OrderedState::Passive),
            Some(AcState::Running2Passive)
        );
        assert_eq!(
            AcState::Passive.transition_to(OrderedState::Uninitialised),
            Some(AcState::Passive2Uninitialised)
        );
    }

    #[test]
    fn test_skipping_steps_is_not_a_transition() {
        assert_eq!(AcState::Running.transition_to(OrderedState::Uninitialised), None);
        assert_eq!(AcState::Uninitialised.transition_to(OrderedState::Running), None);
        assert_eq!(AcState::Passive.transition_to(OrderedState::Passive), None);
        assert_eq!(
            AcState::Passive2Running.transition_to(OrderedState::Running),
            None
        );
    }

    #[test]
    fn test_source_is_the_stable_start_of_a_transition() {
        for state in ALL_STATES {
            assert!(state.source().is_stable());
        }
        assert_eq!(AcState::Running.source(), AcState::Running);
        assert_eq!(AcState::Running2Passive.source(), AcState::Running);
        assert_eq!(AcState::Passive2Uninitialised.source(), AcState::Passive);
        for target in [
            OrderedState::Uninitialised,
            OrderedState::Passive,
            OrderedState::Running,
        ] {
            if let Some(transitional) = AcState::Passive.transition_to(target) {
                assert_eq!(transitional.source(), AcState::Passive);
            }
        }
    }

    #[test]
    fn test_state_wire_names() {
        for state in ALL_STATES {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
        assert_eq!(
            serde_json::to_string(&OrderedState::Running).unwrap(),
            "\"RUNNING\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::OffLine).unwrap(),
            "\"OFF_LINE\""
        );
    }
}
