// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Aggregation of acks for in-flight fan-out commands.
//!
//! Each command records the replicas expected to answer. An ack (matched by
//! `responseTo`) or a status report showing the expected state (matched by
//! instance id) removes its sender from the pending set. The command finishes
//! when nothing is pending or when its budget runs out:
//!
//! | pending | failures | outcome        |
//! |---------|----------|----------------|
//! | empty   | none     | `Success`      |
//! | empty   | some     | `Failed`       |
//! | left    | none     | `Incomplete`   |
//! | left    | some     | `Failed`       |
//!
//! A finished outcome never changes. Acks arriving afterwards are reported
//! as late and dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use acm_protocol::messages::{Ack, ElementResult, InstanceInfo};
use acm_protocol::model::{AcState, ReplicaKey};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Finished commands kept for outcome queries.
const MAX_FINISHED_COMMANDS: usize = 1024;

/// What a tracked command asked participants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Prime,
    Deprime,
    Deploy,
    Undeploy,
    StateChange,
    PropertiesUpdate,
    MigratePrecheck,
    Migrate,
    Rollback,
    Prepare,
    Review,
    ParticipantStateChange,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prime => "prime",
            Self::Deprime => "deprime",
            Self::Deploy => "deploy",
            Self::Undeploy => "undeploy",
            Self::StateChange => "state_change",
            Self::PropertiesUpdate => "properties_update",
            Self::MigratePrecheck => "migrate_precheck",
            Self::Migrate => "migrate",
            Self::Rollback => "rollback",
            Self::Prepare => "prepare",
            Self::Review => "review",
            Self::ParticipantStateChange => "participant_state_change",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated result of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandOutcome {
    /// Every expected replica acked successfully.
    Success,
    /// Nothing to do, the target was already reached.
    AlreadyInState,
    /// At least one replica rejected the command.
    Failed { reasons: Vec<String> },
    /// The budget ran out with replicas still silent and no rejection.
    Incomplete { pending: Vec<ReplicaKey> },
}

impl CommandOutcome {
    /// `Success` or `AlreadyInState`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadyInState)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::AlreadyInState => write!(f, "already in state"),
            Self::Failed { reasons } => write!(f, "failed: {}", reasons.join("; ")),
            Self::Incomplete { pending } => {
                write!(f, "incomplete, {} replica(s) did not answer", pending.len())
            }
        }
    }
}

/// Progress of a command as seen by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending { pending: Vec<ReplicaKey> },
    Finished { outcome: CommandOutcome },
}

/// Static facts about a command, fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub instance_id: Option<Uuid>,
    pub composition_id: Option<Uuid>,
    /// State a status report must show to count as an ack.
    pub expected_state: Option<AcState>,
    pub stage: Option<u32>,
}

impl CommandSpec {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            instance_id: None,
            composition_id: None,
            expected_state: None,
            stage: None,
        }
    }

    pub fn instance(mut self, instance_id: Uuid) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn composition(mut self, composition_id: Uuid) -> Self {
        self.composition_id = Some(composition_id);
        self
    }

    pub fn expecting(mut self, state: AcState) -> Self {
        self.expected_state = Some(state);
        self
    }

    pub fn stage(mut self, stage: u32) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// A finished command and what its acks reported.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCommand {
    pub command_id: Uuid,
    pub spec: CommandSpec,
    pub outcome: CommandOutcome,
    /// Element results from on-time acks.
    pub element_results: BTreeMap<Uuid, ElementResult>,
}

/// What happened to an ack handed to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDisposition {
    /// Counted; other replicas are still pending.
    Recorded { remaining: usize },
    /// Counted and it was the last one.
    Completed,
    /// Same replica answered twice.
    Duplicate,
    /// Sender was not expected to answer this command.
    Unexpected,
    /// Command had already finished.
    Late,
    /// No such command.
    Unknown,
}

/// Handle for awaiting one command.
#[derive(Debug)]
pub struct CommandHandle {
    command_id: Uuid,
    done: watch::Receiver<bool>,
}

impl CommandHandle {
    pub fn command_id(&self) -> Uuid {
        self.command_id
    }
}

struct PendingCommand {
    spec: CommandSpec,
    expected: BTreeSet<ReplicaKey>,
    pending: BTreeSet<ReplicaKey>,
    failures: Vec<String>,
    element_results: BTreeMap<Uuid, ElementResult>,
    done: watch::Sender<bool>,
}

#[derive(Default)]
struct TrackerState {
    pending: HashMap<Uuid, PendingCommand>,
    finished: HashMap<Uuid, CompletedCommand>,
    finished_order: VecDeque<Uuid>,
}

impl TrackerState {
    fn finish(&mut self, command_id: Uuid, timed_out: bool) -> Option<CompletedCommand> {
        let command = self.pending.remove(&command_id)?;
        let pending: Vec<ReplicaKey> = command.pending.iter().copied().collect();
        let outcome = if !command.failures.is_empty() {
            let mut reasons = command.failures;
            reasons.extend(pending.iter().map(|key| format!("{key}: no response")));
            CommandOutcome::Failed { reasons }
        } else if pending.is_empty() {
            CommandOutcome::Success
        } else {
            CommandOutcome::Incomplete { pending }
        };

        if timed_out {
            warn!(
                command_id = %command_id,
                kind = %command.spec.kind,
                outcome = %outcome,
                "Command timed out"
            );
        } else {
            info!(
                command_id = %command_id,
                kind = %command.spec.kind,
                outcome = %outcome,
                "Command finished"
            );
        }

        let completed = CompletedCommand {
            command_id,
            spec: command.spec,
            outcome,
            element_results: command.element_results,
        };
        self.remember(completed.clone());
        let _ = command.done.send(true);
        Some(completed)
    }

    fn remember(&mut self, completed: CompletedCommand) {
        self.finished_order.push_back(completed.command_id);
        self.finished.insert(completed.command_id, completed);
        while self.finished_order.len() > MAX_FINISHED_COMMANDS {
            if let Some(old) = self.finished_order.pop_front() {
                self.finished.remove(&old);
            }
        }
    }
}

/// Tracks in-flight commands and aggregates their acks.
#[derive(Default)]
pub struct CommandTracker {
    state: Mutex<TrackerState>,
}

impl fmt::Debug for CommandTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CommandTracker")
            .field("pending", &state.pending.len())
            .field("finished", &state.finished.len())
            .finish()
    }
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a command sent with message id `command_id`.
    ///
    /// A command nobody has to answer finishes immediately as `Success`.
    pub fn register(
        &self,
        command_id: Uuid,
        spec: CommandSpec,
        expected: BTreeSet<ReplicaKey>,
    ) -> CommandHandle {
        let (done_tx, done_rx) = watch::channel(false);
        let mut state = self.lock();
        debug!(
            command_id = %command_id,
            kind = %spec.kind,
            expected = expected.len(),
            "Tracking command"
        );
        state.pending.insert(
            command_id,
            PendingCommand {
                spec,
                pending: expected.clone(),
                expected,
                failures: Vec::new(),
                element_results: BTreeMap::new(),
                done: done_tx,
            },
        );
        if state.pending.get(&command_id).is_some_and(|c| c.pending.is_empty()) {
            state.finish(command_id, false);
        }
        CommandHandle {
            command_id,
            done: done_rx,
        }
    }

    /// Record an ack from `from` answering `command_id`.
    pub fn record_ack(
        &self,
        command_id: Uuid,
        from: ReplicaKey,
        ack: &Ack,
        element_results: &BTreeMap<Uuid, ElementResult>,
    ) -> AckDisposition {
        let mut state = self.lock();
        let Some(command) = state.pending.get_mut(&command_id) else {
            return if state.finished.contains_key(&command_id) {
                warn!(command_id = %command_id, replica = %from, "Late ack ignored");
                AckDisposition::Late
            } else {
                debug!(command_id = %command_id, replica = %from, "Ack for unknown command");
                AckDisposition::Unknown
            };
        };

        if !command.pending.remove(&from) {
            return if command.expected.contains(&from) {
                debug!(command_id = %command_id, replica = %from, "Duplicate ack ignored");
                AckDisposition::Duplicate
            } else {
                warn!(command_id = %command_id, replica = %from, "Ack from unexpected replica");
                AckDisposition::Unexpected
            };
        }

        if !ack.result {
            command.failures.push(format!("{from}: {}", ack.message));
        }
        command
            .element_results
            .extend(element_results.iter().map(|(id, r)| (*id, r.clone())));

        let remaining = command.pending.len();
        if remaining == 0 {
            state.finish(command_id, false);
            AckDisposition::Completed
        } else {
            AckDisposition::Recorded { remaining }
        }
    }

    /// Treat a status report as an ack for every pending command on the
    /// reported instance whose expected state it already shows.
    ///
    /// Returns the ids of commands this completed.
    pub fn record_status(&self, from: ReplicaKey, info: &InstanceInfo) -> Vec<Uuid> {
        let mut state = self.lock();
        let mut completed = Vec::new();
        for (command_id, command) in state.pending.iter_mut() {
            let reached = command.spec.instance_id == Some(info.automation_composition_id)
                && command.spec.expected_state == Some(info.state)
                && info.element_states.values().all(|s| *s == info.state);
            if !reached || !command.pending.remove(&from) {
                continue;
            }
            debug!(command_id = %command_id, replica = %from, "Status report counted as ack");
            command.element_results.extend(info.element_states.iter().map(|(id, s)| {
                (
                    *id,
                    ElementResult {
                        state: *s,
                        result: true,
                        message: String::new(),
                    },
                )
            }));
            if command.pending.is_empty() {
                completed.push(*command_id);
            }
        }
        for command_id in &completed {
            state.finish(*command_id, false);
        }
        completed
    }

    /// Wait for a command to finish, expiring it once `budget` elapses.
    pub async fn wait(&self, handle: CommandHandle, budget: Duration) -> CompletedCommand {
        let CommandHandle {
            command_id,
            mut done,
        } = handle;
        // Err means the sender was dropped, which only happens once finished
        let _ = tokio::time::timeout(budget, done.wait_for(|finished| *finished)).await;
        self.expire(command_id)
    }

    /// Finish a command now. Returns the stored result if it already finished.
    pub fn expire(&self, command_id: Uuid) -> CompletedCommand {
        let mut state = self.lock();
        if let Some(completed) = state.finish(command_id, true) {
            return completed;
        }
        match state.finished.get(&command_id) {
            Some(completed) => completed.clone(),
            None => CompletedCommand {
                command_id,
                spec: CommandSpec::new(CommandKind::StateChange),
                outcome: CommandOutcome::Incomplete { pending: Vec::new() },
                element_results: BTreeMap::new(),
            },
        }
    }

    /// Record a command that was answered without sending anything.
    pub fn finish_now(
        &self,
        command_id: Uuid,
        spec: CommandSpec,
        outcome: CommandOutcome,
    ) -> CompletedCommand {
        let completed = CompletedCommand {
            command_id,
            spec,
            outcome,
            element_results: BTreeMap::new(),
        };
        self.lock().remember(completed.clone());
        completed
    }

    /// Drop a command whose message could not be sent.
    pub fn abandon(&self, command_id: Uuid) {
        self.lock().pending.remove(&command_id);
    }

    /// Current status of a command, if known.
    pub fn status(&self, command_id: Uuid) -> Option<CommandStatus> {
        let state = self.lock();
        if let Some(command) = state.pending.get(&command_id) {
            return Some(CommandStatus::Pending {
                pending: command.pending.iter().copied().collect(),
            });
        }
        state
            .finished
            .get(&command_id)
            .map(|c| CommandStatus::Finished {
                outcome: c.outcome.clone(),
            })
    }

    /// Number of commands still collecting acks.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ReplicaKey {
        ReplicaKey::new(Uuid::new_v4(), Uuid::new_v4())
    }

    fn ok(command_id: Uuid) -> Ack {
        Ack::success(command_id, "ok")
    }

    fn no_results() -> BTreeMap<Uuid, ElementResult> {
        BTreeMap::new()
    }

    fn spec() -> CommandSpec {
        CommandSpec::new(CommandKind::StateChange)
    }

    #[tokio::test]
    async fn test_complete_only_after_every_replica() {
        let tracker = CommandTracker::new();
        let (a, b) = (key(), key());
        let id = Uuid::new_v4();
        let handle = tracker.register(id, spec(), BTreeSet::from([a, b]));

        assert_eq!(
            tracker.record_ack(id, a, &ok(id), &no_results()),
            AckDisposition::Recorded { remaining: 1 }
        );
        assert!(matches!(tracker.status(id), Some(CommandStatus::Pending { .. })));
        assert_eq!(
            tracker.record_ack(id, b, &ok(id), &no_results()),
            AckDisposition::Completed
        );

        let done = tracker.wait(handle, Duration::from_secs(1)).await;
        assert_eq!(done.outcome, CommandOutcome::Success);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_collection() {
        let tracker = CommandTracker::new();
        let (a, b) = (key(), key());
        let id = Uuid::new_v4();
        let handle = tracker.register(id, spec(), BTreeSet::from([a, b]));

        tracker.record_ack(id, a, &Ack::failure(id, "boom"), &no_results());
        assert!(matches!(tracker.status(id), Some(CommandStatus::Pending { .. })));
        tracker.record_ack(id, b, &ok(id), &no_results());

        let done = tracker.wait(handle, Duration::from_secs(1)).await;
        match done.outcome {
            CommandOutcome::Failed { reasons } => {
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].contains("boom"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_is_incomplete_not_failed() {
        let tracker = CommandTracker::new();
        let (a, b) = (key(), key());
        let id = Uuid::new_v4();
        let handle = tracker.register(id, spec(), BTreeSet::from([a, b]));
        tracker.record_ack(id, a, &ok(id), &no_results());

        let done = tracker.wait(handle, Duration::from_secs(30)).await;
        assert_eq!(done.outcome, CommandOutcome::Incomplete { pending: vec![b] });
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ack_does_not_change_outcome() {
        let tracker = CommandTracker::new();
        let a = key();
        let id = Uuid::new_v4();
        let handle = tracker.register(id, spec(), BTreeSet::from([a]));
        let done = tracker.wait(handle, Duration::from_secs(5)).await;
        assert!(matches!(done.outcome, CommandOutcome::Incomplete { .. }));

        assert_eq!(
            tracker.record_ack(id, a, &ok(id), &no_results()),
            AckDisposition::Late
        );
        assert_eq!(
            tracker.status(id),
            Some(CommandStatus::Finished {
                outcome: CommandOutcome::Incomplete { pending: vec![a] }
            })
        );
    }

    #[test]
    fn test_duplicate_and_unexpected_acks() {
        let tracker = CommandTracker::new();
        let (a, b) = (key(), key());
        let id = Uuid::new_v4();
        let _handle = tracker.register(id, spec(), BTreeSet::from([a, b]));

        tracker.record_ack(id, a, &ok(id), &no_results());
        assert_eq!(
            tracker.record_ack(id, a, &ok(id), &no_results()),
            AckDisposition::Duplicate
        );
        assert_eq!(
            tracker.record_ack(id, key(), &ok(id), &no_results()),
            AckDisposition::Unexpected
        );
        assert_eq!(
            tracker.record_ack(Uuid::new_v4(), a, &ok(id), &no_results()),
            AckDisposition::Unknown
        );
    }

    #[test]
    fn test_empty_expectation_finishes_immediately() {
        let tracker = CommandTracker::new();
        let id = Uuid::new_v4();
        let _handle = tracker.register(id, spec(), BTreeSet::new());
        assert_eq!(
            tracker.status(id),
            Some(CommandStatus::Finished {
                outcome: CommandOutcome::Success
            })
        );
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_status_report_counts_when_state_reached() {
        let tracker = CommandTracker::new();
        let a = key();
        let instance_id = Uuid::new_v4();
        let element_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let _handle = tracker.register(
            id,
            spec().instance(instance_id).expecting(AcState::Running),
            BTreeSet::from([a]),
        );

        let mut info = InstanceInfo {
            automation_composition_id: instance_id,
            composition_id: Uuid::new_v4(),
            state: AcState::Passive,
            element_states: BTreeMap::from([(element_id, AcState::Passive)]),
            element_info: BTreeMap::new(),
        };
        assert!(tracker.record_status(a, &info).is_empty());

        info.state = AcState::Running;
        info.element_states.insert(element_id, AcState::Running);
        assert_eq!(tracker.record_status(a, &info), vec![id]);
        assert_eq!(
            tracker.status(id),
            Some(CommandStatus::Finished {
                outcome: CommandOutcome::Success
            })
        );
    }

    #[test]
    fn test_finished_history_is_bounded() {
        let tracker = CommandTracker::new();
        let first = Uuid::new_v4();
        let _ = tracker.register(first, spec(), BTreeSet::new());
        for _ in 0..MAX_FINISHED_COMMANDS {
            let _ = tracker.register(Uuid::new_v4(), spec(), BTreeSet::new());
        }
        assert!(tracker.status(first).is_none());
    }
}
