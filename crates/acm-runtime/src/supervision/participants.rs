// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker watching participant heartbeats.
//!
//! Replicas report status periodically. A replica that stays silent past
//! the participant timeout is marked NOT_HEALTHY and asked for its status;
//! past twice the timeout it is declared TERMINATED and stops being
//! expected to answer commands.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::coordinator::Coordinator;

/// Configuration for the participant supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often heartbeats are checked.
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Periodically runs [`Coordinator::supervise_participants`].
pub struct ParticipantSupervisor {
    coordinator: Arc<Coordinator>,
    config: SupervisorConfig,
    shutdown: Arc<Notify>,
}

impl ParticipantSupervisor {
    pub fn new(coordinator: Arc<Coordinator>, config: SupervisorConfig) -> Self {
        Self {
            coordinator,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the supervision loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Participant supervisor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Participant supervisor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.coordinator.supervise_participants(Utc::now()).await {
                        Ok(0) => debug!("All participants on schedule"),
                        Ok(changed) => info!(changed, "Participant health updated"),
                        Err(e) => error!(error = %e, "Failed to supervise participants"),
                    }
                }
            }
        }

        info!("Participant supervisor stopped");
    }
}
