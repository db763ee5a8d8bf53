// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic status reports to the runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::handler::ParticipantHandler;

/// Sends a participant status every `interval`.
pub struct Heartbeat {
    handler: Arc<ParticipantHandler>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl Heartbeat {
    pub fn new(handler: Arc<ParticipantHandler>, interval: Duration) -> Self {
        Self {
            handler,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Report status until shutdown is signalled. A zero interval disables
    /// reporting.
    pub async fn run(&self) {
        if self.interval.is_zero() {
            info!("Heartbeat disabled");
            return;
        }
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Heartbeat started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Heartbeat received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.interval) => {
                    match self.handler.send_status(false).await {
                        Ok(()) => debug!("Heartbeat sent"),
                        Err(e) => warn!(error = %e, "Failed to send heartbeat"),
                    }
                }
            }
        }

        info!("Heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParticipantConfig;
    use crate::simulator::SimulatorListener;
    use acm_protocol::bus::{InMemoryBus, MessageBus, RUNTIME_TOPIC};
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reports_status_until_shutdown() {
        let bus = Arc::new(InMemoryBus::new());
        let mut statuses = bus.subscribe(RUNTIME_TOPIC).await.unwrap();
        let config = ParticipantConfig::new(Uuid::new_v4(), Vec::new());
        let handler = Arc::new(
            ParticipantHandler::new(&config, Arc::new(SimulatorListener::new("sim")), bus).unwrap(),
        );
        let heartbeat = Arc::new(Heartbeat::new(handler, Duration::from_millis(100)));
        let shutdown = heartbeat.shutdown_handle();
        let task = tokio::spawn({
            let heartbeat = heartbeat.clone();
            async move { heartbeat.run().await }
        });

        let first = statuses.recv().await.unwrap();
        assert_eq!(first.message_type(), "PARTICIPANT_STATUS");
        assert_eq!(first.envelope.replica_id, Some(config.replica_id));

        shutdown.notify_one();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_disables_heartbeat() {
        let bus = Arc::new(InMemoryBus::new());
        let config = ParticipantConfig::new(Uuid::new_v4(), Vec::new());
        let handler = Arc::new(
            ParticipantHandler::new(&config, Arc::new(SimulatorListener::new("sim")), bus).unwrap(),
        );
        // Returns immediately instead of looping.
        Heartbeat::new(handler, Duration::ZERO).run().await;
    }
}
