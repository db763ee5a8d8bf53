// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime wiring the coordinator to a message bus.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use acm_protocol::InMemoryBus;
//! use acm_runtime::runtime::AcmRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AcmRuntime::builder()
//!         .bus(Arc::new(InMemoryBus::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let definition = runtime.coordinator().commission(template).await?;
//!     runtime.coordinator().prime(definition.composition_id).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use acm_protocol::bus::{MessageBus, RUNTIME_TOPIC, Subscription};
use acm_protocol::encryption::EncryptionService;
use anyhow::Result;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::persistence::{InMemoryProvider, Provider};
use crate::supervision::{Coordinator, ParticipantSupervisor, SupervisorConfig};

/// Builder for creating an [`AcmRuntime`].
#[derive(Default)]
pub struct AcmRuntimeBuilder {
    bus: Option<Arc<dyn MessageBus>>,
    provider: Option<Arc<dyn Provider>>,
    config: RuntimeConfig,
}

impl std::fmt::Debug for AcmRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmRuntimeBuilder")
            .field("bus", &self.bus.as_ref().map(|_| "..."))
            .field("provider", &self.provider.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl AcmRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message bus (required).
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the persistence provider.
    ///
    /// Default: [`InMemoryProvider`]
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Fails when the bus is missing or encryption is enabled without a
    /// pass phrase.
    pub fn build(self) -> Result<AcmRuntimeConfig> {
        let bus = self
            .bus
            .ok_or_else(|| anyhow::anyhow!("bus is required"))?;
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(InMemoryProvider::new()));
        let encryption = EncryptionService::from_settings(
            self.config.encryption_enabled,
            self.config.encryption_pass_phrase.as_deref(),
        )?;

        Ok(AcmRuntimeConfig {
            bus,
            provider,
            encryption,
            config: self.config,
        })
    }
}

/// Configuration for an [`AcmRuntime`].
pub struct AcmRuntimeConfig {
    bus: Arc<dyn MessageBus>,
    provider: Arc<dyn Provider>,
    encryption: EncryptionService,
    config: RuntimeConfig,
}

impl std::fmt::Debug for AcmRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmRuntimeConfig")
            .field("bus", &"...")
            .field("provider", &"...")
            .field("encryption", &self.encryption)
            .field("config", &self.config)
            .finish()
    }
}

impl AcmRuntimeConfig {
    /// Subscribe to participant traffic, spawn the message loop and the
    /// supervisor, then sync known participants.
    pub async fn start(self) -> Result<AcmRuntime> {
        let coordinator = Arc::new(Coordinator::new(
            self.provider,
            self.bus.clone(),
            self.encryption,
            &self.config,
        ));
        let subscription = self.bus.subscribe(RUNTIME_TOPIC).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener_handle = tokio::spawn(run_message_loop(
            subscription,
            coordinator.clone(),
            shutdown_rx,
        ));

        let supervisor = Arc::new(ParticipantSupervisor::new(
            coordinator.clone(),
            SupervisorConfig {
                poll_interval: self.config.supervision_interval,
            },
        ));
        let supervisor_shutdown = supervisor.shutdown_handle();
        let supervisor_handle = tokio::spawn(async move { supervisor.run().await });

        // Participants known from a previous run get their view back.
        let synced = coordinator.sync_all_participants().await?;

        info!(synced_participants = synced, config = ?self.config, "AcmRuntime started");

        Ok(AcmRuntime {
            coordinator,
            listener_handle,
            supervisor_handle,
            shutdown_tx,
            supervisor_shutdown,
        })
    }
}

/// A running coordinator attached to a bus.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct AcmRuntime {
    coordinator: Arc<Coordinator>,
    listener_handle: JoinHandle<()>,
    supervisor_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    supervisor_shutdown: Arc<Notify>,
}

impl AcmRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> AcmRuntimeBuilder {
        AcmRuntimeBuilder::new()
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Check if the message loop is still running.
    pub fn is_running(&self) -> bool {
        !self.listener_handle.is_finished()
    }

    /// Stop the message loop and the supervisor and wait for both.
    pub async fn shutdown(self) -> Result<()> {
        info!("AcmRuntime shutting down...");

        let _ = self.shutdown_tx.send(true);
        self.supervisor_shutdown.notify_one();

        let listener = self.listener_handle.await;
        let supervisor = self.supervisor_handle.await;
        match (listener, supervisor) {
            (Ok(()), Ok(())) => {
                info!("AcmRuntime shutdown complete");
                Ok(())
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("AcmRuntime task panicked: {}", e);
                Err(anyhow::anyhow!("runtime task panicked: {}", e))
            }
        }
    }
}

/// Feed every participant message to the coordinator until shutdown.
async fn run_message_loop(
    mut subscription: Subscription,
    coordinator: Arc<Coordinator>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(topic = subscription.topic(), "Runtime message loop starting");

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Runtime message loop received shutdown signal");
                    break;
                }
            }

            received = subscription.recv() => {
                match received {
                    Ok(message) => {
                        debug!(message_type = message.message_type(), "Received participant message");
                        if let Err(e) = coordinator.handle_message(message).await {
                            warn!(error = %e, code = e.error_code(), "Failed to handle participant message");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Runtime topic closed");
                        break;
                    }
                }
            }
        }
    }

    info!("Runtime message loop stopped");
}
