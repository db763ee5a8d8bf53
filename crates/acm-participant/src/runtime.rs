// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable participant process: message loop, heartbeat and registration.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use acm_participant::{ParticipantConfig, ParticipantRuntime};
//!
//! let participant = ParticipantRuntime::builder()
//!     .bus(bus.clone())
//!     .listener(Arc::new(MyListener::default()))
//!     .config(ParticipantConfig::from_env()?)
//!     .build()?
//!     .start()
//!     .await?;
//!
//! // ...
//! participant.shutdown().await?;
//! ```

use std::sync::Arc;

use acm_protocol::bus::{MessageBus, PARTICIPANT_TOPIC, Subscription};
use acm_protocol::model::ReplicaKey;
use anyhow::Result;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ParticipantConfig;
use crate::handler::ParticipantHandler;
use crate::heartbeat::Heartbeat;
use crate::listener::ElementListener;

/// Builder for creating a [`ParticipantRuntime`].
#[derive(Default)]
pub struct ParticipantRuntimeBuilder {
    bus: Option<Arc<dyn MessageBus>>,
    listener: Option<Arc<dyn ElementListener>>,
    config: Option<ParticipantConfig>,
}

impl std::fmt::Debug for ParticipantRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantRuntimeBuilder")
            .field("bus", &self.bus.as_ref().map(|_| "..."))
            .field("listener", &self.listener.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl ParticipantRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message bus (required).
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the element listener (required).
    pub fn listener(mut self, listener: Arc<dyn ElementListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set the participant configuration (required).
    pub fn config(mut self, config: ParticipantConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<ParticipantRuntimeConfig> {
        let bus = self
            .bus
            .ok_or_else(|| anyhow::anyhow!("bus is required"))?;
        let listener = self
            .listener
            .ok_or_else(|| anyhow::anyhow!("listener is required"))?;
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        let handler = ParticipantHandler::new(&config, listener, bus.clone())?;

        Ok(ParticipantRuntimeConfig {
            bus,
            handler: Arc::new(handler),
            config,
        })
    }
}

/// Configuration for a [`ParticipantRuntime`].
pub struct ParticipantRuntimeConfig {
    bus: Arc<dyn MessageBus>,
    handler: Arc<ParticipantHandler>,
    config: ParticipantConfig,
}

impl std::fmt::Debug for ParticipantRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantRuntimeConfig")
            .field("bus", &"...")
            .field("handler", &self.handler)
            .field("config", &self.config)
            .finish()
    }
}

impl ParticipantRuntimeConfig {
    /// Subscribe to the participant topic, spawn the message loop and the
    /// heartbeat, then register with the runtime.
    pub async fn start(self) -> Result<ParticipantRuntime> {
        // Subscribe before registering so the register ack is not missed.
        let subscription = self.bus.subscribe(PARTICIPANT_TOPIC).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener_handle = tokio::spawn(run_message_loop(
            subscription,
            self.handler.clone(),
            shutdown_rx,
        ));

        let heartbeat = Arc::new(Heartbeat::new(
            self.handler.clone(),
            self.config.heartbeat_interval,
        ));
        let heartbeat_shutdown = heartbeat.shutdown_handle();
        let heartbeat_handle = tokio::spawn(async move { heartbeat.run().await });

        self.handler.register().await?;
        info!(config = ?self.config, "Participant started");

        Ok(ParticipantRuntime {
            handler: self.handler,
            listener_handle,
            heartbeat_handle,
            shutdown_tx,
            heartbeat_shutdown,
        })
    }
}

/// A running participant replica.
pub struct ParticipantRuntime {
    handler: Arc<ParticipantHandler>,
    listener_handle: JoinHandle<()>,
    heartbeat_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    heartbeat_shutdown: Arc<Notify>,
}

impl ParticipantRuntime {
    pub fn builder() -> ParticipantRuntimeBuilder {
        ParticipantRuntimeBuilder::new()
    }

    pub fn handler(&self) -> &Arc<ParticipantHandler> {
        &self.handler
    }

    pub fn key(&self) -> ReplicaKey {
        self.handler.key()
    }

    /// Check if the message loop is still running.
    pub fn is_running(&self) -> bool {
        !self.listener_handle.is_finished()
    }

    /// Deregister, then stop the message loop and the heartbeat.
    pub async fn shutdown(self) -> Result<()> {
        info!(replica = %self.handler.key(), "Participant shutting down...");

        if let Err(e) = self.handler.deregister().await {
            warn!(error = %e, "Failed to deregister participant");
        }
        let _ = self.shutdown_tx.send(true);
        self.heartbeat_shutdown.notify_one();

        let listener = self.listener_handle.await;
        let heartbeat = self.heartbeat_handle.await;
        match (listener, heartbeat) {
            (Ok(()), Ok(())) => {
                info!("Participant shutdown complete");
                Ok(())
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Participant task panicked: {}", e);
                Err(anyhow::anyhow!("participant task panicked: {}", e))
            }
        }
    }
}

async fn run_message_loop(
    mut subscription: Subscription,
    handler: Arc<ParticipantHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(
        topic = subscription.topic(),
        replica = %handler.key(),
        "Participant message loop starting"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Participant message loop received shutdown signal");
                    break;
                }
            }

            received = subscription.recv() => {
                match received {
                    Ok(message) => {
                        debug!(message_type = message.message_type(), "Received runtime message");
                        if let Err(e) = handler.handle(message).await {
                            warn!(error = %e, "Failed to handle runtime message");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Participant topic closed");
                        break;
                    }
                }
            }
        }
    }

    info!("Participant message loop stopped");
}
