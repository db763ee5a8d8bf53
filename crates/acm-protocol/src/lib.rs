// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Participant coordination protocol for automation compositions.
//!
//! This crate holds everything the runtime and participants must agree on:
//!
//! - [`model`]: compositions, elements, participants, definitions and their
//!   state enumerations
//! - [`messages`]: the envelope and the message-type taxonomy
//! - [`targeting`]: the applicability predicate gating every inbound message
//! - [`codec`]: JSON encoding of messages
//! - [`bus`]: the publish/subscribe seam and an in-process bus
//! - [`encryption`]: reversible encryption of sensitive element properties
//!
//! # Message Flow
//!
//! ```text
//! runtime ──(PARTICIPANT_TOPIC)──► participants
//!    ▲                                  │
//!    └────────(RUNTIME_TOPIC)───────────┘
//! ```
//!
//! Commands carry a fresh `messageId`; acks answer with `responseTo` set to
//! it. Participants check [`ParticipantMessage::applies_to`] before acting.

pub mod bus;
pub mod codec;
pub mod encryption;
pub mod messages;
pub mod model;
pub mod targeting;

pub use bus::{BusError, InMemoryBus, MessageBus, PARTICIPANT_TOPIC, RUNTIME_TOPIC, Subscription};
pub use codec::CodecError;
pub use encryption::{EncryptionError, EncryptionService, SensitivityIndex};
pub use messages::{Ack, ElementResult, Envelope, InstanceAck, ParticipantMessage, Payload};
