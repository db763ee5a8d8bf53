// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON encoding of bus messages.

use crate::messages::ParticipantMessage;

/// Largest message accepted by [`decode`] (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Errors from encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("message too large: {0} bytes (max {max})", max = MAX_MESSAGE_SIZE)]
    TooLarge(usize),

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message as JSON bytes.
pub fn encode(message: &ParticipantMessage) -> Result<Vec<u8>, CodecError> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Decode a message from JSON bytes.
pub fn decode(bytes: &[u8]) -> Result<ParticipantMessage, CodecError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    Ok(serde_json::from_slice(bytes)?)
}
