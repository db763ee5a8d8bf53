// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Applicability predicate deciding whether a message concerns a replica.

use uuid::Uuid;

use crate::messages::{Envelope, ParticipantMessage};

impl Envelope {
    /// Whether a message with this envelope applies to the given replica.
    ///
    /// 1. A non-empty `participantIdList` without this participant excludes it.
    /// 2. No `participantId` is a broadcast.
    /// 3. Matching `participantId` without `replicaId` reaches every replica.
    /// 4. Otherwise only an exact `replicaId` match applies.
    ///
    /// Senders that never fill `participantIdList` fall through to rules 2-4.
    pub fn applies_to(&self, participant_id: Uuid, replica_id: Uuid) -> bool {
        if !self.participant_id_list.is_empty()
            && !self.participant_id_list.contains(&participant_id)
        {
            return false;
        }
        match (self.participant_id, self.replica_id) {
            (None, _) => true,
            (Some(p), None) if p == participant_id => true,
            (_, replica) => replica == Some(replica_id),
        }
    }
}

impl ParticipantMessage {
    pub fn applies_to(&self, participant_id: Uuid, replica_id: Uuid) -> bool {
        self.envelope.applies_to(participant_id, replica_id)
    }
}
