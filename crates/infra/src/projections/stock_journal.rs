//! Stock journal projection.
//!
//! Folds published movements into a per-material running balance. The
//! journal is a disposable read model: it can always be rebuilt from the
//! store's movement log, and layers stay the source of truth for quantity.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use thiserror::Error;
use uuid::Uuid;

use gemledger_core::Carats;
use gemledger_events::EventEnvelope;
use gemledger_inventory::{MovementType, StockMovement};

#[derive(Debug, Error)]
pub enum StockJournalError {
    #[error("journal lock poisoned")]
    Poisoned,

    #[error("envelope {sequence} does not match its payload: {reason}")]
    Mismatch { sequence: u64, reason: String },
}

/// Running balance of one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JournalBalance {
    /// Net of receive/split/merge movements. Equals the carats held in layers.
    pub on_hand: Carats,
    /// Net of assign/return movements. Negative while issued to a work order.
    pub issued: Carats,
    pub movements: usize,
}

#[derive(Debug, Default)]
struct JournalState {
    /// Every sequence number up to and including this one has been applied.
    applied_through: u64,
    /// Applied sequence numbers above `applied_through`, waiting for the gap
    /// below them to fill.
    ahead: BTreeSet<u64>,
    applied: usize,
    balances: HashMap<Uuid, JournalBalance>,
}

impl JournalState {
    /// Record `sequence` as applied; `false` if it already was.
    fn mark_applied(&mut self, sequence: u64) -> bool {
        if sequence <= self.applied_through || !self.ahead.insert(sequence) {
            return false;
        }
        while self.ahead.remove(&(self.applied_through + 1)) {
            self.applied_through += 1;
        }
        self.applied += 1;
        true
    }
}

/// Idempotent under at-least-once delivery: an envelope whose sequence
/// number was already applied is ignored. Concurrent commits can publish
/// global sequence numbers out of order, so the journal keeps a contiguous
/// high-water mark plus the few numbers that arrived ahead of a gap.
#[derive(Debug, Default)]
pub struct StockJournalProjection {
    state: RwLock<JournalState>,
}

impl StockJournalProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the envelope was a duplicate.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<StockMovement>,
    ) -> Result<bool, StockJournalError> {
        let movement = envelope.payload();
        if envelope.stream_id() != movement.material_id {
            return Err(StockJournalError::Mismatch {
                sequence: envelope.sequence_number(),
                reason: "stream id differs from material id".to_string(),
            });
        }

        let mut state = self.state.write().map_err(|_| StockJournalError::Poisoned)?;
        if !state.mark_applied(envelope.sequence_number()) {
            return Ok(false);
        }

        let balance = state.balances.entry(movement.material_id).or_default();
        match movement.movement_type {
            MovementType::Receive | MovementType::Split | MovementType::Merge => {
                balance.on_hand += movement.quantity;
            }
            MovementType::Assign | MovementType::Return => balance.issued += movement.quantity,
            MovementType::Depleted => {}
        }
        balance.movements += 1;
        Ok(true)
    }

    /// Clear and replay, in sequence order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<StockMovement>>,
    ) -> Result<(), StockJournalError> {
        {
            let mut state = self.state.write().map_err(|_| StockJournalError::Poisoned)?;
            *state = JournalState::default();
        }
        let mut envelopes: Vec<_> = envelopes.into_iter().collect();
        envelopes.sort_by_key(|e| e.sequence_number());
        for envelope in &envelopes {
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }

    pub fn balance(&self, material_id: Uuid) -> JournalBalance {
        self.state
            .read()
            .ok()
            .and_then(|s| s.balances.get(&material_id).copied())
            .unwrap_or_default()
    }

    pub fn applied_count(&self) -> usize {
        self.state.read().map(|s| s.applied).unwrap_or(0)
    }

    /// Highest sequence number below which nothing is missing.
    pub fn applied_through(&self) -> u64 {
        self.state.read().map(|s| s.applied_through).unwrap_or(0)
    }

    /// Applied sequence numbers still waiting on an earlier gap.
    pub fn pending_count(&self) -> usize {
        self.state.read().map(|s| s.ahead.len()).unwrap_or(0)
    }
}
