//! Recovery of a lossless state-transition timeline from the latest-state
//! session table.
//!
//! The session table is upsert-only, so a consumer reading periodic exports
//! would see state snapshots, not transitions: a mode change that flips and
//! reverts within one export window would be invisible. Whenever a field
//! that matters for transition history (radio mode, link quality) changes
//! between the incoming update and the stored row for the same session key,
//! a synthetic discrete event is appended to the event table. Synthetic
//! events draw from the shared sequence counter so they interleave with
//! organic events in one global order.

use crate::event::bus::SharedSequence;
use crate::event::{SessionEvent, SessionParam};
use crate::store::db::{MetaStore, RowIdentity, SessionKey, StoreError};

/// Seconds during which a first observation of a session key still yields
/// synthetic mode/quality events, so a consumer starting to listen now
/// receives a complete initial snapshot as discrete events.
pub const FIRST_OBSERVATION_WINDOW_SECS: u64 = 120;

/// Position of the radio mode field within the packed state text.
const MODE_FIELD: usize = 2;
/// Position of the link quality field within the packed state text.
const QUALITY_FIELD: usize = 3;
/// Exact field count of the packed state text.
const STATE_FIELDS: usize = 4;

/// Parses one positional field out of the packed, comma-delimited session
/// state. The packed form has exactly four fields; anything else is
/// malformed and yields no value. Empty fields mean "not reported".
pub fn packed_state_field(text: &str, position: usize) -> Option<i64> {
    if position >= STATE_FIELDS {
        return None;
    }
    let fields: Vec<&str> = text.split(',').collect();
    if fields.len() != STATE_FIELDS {
        return None;
    }
    let field = fields[position].trim();
    if field.is_empty() {
        return None;
    }
    field.parse().ok()
}

/// Result of applying one session update through the reconciliation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    /// True when no prior row existed for the session key.
    pub first_observation: bool,
    /// Number of synthetic events appended (0..=2).
    pub synthesized: u32,
}

/// Upsert-with-synthesis engine for session state updates.
pub struct Reconciler {
    sequence: SharedSequence,
    window_started_at: Option<u64>,
    first_observation_enabled: bool,
}

impl Reconciler {
    pub fn new(sequence: SharedSequence) -> Self {
        Self {
            sequence,
            window_started_at: None,
            first_observation_enabled: true,
        }
    }

    /// Whether first-observation synthesis is still active. The window is
    /// process-lifetime state, measured from the first synthesis attempt
    /// and reset only on restart.
    fn first_observation_allowed(&mut self, now_wall: u64) -> bool {
        if !self.first_observation_enabled {
            return false;
        }
        match self.window_started_at {
            None => {
                self.window_started_at = Some(now_wall);
                true
            }
            Some(started) => {
                if now_wall > started && now_wall - started > FIRST_OBSERVATION_WINDOW_SECS {
                    self.first_observation_enabled = false;
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Applies a session state update: insert-first upsert plus synthetic
    /// event synthesis.
    ///
    /// A successful insert means first observation; mode and quality events
    /// are synthesized unconditionally (while the window is open) so the
    /// mode stream alone is complete from the consumer's perspective. On
    /// collision the stored packed state is read back and compared field by
    /// field; only changed fields yield events, and the row is then updated
    /// in place.
    pub fn apply_update(
        &mut self,
        store: &MetaStore,
        identity: &RowIdentity,
        event: &SessionEvent,
        timestamp: u64,
        sequence: u32,
        now_wall: u64,
    ) -> Result<ReconcileOutcome, StoreError> {
        let state_text = event.value_text.as_deref().unwrap_or("");
        let inserted =
            store.try_insert_session_state(identity, event, timestamp, sequence, state_text)?;

        let mode = packed_state_field(state_text, MODE_FIELD);
        let quality = packed_state_field(state_text, QUALITY_FIELD);
        let mut outcome = ReconcileOutcome {
            first_observation: inserted,
            synthesized: 0,
        };

        if inserted {
            if self.first_observation_allowed(now_wall) {
                if let Some(mode) = mode {
                    self.synthesize(store, identity, event, timestamp, SessionParam::ModeUpdate, mode)?;
                    outcome.synthesized += 1;
                }
                if let Some(quality) = quality {
                    self.synthesize(
                        store,
                        identity,
                        event,
                        timestamp,
                        SessionParam::QualityUpdate,
                        quality,
                    )?;
                    outcome.synthesized += 1;
                }
            }
            return Ok(outcome);
        }

        let key = SessionKey::of(event);
        let stored = store.last_session_state_text(&key)?.unwrap_or_default();
        let stored_mode = packed_state_field(&stored, MODE_FIELD);
        let stored_quality = packed_state_field(&stored, QUALITY_FIELD);

        if let Some(mode) = mode {
            if stored_mode != Some(mode) {
                self.synthesize(store, identity, event, timestamp, SessionParam::ModeUpdate, mode)?;
                outcome.synthesized += 1;
            }
        }
        if let Some(quality) = quality {
            if stored_quality != Some(quality) {
                self.synthesize(
                    store,
                    identity,
                    event,
                    timestamp,
                    SessionParam::QualityUpdate,
                    quality,
                )?;
                outcome.synthesized += 1;
            }
        }

        store.update_session_state(&key, timestamp, state_text)?;
        Ok(outcome)
    }

    fn synthesize(
        &mut self,
        store: &MetaStore,
        identity: &RowIdentity,
        event: &SessionEvent,
        timestamp: u64,
        param: SessionParam,
        value: i64,
    ) -> Result<(), StoreError> {
        let sequence = self.sequence.next();
        store.insert_network_event(
            identity,
            event,
            timestamp,
            sequence,
            param,
            Some(value),
            None,
        )
    }
}
