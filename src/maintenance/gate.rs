//! Exclusive per-recording delete claims shared by every maintenance worker.
//!
//! A claim is held while the delete request is in flight. Committing a claim
//! leaves a tombstone so a worker acting on an older snapshot cannot ask the
//! device to delete the same recording again.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// How long a committed deletion keeps refusing new claims.
pub const TOMBSTONE_TTL: Duration = Duration::from_secs(3_600);

type RecordingKey = (String, String);

#[derive(Debug, Default)]
struct GateState {
    in_flight: HashSet<RecordingKey>,
    tombstones: HashMap<RecordingKey, Instant>,
}

#[derive(Debug)]
pub struct DeleteGate {
    state: Mutex<GateState>,
    tombstone_ttl: Duration,
}

impl Default for DeleteGate {
    fn default() -> Self {
        Self::with_ttl(TOMBSTONE_TTL)
    }
}

impl DeleteGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(tombstone_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            tombstone_ttl,
        }
    }

    /// Claim `(device, recording)`. `None` when another worker holds it or
    /// it was deleted recently.
    pub fn claim(&self, device_id: &str, recording_id: &str) -> Option<DeleteClaim<'_>> {
        let key = (device_id.to_string(), recording_id.to_string());
        let mut state = self.state.lock();
        let now = Instant::now();
        let ttl = self.tombstone_ttl;
        state
            .tombstones
            .retain(|_, deleted_at| now.duration_since(*deleted_at) < ttl);

        if state.tombstones.contains_key(&key) || !state.in_flight.insert(key.clone()) {
            return None;
        }
        Some(DeleteClaim {
            gate: self,
            key: Some(key),
        })
    }

    #[must_use]
    pub fn is_tombstoned(&self, device_id: &str, recording_id: &str) -> bool {
        let key = (device_id.to_string(), recording_id.to_string());
        self.state
            .lock()
            .tombstones
            .get(&key)
            .is_some_and(|deleted_at| deleted_at.elapsed() < self.tombstone_ttl)
    }

    fn release(&self, key: &RecordingKey, deleted: bool) {
        let mut state = self.state.lock();
        state.in_flight.remove(key);
        if deleted {
            state.tombstones.insert(key.clone(), Instant::now());
        }
    }
}

/// RAII claim; dropping it without [`DeleteClaim::commit`] releases the id.
#[derive(Debug)]
pub struct DeleteClaim<'a> {
    gate: &'a DeleteGate,
    key: Option<RecordingKey>,
}

impl DeleteClaim<'_> {
    /// The recording is gone from the device.
    pub fn commit(mut self) {
        if let Some(key) = self.key.take() {
            self.gate.release(&key, true);
        }
    }
}

impl Drop for DeleteClaim<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.gate.release(&key, false);
        }
    }
}
