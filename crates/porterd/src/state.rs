//! Process-wide mutable state, behind one lock.
//!
//! The gallery, the visitor registry, the pending permission request (with
//! its still image), the cooldown ledger and the unlock interlock all live
//! in [`Shared`]. Critical sections copy data in or out; the oracle call
//! and the relay hold never run with the lock held.

use chrono::{DateTime, Utc};
use porter_core::Gallery;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::clock::elapsed;
use crate::permission::PermissionRequest;

/// Per-identity and unknown-visitor cooldown bookkeeping.
#[derive(Debug, Default)]
pub struct CooldownLedger {
    last_known: HashMap<String, DateTime<Utc>>,
    last_unknown: Option<DateTime<Utc>>,
}

impl CooldownLedger {
    /// Record an admission of `name` at `now` if its cooldown has lapsed.
    /// Returns false (and records nothing) while still cooling down.
    pub fn claim_known(&mut self, name: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        if let Some(&last) = self.last_known.get(name) {
            if elapsed(now, last) <= cooldown {
                return false;
            }
        }
        self.last_known.insert(name.to_string(), now);
        true
    }

    pub fn unknown_ready(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_unknown
            .map_or(true, |last| elapsed(now, last) > cooldown)
    }

    pub fn record_unknown(&mut self, now: DateTime<Utc>) {
        self.last_unknown = Some(now);
    }
}

/// Unlock interlock: at most one actuation in flight.
#[derive(Debug, Default)]
pub struct UnlockState {
    pub is_unlocking: bool,
    pub last_unlock: Option<DateTime<Utc>>,
}

impl UnlockState {
    /// True while unlocking or within `cooldown` of the last unlock.
    pub fn blocks_scanning(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.is_unlocking
            || self
                .last_unlock
                .is_some_and(|last| elapsed(now, last) < cooldown)
    }
}

#[derive(Debug, Default)]
pub struct Shared {
    pub known: Gallery,
    pub visitors: Gallery,
    pub pending: Option<PermissionRequest>,
    pub ledger: CooldownLedger,
    pub unlock: UnlockState,
}

/// The single mutex guarding [`Shared`].
#[derive(Debug, Default)]
pub struct SharedState(Mutex<Shared>);

impl SharedState {
    pub fn new(shared: Shared) -> Self {
        Self(Mutex::new(shared))
    }

    /// Lock, recovering from poisoning: every section leaves `Shared` consistent.
    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
