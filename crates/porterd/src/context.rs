//! The explicit context shared by the engine worker and the D-Bus handlers.

use chrono::{DateTime, NaiveDate, Utc};
use porter_core::{
    DistanceMetric, Embedding, EmbeddingOracle, Enrollment, Gallery, GalleryError, GalleryStore, TieredMatcher,
    Tolerances,
};
use porter_hw::Actuator;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AccessLogEntry, AuditError, AuditSink};
use crate::clock::Clock;
use crate::notify::NotificationSink;
use crate::permission::{self, PermissionStatus};
use crate::state::{Shared, SharedState};
use crate::unlock::{UnlockController, UnlockOutcome};

/// Decision-policy parameters.
#[derive(Debug, Clone)]
pub struct Policy {
    pub unlock_hold: Duration,
    pub unlock_cooldown: Duration,
    pub known_cooldown: Duration,
    pub unknown_cooldown: Duration,
    pub approval_timeout: Duration,
    pub tolerances: Tolerances,
    pub metric: DistanceMetric,
}

impl Policy {
    pub fn matcher(&self) -> TieredMatcher {
        TieredMatcher::new(self.tolerances, self.metric)
    }
}

/// External collaborators the context talks to.
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub oracle: Arc<dyn EmbeddingOracle>,
    pub notifier: Arc<dyn NotificationSink>,
    pub audit: Arc<dyn AuditSink>,
    pub actuator: Arc<dyn Actuator>,
}

/// Which on-disk registry an enrollment goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registry {
    Known,
    Visitors,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub known_faces: usize,
    pub visitors: usize,
    pub pending: PermissionStatus,
    pub is_unlocking: bool,
    pub last_unlock: Option<DateTime<Utc>>,
    pub actuator: String,
}

pub struct AccessContext {
    pub(crate) state: SharedState,
    pub(crate) policy: Policy,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) oracle: Arc<dyn EmbeddingOracle>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) unlocker: UnlockController,
    known_store: GalleryStore,
    visitor_store: GalleryStore,
}

impl AccessContext {
    /// Load both registries (self-healing) and assemble the context.
    pub fn open(policy: Policy, collaborators: Collaborators, known_store: GalleryStore, visitor_store: GalleryStore) -> Self {
        let known = known_store.load();
        let visitors = visitor_store.load();
        tracing::info!(
            known = known.len(),
            visitors = visitors.len(),
            gallery = %known_store.path().display(),
            "galleries loaded"
        );

        let shared = Shared {
            known,
            visitors,
            ..Shared::default()
        };
        Self {
            state: SharedState::new(shared),
            unlocker: UnlockController::new(collaborators.actuator, policy.unlock_hold),
            policy,
            clock: collaborators.clock,
            oracle: collaborators.oracle,
            notifier: collaborators.notifier,
            audit: collaborators.audit,
            known_store,
            visitor_store,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Enroll into the durable gallery, then save it.
    ///
    /// On a save failure the in-memory gallery keeps the new entry and the
    /// error is returned.
    pub fn enroll_known(&self, name: &str, embedding: Embedding) -> Result<Enrollment, GalleryError> {
        self.enroll(Registry::Known, name, embedding)
    }

    /// Enroll into the allowed-once registry, then save it.
    pub fn enroll_visitor(&self, name: &str, embedding: Embedding) -> Result<Enrollment, GalleryError> {
        self.enroll(Registry::Visitors, name, embedding)
    }

    fn enroll(&self, registry: Registry, name: &str, embedding: Embedding) -> Result<Enrollment, GalleryError> {
        let mut shared = self.state.lock();
        let (gallery, store): (&mut Gallery, &GalleryStore) = match registry {
            Registry::Known => (&mut shared.known, &self.known_store),
            Registry::Visitors => (&mut shared.visitors, &self.visitor_store),
        };
        let enrollment = gallery.enroll(name, embedding);
        tracing::info!(name, ?registry, ?enrollment, "face enrolled");

        // Saved under the lock so concurrent enrollments reach disk in order.
        if let Err(e) = store.save(gallery) {
            tracing::error!(name, ?registry, error = %e, "failed to persist gallery");
            return Err(e);
        }
        Ok(enrollment)
    }

    pub fn permission_status(&self) -> PermissionStatus {
        let now = self.now();
        let shared = self.state.lock();
        PermissionStatus::of(&shared.pending, now, self.policy.approval_timeout)
    }

    /// JPEG still of the live pending visitor, if any.
    pub fn face_image(&self) -> Option<Vec<u8>> {
        let now = self.now();
        let shared = self.state.lock();
        permission::live(&shared.pending, now, self.policy.approval_timeout)
            .filter(|r| !r.face_image.is_empty())
            .map(|r| r.face_image.clone())
    }

    pub fn known_names(&self) -> Vec<String> {
        self.state.lock().known.names()
    }

    pub fn visitor_names(&self) -> Vec<String> {
        self.state.lock().visitors.names()
    }

    pub fn status(&self) -> StatusReport {
        let now = self.now();
        let shared = self.state.lock();
        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            known_faces: shared.known.len(),
            visitors: shared.visitors.len(),
            pending: PermissionStatus::of(&shared.pending, now, self.policy.approval_timeout),
            is_unlocking: shared.unlock.is_unlocking,
            last_unlock: shared.unlock.last_unlock,
            actuator: self.unlocker.actuator_name(),
        }
    }

    pub fn access_log(&self, date: NaiveDate) -> Result<Vec<AccessLogEntry>, AuditError> {
        self.audit.entries_for(date)
    }

    /// Drive the door through the unlock controller. Blocks for the hold time.
    pub fn unlock(&self) -> UnlockOutcome {
        self.unlocker.unlock_with_cooldown(&self.state, self.clock.as_ref())
    }
}
