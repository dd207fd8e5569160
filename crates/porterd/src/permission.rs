//! Pending "unknown visitor" approval.
//!
//! At most one request exists at a time (`Shared::pending`). Expiry is a
//! hard wall-clock deadline checked wherever the slot is read: an expired
//! request that has not been swept yet is still "not pending".

use chrono::{DateTime, Utc};
use porter_core::Embedding;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::elapsed;

#[derive(Clone)]
pub struct PermissionRequest {
    pub id: Uuid,
    pub embedding: Embedding,
    /// JPEG still of the visitor's face region.
    pub face_image: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for PermissionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionRequest")
            .field("id", &self.id)
            .field("dim", &self.embedding.dim())
            .field("face_image_bytes", &self.face_image.len())
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl PermissionRequest {
    pub fn new(embedding: Embedding, face_image: Vec<u8>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            embedding,
            face_image,
            created_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        elapsed(now, self.created_at)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.age(now) > timeout
    }
}

/// The request in `slot` if it is still within `timeout`.
pub fn live(slot: &Option<PermissionRequest>, now: DateTime<Utc>, timeout: Duration) -> Option<&PermissionRequest> {
    slot.as_ref().filter(|r| !r.is_expired(now, timeout))
}

/// Clear an expired request. Returns true if one was swept.
pub fn sweep_expired(slot: &mut Option<PermissionRequest>, now: DateTime<Utc>, timeout: Duration) -> bool {
    if slot.as_ref().is_some_and(|r| r.is_expired(now, timeout)) {
        if let Some(expired) = slot.take() {
            tracing::info!(
                request = %expired.id,
                age_secs = expired.age(now).as_secs(),
                "permission request timed out"
            );
        }
        return true;
    }
    false
}

/// What the operator UI polls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionStatus {
    pub active: bool,
    pub has_face_image: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PermissionStatus {
    pub fn of(slot: &Option<PermissionRequest>, now: DateTime<Utc>, timeout: Duration) -> Self {
        match live(slot, now, timeout) {
            Some(request) => Self {
                active: true,
                has_face_image: !request.face_image.is_empty(),
                timestamp: Some(request.created_at),
            },
            None => Self {
                active: false,
                has_face_image: false,
                timestamp: None,
            },
        }
    }
}
