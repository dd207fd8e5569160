//! Operator resolution of the pending visitor request.
//!
//! Check-then-take happens inside one locked section together with the
//! expiry check, so a resolution can never race the engine's sweep. The
//! still is re-embedded outside the lock; the request is taken only if it is
//! still the same live request afterwards.

use porter_core::{Embedding, OracleError};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AccessKind, AccessLogEntry};
use crate::context::AccessContext;
use crate::notify::Notification;
use crate::permission;
use crate::unlock::UnlockOutcome;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("unknown permission action '{0}' (expected allow, allowonce or deny)")]
    UnknownAction(String),
    #[error("a name is required to admit a visitor")]
    MissingName,
    #[error("no pending permission request")]
    NoPendingRequest,
    #[error("stored face image cannot be decoded: {0}")]
    NoFaceImage(String),
    #[error("no face embedding could be extracted from the stored image")]
    EmbeddingExtraction,
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Allow,
    AllowOnce,
    Deny,
}

impl FromStr for PermissionAction {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "allowonce" | "allow-once" | "allow_once" => Ok(Self::AllowOnce),
            "deny" => Ok(Self::Deny),
            _ => Err(ResolveError::UnknownAction(s.to_string())),
        }
    }
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "allow",
            Self::AllowOnce => "allowonce",
            Self::Deny => "deny",
        })
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    /// The request this resolution consumed.
    pub request_id: Uuid,
    pub action: PermissionAction,
    pub name: Option<String>,
    /// `None` for deny.
    pub unlock: Option<UnlockOutcome>,
    /// Whether the enrollment reached disk. Always true for deny.
    pub persisted: bool,
    pub message: String,
}

impl AccessContext {
    /// Resolve the pending request. `name` is ignored for deny.
    pub fn resolve(&self, action: PermissionAction, name: &str) -> Result<Resolution, ResolveError> {
        match action {
            PermissionAction::Allow => self.allow(name),
            PermissionAction::AllowOnce => self.allow_once(name),
            PermissionAction::Deny => self.deny(),
        }
    }

    /// Enroll the visitor into the gallery under `name`, log a permanent entry and unlock.
    pub fn allow(&self, name: &str) -> Result<Resolution, ResolveError> {
        self.admit(PermissionAction::Allow, name)
    }

    /// Admit the visitor once: visitor registry only, temporary entry, unlock.
    pub fn allow_once(&self, name: &str) -> Result<Resolution, ResolveError> {
        self.admit(PermissionAction::AllowOnce, name)
    }

    pub fn deny(&self) -> Result<Resolution, ResolveError> {
        let now = self.now();
        let request = {
            let mut shared = self.state.lock();
            permission::sweep_expired(&mut shared.pending, now, self.policy.approval_timeout);
            shared.pending.take().ok_or(ResolveError::NoPendingRequest)?
        };
        tracing::info!(request = %request.id, "visitor denied");
        self.notifier.notify(Notification::denied());

        Ok(Resolution {
            request_id: request.id,
            action: PermissionAction::Deny,
            name: None,
            unlock: None,
            persisted: true,
            message: "Access denied".to_string(),
        })
    }

    fn admit(&self, action: PermissionAction, name: &str) -> Result<Resolution, ResolveError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ResolveError::MissingName);
        }

        let (id, still) = self.pending_still()?;
        let embedding = self.embed_still(&still)?;
        self.take_pending(id)?;
        tracing::info!(request = %id, name, %action, "visitor admitted");

        let (kind, enrolled) = match action {
            PermissionAction::Allow => (AccessKind::Permanent, self.enroll_known(name, embedding)),
            _ => (AccessKind::Temporary, self.enroll_visitor(name, embedding)),
        };
        let persisted = enrolled.is_ok();

        let (date, entry) = AccessLogEntry::at(name, kind, self.now());
        if let Err(e) = self.audit.append_access_entry(date, &entry) {
            tracing::error!(name, error = %e, "failed to append access log entry");
        }

        self.notifier.notify(match kind {
            AccessKind::Permanent => Notification::registered(name),
            AccessKind::Temporary => Notification::temporarily_allowed(name),
        });
        let unlock = self.unlock();

        let mut message = match kind {
            AccessKind::Permanent => format!("{name} registered and access granted"),
            AccessKind::Temporary => format!("{name} granted temporary access"),
        };
        if !persisted {
            message.push_str(" (not saved to disk)");
        }
        Ok(Resolution {
            request_id: id,
            action,
            name: Some(name.to_string()),
            unlock: Some(unlock),
            persisted,
            message,
        })
    }

    /// Id and still of the live request, sweeping it if expired.
    fn pending_still(&self) -> Result<(Uuid, Vec<u8>), ResolveError> {
        let now = self.now();
        let mut shared = self.state.lock();
        permission::sweep_expired(&mut shared.pending, now, self.policy.approval_timeout);
        let request = shared.pending.as_ref().ok_or(ResolveError::NoPendingRequest)?;
        Ok((request.id, request.face_image.clone()))
    }

    fn embed_still(&self, still: &[u8]) -> Result<Embedding, ResolveError> {
        let image = porter_hw::decode_still(still).map_err(|e| ResolveError::NoFaceImage(e.to_string()))?;
        let faces = self.oracle.detect(&image)?;
        faces
            .into_iter()
            .next()
            .map(|face| face.embedding)
            .ok_or(ResolveError::EmbeddingExtraction)
    }

    /// Remove request `id` if it is still the live one.
    fn take_pending(&self, id: Uuid) -> Result<(), ResolveError> {
        let now = self.now();
        let mut shared = self.state.lock();
        permission::sweep_expired(&mut shared.pending, now, self.policy.approval_timeout);
        match shared.pending.as_ref() {
            Some(request) if request.id == id => {
                shared.pending = None;
                Ok(())
            }
            _ => Err(ResolveError::NoPendingRequest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::permission::PermissionRequest;
    use crate::testing::{face_at, jpeg_still, Harness};
    use porter_core::Embedding;
    use std::time::Duration;

    fn raise_request(h: &Harness) -> Uuid {
        let request = PermissionRequest::new(Embedding::new(vec![0.9, 0.1]), jpeg_still(), h.clock.now());
        let id = request.id;
        h.ctx.state.lock().pending = Some(request);
        id
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!("allow".parse::<PermissionAction>().unwrap(), PermissionAction::Allow);
        assert_eq!("allowonce".parse::<PermissionAction>().unwrap(), PermissionAction::AllowOnce);
        assert_eq!("Allow-Once".parse::<PermissionAction>().unwrap(), PermissionAction::AllowOnce);
        assert_eq!("deny".parse::<PermissionAction>().unwrap(), PermissionAction::Deny);
        assert!(matches!(
            "open-sesame".parse::<PermissionAction>(),
            Err(ResolveError::UnknownAction(s)) if s == "open-sesame"
        ));
    }

    #[test]
    fn test_allow_enrolls_logs_and_unlocks() {
        let h = Harness::new("resolve-allow");
        h.oracle.push_faces(vec![face_at(vec![0.2, 0.8])]);
        let id = raise_request(&h);

        let res = h.ctx.allow("carol").unwrap();
        assert_eq!(res.request_id, id);
        assert!(res.persisted);
        assert_eq!(res.unlock, Some(UnlockOutcome::Actuated));

        assert_eq!(h.ctx.known_names(), vec!["carol".to_string()]);
        let entries = h.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, h.clock.now().date_naive());
        assert_eq!(entries[0].1.name, "carol");
        assert_eq!(entries[0].1.kind, AccessKind::Permanent);
        assert_eq!(h.actuator.activations(), 1);
        assert!(!h.ctx.permission_status().active);
        assert_eq!(h.notifier.icons(), vec!["fa-user-plus".to_string()]);
    }

    #[test]
    fn test_allow_with_failed_save_still_admits() {
        let h = Harness::new("resolve-save-fail");
        // A directory where the gallery file should be makes the rename fail.
        std::fs::remove_file(h.dir.join("known_faces.json")).unwrap();
        std::fs::create_dir_all(h.dir.join("known_faces.json").join("blocker")).unwrap();
        h.oracle.push_faces(vec![face_at(vec![0.2, 0.8])]);
        raise_request(&h);

        let res = h.ctx.allow("carol").unwrap();
        assert!(!res.persisted);
        assert_eq!(res.message, "carol registered and access granted (not saved to disk)");
        assert_eq!(res.unlock, Some(UnlockOutcome::Actuated));
        assert_eq!(h.ctx.known_names(), vec!["carol".to_string()]);
        assert_eq!(h.actuator.activations(), 1);
        assert_eq!(h.audit.entries().len(), 1);
        assert!(!h.ctx.permission_status().active);
    }

    #[test]
    fn test_allow_once_uses_visitor_registry() {
        let h = Harness::new("resolve-once");
        h.oracle.push_faces(vec![face_at(vec![0.2, 0.8])]);
        raise_request(&h);

        let res = h.ctx.resolve(PermissionAction::AllowOnce, "dan").unwrap();
        assert_eq!(res.action, PermissionAction::AllowOnce);
        assert!(h.ctx.known_names().is_empty());
        assert_eq!(h.ctx.visitor_names(), vec!["dan".to_string()]);
        assert_eq!(h.audit.entries()[0].1.kind, AccessKind::Temporary);
        assert_eq!(h.actuator.activations(), 1);
    }

    #[test]
    fn test_deny_clears_without_unlock_or_log() {
        let h = Harness::new("resolve-deny");
        let id = raise_request(&h);

        let res = h.ctx.deny().unwrap();
        assert_eq!(res.request_id, id);
        assert_eq!(res.unlock, None);
        assert!(!h.ctx.permission_status().active);
        assert_eq!(h.actuator.activations(), 0);
        assert!(h.audit.entries().is_empty());
        assert_eq!(h.notifier.icons(), vec!["fa-user-slash".to_string()]);
    }

    #[test]
    fn test_nothing_to_resolve() {
        let h = Harness::new("resolve-none");
        assert!(matches!(h.ctx.allow("carol"), Err(ResolveError::NoPendingRequest)));
        assert!(matches!(h.ctx.allow_once("carol"), Err(ResolveError::NoPendingRequest)));
        assert!(matches!(h.ctx.deny(), Err(ResolveError::NoPendingRequest)));
    }

    #[test]
    fn test_expired_request_not_resolvable() {
        let h = Harness::new("resolve-expired");
        h.oracle.always(vec![face_at(vec![0.2, 0.8])]);
        raise_request(&h);
        h.clock.advance(Duration::from_secs(31));

        assert!(matches!(h.ctx.allow("carol"), Err(ResolveError::NoPendingRequest)));
        raise_request(&h);
        h.clock.advance(Duration::from_secs(31));
        assert!(matches!(h.ctx.deny(), Err(ResolveError::NoPendingRequest)));
        assert!(h.ctx.state.lock().pending.is_none());
        assert!(h.ctx.known_names().is_empty());
        assert_eq!(h.actuator.activations(), 0);
    }

    #[test]
    fn test_undecodable_still_leaves_request() {
        let h = Harness::new("resolve-badimg");
        let request = PermissionRequest::new(Embedding::new(vec![0.1]), b"not a jpeg".to_vec(), h.clock.now());
        h.ctx.state.lock().pending = Some(request);

        assert!(matches!(h.ctx.allow("carol"), Err(ResolveError::NoFaceImage(_))));
        assert!(h.ctx.permission_status().active);
        assert_eq!(h.oracle.calls(), 0);
    }

    #[test]
    fn test_no_embedding_leaves_request() {
        let h = Harness::new("resolve-noface");
        h.oracle.push_faces(vec![]);
        raise_request(&h);

        assert!(matches!(h.ctx.allow("carol"), Err(ResolveError::EmbeddingExtraction)));
        assert!(h.ctx.permission_status().active);
        assert!(h.ctx.known_names().is_empty());
        assert_eq!(h.actuator.activations(), 0);
    }

    #[test]
    fn test_oracle_failure_surfaces() {
        let h = Harness::new("resolve-oracle");
        h.oracle.push_error("model not loaded");
        raise_request(&h);
        assert!(matches!(h.ctx.allow("carol"), Err(ResolveError::Oracle(_))));
        assert!(h.ctx.permission_status().active);
    }

    #[test]
    fn test_blank_name_rejected() {
        let h = Harness::new("resolve-blank");
        raise_request(&h);
        assert!(matches!(h.ctx.allow("  "), Err(ResolveError::MissingName)));
        assert!(h.ctx.permission_status().active);
    }

    #[test]
    fn test_request_replaced_during_embedding_is_not_taken() {
        let h = Harness::new("resolve-replaced");
        h.oracle.push_faces(vec![face_at(vec![0.2, 0.8])]);
        let first = raise_request(&h);

        let (id, _) = h.ctx.pending_still().unwrap();
        assert_eq!(id, first);
        let second = raise_request(&h);
        assert!(matches!(h.ctx.take_pending(first), Err(ResolveError::NoPendingRequest)));
        assert_eq!(h.ctx.state.lock().pending.as_ref().map(|r| r.id), Some(second));
    }
}
