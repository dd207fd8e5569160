use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;
use zbus::interface;
use zbus::object_server::SignalEmitter;

use crate::context::AccessContext;
use crate::engine::SecurityAction;
use crate::notify::NotificationFeed;
use crate::resolve::{PermissionAction, Resolution, ResolveError};

pub const BUS_NAME: &str = "org.porter.Porter1";
pub const OBJECT_PATH: &str = "/org/porter/Porter1";

/// D-Bus control surface of the access daemon.
///
/// Bus name: org.porter.Porter1
/// Object path: /org/porter/Porter1
pub struct PorterService {
    ctx: Arc<AccessContext>,
    feed: Arc<NotificationFeed>,
}

impl PorterService {
    pub fn new(ctx: Arc<AccessContext>, feed: Arc<NotificationFeed>) -> Self {
        Self { ctx, feed }
    }

    /// Run blocking context work off the async executor.
    async fn blocking<T, F>(&self, work: F) -> zbus::fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&AccessContext) -> T + Send + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        tokio::task::spawn_blocking(move || work(&ctx))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("worker task failed: {e}")))
    }
}

#[interface(name = "org.porter.Porter1")]
impl PorterService {
    /// Resolve the pending visitor: `allow`, `allowonce` or `deny`.
    async fn resolve_permission(&self, action: &str, name: &str) -> zbus::fdo::Result<String> {
        let action: PermissionAction = action.parse().map_err(to_fdo)?;
        tracing::info!(%action, name, "resolve_permission requested");
        let name = name.to_string();
        let result = self.blocking(move |ctx| ctx.resolve(action, &name)).await?;
        resolution_reply(result)
    }

    /// `{"active", "has_face_image", "timestamp"}` of the pending request.
    async fn permission_status(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.ctx.permission_status()).map_err(json_err)
    }

    /// JPEG still of the pending visitor.
    async fn face_image(&self) -> zbus::fdo::Result<Vec<u8>> {
        self.ctx
            .face_image()
            .ok_or_else(|| zbus::fdo::Error::FileNotFound("no pending face image".into()))
    }

    /// Access log entries for `YYYY-MM-DD`, or today (UTC) when empty.
    async fn access_log(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = parse_date(date, self.ctx.now())?;
        let entries = self
            .blocking(move |ctx| ctx.access_log(date))
            .await?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(serde_json::json!({ "date": date.to_string(), "entries": entries }).to_string())
    }

    async fn notifications(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.feed.view()).map_err(json_err)
    }

    async fn mark_notifications_read(&self) -> zbus::fdo::Result<()> {
        self.feed.mark_all_read();
        Ok(())
    }

    async fn list_known(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.ctx.known_names()).map_err(json_err)
    }

    async fn list_visitors(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.ctx.visitor_names()).map_err(json_err)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.ctx.status()).map_err(json_err)
    }

    /// Emitted when an unknown visitor is waiting for a decision.
    #[zbus(signal)]
    async fn visitor_waiting(emitter: &SignalEmitter<'_>, request_id: &str, created_at: &str) -> zbus::Result<()>;
}

fn json_err(e: serde_json::Error) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("serialization failed: {e}"))
}

fn to_fdo(e: ResolveError) -> zbus::fdo::Error {
    match e {
        ResolveError::UnknownAction(_) | ResolveError::MissingName => zbus::fdo::Error::InvalidArgs(e.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

/// JSON reply for a resolution. A missing or expired request is a normal answer.
fn resolution_reply(result: Result<Resolution, ResolveError>) -> zbus::fdo::Result<String> {
    let reply = match result {
        Ok(res) => serde_json::json!({
            "status": if res.action == PermissionAction::Deny { "denied" } else { "success" },
            "message": res.message,
            "request_id": res.request_id.to_string(),
            "name": res.name,
            "persisted": res.persisted,
            "unlock": res.unlock,
        }),
        Err(ResolveError::NoPendingRequest) => serde_json::json!({
            "status": "nothing_to_resolve",
            "message": "No pending permission request",
        }),
        Err(e) => return Err(to_fdo(e)),
    };
    Ok(reply.to_string())
}

fn parse_date(date: &str, now: DateTime<Utc>) -> zbus::fdo::Result<NaiveDate> {
    let date = date.trim();
    if date.is_empty() {
        return Ok(now.date_naive());
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad date '{date}': {e}")))
}

/// Announces new visitor requests as a D-Bus signal.
///
/// Called from the engine thread; emission is handed to the tokio runtime.
pub struct DbusSecurityAction {
    conn: zbus::Connection,
    runtime: tokio::runtime::Handle,
}

impl DbusSecurityAction {
    pub fn new(conn: zbus::Connection, runtime: tokio::runtime::Handle) -> Self {
        Self { conn, runtime }
    }
}

impl SecurityAction for DbusSecurityAction {
    fn visitor_waiting(&self, request_id: Uuid, created_at: DateTime<Utc>) {
        let conn = self.conn.clone();
        self.runtime.spawn(async move {
            let emitted = match SignalEmitter::new(&conn, OBJECT_PATH) {
                Ok(emitter) => {
                    PorterService::visitor_waiting(&emitter, &request_id.to_string(), &created_at.to_rfc3339()).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = emitted {
                tracing::warn!(error = %e, "failed to emit VisitorWaiting");
            }
        });
    }
}
