use chrono::{DateTime, Utc};
use porter_core::{BoundingBox, DetectedFace, Matcher, Tier};
use porter_hw::{Frame, FrameError, FrameSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

use crate::context::AccessContext;
use crate::notify::Notification;
use crate::permission::{self, PermissionRequest};

/// Longest uninterrupted sleep; bounds shutdown latency.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Sleep intervals and frame handling knobs of the worker loop.
#[derive(Debug, Clone)]
pub struct LoopTiming {
    pub startup_delay: Duration,
    pub no_frame: Duration,
    pub no_face: Duration,
    pub cooldown_poll: Duration,
    pub pending_poll: Duration,
    pub idle: Duration,
    pub face_padding: u32,
    pub dark_frame_threshold: f32,
}

/// Hook invoked when a new visitor request is raised.
pub trait SecurityAction: Send + Sync {
    fn visitor_waiting(&self, request_id: Uuid, created_at: DateTime<Utc>);
}

/// What one pass of the loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum Cycle {
    /// Unlock in progress or within the global unlock cooldown.
    CoolingDown,
    /// A visitor request is waiting for the operator.
    AwaitingOperator,
    NoFrame,
    NoFace,
    Admitted { name: String, tier: Tier, distance: f32 },
    VisitorPending,
    /// Faces seen, but every trigger was inside its cooldown.
    Suppressed,
}

impl Cycle {
    pub fn backoff(&self, timing: &LoopTiming) -> Duration {
        match self {
            Cycle::CoolingDown => timing.cooldown_poll,
            Cycle::AwaitingOperator | Cycle::VisitorPending => timing.pending_poll,
            Cycle::NoFrame => timing.no_frame,
            Cycle::NoFace => timing.no_face,
            Cycle::Admitted { .. } | Cycle::Suppressed => timing.idle,
        }
    }
}

/// The access state machine. Owns the frame source; shares everything
/// else through the context.
pub struct AccessEngine {
    ctx: Arc<AccessContext>,
    frames: Box<dyn FrameSource>,
    timing: LoopTiming,
    security: Option<Arc<dyn SecurityAction>>,
}

impl AccessEngine {
    pub fn new(
        ctx: Arc<AccessContext>,
        frames: Box<dyn FrameSource>,
        timing: LoopTiming,
        security: Option<Arc<dyn SecurityAction>>,
    ) -> Self {
        Self {
            ctx,
            frames,
            timing,
            security,
        }
    }

    /// Run one cycle. Blocks for the unlock hold when a known face is admitted.
    pub fn step(&mut self) -> Cycle {
        let policy = self.ctx.policy();
        {
            let now = self.ctx.now();
            let mut shared = self.ctx.state.lock();
            if shared.unlock.blocks_scanning(now, policy.unlock_cooldown) {
                return Cycle::CoolingDown;
            }
            permission::sweep_expired(&mut shared.pending, now, policy.approval_timeout);
            if shared.pending.is_some() {
                return Cycle::AwaitingOperator;
            }
        }

        let frame = match self.frames.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Cycle::NoFrame,
            Err(e) => {
                tracing::debug!(error = %e, "frame unavailable");
                return Cycle::NoFrame;
            }
        };
        if frame.is_dark(self.timing.dark_frame_threshold) {
            tracing::debug!(seq = frame.sequence, "dark frame skipped");
            return Cycle::NoFrame;
        }

        let faces = match self.ctx.oracle.detect(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "embedding oracle failed");
                return Cycle::NoFrame;
            }
        };
        if faces.is_empty() {
            tracing::debug!(seq = frame.sequence, "no face");
            return Cycle::NoFace;
        }

        // Snapshot only; matching runs without the lock.
        let gallery = self.ctx.state.lock().known.snapshot();
        let matcher = policy.matcher();
        let mut unknown: Option<&DetectedFace> = None;

        for face in &faces {
            let result = matcher.evaluate(&face.embedding, &gallery);
            let Some(name) = result.candidate.filter(|_| result.tier.is_accepted()) else {
                unknown.get_or_insert(face);
                continue;
            };

            let now = self.ctx.now();
            if !self.ctx.state.lock().ledger.claim_known(&name, now, policy.known_cooldown) {
                tracing::debug!(name = %name, "known face still cooling down");
                continue;
            }
            tracing::info!(name = %name, distance = result.distance, tier = %result.tier, "known face admitted");
            self.ctx.notifier.notify(Notification::known_entry(&name, result.tier));
            self.ctx.unlock();
            return Cycle::Admitted {
                name,
                tier: result.tier,
                distance: result.distance,
            };
        }

        match unknown {
            Some(face) => self.raise_visitor(&frame, face),
            None => Cycle::Suppressed,
        }
    }

    fn raise_visitor(&self, frame: &Frame, face: &DetectedFace) -> Cycle {
        let policy = self.ctx.policy();
        let now = self.ctx.now();
        if !self.ctx.state.lock().ledger.unknown_ready(now, policy.unknown_cooldown) {
            return Cycle::Suppressed;
        }

        let still = match capture_still(frame, &face.bbox, self.timing.face_padding) {
            Ok(still) => still,
            Err(e) => {
                tracing::warn!(error = %e, "could not capture visitor still");
                return Cycle::Suppressed;
            }
        };

        let request = PermissionRequest::new(face.embedding.clone(), still, now);
        let (id, created_at) = (request.id, request.created_at);
        {
            let mut shared = self.ctx.state.lock();
            if shared.pending.is_some() {
                return Cycle::AwaitingOperator;
            }
            shared.pending = Some(request);
            shared.ledger.record_unknown(now);
        }
        tracing::info!(request = %id, "unknown visitor; awaiting operator");

        self.ctx.notifier.notify(Notification::unknown_visitor());
        if let Some(security) = &self.security {
            security.visitor_waiting(id, created_at);
        }
        Cycle::VisitorPending
    }

    /// Loop until `stop` is set. Checked at least every 100 ms.
    pub fn run(&mut self, stop: &AtomicBool) {
        tracing::info!("engine thread started");
        if sleep_unless_stopped(self.timing.startup_delay, stop) {
            while !stop.load(Ordering::Relaxed) {
                let cycle = self.step();
                tracing::trace!(?cycle, "cycle");
                if !sleep_unless_stopped(cycle.backoff(&self.timing), stop) {
                    break;
                }
            }
        }
        tracing::info!("engine thread exiting");
    }
}

/// Padded crop of the face region, JPEG encoded.
fn capture_still(frame: &Frame, bbox: &BoundingBox, pad: u32) -> Result<Vec<u8>, FrameError> {
    let x = bbox.x.max(0.0) as u32;
    let y = bbox.y.max(0.0) as u32;
    let width = (bbox.width + bbox.x.min(0.0)).max(0.0) as u32;
    let height = (bbox.height + bbox.y.min(0.0)).max(0.0) as u32;
    let crop = frame.crop_padded(x, y, width, height, pad)?;
    porter_hw::encode_jpeg(&crop)
}

/// Returns false if `stop` was set before `total` elapsed.
fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) -> bool {
    let mut left = total;
    while !left.is_zero() {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let slice = left.min(STOP_POLL);
        std::thread::sleep(slice);
        left -= slice;
    }
    !stop.load(Ordering::Relaxed)
}

/// Handle to the running worker thread.
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl EngineHandle {
    /// Signal the worker and wait for the current cycle to finish.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.thread.join().is_err() {
            tracing::error!("engine thread panicked");
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
pub fn spawn_engine(mut engine: AccessEngine) -> std::io::Result<EngineHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);
    let thread = std::thread::Builder::new()
        .name("porter-engine".into())
        .spawn(move || engine.run(&thread_stop))?;
    Ok(EngineHandle { stop, thread })
}
