//! Deterministic stand-ins for the daemon's collaborators.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use image::{Rgb, RgbImage};
use porter_core::{BoundingBox, DetectedFace, Embedding, EmbeddingOracle, GalleryStore, OracleError, Tolerances};
use porter_hw::{Actuator, Frame, FrameError, FrameSource, RelayError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::audit::{AccessLogEntry, AuditError, AuditSink};
use crate::clock::Clock;
use crate::context::{AccessContext, Collaborators, Policy};
use crate::engine::{LoopTiming, SecurityAction};
use crate::notify::{Notification, NotificationSink};

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at_epoch() -> Self {
        Self {
            now: Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct CountingActuator {
    activations: AtomicU64,
    deactivations: AtomicU64,
    fail: bool,
}

impl CountingActuator {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> u64 {
        self.deactivations.load(Ordering::SeqCst)
    }

    fn outcome(&self) -> Result<(), RelayError> {
        if self.fail {
            return Err(RelayError::Drive {
                pin: 0,
                source: std::io::Error::new(std::io::ErrorKind::Other, "relay wired wrong"),
            });
        }
        Ok(())
    }
}

impl Actuator for CountingActuator {
    fn activate(&self) -> Result<(), RelayError> {
        self.outcome()?;
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deactivate(&self) -> Result<(), RelayError> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> String {
        "counting".into()
    }
}

/// Oracle answering from a queue, then from a fixed fallback.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<Vec<DetectedFace>, String>>>,
    fallback: Mutex<Vec<DetectedFace>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn push_faces(&self, faces: Vec<DetectedFace>) {
        self.replies.lock().unwrap().push_back(Ok(faces));
    }

    pub fn push_error(&self, message: &str) {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
    }

    /// Answer once the queue is drained.
    pub fn always(&self, faces: Vec<DetectedFace>) {
        *self.fallback.lock().unwrap() = faces;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingOracle for ScriptedOracle {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<DetectedFace>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(faces)) => Ok(faces),
            Some(Err(msg)) => Err(OracleError::Remote(msg)),
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn texts(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|n| n.text.clone()).collect()
    }

    pub fn icons(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|n| n.icon.clone()).collect()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    entries: Mutex<Vec<(NaiveDate, AccessLogEntry)>>,
}

impl MemoryAudit {
    pub fn entries(&self) -> Vec<(NaiveDate, AccessLogEntry)> {
        self.entries.lock().unwrap().clone()
    }
}

impl AuditSink for MemoryAudit {
    fn append_access_entry(&self, date: NaiveDate, entry: &AccessLogEntry) -> Result<(), AuditError> {
        self.entries.lock().unwrap().push((date, entry.clone()));
        Ok(())
    }

    fn entries_for(&self, date: NaiveDate) -> Result<Vec<AccessLogEntry>, AuditError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| *d == date)
            .map(|(_, e)| e.clone())
            .collect())
    }
}

/// Frames from a queue; optionally one frame forever once it drains.
pub struct QueueFrames {
    queue: VecDeque<Frame>,
    repeat: Option<Frame>,
}

impl QueueFrames {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            queue: frames.into(),
            repeat: None,
        }
    }

    pub fn repeating(frame: Frame) -> Self {
        Self {
            queue: VecDeque::new(),
            repeat: Some(frame),
        }
    }
}

impl FrameSource for QueueFrames {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        Ok(self.queue.pop_front().or_else(|| self.repeat.clone()))
    }
}

#[derive(Default)]
pub struct RecordingSecurityAction {
    calls: Mutex<Vec<Uuid>>,
}

impl RecordingSecurityAction {
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Ids of every request announced so far, in order.
    pub fn ids(&self) -> Vec<Uuid> {
        self.calls.lock().unwrap().clone()
    }
}

impl SecurityAction for RecordingSecurityAction {
    fn visitor_waiting(&self, request_id: Uuid, _created_at: DateTime<Utc>) {
        self.calls.lock().unwrap().push(request_id);
    }
}

pub fn bright_frame() -> Frame {
    Frame::new(RgbImage::from_pixel(64, 64, Rgb([180, 170, 160])), 1)
}

pub fn dark_frame() -> Frame {
    Frame::new(RgbImage::from_pixel(64, 64, Rgb([3, 3, 3])), 1)
}

pub fn face_at(values: Vec<f32>) -> DetectedFace {
    DetectedFace {
        bbox: BoundingBox {
            x: 16.0,
            y: 16.0,
            width: 24.0,
            height: 24.0,
        },
        embedding: Embedding::new(values),
    }
}

/// A small valid JPEG.
pub fn jpeg_still() -> Vec<u8> {
    porter_hw::encode_jpeg(&RgbImage::from_pixel(16, 16, Rgb([120, 110, 100]))).unwrap()
}

/// No hold and no global unlock cooldown, so scenario tests stay instant.
pub fn test_policy() -> Policy {
    Policy {
        unlock_hold: Duration::ZERO,
        unlock_cooldown: Duration::ZERO,
        known_cooldown: Duration::from_secs(20),
        unknown_cooldown: Duration::from_secs(23),
        approval_timeout: Duration::from_secs(30),
        tolerances: Tolerances::default(),
        metric: porter_core::DistanceMetric::Euclidean,
    }
}

pub fn test_timing() -> LoopTiming {
    LoopTiming {
        startup_delay: Duration::ZERO,
        no_frame: Duration::from_millis(1),
        no_face: Duration::from_millis(1),
        cooldown_poll: Duration::from_millis(1),
        pending_poll: Duration::from_millis(1),
        idle: Duration::from_millis(1),
        face_padding: 20,
        dark_frame_threshold: 0.95,
    }
}

/// A context wired to fakes, with galleries in a scratch directory.
pub struct Harness {
    pub ctx: Arc<AccessContext>,
    pub clock: Arc<ManualClock>,
    pub oracle: Arc<ScriptedOracle>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<MemoryAudit>,
    pub actuator: Arc<CountingActuator>,
    pub dir: PathBuf,
    policy: Policy,
}

impl Harness {
    pub fn new(tag: &str) -> Self {
        Self::with_policy(tag, test_policy())
    }

    pub fn with_policy(tag: &str, policy: Policy) -> Self {
        let dir = std::env::temp_dir().join(format!("porterd-{}-{tag}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let clock = Arc::new(ManualClock::at_epoch());
        let oracle = Arc::new(ScriptedOracle::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let audit = Arc::new(MemoryAudit::default());
        let actuator = Arc::new(CountingActuator::default());
        let collaborators = Collaborators {
            clock: clock.clone(),
            oracle: oracle.clone(),
            notifier: notifier.clone(),
            audit: audit.clone(),
            actuator: actuator.clone(),
        };

        Self {
            ctx: Arc::new(open_in(&dir, policy.clone(), collaborators)),
            clock,
            oracle,
            notifier,
            audit,
            actuator,
            dir,
            policy,
        }
    }

    /// A fresh context over the same files and fakes.
    pub fn reopen(&self) -> AccessContext {
        let collaborators = Collaborators {
            clock: self.clock.clone(),
            oracle: self.oracle.clone(),
            notifier: self.notifier.clone(),
            audit: self.audit.clone(),
            actuator: self.actuator.clone(),
        };
        open_in(&self.dir, self.policy.clone(), collaborators)
    }
}

fn open_in(dir: &Path, policy: Policy, collaborators: Collaborators) -> AccessContext {
    AccessContext::open(
        policy,
        collaborators,
        GalleryStore::new(dir.join("known_faces.json")),
        GalleryStore::new(dir.join("accessed_persons.json")),
    )
}
