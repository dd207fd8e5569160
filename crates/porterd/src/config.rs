use porter_core::{DistanceMetric, Tolerances};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::context::Policy;
use crate::engine::LoopTiming;

const DEFAULT_CONFIG_PATH: &str = "/etc/porter/porterd.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("tolerances must satisfy 0 < strict < normal < loose (got {strict}/{normal}/{loose})")]
    InvalidTolerances { strict: f32, normal: f32, loose: f32 },
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `PORTER_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Still written by the external recorder.
    pub frame_path: PathBuf,
    /// Unix socket of the embedding service.
    pub oracle_socket: PathBuf,
    pub oracle_timeout_ms: u64,
    /// Durable known-face gallery.
    pub gallery_path: PathBuf,
    /// Registry of visitors admitted once.
    pub visitors_path: PathBuf,
    /// SQLite access log.
    pub audit_db_path: PathBuf,
    /// GPIO line of the door relay. Unset runs the simulated relay.
    pub relay_gpio: Option<u32>,
    pub relay_active_low: bool,
    pub unlock_hold_secs: u64,
    /// Global pause on scanning after any unlock.
    pub unlock_cooldown_secs: u64,
    /// Minimum gap between admissions of the same identity.
    pub known_cooldown_secs: u64,
    /// Minimum gap between unknown-visitor requests.
    pub unknown_cooldown_secs: u64,
    pub approval_timeout_secs: u64,
    pub strict_tolerance: f32,
    pub normal_tolerance: f32,
    pub loose_tolerance: f32,
    /// Candidate-generation cut; falls back to `normal_tolerance`.
    pub candidate_tolerance: Option<f32>,
    pub distance_metric: DistanceMetric,
    pub face_padding_px: u32,
    pub dark_frame_threshold: f32,
    pub startup_delay_secs: u64,
    pub no_frame_delay_ms: u64,
    pub no_face_delay_ms: u64,
    pub cooldown_poll_ms: u64,
    pub pending_poll_ms: u64,
    pub idle_delay_ms: u64,
    pub notification_queue: usize,
    pub notification_history: usize,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("porter");

        Self {
            frame_path: PathBuf::from("/run/porter/frame.jpg"),
            oracle_socket: PathBuf::from("/run/porter/embedder.sock"),
            oracle_timeout_ms: 5000,
            gallery_path: data_dir.join("known_faces.json"),
            visitors_path: data_dir.join("accessed_persons.json"),
            audit_db_path: data_dir.join("access_log.db"),
            relay_gpio: None,
            relay_active_low: false,
            unlock_hold_secs: 5,
            unlock_cooldown_secs: 15,
            known_cooldown_secs: 23,
            unknown_cooldown_secs: 23,
            approval_timeout_secs: 30,
            strict_tolerance: 0.45,
            normal_tolerance: 0.55,
            loose_tolerance: 0.65,
            candidate_tolerance: None,
            distance_metric: DistanceMetric::Euclidean,
            face_padding_px: 20,
            dark_frame_threshold: 0.95,
            startup_delay_secs: 5,
            no_frame_delay_ms: 100,
            no_face_delay_ms: 200,
            cooldown_poll_ms: 500,
            pending_poll_ms: 1000,
            idle_delay_ms: 200,
            notification_queue: 64,
            notification_history: 20,
            session_bus: false,
        }
    }
}

impl Config {
    /// Load from `PORTER_CONFIG` (or the default path if present), then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("PORTER_CONFIG").map(PathBuf::from).ok().or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            default.exists().then_some(default)
        });

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn apply_env(&mut self) {
        env_path("PORTER_FRAME_PATH", &mut self.frame_path);
        env_path("PORTER_ORACLE_SOCKET", &mut self.oracle_socket);
        env_path("PORTER_GALLERY_PATH", &mut self.gallery_path);
        env_path("PORTER_VISITORS_PATH", &mut self.visitors_path);
        env_path("PORTER_AUDIT_DB_PATH", &mut self.audit_db_path);
        env_parse("PORTER_ORACLE_TIMEOUT_MS", &mut self.oracle_timeout_ms);
        if let Some(pin) = env_value("PORTER_RELAY_GPIO") {
            self.relay_gpio = Some(pin);
        }
        env_flag("PORTER_RELAY_ACTIVE_LOW", &mut self.relay_active_low);
        env_parse("PORTER_UNLOCK_HOLD_SECS", &mut self.unlock_hold_secs);
        env_parse("PORTER_UNLOCK_COOLDOWN_SECS", &mut self.unlock_cooldown_secs);
        env_parse("PORTER_KNOWN_COOLDOWN_SECS", &mut self.known_cooldown_secs);
        env_parse("PORTER_UNKNOWN_COOLDOWN_SECS", &mut self.unknown_cooldown_secs);
        env_parse("PORTER_APPROVAL_TIMEOUT_SECS", &mut self.approval_timeout_secs);
        env_parse("PORTER_STRICT_TOLERANCE", &mut self.strict_tolerance);
        env_parse("PORTER_NORMAL_TOLERANCE", &mut self.normal_tolerance);
        env_parse("PORTER_LOOSE_TOLERANCE", &mut self.loose_tolerance);
        if let Some(cut) = env_value("PORTER_CANDIDATE_TOLERANCE") {
            self.candidate_tolerance = Some(cut);
        }
        match std::env::var("PORTER_DISTANCE_METRIC").as_deref() {
            Ok("euclidean") => self.distance_metric = DistanceMetric::Euclidean,
            Ok("cosine") => self.distance_metric = DistanceMetric::Cosine,
            Ok(other) => tracing::warn!(value = other, "ignoring unknown PORTER_DISTANCE_METRIC"),
            Err(_) => {}
        }
        env_parse("PORTER_FACE_PADDING_PX", &mut self.face_padding_px);
        env_parse("PORTER_DARK_FRAME_THRESHOLD", &mut self.dark_frame_threshold);
        env_parse("PORTER_STARTUP_DELAY_SECS", &mut self.startup_delay_secs);
        env_parse("PORTER_PENDING_POLL_MS", &mut self.pending_poll_ms);
        env_parse("PORTER_NOTIFICATION_HISTORY", &mut self.notification_history);
        env_flag("PORTER_SESSION_BUS", &mut self.session_bus);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerances().is_valid() {
            return Err(ConfigError::InvalidTolerances {
                strict: self.strict_tolerance,
                normal: self.normal_tolerance,
                loose: self.loose_tolerance,
            });
        }
        Ok(())
    }

    pub fn tolerances(&self) -> Tolerances {
        Tolerances {
            strict: self.strict_tolerance,
            normal: self.normal_tolerance,
            loose: self.loose_tolerance,
            candidate: self.candidate_tolerance.unwrap_or(self.normal_tolerance),
        }
    }

    /// Decision-policy parameters for the access context.
    pub fn policy(&self) -> Policy {
        Policy {
            unlock_hold: Duration::from_secs(self.unlock_hold_secs),
            unlock_cooldown: Duration::from_secs(self.unlock_cooldown_secs),
            known_cooldown: Duration::from_secs(self.known_cooldown_secs),
            unknown_cooldown: Duration::from_secs(self.unknown_cooldown_secs),
            approval_timeout: Duration::from_secs(self.approval_timeout_secs),
            tolerances: self.tolerances(),
            metric: self.distance_metric,
        }
    }

    /// Sleep intervals of the engine loop.
    pub fn loop_timing(&self) -> LoopTiming {
        LoopTiming {
            startup_delay: Duration::from_secs(self.startup_delay_secs),
            no_frame: Duration::from_millis(self.no_frame_delay_ms),
            no_face: Duration::from_millis(self.no_face_delay_ms),
            cooldown_poll: Duration::from_millis(self.cooldown_poll_ms),
            pending_poll: Duration::from_millis(self.pending_poll_ms),
            idle: Duration::from_millis(self.idle_delay_ms),
            face_padding: self.face_padding_px,
            dark_frame_threshold: self.dark_frame_threshold,
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}

fn env_value<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Some(v) = env_value(key) {
        *slot = v;
    }
}

fn env_path(key: &str, slot: &mut PathBuf) {
    if let Ok(v) = std::env::var(key) {
        *slot = PathBuf::from(v);
    }
}

fn env_flag(key: &str, slot: &mut bool) {
    if let Ok(v) = std::env::var(key) {
        *slot = v != "0";
    }
}
