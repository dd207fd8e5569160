//! Known-face gallery and its on-disk record.
//!
//! The persisted form is `{"encodings": [[f32...]...], "names": [String...]}`
//! with the two arrays parallel. The same schema backs both the durable
//! gallery and the temporary-visitor registry, at different paths.

use crate::types::{Embedding, KnownFace};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery write failed for {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("corrupt gallery record: {0}")]
    Corrupt(String),
}

/// Whether an enrollment created a new identity or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enrollment {
    Added,
    Updated,
}

/// Immutable view of the gallery for a match round.
pub type GallerySnapshot = Arc<Vec<KnownFace>>;

/// In-memory gallery. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    faces: Arc<Vec<KnownFace>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Embedding> {
        self.faces.iter().find(|f| f.name == name).map(|f| &f.embedding)
    }

    /// Enrolled names in enrollment order.
    pub fn names(&self) -> Vec<String> {
        self.faces.iter().map(|f| f.name.clone()).collect()
    }

    /// Insert or overwrite the embedding for `name`.
    pub fn enroll(&mut self, name: &str, embedding: Embedding) -> Enrollment {
        let faces = Arc::make_mut(&mut self.faces);
        if let Some(existing) = faces.iter_mut().find(|f| f.name == name) {
            existing.embedding = embedding;
            Enrollment::Updated
        } else {
            faces.push(KnownFace {
                name: name.to_string(),
                embedding,
            });
            Enrollment::Added
        }
    }

    /// Cheap shared copy; later enrollments do not affect it.
    pub fn snapshot(&self) -> GallerySnapshot {
        Arc::clone(&self.faces)
    }

    fn to_record(&self) -> GalleryRecord {
        GalleryRecord {
            encodings: self.faces.iter().map(|f| f.embedding.values.clone()).collect(),
            names: self.names(),
        }
    }

    fn from_record(record: GalleryRecord) -> Result<Self, GalleryError> {
        if record.encodings.len() != record.names.len() {
            return Err(GalleryError::Corrupt(format!(
                "{} encodings but {} names",
                record.encodings.len(),
                record.names.len()
            )));
        }
        let mut gallery = Gallery::new();
        for (name, values) in record.names.into_iter().zip(record.encodings) {
            if gallery.enroll(&name, Embedding::new(values)) == Enrollment::Updated {
                return Err(GalleryError::Corrupt(format!("duplicate name {name:?}")));
            }
        }
        Ok(gallery)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GalleryRecord {
    encodings: Vec<Vec<f32>>,
    names: Vec<String>,
}

/// File-backed persistence for a [`Gallery`].
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the gallery. Never fails: a missing, empty or corrupt record
    /// yields an empty gallery and a freshly written empty record. Any other
    /// read error yields an empty gallery and leaves the file untouched.
    pub fn load(&self) -> Gallery {
        let reason = match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => "record is empty".to_string(),
            Ok(bytes) => match serde_json::from_slice::<GalleryRecord>(&bytes)
                .map_err(GalleryError::from)
                .and_then(Gallery::from_record)
            {
                Ok(gallery) => {
                    tracing::info!(path = %self.path.display(), faces = gallery.len(), "gallery loaded");
                    return gallery;
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "gallery unreadable; reinitializing");
                    e.to_string()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => "no record found".to_string(),
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "gallery not readable; starting empty without rewriting");
                return Gallery::new();
            }
        };

        tracing::info!(path = %self.path.display(), reason = %reason, "starting with empty gallery");
        let gallery = Gallery::new();
        if let Err(e) = self.save(&gallery) {
            tracing::error!(error = %e, "failed to write empty gallery record");
        }
        gallery
    }

    /// Durably write the gallery (temp file + rename).
    pub fn save(&self, gallery: &Gallery) -> Result<(), GalleryError> {
        let json = serde_json::to_vec(&gallery.to_record())?;
        let write_err = |source| GalleryError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &json).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        tracing::debug!(path = %self.path.display(), faces = gallery.len(), "gallery saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("porter-gallery-{}-{tag}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_enroll_is_idempotent_on_name() {
        let mut gallery = Gallery::new();
        assert_eq!(gallery.enroll("alice", Embedding::new(vec![1.0, 0.0])), Enrollment::Added);
        assert_eq!(gallery.enroll("alice", Embedding::new(vec![0.0, 1.0])), Enrollment::Updated);
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.get("alice").unwrap().values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_enrollment() {
        let mut gallery = Gallery::new();
        gallery.enroll("alice", Embedding::new(vec![1.0]));
        let snap = gallery.snapshot();
        gallery.enroll("bob", Embedding::new(vec![2.0]));
        gallery.enroll("alice", Embedding::new(vec![3.0]));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].embedding.values, vec![1.0]);
        assert_eq!(gallery.len(), 2);
    }

    #[test]
    fn test_save_then_load() {
        let dir = scratch_dir("roundtrip");
        let store = GalleryStore::new(dir.join("known_faces.json"));
        let mut gallery = Gallery::new();
        gallery.enroll("alice", Embedding::new(vec![0.1, 0.2]));
        gallery.enroll("bob", Embedding::new(vec![0.3, 0.4]));
        store.save(&gallery).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.names(), vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(loaded.get("bob").unwrap().values, vec![0.3, 0.4]);
    }

    #[test]
    fn test_record_schema_is_parallel_arrays() {
        let dir = scratch_dir("schema");
        let store = GalleryStore::new(dir.join("g.json"));
        let mut gallery = Gallery::new();
        gallery.enroll("alice", Embedding::new(vec![0.5]));
        store.save(&gallery).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["names"], serde_json::json!(["alice"]));
        assert_eq!(raw["encodings"], serde_json::json!([[0.5]]));
    }

    #[test]
    fn test_missing_record_is_created_empty() {
        let dir = scratch_dir("missing");
        let store = GalleryStore::new(dir.join("nested").join("g.json"));
        let gallery = store.load();
        assert!(gallery.is_empty());
        assert!(store.path().exists());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_record_self_heals() {
        let dir = scratch_dir("corrupt");
        let store = GalleryStore::new(dir.join("g.json"));
        fs::write(store.path(), b"{not json").unwrap();
        assert!(store.load().is_empty());

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["names"], serde_json::json!([]));
    }

    #[test]
    fn test_empty_file_self_heals() {
        let dir = scratch_dir("empty");
        let store = GalleryStore::new(dir.join("g.json"));
        fs::write(store.path(), b"").unwrap();
        assert!(store.load().is_empty());
        assert!(fs::metadata(store.path()).unwrap().len() > 0);
    }

    #[test]
    fn test_read_error_does_not_overwrite_record() {
        let dir = scratch_dir("read-error");
        let path = dir.join("g.json");
        // A directory at the record path reads with an error other than NotFound.
        fs::create_dir_all(path.join("keep")).unwrap();
        let store = GalleryStore::new(&path);
        assert!(store.load().is_empty());
        assert!(path.is_dir());
        assert!(path.join("keep").is_dir());
        // No rewrite was attempted.
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_mismatched_arrays_are_corrupt() {
        let dir = scratch_dir("mismatch");
        let store = GalleryStore::new(dir.join("g.json"));
        fs::write(store.path(), br#"{"encodings": [[1.0]], "names": ["a", "b"]}"#).unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let dir = scratch_dir("unwritable");
        let blocker = dir.join("file");
        fs::write(&blocker, b"x").unwrap();
        // A regular file where a directory is expected.
        let store = GalleryStore::new(blocker.join("g.json"));
        let err = store.save(&Gallery::new()).unwrap_err();
        assert!(matches!(err, GalleryError::Write { .. }));
    }
}
