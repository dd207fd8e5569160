//! porter-core: identity gallery and access matching.
//!
//! Holds the enrolled face gallery, the multi-tier match policy that turns
//! embedding distances into accept/reject decisions, and the interface to
//! the external embedding oracle.

pub mod gallery;
pub mod matcher;
pub mod oracle;
pub mod types;

pub use gallery::{Enrollment, Gallery, GalleryError, GallerySnapshot, GalleryStore};
pub use matcher::{DistanceMetric, MatchResult, Matcher, Tier, TieredMatcher, Tolerances};
pub use oracle::{EmbeddingOracle, OracleError};
pub use types::{BoundingBox, DetectedFace, Embedding, KnownFace};
