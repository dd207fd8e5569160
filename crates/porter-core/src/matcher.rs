//! Multi-tier match policy.
//!
//! A query is compared against every gallery entry. Entries closer than the
//! candidate cut form the candidate set; the closest candidate is then graded
//! against the strict/normal/loose ladder. Any grade below `loose` is
//! accepted; the grade itself only feeds audit and notification text.

use crate::types::{Embedding, KnownFace};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence bucket assigned to the best candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Strict,
    Normal,
    Loose,
    None,
}

impl Tier {
    /// Whether this tier counts as a known face.
    pub fn is_accepted(self) -> bool {
        !matches!(self, Tier::None)
    }

    /// Human confidence label used in notifications and logs.
    pub fn confidence(self) -> &'static str {
        match self {
            Tier::Strict => "high",
            Tier::Normal => "medium",
            Tier::Loose => "low",
            Tier::None => "none",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.confidence())
    }
}

/// How distances between embeddings are measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
}

impl DistanceMetric {
    /// Distance between two embeddings. Mismatched dimensions never match.
    pub fn distance(self, a: &Embedding, b: &Embedding) -> f32 {
        if a.dim() != b.dim() {
            return f32::INFINITY;
        }
        match self {
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::Cosine => a.cosine_distance(b),
        }
    }
}

/// Tolerance ladder. Must satisfy `0 < strict < normal < loose`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    pub strict: f32,
    pub normal: f32,
    pub loose: f32,
    /// Candidate-generation cut. Defaults to `normal`.
    pub candidate: f32,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            strict: 0.45,
            normal: 0.55,
            loose: 0.65,
            candidate: 0.55,
        }
    }
}

impl Tolerances {
    /// Check ordering and positivity.
    pub fn is_valid(&self) -> bool {
        self.strict > 0.0
            && self.strict < self.normal
            && self.normal < self.loose
            && self.candidate > 0.0
    }

    /// Grade a distance. Anything at or above `loose` is `Tier::None`.
    pub fn classify(&self, distance: f32) -> Tier {
        if distance < self.strict {
            Tier::Strict
        } else if distance < self.normal {
            Tier::Normal
        } else if distance < self.loose {
            Tier::Loose
        } else {
            Tier::None
        }
    }
}

/// Outcome of evaluating one query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Distance to the closest gallery entry (infinite for an empty gallery).
    pub distance: f32,
    pub tier: Tier,
    /// Name of the accepted identity. `None` whenever `tier` is `None`.
    pub candidate: Option<String>,
}

impl MatchResult {
    fn none(distance: f32) -> Self {
        Self {
            distance,
            tier: Tier::None,
            candidate: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.tier.is_accepted()
    }
}

/// Strategy for comparing a query embedding against a gallery.
pub trait Matcher {
    fn evaluate(&self, query: &Embedding, gallery: &[KnownFace]) -> MatchResult;
}

/// Three-tier distance matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct TieredMatcher {
    pub tolerances: Tolerances,
    pub metric: DistanceMetric,
}

impl TieredMatcher {
    pub fn new(tolerances: Tolerances, metric: DistanceMetric) -> Self {
        Self { tolerances, metric }
    }
}

impl Matcher for TieredMatcher {
    fn evaluate(&self, query: &Embedding, gallery: &[KnownFace]) -> MatchResult {
        let mut closest = f32::INFINITY;
        let mut best: Option<(usize, f32)> = None;

        // Every entry is visited; no early exit on a strict hit.
        for (i, face) in gallery.iter().enumerate() {
            let d = self.metric.distance(query, &face.embedding);
            closest = closest.min(d);
            if d >= self.tolerances.candidate {
                continue;
            }
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }

        let Some((idx, distance)) = best else {
            return MatchResult::none(closest);
        };

        match self.tolerances.classify(distance) {
            Tier::None => MatchResult::none(distance),
            tier => MatchResult {
                distance,
                tier,
                candidate: Some(gallery[idx].name.clone()),
            },
        }
    }
}
