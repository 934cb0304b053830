//! Nearest-neighbour matching of a probe embedding against the gallery.
//!
//! Distances to every enrolled row are computed in one pass over the gallery
//! matrix. The nearest row is accepted iff its distance is strictly below the
//! threshold; exact ties go to the lowest member id.

use crate::gallery::GallerySnapshot;
use crate::types::{Embedding, MatchDecision};
use ndarray::{Array1, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("no members with face data found")]
    EmptyGallery,
    #[error("probe has {actual} dimensions, gallery expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// L2 distance between raw vectors.
    #[default]
    Euclidean,
    /// `1 - cosine similarity`, in [0, 2].
    Cosine,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Cosine => "cosine",
        })
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery snapshot.
pub trait Matcher: Send + Sync {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &GallerySnapshot,
        threshold: f32,
    ) -> Result<MatchDecision, MatchError>;

    fn metric(&self) -> DistanceMetric;
}

pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &GallerySnapshot,
        threshold: f32,
    ) -> Result<MatchDecision, MatchError> {
        let probe = checked_probe(probe, gallery)?;
        let diff = gallery.matrix() - &probe.insert_axis(Axis(0));
        let distances = diff.mapv(|x| x * x).sum_axis(Axis(1)).mapv(f32::sqrt);
        Ok(decide(&distances, gallery, threshold))
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Euclidean
    }
}

pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &GallerySnapshot,
        threshold: f32,
    ) -> Result<MatchDecision, MatchError> {
        let probe = checked_probe(probe, gallery)?;
        let probe_norm = probe.dot(&probe).sqrt();
        let dots = gallery.matrix().dot(&probe);

        // A zero vector on either side has similarity 0, i.e. distance 1.
        let mut distances = Array1::<f32>::ones(gallery.len());
        for ((d, dot), norm) in distances.iter_mut().zip(dots.iter()).zip(gallery.row_norms()) {
            let denom = norm * probe_norm;
            if denom > 0.0 {
                *d = 1.0 - dot / denom;
            }
        }
        Ok(decide(&distances, gallery, threshold))
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }
}

pub fn matcher_for(metric: DistanceMetric) -> Box<dyn Matcher> {
    match metric {
        DistanceMetric::Euclidean => Box::new(EuclideanMatcher),
        DistanceMetric::Cosine => Box::new(CosineMatcher),
    }
}

fn checked_probe<'a>(
    probe: &'a Embedding,
    gallery: &GallerySnapshot,
) -> Result<ArrayView1<'a, f32>, MatchError> {
    if gallery.is_empty() {
        return Err(MatchError::EmptyGallery);
    }
    if probe.dimension() != gallery.dimension() {
        return Err(MatchError::DimensionMismatch {
            expected: gallery.dimension(),
            actual: probe.dimension(),
        });
    }
    Ok(ArrayView1::from(probe.values.as_slice()))
}

/// Pick the nearest row and apply the acceptance threshold.
fn decide(distances: &Array1<f32>, gallery: &GallerySnapshot, threshold: f32) -> MatchDecision {
    // Rows are sorted by member id and only a strictly smaller distance
    // replaces the current best, so ties resolve to the lowest id. NaN never wins.
    let mut best: Option<(usize, f32)> = None;
    for (idx, &d) in distances.iter().enumerate() {
        if best.map_or(!d.is_nan(), |(_, best_d)| d < best_d) {
            best = Some((idx, d));
        }
    }

    match best {
        Some((idx, distance)) if distance < threshold => MatchDecision {
            matched: true,
            member_id: Some(gallery.member_ids()[idx]),
            distance,
            confidence: (1.0 - distance).clamp(0.0, 1.0),
        },
        Some((_, distance)) => MatchDecision::no_match(distance),
        None => MatchDecision::no_match(f32::INFINITY),
    }
}
