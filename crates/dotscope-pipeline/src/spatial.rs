//! Spatial statistics over dot centroids.
//!
//! None of these are used by the pipeline itself. They cover what a
//! consumer of the centroid list typically computes next: how far apart
//! the dots are and how those distances are distributed.

use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

use crate::types::{PipelineError, Point};

/// A centroid tagged with its index in the input slice.
type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Condensed pairwise Euclidean distances.
///
/// Returns `n * (n - 1) / 2` values in row-major upper-triangle order:
/// `d(0,1), d(0,2), ..., d(0,n-1), d(1,2), ...`.
#[must_use]
pub fn pairwise_distances(points: &[Point]) -> Vec<f64> {
    let n = points.len();
    let mut out = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for (i, &a) in points.iter().enumerate() {
        out.extend(points[i + 1..].iter().map(|&b| a.distance(b)));
    }
    out
}

/// Distances from every point to its `k` nearest other points.
///
/// Entry `i` lists the distances for `points[i]` in ascending order.
/// `k` is capped at `n - 1`. Returns an empty vector when `k == 0` or
/// there are fewer than two points.
#[must_use]
pub fn nearest_neighbor_distances(points: &[Point], k: usize) -> Vec<Vec<f64>> {
    if k == 0 || points.len() < 2 {
        return Vec::new();
    }
    let k = k.min(points.len() - 1);

    let tree = RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint::new([p.x, p.y], i))
            .collect(),
    );

    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            tree.nearest_neighbor_iter(&[p.x, p.y])
                .filter(|n| n.data != i)
                .take(k)
                .map(|n| p.distance(points[n.data]))
                .collect()
        })
        .collect()
}

/// Equal-width histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// `bins + 1` bin edges, ascending. Empty for an empty histogram.
    pub edges: Vec<f64>,
    /// Number of values per bin.
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Bin the finite entries of `values` into `bins` equal-width bins
    /// spanning `[min, max]`.
    ///
    /// Bins are half-open except the last, which also includes `max`.
    /// If every value is equal the range is widened to `value ± 0.5`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if `bins == 0`.
    pub fn from_values(values: &[f64], bins: usize) -> Result<Self, PipelineError> {
        if bins == 0 {
            return Err(PipelineError::invalid("bins", "must be at least 1"));
        }
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let Some((lo, hi)) = finite.clone().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
        }) else {
            return Ok(Self {
                edges: Vec::new(),
                counts: Vec::new(),
            });
        };
        let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };

        #[allow(clippy::cast_precision_loss)]
        let width = (hi - lo) / bins as f64;
        #[allow(clippy::cast_precision_loss)]
        let edges = (0..=bins).map(|i| width.mul_add(i as f64, lo)).collect();

        let mut counts = vec![0; bins];
        for v in finite {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let bin = (((v - lo) / width).floor() as usize).min(bins - 1);
            counts[bin] += 1;
        }
        Ok(Self { edges, counts })
    }

    /// Total number of binned values.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Whether no value was binned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
