use crate::risk::estimator::{cvar_from_histogram, BinCenters, RiskError, RiskLevel, RiskSummary};
use itertools::Itertools;
use serde::Serialize;

/// Equal-width histogram over the observed range of a sample sequence.
///
/// Bin `i` covers `[edges[i], edges[i + 1])`, the last bin is closed on the
/// right so the maximum sample is always counted.
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    edges: Vec<f64>,
    counts: Vec<u64>,
    masses: Vec<f64>,
}

impl Histogram {
    pub fn from_samples(samples: &[f64], bins: usize) -> Result<Self, RiskError> {
        if bins == 0 {
            return Err(RiskError::InvalidBinCount);
        }
        if samples.is_empty() {
            return Err(RiskError::EmptySamples);
        }
        if let Some(index) = samples.iter().position(|x| !x.is_finite()) {
            return Err(RiskError::NonFiniteSample {
                index,
                value: samples[index],
            });
        }

        let (lo, hi) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            });
        let edges = match spread_edges(lo, hi, bins) {
            Some(edges) => edges,
            None => {
                // equal or nearly equal samples, widen around them
                let pad = 0.5f64.max(lo.abs().max(hi.abs()) * f64::EPSILON * bins as f64 * 4.0);
                spread_edges(lo - pad, hi + pad, bins)
                    .ok_or(RiskError::UnsplittableRange { lo, hi, bins })?
            }
        };

        // a sample on an interior edge belongs to the bin that edge opens
        let inner = &edges[1..bins];
        let mut counts = vec![0u64; bins];
        for &x in samples {
            counts[inner.partition_point(|&e| e <= x)] += 1;
        }

        let n = samples.len() as f64;
        let masses = counts.iter().map(|&c| c as f64 / n).collect();
        Ok(Histogram {
            edges,
            counts,
            masses,
        })
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn masses(&self) -> &[f64] {
        &self.masses
    }

    pub fn centers(&self) -> Result<BinCenters, RiskError> {
        BinCenters::new(midpoints(&self.edges))
    }

    pub fn risk(&self, alpha: RiskLevel) -> Result<RiskSummary, RiskError> {
        cvar_from_histogram(alpha, &self.masses, &self.centers()?)
    }
}

fn midpoints(edges: &[f64]) -> Vec<f64> {
    edges
        .iter()
        .tuple_windows()
        .map(|(a, b)| a / 2.0 + b / 2.0)
        .collect()
}

fn strictly_ascending(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite()) && values.windows(2).all(|w| w[0] < w[1])
}

/// `bins + 1` equally spaced edges from `lo` to `hi`, or `None` when the
/// range is too narrow for the edges or their midpoints to stay distinct.
fn spread_edges(lo: f64, hi: f64, bins: usize) -> Option<Vec<f64>> {
    let n = bins as f64;
    let span = hi - lo;
    let mut edges: Vec<f64> = if span.is_finite() {
        let width = span / n;
        (0..bins).map(|i| lo + i as f64 * width).collect()
    } else {
        // span overflows, interpolate instead
        (0..bins)
            .map(|i| {
                let t = i as f64 / n;
                lo * (1.0 - t) + hi * t
            })
            .collect()
    };
    edges.push(hi);
    (strictly_ascending(&edges) && strictly_ascending(&midpoints(&edges))).then_some(edges)
}
