use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    #[error("risk level must be in (0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("bin count must be positive")]
    InvalidBinCount,
    #[error("no samples to summarize")]
    EmptySamples,
    #[error("sample {index} is not finite ({value})")]
    NonFiniteSample { index: usize, value: f64 },
    #[error("histogram has no bins")]
    EmptyHistogram,
    #[error("histogram has {masses} masses but {centers} bin centers")]
    LengthMismatch { masses: usize, centers: usize },
    #[error("bin {index} has invalid mass {mass}")]
    InvalidMass { index: usize, mass: f64 },
    #[error("bin centers must be finite and strictly ascending (violated at bin {index})")]
    UnorderedBins { index: usize },
    #[error("histogram carries no probability mass")]
    ZeroMass,
    #[error("sample range [{lo}, {hi}] cannot be split into {bins} bins")]
    UnsplittableRange { lo: f64, hi: f64, bins: usize },
}

/// Mass shortfall below `alpha` that still counts as reaching it, absorbs
/// rounding in masses that should sum to one.
pub const MASS_TOLERANCE: f64 = 1e-12;

/// Tail probability in (0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RiskLevel(f64);

impl RiskLevel {
    pub fn new(alpha: f64) -> Result<Self, RiskError> {
        // NaN fails both comparisons
        if alpha > 0.0 && alpha <= 1.0 {
            Ok(RiskLevel(alpha))
        } else {
            Err(RiskError::InvalidAlpha(alpha))
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.0
    }
}

/// Bin values ordered from the lowest return to the highest.
#[derive(Debug, Clone, PartialEq)]
pub struct BinCenters(Vec<f64>);

impl BinCenters {
    pub fn new(centers: Vec<f64>) -> Result<Self, RiskError> {
        if let Some(index) = centers.iter().position(|c| !c.is_finite()) {
            return Err(RiskError::UnorderedBins { index });
        }
        if let Some(index) = centers.windows(2).position(|w| w[0] >= w[1]) {
            return Err(RiskError::UnorderedBins { index: index + 1 });
        }
        Ok(BinCenters(centers))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskSummary {
    pub var: f64,
    pub cvar: f64,
    /// Set when the masses ran out before reaching the risk level; `cvar` is
    /// then normalized by the mass actually observed.
    pub exhausted: bool,
}

/// Empirical VaR and CVaR of a discretized distribution.
///
/// Sweeps the bins from the lowest value upward, accumulating mass until the
/// running total reaches `alpha`. The bin in which that happens gives the VaR
/// (its center, no interpolation) and contributes only the fraction of its
/// mass still needed to reach `alpha` to the tail expectation.
pub fn cvar_from_histogram(
    alpha: RiskLevel,
    pdf: &[f64],
    centers: &BinCenters,
) -> Result<RiskSummary, RiskError> {
    if pdf.is_empty() || centers.is_empty() {
        return Err(RiskError::EmptyHistogram);
    }
    if pdf.len() != centers.len() {
        return Err(RiskError::LengthMismatch {
            masses: pdf.len(),
            centers: centers.len(),
        });
    }
    if let Some(index) = pdf.iter().position(|m| !m.is_finite() || *m < 0.0) {
        return Err(RiskError::InvalidMass {
            index,
            mass: pdf[index],
        });
    }

    let alpha = alpha.get();
    let mut threshold = 0.0;
    let mut cvar = 0.0;
    let mut var = 0.0;
    for (&mass, &center) in pdf.iter().zip(centers.as_slice()) {
        let before = threshold;
        threshold += mass;
        if threshold >= alpha - MASS_TOLERANCE {
            let rest = (alpha - before).clamp(0.0, mass);
            cvar += rest * center;
            return Ok(RiskSummary {
                var: center,
                cvar: cvar / alpha,
                exhausted: false,
            });
        }
        cvar += mass * center;
        var = center;
    }

    if threshold <= 0.0 {
        return Err(RiskError::ZeroMass);
    }
    Ok(RiskSummary {
        var,
        cvar: cvar / threshold,
        exhausted: true,
    })
}
