use crate::risk::estimator::{RiskError, RiskLevel, RiskSummary};
use crate::risk::histogram::Histogram;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct HistogramReport {
    pub edges: Vec<f64>,
    pub masses: Vec<f64>,
}

#[derive(Serialize, Debug)]
pub struct RiskReport {
    pub episodes: usize,
    pub alpha: RiskLevel,
    pub bins: usize,
    pub mean: f64,
    #[serde(flatten)]
    pub summary: RiskSummary,
    pub histogram: HistogramReport,
}

impl RiskReport {
    pub fn from_samples(samples: &[f64], alpha: RiskLevel, bins: usize) -> Result<Self, RiskError> {
        let histogram = Histogram::from_samples(samples, bins)?;
        let summary = histogram.risk(alpha)?;
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        Ok(RiskReport {
            episodes: samples.len(),
            alpha,
            bins,
            mean,
            summary,
            histogram: HistogramReport {
                edges: histogram.edges().to_vec(),
                masses: histogram.masses().to_vec(),
            },
        })
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Mean={:.1}, VaR={:.1}, CVaR={:.1}",
            self.mean, self.summary.var, self.summary.cvar
        )
    }

    /// Horizontal bar chart of the histogram, one row per bin from the lowest
    /// return up. Rows containing the VaR / CVaR values are tagged.
    pub fn render_chart(&self, width: usize) -> String {
        let masses = &self.histogram.masses;
        let edges = &self.histogram.edges;
        let peak = masses.iter().cloned().fold(0.0, f64::max);
        let last = masses.len().saturating_sub(1);
        masses
            .iter()
            .enumerate()
            .map(|(i, &mass)| {
                let (lo, hi) = (edges[i], edges[i + 1]);
                let in_bin = |x: f64| x >= lo && (x < hi || (i == last && x <= hi));
                let len = if peak > 0.0 {
                    (mass / peak * width as f64).round() as usize
                } else {
                    0
                };
                let mut marks = String::new();
                if in_bin(self.summary.var) {
                    marks.push_str(" <VaR");
                }
                if in_bin(self.summary.cvar) {
                    marks.push_str(" <CVaR");
                }
                format!(
                    "[{:>10.2}, {:>10.2}) {:<width$} {:.3}{}\n",
                    lo,
                    hi,
                    "#".repeat(len),
                    mass,
                    marks,
                    width = width
                )
            })
            .collect()
    }
}
