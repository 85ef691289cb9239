use crate::agent::model::{CategoricalModel, ModelError};
use crate::risk::estimator::{
    cvar_from_histogram, BinCenters, RiskError, RiskLevel, RiskSummary,
};
use crate::rollout::env::{ActionId, Observation};
use ordered_float::NotNan;
use rand::distributions::Bernoulli;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Risk(#[from] RiskError),
    #[error("action {action} has a non-finite risk value")]
    NonFiniteValue { action: ActionId },
    #[error("model has {model} atoms but the support has {support}")]
    SupportMismatch { model: usize, support: usize },
}

pub trait Policy {
    fn action_count(&self) -> usize;

    fn act(
        &self,
        rng: &mut impl Rng,
        observation: &Observation,
        stochastic: bool,
    ) -> Result<ActionId, PolicyError>;
}

/// Risk-averse greedy policy over a categorical return distribution: picks
/// the action whose predicted distribution has the highest CVaR at
/// `risk_alpha`. In stochastic mode a uniformly random action is taken with
/// the model's exploration rate.
#[derive(Debug)]
pub struct CvarGreedy {
    model: CategoricalModel,
    support: BinCenters,
    risk_alpha: RiskLevel,
    exploration: Bernoulli,
}

impl CvarGreedy {
    pub fn new(
        model: CategoricalModel,
        support: BinCenters,
        risk_alpha: RiskLevel,
    ) -> Result<Self, PolicyError> {
        if model.nb_atoms() != support.len() {
            return Err(PolicyError::SupportMismatch {
                model: model.nb_atoms(),
                support: support.len(),
            });
        }
        // eps is validated to [0, 1] when the model is built
        let exploration = Bernoulli::new(model.eps()).map_err(|_| {
            ModelError::Architecture(format!("invalid exploration rate {}", model.eps()))
        })?;
        Ok(CvarGreedy {
            model,
            support,
            risk_alpha,
            exploration,
        })
    }

    pub fn model(&self) -> &CategoricalModel {
        &self.model
    }

    /// VaR and CVaR of every action's predicted return distribution.
    pub fn action_risks(&self, observation: &Observation) -> Result<Vec<RiskSummary>, PolicyError> {
        let probs = self.model.distributions(observation)?;
        probs
            .rows()
            .into_iter()
            .map(|row| {
                // f32 rows drift off one, renormalize in f64
                let mut pdf: Vec<f64> = row.iter().map(|&p| p as f64).collect();
                let total: f64 = pdf.iter().sum();
                if total > 0.0 {
                    pdf.iter_mut().for_each(|p| *p /= total);
                }
                Ok(cvar_from_histogram(self.risk_alpha, &pdf, &self.support)?)
            })
            .collect()
    }

    /// CVaR of every action's predicted return distribution.
    pub fn action_values(&self, observation: &Observation) -> Result<Vec<f64>, PolicyError> {
        Ok(self
            .action_risks(observation)?
            .into_iter()
            .map(|r| r.cvar)
            .collect())
    }

    pub fn greedy(&self, observation: &Observation) -> Result<ActionId, PolicyError> {
        let values = self.action_values(observation)?;
        let mut best: Option<(ActionId, NotNan<f64>)> = None;
        for (action, value) in values.into_iter().enumerate() {
            let value =
                NotNan::new(value).map_err(|_| PolicyError::NonFiniteValue { action })?;
            // strict comparison keeps the lowest index on ties
            if best.map_or(true, |(_, b)| value > b) {
                best = Some((action, value));
            }
        }
        Ok(best.map_or(0, |(action, _)| action))
    }
}

impl Policy for CvarGreedy {
    fn action_count(&self) -> usize {
        self.model.num_actions()
    }

    fn act(
        &self,
        rng: &mut impl Rng,
        observation: &Observation,
        stochastic: bool,
    ) -> Result<ActionId, PolicyError> {
        if stochastic && rng.sample(&self.exploration) {
            Ok(rng.gen_range(0..self.model.num_actions()))
        } else {
            self.greedy(observation)
        }
    }
}
