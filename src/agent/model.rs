use crate::rollout::env::Observation;
use ndarray::{Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MODEL_FILE: &str = "saved";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed model artifact {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{name} has shape {found:?}, expected {expected:?}")]
    Shape {
        name: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("architecture mismatch: {0}")]
    Architecture(String),
    #[error("observation has {found} values, model expects {expected}")]
    ObservationDim { expected: usize, found: usize },
}

/// Per-action logits over atoms, `weights` is actions x atoms x obs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvantageHead {
    pub weights: Array3<f32>,
    pub bias: Array2<f32>,
}

/// State-value logits shared by all actions, `weights` is atoms x obs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueHead {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

/// Serialized parameters of a trained categorical Q head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub num_actions: usize,
    pub obs_dim: usize,
    pub nb_atoms: usize,
    /// Exploration rate at the end of training.
    #[serde(default)]
    pub eps: f64,
    pub advantage: AdvantageHead,
    #[serde(default)]
    pub value: Option<ValueHead>,
}

impl ModelArtifact {
    pub fn load(model_dir: &Path) -> Result<Self, ModelError> {
        let path = model_dir.join(MODEL_FILE);
        let text = fs::read_to_string(&path).map_err(|source| ModelError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ModelError::Parse { path, source })
    }
}

fn check_shape(name: &'static str, found: &[usize], expected: &[usize]) -> Result<(), ModelError> {
    if found != expected {
        return Err(ModelError::Shape {
            name,
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}

/// Frozen categorical distributional Q function: an affine map from the
/// observation to per-action atom logits followed by a softmax over atoms.
/// The dueling variant adds a shared value stream and centers the
/// advantages across actions.
#[derive(Debug, Clone)]
pub struct CategoricalModel {
    advantage: AdvantageHead,
    value: Option<ValueHead>,
    num_actions: usize,
    obs_dim: usize,
    nb_atoms: usize,
    eps: f64,
}

impl CategoricalModel {
    pub fn from_artifact(artifact: ModelArtifact, dueling: bool) -> Result<Self, ModelError> {
        let (a, n, d) = (artifact.num_actions, artifact.nb_atoms, artifact.obs_dim);
        if a == 0 || n == 0 {
            return Err(ModelError::Architecture(
                "model needs at least one action and one atom".into(),
            ));
        }
        check_shape("advantage.weights", artifact.advantage.weights.shape(), &[a, n, d])?;
        check_shape("advantage.bias", artifact.advantage.bias.shape(), &[a, n])?;
        match (&artifact.value, dueling) {
            (Some(value), true) => {
                check_shape("value.weights", value.weights.shape(), &[n, d])?;
                check_shape("value.bias", value.bias.shape(), &[n])?;
            }
            (None, true) => {
                return Err(ModelError::Architecture(
                    "dueling requested but the artifact has no value head".into(),
                ))
            }
            (Some(_), false) => {
                return Err(ModelError::Architecture(
                    "artifact has a value head, evaluate it with dueling enabled".into(),
                ))
            }
            (None, false) => {}
        }
        if !(0.0..=1.0).contains(&artifact.eps) {
            return Err(ModelError::Architecture(format!(
                "exploration rate {} outside [0, 1]",
                artifact.eps
            )));
        }
        Ok(CategoricalModel {
            advantage: artifact.advantage,
            value: artifact.value,
            num_actions: a,
            obs_dim: d,
            nb_atoms: n,
            eps: artifact.eps,
        })
    }

    pub fn load(model_dir: &Path, dueling: bool) -> Result<Self, ModelError> {
        Self::from_artifact(ModelArtifact::load(model_dir)?, dueling)
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    pub fn nb_atoms(&self) -> usize {
        self.nb_atoms
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn is_dueling(&self) -> bool {
        self.value.is_some()
    }

    fn logits(&self, observation: &Observation) -> Array2<f32> {
        let mut logits = Array2::<f32>::zeros((self.num_actions, self.nb_atoms));
        for (a, mut row) in logits.axis_iter_mut(Axis(0)).enumerate() {
            let w = self.advantage.weights.index_axis(Axis(0), a);
            row.assign(&(w.dot(observation) + &self.advantage.bias.row(a)));
        }
        if let Some(value) = &self.value {
            let v = value.weights.dot(observation) + &value.bias;
            // mean over actions always exists, num_actions > 0
            if let Some(mean) = logits.mean_axis(Axis(0)) {
                logits -= &mean;
            }
            logits += &v;
        }
        logits
    }

    /// Probability of each atom for each action, `num_actions x nb_atoms`.
    pub fn distributions(&self, observation: &Observation) -> Result<Array2<f32>, ModelError> {
        if observation.len() != self.obs_dim {
            return Err(ModelError::ObservationDim {
                expected: self.obs_dim,
                found: observation.len(),
            });
        }
        let mut probs = self.logits(observation);
        for mut row in probs.axis_iter_mut(Axis(0)) {
            let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            row.mapv_inplace(|x| (x - max).exp());
            let sum = row.sum();
            row /= sum;
        }
        Ok(probs)
    }
}
