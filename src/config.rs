use crate::risk::estimator::{BinCenters, RiskError, RiskLevel};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TRAINING_CONFIG_FILE: &str = "args.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid training configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Risk(#[from] RiskError),
}

fn default_frame_stack() -> usize {
    4
}

fn default_obs_scale() -> f32 {
    1.0 / 255.0
}

/// Settings recorded next to a trained model. Unknown keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub vmin: f64,
    pub vmax: f64,
    pub nb_atoms: usize,
    pub cvar_alpha: f64,
    #[serde(default = "default_frame_stack")]
    pub frame_stack: usize,
    #[serde(default = "default_obs_scale")]
    pub obs_scale: f32,
    #[serde(default)]
    pub dueling: bool,
}

/// Directory holding the training configuration of the model saved in `model_dir`.
pub fn parent_path(model_dir: &Path) -> &Path {
    model_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

impl TrainingConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.into(),
            source,
        })?;
        let config: TrainingConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.into(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_for_model(model_dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&parent_path(model_dir).join(TRAINING_CONFIG_FILE))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nb_atoms == 0 {
            return Err(ConfigError::Invalid("nb_atoms must be positive".into()));
        }
        if !(self.vmin.is_finite() && self.vmax.is_finite() && self.vmin < self.vmax) {
            return Err(ConfigError::Invalid(format!(
                "support [{}, {}] is empty or not finite",
                self.vmin, self.vmax
            )));
        }
        if self.frame_stack == 0 {
            return Err(ConfigError::Invalid("frame_stack must be positive".into()));
        }
        if !(self.obs_scale.is_finite() && self.obs_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "obs_scale must be positive, got {}",
                self.obs_scale
            )));
        }
        RiskLevel::new(self.cvar_alpha)?;
        Ok(())
    }

    pub fn risk_level(&self) -> Result<RiskLevel, RiskError> {
        RiskLevel::new(self.cvar_alpha)
    }

    /// Atom values of the learned return distribution.
    pub fn support(&self) -> Result<BinCenters, RiskError> {
        BinCenters::new(Array1::linspace(self.vmin, self.vmax, self.nb_atoms).to_vec())
    }

    /// Risk level for the report. An override of `0` selects the training level.
    pub fn eval_alpha(&self, override_alpha: f64) -> Result<RiskLevel, RiskError> {
        if override_alpha == 0.0 {
            self.risk_level()
        } else {
            RiskLevel::new(override_alpha)
        }
    }

    pub fn eval_bins(&self, override_bins: Option<usize>) -> Result<usize, RiskError> {
        match override_bins {
            Some(0) => Err(RiskError::InvalidBinCount),
            Some(bins) => Ok(bins),
            None => Ok(self.nb_atoms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parent_path, ConfigError, TrainingConfig, TRAINING_CONFIG_FILE};
    use crate::risk::estimator::RiskError;
    use approx::assert_abs_diff_eq;
    use std::fs;
    use std::path::Path;

    const ARGS: &str = r#"{"vmin": -10.0, "vmax": 10.0, "nb_atoms": 51, "cvar_alpha": 0.05,
                           "lr": 0.0001, "env": "CliffWalk"}"#;

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path(Path::new("runs/a/model")), Path::new("runs/a"));
        assert_eq!(parent_path(Path::new("runs/a/model/")), Path::new("runs/a"));
        assert_eq!(parent_path(Path::new("model")), Path::new("."));
    }

    #[test]
    fn test_load_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("model-atari");
        fs::create_dir(&model_dir).unwrap();
        fs::write(dir.path().join(TRAINING_CONFIG_FILE), ARGS).unwrap();

        let config = TrainingConfig::load_for_model(&model_dir).unwrap();
        assert_eq!(config.nb_atoms, 51);
        assert_eq!(config.frame_stack, 4);
        assert_abs_diff_eq!(config.obs_scale, 1.0 / 255.0);
        assert!(!config.dueling);

        let support = config.support().unwrap();
        assert_eq!(support.len(), 51);
        assert_abs_diff_eq!(support.as_slice()[0], -10.0);
        assert_abs_diff_eq!(support.as_slice()[25], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(support.as_slice()[50], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_overrides() {
        let config: TrainingConfig = serde_json::from_str(ARGS).unwrap();
        assert_eq!(config.eval_alpha(0.0).unwrap().get(), 0.05);
        assert_eq!(config.eval_alpha(0.3).unwrap().get(), 0.3);
        assert_eq!(config.eval_alpha(1.5), Err(RiskError::InvalidAlpha(1.5)));
        assert_eq!(config.eval_bins(None).unwrap(), 51);
        assert_eq!(config.eval_bins(Some(20)).unwrap(), 20);
        assert_eq!(config.eval_bins(Some(0)), Err(RiskError::InvalidBinCount));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRAINING_CONFIG_FILE);
        assert!(matches!(
            TrainingConfig::load(&path),
            Err(ConfigError::Io { .. })
        ));

        fs::write(&path, r#"{"vmin": -10.0}"#).unwrap();
        assert!(matches!(
            TrainingConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));

        fs::write(
            &path,
            r#"{"vmin": 1.0, "vmax": -1.0, "nb_atoms": 5, "cvar_alpha": 0.1}"#,
        )
        .unwrap();
        assert!(matches!(
            TrainingConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));

        fs::write(
            &path,
            r#"{"vmin": -1.0, "vmax": 1.0, "nb_atoms": 5, "cvar_alpha": 0.0}"#,
        )
        .unwrap();
        assert!(matches!(
            TrainingConfig::load(&path),
            Err(ConfigError::Risk(RiskError::InvalidAlpha(_)))
        ));
    }
}
