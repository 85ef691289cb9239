use crate::agent::model::{CategoricalModel, ModelError};
use crate::agent::policy::{CvarGreedy, PolicyError};
use crate::config::{ConfigError, TrainingConfig};
use crate::risk::estimator::RiskError;
use crate::rollout::env::{make_env, EnvError, Environment};
use crate::rollout::evaluator::{EvalError, EvaluationRun, Evaluator, EvaluatorConfig};
use crate::rollout::wrappers::{wrap_dqn, DqnWrapped};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_SEED: u64 = 0b1110110001110101011000111101;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Risk(#[from] RiskError),
    #[error("model has {model} atoms, training configuration records {config}")]
    AtomMismatch { model: usize, config: usize },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub env: String,
    pub model_dir: PathBuf,
    pub dueling: bool,
    pub seed: u64,
}

/// Everything one evaluation needs, acquired together and released together:
/// training configuration, frozen policy, wrapped environment and the seeded
/// random source.
pub struct EvalSession {
    training: TrainingConfig,
    env: DqnWrapped<Box<dyn Environment>>,
    policy: CvarGreedy,
    rng: SmallRng,
    episodes_run: usize,
}

impl EvalSession {
    pub fn open(options: &SessionOptions) -> Result<Self, SessionError> {
        let training = TrainingConfig::load_for_model(&options.model_dir)?;
        if training.dueling != options.dueling {
            warn!(
                trained = training.dueling,
                requested = options.dueling,
                "dueling flag differs from the training configuration"
            );
        }

        let mut rng = SmallRng::seed_from_u64(options.seed);
        let env = make_env(&options.env, rng.gen())?;
        let env = wrap_dqn(env, training.frame_stack, training.obs_scale)?;

        let model = CategoricalModel::load(&options.model_dir, options.dueling)?;
        if model.nb_atoms() != training.nb_atoms {
            return Err(SessionError::AtomMismatch {
                model: model.nb_atoms(),
                config: training.nb_atoms,
            });
        }
        if model.obs_dim() != env.observation_dim() {
            return Err(ModelError::ObservationDim {
                expected: model.obs_dim(),
                found: env.observation_dim(),
            }
            .into());
        }
        let policy = CvarGreedy::new(model, training.support()?, training.risk_level()?)?;

        info!(
            env = env.name(),
            model_dir = %options.model_dir.display(),
            atoms = training.nb_atoms,
            vmin = training.vmin,
            vmax = training.vmax,
            cvar_alpha = training.cvar_alpha,
            seed = options.seed,
            "evaluation session opened"
        );
        Ok(EvalSession {
            training,
            env,
            policy,
            rng,
            episodes_run: 0,
        })
    }

    pub fn training(&self) -> &TrainingConfig {
        &self.training
    }

    pub fn env_name(&self) -> &str {
        self.env.name()
    }

    pub fn evaluate(&mut self, config: &EvaluatorConfig) -> Result<EvaluationRun, EvalError> {
        let run = Evaluator::new(config, &mut self.env, &self.policy, &mut self.rng)?.run()?;
        self.episodes_run += run.episodes();
        Ok(run)
    }
}

impl Drop for EvalSession {
    fn drop(&mut self) {
        info!(
            episodes = self.episodes_run,
            "evaluation session released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{EvalSession, SessionError, SessionOptions, DEFAULT_SEED};
    use crate::agent::model::tests::bias_only_artifact;
    use crate::agent::model::{ModelError, MODEL_FILE};
    use crate::config::TRAINING_CONFIG_FILE;
    use crate::rollout::evaluator::EvaluatorConfig;
    use ndarray::array;
    use std::fs;
    use std::path::Path;

    const ARGS: &str =
        r#"{"vmin": -1.0, "vmax": 1.0, "nb_atoms": 3, "cvar_alpha": 0.25, "frame_stack": 2}"#;

    fn setup(root: &Path, obs_dim: usize) -> SessionOptions {
        let model_dir = root.join("model");
        fs::create_dir(&model_dir).unwrap();
        fs::write(root.join(TRAINING_CONFIG_FILE), ARGS).unwrap();
        // action 1 (right) is predicted to end well, action 0 badly
        let artifact = bias_only_artifact(obs_dim, array![[3.0, 0.0, 0.0], [0.0, 0.0, 3.0]]);
        fs::write(
            model_dir.join(MODEL_FILE),
            serde_json::to_string(&artifact).unwrap(),
        )
        .unwrap();
        SessionOptions {
            env: "RandomWalk".to_string(),
            model_dir,
            dueling: false,
            seed: DEFAULT_SEED,
        }
    }

    #[test]
    fn test_session_evaluate() {
        let dir = tempfile::tempdir().unwrap();
        let options = setup(dir.path(), 14);
        let mut config = EvaluatorConfig::new();
        config.set_episodes(30);
        config.set_stochastic(false);
        config.set_print_episodes(false);
        config.set_progress(false);

        let first = {
            let mut session = EvalSession::open(&options).unwrap();
            assert_eq!(session.env_name(), "RandomWalk");
            assert_eq!(session.training().frame_stack, 2);
            session.evaluate(&config).unwrap()
        };
        assert_eq!(first.episodes(), 30);
        assert!(first.returns().iter().all(|r| [-1.0, 0.0, 1.0].contains(r)));
        // walking right with 20% slip mostly ends on the right
        let wins = first.returns().iter().filter(|&&r| r == 1.0).count();
        assert!(wins > 15);

        let mut session = EvalSession::open(&options).unwrap();
        let second = session.evaluate(&config).unwrap();
        assert_eq!(first.returns(), second.returns());
    }

    #[test]
    fn test_session_observation_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let options = setup(dir.path(), 7);
        assert!(matches!(
            EvalSession::open(&options),
            Err(SessionError::Model(ModelError::ObservationDim {
                expected: 7,
                found: 14
            }))
        ));
    }

    #[test]
    fn test_session_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let options = SessionOptions {
            env: "RandomWalk".to_string(),
            model_dir: dir.path().join("model"),
            dueling: false,
            seed: 1,
        };
        assert!(matches!(
            EvalSession::open(&options),
            Err(SessionError::Config(_))
        ));
    }
}
