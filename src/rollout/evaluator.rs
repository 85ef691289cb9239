use crate::agent::policy::{Policy, PolicyError};
use crate::rollout::env::{EnvError, Environment};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("environment emits {env} actions, policy expects {policy}")]
    ActionSpace { env: usize, policy: usize },
    #[error("trace output failed: {0}")]
    Trace(#[from] std::io::Error),
    #[error("trace serialization failed: {0}")]
    TraceFormat(#[from] serde_json::Error),
}

pub struct EvaluatorConfig {
    episodes: usize,
    stochastic: bool,
    trace_path: Option<PathBuf>,
    print_episodes: bool,
    progress: bool,
}

impl EvaluatorConfig {
    pub fn new() -> Self {
        EvaluatorConfig {
            episodes: 1000,
            stochastic: true,
            trace_path: None,
            print_episodes: true,
            progress: true,
        }
    }

    pub fn set_episodes(&mut self, episodes: usize) {
        self.episodes = episodes;
    }
    pub fn set_stochastic(&mut self, stochastic: bool) {
        self.stochastic = stochastic;
    }
    pub fn set_trace_path(&mut self, trace_path: &Path) {
        self.trace_path = Some(trace_path.into());
    }
    pub fn set_print_episodes(&mut self, print_episodes: bool) {
        self.print_episodes = print_episodes;
    }
    pub fn set_progress(&mut self, progress: bool) {
        self.progress = progress;
    }

    pub fn episodes(&self) -> usize {
        self.episodes
    }
    pub fn stochastic(&self) -> bool {
        self.stochastic
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
#[serde(tag = "evt")]
pub enum TraceFrame<'a> {
    Start(StartTraceFrame<'a>),
    Episode(EpisodeTraceFrame),
}

#[derive(Serialize)]
pub struct StartTraceFrame<'a> {
    env: &'a str,
    episodes: usize,
    stochastic: bool,
}

#[derive(Serialize)]
pub struct EpisodeTraceFrame {
    episode: usize,
    reward: f64,
    steps: usize,
    truncated: bool,
}

/// Returns collected by one evaluation, one entry per episode.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRun {
    returns: Vec<f64>,
    steps: Vec<usize>,
    truncated: usize,
}

impl EvaluationRun {
    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    pub fn steps(&self) -> &[usize] {
        &self.steps
    }

    /// Episodes ended by the environment's step limit.
    pub fn truncated(&self) -> usize {
        self.truncated
    }

    pub fn episodes(&self) -> usize {
        self.returns.len()
    }
}

/// Runs a frozen policy for a fixed number of episodes, strictly one after
/// another.
pub struct Evaluator<'a, E: Environment, P: Policy, R: Rng> {
    config: &'a EvaluatorConfig,
    env: &'a mut E,
    policy: &'a P,
    rng: &'a mut R,
    trace_file: Option<BufWriter<File>>,
}

impl<'a, E: Environment, P: Policy, R: Rng> Evaluator<'a, E, P, R> {
    pub fn new(
        config: &'a EvaluatorConfig,
        env: &'a mut E,
        policy: &'a P,
        rng: &'a mut R,
    ) -> Result<Self, EvalError> {
        if env.action_count() != policy.action_count() {
            return Err(EvalError::ActionSpace {
                env: env.action_count(),
                policy: policy.action_count(),
            });
        }
        let trace_file = match &config.trace_path {
            Some(path) => Some(BufWriter::new(File::create(path)?)),
            None => None,
        };
        Ok(Evaluator {
            config,
            env,
            policy,
            rng,
            trace_file,
        })
    }

    fn write_trace(&mut self, frame: &TraceFrame) -> Result<(), EvalError> {
        if let Some(file) = &mut self.trace_file {
            writeln!(file, "{}", serde_json::to_string(frame)?)?;
        }
        Ok(())
    }

    /// Plays one episode to termination, returns (total reward, steps, truncated).
    pub fn episode(&mut self) -> Result<(f64, usize, bool), EvalError> {
        let mut observation = self.env.reset();
        let mut total = 0.0;
        loop {
            let action = self
                .policy
                .act(&mut *self.rng, &observation, self.config.stochastic)?;
            let step = self.env.step(action)?;
            total += step.reward;
            if step.done {
                return Ok((total, step.info.steps, step.info.truncated));
            }
            observation = step.observation;
        }
    }

    pub fn run(&mut self) -> Result<EvaluationRun, EvalError> {
        let episodes = self.config.episodes;
        info!(
            env = self.env.name(),
            episodes,
            stochastic = self.config.stochastic,
            "starting evaluation"
        );
        let env_name = self.env.name().to_string();
        self.write_trace(&TraceFrame::Start(StartTraceFrame {
            env: &env_name,
            episodes,
            stochastic: self.config.stochastic,
        }))?;

        let progress_bar = if self.config.progress {
            let bar = ProgressBar::new(episodes as u64);
            if let Ok(style) =
                ProgressStyle::default_bar().template("[{elapsed_precise}] {wide_bar} {pos}/{len} {eta}")
            {
                bar.set_style(style);
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut run = EvaluationRun {
            returns: Vec::with_capacity(episodes),
            steps: Vec::with_capacity(episodes),
            truncated: 0,
        };
        for ix in 0..episodes {
            let (reward, steps, truncated) = self.episode()?;
            debug!(episode = ix, reward, steps, truncated, "episode finished");
            if self.config.print_episodes {
                progress_bar.suspend(|| println!("{:4} Episode reward: {:.3}", ix, reward));
            }
            self.write_trace(&TraceFrame::Episode(EpisodeTraceFrame {
                episode: ix,
                reward,
                steps,
                truncated,
            }))?;
            run.returns.push(reward);
            run.steps.push(steps);
            run.truncated += truncated as usize;
            progress_bar.inc(1);
        }
        progress_bar.finish_and_clear();

        if let Some(file) = &mut self.trace_file {
            file.flush()?;
        }
        info!(episodes, truncated = run.truncated, "evaluation finished");
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::{EvalError, Evaluator, EvaluatorConfig};
    use crate::agent::policy::{Policy, PolicyError};
    use crate::rollout::env::{ActionId, CliffWalk, Observation, RandomWalk};
    use crate::rollout::wrappers::wrap_dqn;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::fs;

    /// Always the same action.
    struct Constant {
        action: ActionId,
        actions: usize,
    }

    impl Policy for Constant {
        fn action_count(&self) -> usize {
            self.actions
        }

        fn act(
            &self,
            rng: &mut impl Rng,
            _observation: &Observation,
            stochastic: bool,
        ) -> Result<ActionId, PolicyError> {
            if stochastic {
                Ok(rng.gen_range(0..self.actions))
            } else {
                Ok(self.action)
            }
        }
    }

    fn quiet_config(episodes: usize, stochastic: bool) -> EvaluatorConfig {
        let mut config = EvaluatorConfig::new();
        config.set_episodes(episodes);
        config.set_stochastic(stochastic);
        config.set_print_episodes(false);
        config.set_progress(false);
        config
    }

    fn run_walk(seed: u64) -> Vec<f64> {
        let config = quiet_config(50, true);
        let mut env = wrap_dqn(RandomWalk::new(seed), 4, 1.0 / 255.0).unwrap();
        let policy = Constant {
            action: 1,
            actions: 2,
        };
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut evaluator = Evaluator::new(&config, &mut env, &policy, &mut rng).unwrap();
        evaluator.run().unwrap().returns().to_vec()
    }

    #[test]
    fn test_evaluator_deterministic() {
        let a = run_walk(11);
        let b = run_walk(11);
        assert_eq!(a.len(), 50);
        assert_eq!(a, b);
        assert!(a.iter().all(|r| [-1.0, 0.0, 1.0].contains(r)));
    }

    #[test]
    fn test_evaluator_cliff() {
        // stepping right from the start always falls into the cliff
        let config = quiet_config(10, false);
        let mut env = CliffWalk::new(0);
        let policy = Constant {
            action: 1,
            actions: 4,
        };
        let mut rng = SmallRng::seed_from_u64(0);
        let mut evaluator = Evaluator::new(&config, &mut env, &policy, &mut rng).unwrap();
        let run = evaluator.run().unwrap();
        assert_eq!(run.returns(), &[-100.0; 10]);
        assert_eq!(run.steps(), &[1; 10]);
        assert_eq!(run.truncated(), 0);
    }

    #[test]
    fn test_evaluator_action_space() {
        let config = quiet_config(1, false);
        let mut env = CliffWalk::new(0);
        let policy = Constant {
            action: 0,
            actions: 2,
        };
        let mut rng = SmallRng::seed_from_u64(0);
        assert!(matches!(
            Evaluator::new(&config, &mut env, &policy, &mut rng),
            Err(EvalError::ActionSpace { env: 4, policy: 2 })
        ));
    }

    #[test]
    fn test_evaluator_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let mut config = quiet_config(3, false);
        config.set_trace_path(&path);
        let mut env = CliffWalk::new(0);
        let policy = Constant {
            action: 1,
            actions: 4,
        };
        let mut rng = SmallRng::seed_from_u64(0);
        Evaluator::new(&config, &mut env, &policy, &mut rng)
            .unwrap()
            .run()
            .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let frames: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0]["evt"], "Start");
        assert_eq!(frames[0]["env"], "CliffWalk");
        assert_eq!(frames[3]["evt"], "Episode");
        assert_eq!(frames[3]["episode"], 2);
        assert_eq!(frames[3]["reward"], -100.0);
    }
}
