use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;

pub type ActionId = usize;
pub type Observation = Array1<f32>;

#[derive(Debug, Error, PartialEq)]
pub enum EnvError {
    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),
    #[error("action {action} out of range, environment has {actions} actions")]
    InvalidAction { action: ActionId, actions: usize },
    #[error("step called on a finished episode, call reset first")]
    EpisodeFinished,
    #[error("frame stack must hold at least one frame")]
    EmptyFrameStack,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StepInfo {
    pub steps: usize,
    /// Episode ended on the step limit rather than a terminal state.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

pub trait Environment {
    fn name(&self) -> &str;
    fn observation_dim(&self) -> usize;
    fn action_count(&self) -> usize;
    fn reset(&mut self) -> Observation;
    fn step(&mut self, action: ActionId) -> Result<Step, EnvError>;
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn observation_dim(&self) -> usize {
        (**self).observation_dim()
    }
    fn action_count(&self) -> usize {
        (**self).action_count()
    }
    fn reset(&mut self) -> Observation {
        (**self).reset()
    }
    fn step(&mut self, action: ActionId) -> Result<Step, EnvError> {
        (**self).step(action)
    }
}

/// Intensity of an active cell in one-hot frames, mimics a raw pixel value.
pub const FRAME_INTENSITY: f32 = 255.0;

fn one_hot(size: usize, index: usize) -> Observation {
    let mut frame = Observation::zeros(size);
    frame[index] = FRAME_INTENSITY;
    frame
}

/// Episode bookkeeping shared by the built-in environments.
#[derive(Debug)]
struct EpisodeClock {
    steps: usize,
    max_steps: usize,
    done: bool,
}

impl EpisodeClock {
    fn new(max_steps: usize) -> Self {
        EpisodeClock {
            steps: 0,
            max_steps,
            done: true,
        }
    }

    fn reset(&mut self) {
        self.steps = 0;
        self.done = false;
    }

    fn begin_step(&mut self) -> Result<(), EnvError> {
        if self.done {
            return Err(EnvError::EpisodeFinished);
        }
        self.steps += 1;
        Ok(())
    }

    fn finish(&mut self, terminal: bool) -> (bool, StepInfo) {
        let truncated = !terminal && self.steps >= self.max_steps;
        self.done = terminal || truncated;
        (
            self.done,
            StepInfo {
                steps: self.steps,
                truncated,
            },
        )
    }
}

fn check_action(action: ActionId, actions: usize) -> Result<(), EnvError> {
    if action >= actions {
        Err(EnvError::InvalidAction { action, actions })
    } else {
        Ok(())
    }
}

/// Slippery one-dimensional chain. Reaching the right end pays `+1`,
/// the left end `-1`. Actions: 0 = left, 1 = right.
#[derive(Debug)]
pub struct RandomWalk {
    length: usize,
    slip: f64,
    position: usize,
    clock: EpisodeClock,
    rng: SmallRng,
}

impl RandomWalk {
    pub fn new(seed: u64) -> Self {
        RandomWalk {
            length: 7,
            slip: 0.2,
            position: 3,
            clock: EpisodeClock::new(100),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl Environment for RandomWalk {
    fn name(&self) -> &str {
        "RandomWalk"
    }

    fn observation_dim(&self) -> usize {
        self.length
    }

    fn action_count(&self) -> usize {
        2
    }

    fn reset(&mut self) -> Observation {
        self.position = self.length / 2;
        self.clock.reset();
        one_hot(self.length, self.position)
    }

    fn step(&mut self, action: ActionId) -> Result<Step, EnvError> {
        check_action(action, self.action_count())?;
        self.clock.begin_step()?;
        let right = (action == 1) != self.rng.gen_bool(self.slip);
        if right {
            self.position += 1;
        } else {
            self.position -= 1;
        }
        let (reward, terminal) = if self.position == self.length - 1 {
            (1.0, true)
        } else if self.position == 0 {
            (-1.0, true)
        } else {
            (0.0, false)
        };
        let (done, info) = self.clock.finish(terminal);
        Ok(Step {
            observation: one_hot(self.length, self.position),
            reward,
            done,
            info,
        })
    }
}

/// Windy cliff walk on a 4 x 12 grid. Every move costs `-1`, stepping into
/// the cliff along the bottom row costs `-100` and ends the episode. After
/// each move a gust pushes the agent one row down with probability `wind`.
/// Actions: 0 = up, 1 = right, 2 = down, 3 = left.
#[derive(Debug)]
pub struct CliffWalk {
    rows: usize,
    cols: usize,
    wind: f64,
    cell: (usize, usize),
    clock: EpisodeClock,
    rng: SmallRng,
}

impl CliffWalk {
    pub fn new(seed: u64) -> Self {
        CliffWalk {
            rows: 4,
            cols: 12,
            wind: 0.1,
            cell: (3, 0),
            clock: EpisodeClock::new(200),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn cell(&self) -> (usize, usize) {
        self.cell
    }

    fn start(&self) -> (usize, usize) {
        (self.rows - 1, 0)
    }

    fn is_cliff(&self, (row, col): (usize, usize)) -> bool {
        row == self.rows - 1 && col > 0 && col < self.cols - 1
    }

    fn is_goal(&self, (row, col): (usize, usize)) -> bool {
        row == self.rows - 1 && col == self.cols - 1
    }

    fn frame(&self) -> Observation {
        one_hot(self.rows * self.cols, self.cell.0 * self.cols + self.cell.1)
    }
}

impl Environment for CliffWalk {
    fn name(&self) -> &str {
        "CliffWalk"
    }

    fn observation_dim(&self) -> usize {
        self.rows * self.cols
    }

    fn action_count(&self) -> usize {
        4
    }

    fn reset(&mut self) -> Observation {
        self.cell = self.start();
        self.clock.reset();
        self.frame()
    }

    fn step(&mut self, action: ActionId) -> Result<Step, EnvError> {
        check_action(action, self.action_count())?;
        self.clock.begin_step()?;
        let (row, col) = self.cell;
        let mut next = match action {
            0 => (row.saturating_sub(1), col),
            1 => (row, (col + 1).min(self.cols - 1)),
            2 => ((row + 1).min(self.rows - 1), col),
            _ => (row, col.saturating_sub(1)),
        };
        if !self.is_goal(next) && self.rng.gen_bool(self.wind) {
            next.0 = (next.0 + 1).min(self.rows - 1);
        }
        self.cell = next;

        let (reward, terminal) = if self.is_cliff(next) {
            (-100.0, true)
        } else if self.is_goal(next) {
            (-1.0, true)
        } else {
            (-1.0, false)
        };
        let (done, info) = self.clock.finish(terminal);
        Ok(Step {
            observation: self.frame(),
            reward,
            done,
            info,
        })
    }
}

/// Builds a built-in environment by name. A trailing `NoFrameskip-v4` is
/// accepted so names used at training time resolve unchanged.
pub fn make_env(name: &str, seed: u64) -> Result<Box<dyn Environment>, EnvError> {
    let base = name.strip_suffix("NoFrameskip-v4").unwrap_or(name);
    match base {
        "RandomWalk" => Ok(Box::new(RandomWalk::new(seed))),
        "CliffWalk" => Ok(Box::new(CliffWalk::new(seed))),
        _ => Err(EnvError::UnknownEnvironment(name.to_string())),
    }
}
