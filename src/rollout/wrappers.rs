use crate::rollout::env::{ActionId, EnvError, Environment, Observation, Step};
use ndarray::{concatenate, ArrayView1, Axis};
use std::collections::VecDeque;

/// Stateful observation rewrite applied on top of an environment.
pub trait ObservationTransformer {
    fn output_dim(&self, input_dim: usize) -> usize;
    /// Called with the first observation of every episode.
    fn reset(&mut self, observation: Observation) -> Observation;
    fn transform(&mut self, observation: Observation) -> Observation;
}

#[derive(Debug, Clone)]
pub struct ScaleObservation {
    factor: f32,
}

impl ScaleObservation {
    pub fn new(factor: f32) -> Self {
        ScaleObservation { factor }
    }
}

impl ObservationTransformer for ScaleObservation {
    fn output_dim(&self, input_dim: usize) -> usize {
        input_dim
    }

    fn reset(&mut self, observation: Observation) -> Observation {
        self.transform(observation)
    }

    fn transform(&mut self, observation: Observation) -> Observation {
        observation * self.factor
    }
}

/// Concatenates the last `size` frames, oldest first. On reset the history is
/// filled with copies of the first frame.
#[derive(Debug, Clone)]
pub struct FrameStack {
    size: usize,
    frames: VecDeque<Observation>,
}

impl FrameStack {
    pub fn new(size: usize) -> Result<Self, EnvError> {
        if size == 0 {
            return Err(EnvError::EmptyFrameStack);
        }
        Ok(FrameStack {
            size,
            frames: VecDeque::with_capacity(size),
        })
    }

    fn stacked(&self) -> Observation {
        let views: Vec<ArrayView1<f32>> = self.frames.iter().map(|f| f.view()).collect();
        // all frames come from the same environment and share one length
        concatenate(Axis(0), &views).unwrap_or_else(|_| Observation::zeros(0))
    }
}

impl ObservationTransformer for FrameStack {
    fn output_dim(&self, input_dim: usize) -> usize {
        input_dim * self.size
    }

    fn reset(&mut self, observation: Observation) -> Observation {
        self.frames.clear();
        for _ in 0..self.size {
            self.frames.push_back(observation.clone());
        }
        self.stacked()
    }

    fn transform(&mut self, observation: Observation) -> Observation {
        if self.frames.len() == self.size {
            self.frames.pop_front();
        }
        self.frames.push_back(observation);
        self.stacked()
    }
}

/// Environment decorated with one observation transformer. Nest to compose;
/// the innermost wrapper sees raw observations first.
pub struct Wrapped<E: Environment, T: ObservationTransformer> {
    inner: E,
    transformer: T,
}

impl<E: Environment, T: ObservationTransformer> Wrapped<E, T> {
    pub fn new(inner: E, transformer: T) -> Self {
        Wrapped { inner, transformer }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Environment, T: ObservationTransformer> Environment for Wrapped<E, T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn observation_dim(&self) -> usize {
        self.transformer.output_dim(self.inner.observation_dim())
    }

    fn action_count(&self) -> usize {
        self.inner.action_count()
    }

    fn reset(&mut self) -> Observation {
        let observation = self.inner.reset();
        self.transformer.reset(observation)
    }

    fn step(&mut self, action: ActionId) -> Result<Step, EnvError> {
        let mut step = self.inner.step(action)?;
        step.observation = self.transformer.transform(step.observation);
        Ok(step)
    }
}

pub type DqnWrapped<E> = Wrapped<Wrapped<E, ScaleObservation>, FrameStack>;

/// Standard evaluation stack: scale raw frames, then stack the last
/// `frame_stack` of them.
pub fn wrap_dqn<E: Environment>(
    env: E,
    frame_stack: usize,
    scale: f32,
) -> Result<DqnWrapped<E>, EnvError> {
    Ok(Wrapped::new(
        Wrapped::new(env, ScaleObservation::new(scale)),
        FrameStack::new(frame_stack)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::{wrap_dqn, FrameStack, ObservationTransformer, ScaleObservation};
    use crate::rollout::env::{CliffWalk, EnvError, Environment, Observation, RandomWalk};
    use ndarray::array;

    #[test]
    fn test_scale() {
        let mut s = ScaleObservation::new(0.5);
        assert_eq!(s.transform(array![2.0, 4.0]), array![1.0, 2.0]);
        assert_eq!(s.output_dim(3), 3);
    }

    #[test]
    fn test_frame_stack_order() {
        let mut fs = FrameStack::new(3).unwrap();
        let first: Observation = array![1.0, 2.0];
        assert_eq!(fs.reset(first), array![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(
            fs.transform(array![3.0, 4.0]),
            array![1.0, 2.0, 1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(
            fs.transform(array![5.0, 6.0]),
            array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
        assert_eq!(
            fs.transform(array![7.0, 8.0]),
            array![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
        // reset drops the old history
        assert_eq!(fs.reset(array![0.0, 1.0]), array![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_empty_frame_stack() {
        assert_eq!(FrameStack::new(0).unwrap_err(), EnvError::EmptyFrameStack);
        assert!(matches!(
            wrap_dqn(RandomWalk::new(0), 0, 1.0),
            Err(EnvError::EmptyFrameStack)
        ));
    }

    #[test]
    fn test_wrap_dqn() {
        let mut env = wrap_dqn(RandomWalk::new(0), 4, 1.0 / 255.0).unwrap();
        assert_eq!(env.observation_dim(), 28);
        assert_eq!(env.action_count(), 2);
        let obs = env.reset();
        assert_eq!(obs.len(), 28);
        assert!((obs.sum() - 4.0).abs() < 1e-5);
        let step = env.step(0).unwrap();
        assert_eq!(step.observation.len(), 28);
        // newest frame is last and differs from the reset frame
        assert_ne!(
            step.observation.slice(ndarray::s![21..]),
            obs.slice(ndarray::s![21..])
        );
    }

    #[test]
    fn test_wrap_boxed() {
        let boxed: Box<dyn Environment> = Box::new(CliffWalk::new(0));
        let mut env = wrap_dqn(boxed, 2, 1.0).unwrap();
        assert_eq!(env.observation_dim(), 96);
        assert_eq!(env.reset().len(), 96);
    }
}
