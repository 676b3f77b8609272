use log::{trace, warn};
use std::fmt::Debug;

/// Trait for types that can be simulated by [`Simulator`].
pub trait Simulatable: Debug {
    /// Advance the simulation one round. Returns `false` if nothing could progress.
    ///
    /// This operation should be deterministic: the state after a tick only depends on the state
    /// before it.
    fn tick(&mut self) -> bool;

    /// Returns `true` once there is nothing left to simulate.
    fn is_done(&self) -> bool;
}

/// How a call to [`Simulator::run`] ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RunOutcome {
    /// The simulatable has nothing left to simulate.
    Finished,
    /// A round made no progress although the simulatable is not done.
    Stalled,
    /// The step limit was reached first.
    StepLimit,
}

/// Drives a [`Simulatable`] round by round.
#[derive(Debug)]
pub struct Simulator<S: Simulatable> {
    /// The object that's being simulated.
    simulatable: S,
    steps: usize,
}

impl<S: Simulatable> Simulator<S> {
    pub fn new(simulatable: S) -> Self {
        Self {
            simulatable,
            steps: 0,
        }
    }

    /// Provides immutable access to the simulatable.
    pub fn simulatable(&self) -> &S {
        &self.simulatable
    }

    /// Provides mutable access to the simulatable, e.g. to load memory between steps.
    pub fn simulatable_mut(&mut self) -> &mut S {
        &mut self.simulatable
    }

    pub fn into_inner(self) -> S {
        self.simulatable
    }

    /// Returns the number of steps taken so far.
    pub fn current_steps(&self) -> usize {
        self.steps
    }

    /// Advance the simulation by one round. Returns `false` if the round made no progress.
    pub fn step(&mut self) -> bool {
        trace!("Stepping simulator once");
        self.steps += 1;
        self.simulatable.tick()
    }

    /// Steps until the simulatable is done or stops progressing, taking at most `max_steps` steps
    /// if given.
    pub fn run(&mut self, max_steps: Option<usize>) -> RunOutcome {
        let start = self.steps;
        loop {
            if self.simulatable.is_done() {
                trace!("Simulation finished after {} steps", self.steps);
                return RunOutcome::Finished;
            }
            if max_steps.is_some_and(|max| self.steps - start >= max) {
                return RunOutcome::StepLimit;
            }
            if !self.step() {
                if self.simulatable.is_done() {
                    return RunOutcome::Finished;
                }
                warn!("Simulation stalled after {} steps", self.steps);
                return RunOutcome::Stalled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts down, optionally getting stuck at some value.
    #[derive(Debug)]
    struct Countdown {
        value: u32,
        stuck_at: Option<u32>,
    }

    impl Simulatable for Countdown {
        fn tick(&mut self) -> bool {
            if self.value == 0 || Some(self.value) == self.stuck_at {
                return false;
            }
            self.value -= 1;
            true
        }

        fn is_done(&self) -> bool {
            self.value == 0
        }
    }

    #[test]
    fn runs_to_completion() {
        let mut simulator = Simulator::new(Countdown {
            value: 5,
            stuck_at: None,
        });
        assert_eq!(RunOutcome::Finished, simulator.run(None));
        assert_eq!(5, simulator.current_steps());
        assert_eq!(RunOutcome::Finished, simulator.run(None));
        assert_eq!(5, simulator.current_steps());
    }

    #[test]
    fn detects_stall() {
        let mut simulator = Simulator::new(Countdown {
            value: 5,
            stuck_at: Some(2),
        });
        assert_eq!(RunOutcome::Stalled, simulator.run(None));
        assert_eq!(2, simulator.simulatable().value);
    }

    #[test]
    fn step_limit() {
        let mut simulator = Simulator::new(Countdown {
            value: 5,
            stuck_at: None,
        });
        assert_eq!(RunOutcome::StepLimit, simulator.run(Some(2)));
        assert_eq!(3, simulator.simulatable().value);
        simulator.simulatable_mut().value = 1;
        assert_eq!(RunOutcome::Finished, simulator.run(Some(2)));
    }
}
