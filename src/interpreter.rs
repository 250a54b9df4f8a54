use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, ParseError};

/// The outcome of a single transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The machine can take another step.
    Continue,
    /// The machine reached a halt condition.
    Halt,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Halted,
    StepLimit,
    Cancelled,
}

/// Statistics of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps actually executed.
    pub steps: u64,
    pub stop: Stop,
}

/// Externally triggerable cancellation, checked once per step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounds imposed on a run by the caller.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    /// Maximum number of steps; `None` runs until the program halts.
    pub step_limit: Option<u64>,
    pub cancel: Option<CancelToken>,
}

impl Limits {
    pub fn steps(step_limit: u64) -> Self {
        Self {
            step_limit: Some(step_limit),
            cancel: None,
        }
    }
}

/// A language virtual machine.
///
/// Each language (Brainfuck, Befunge, ABCR, ...) implements this trait. The
/// driver is generic over `Interpreter` and only ever calls [`run`], which
/// parses the whole source before the first instruction executes and then
/// steps until a halt condition or a caller-imposed limit.
///
/// [`run`]: Interpreter::run
pub trait Interpreter {
    /// Human-readable language identifier, e.g. `"Brainfuck"`.
    fn language(&self) -> &'static str;

    /// Parse `source` into the program representation and reset the
    /// execution state. Nothing is read or written.
    fn load(&mut self, source: &str) -> Result<(), ParseError>;

    /// Called once after a successful `load`, before the first step.
    fn prepare(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Execute one transition.
    fn step(&mut self) -> Result<Step, Error>;

    /// Called once after the last step, also when a step failed.
    fn finish(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Load `source` and execute it within `limits`.
    fn run(&mut self, source: &str, limits: &Limits) -> Result<RunSummary, Error> {
        self.load(source)?;
        self.prepare()?;
        log::debug!("{}: program loaded, starting execution", self.language());

        let result = drive(self, limits);
        let finished = self.finish();
        let summary = result?;
        finished?;

        log::debug!(
            "{}: stopped after {} steps ({:?})",
            self.language(),
            summary.steps,
            summary.stop
        );
        Ok(summary)
    }
}

fn drive<I: Interpreter + ?Sized>(interp: &mut I, limits: &Limits) -> Result<RunSummary, Error> {
    let mut steps: u64 = 0;
    loop {
        if limits.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Ok(RunSummary { steps, stop: Stop::Cancelled });
        }
        if limits.step_limit.is_some_and(|limit| steps >= limit) {
            return Ok(RunSummary { steps, stop: Stop::StepLimit });
        }
        match interp.step()? {
            Step::Continue => steps += 1,
            Step::Halt => return Ok(RunSummary { steps, stop: Stop::Halted }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeFault;

    /// Counts down from `remaining`, halting at zero.
    struct Countdown {
        remaining: u32,
        finished: bool,
        fail_at: Option<u32>,
    }

    impl Countdown {
        fn new(remaining: u32) -> Self {
            Self { remaining, finished: false, fail_at: None }
        }
    }

    impl Interpreter for Countdown {
        fn language(&self) -> &'static str {
            "Countdown"
        }

        fn load(&mut self, source: &str) -> Result<(), ParseError> {
            if source == "bad" {
                return Err(ParseError::NoValidRotation);
            }
            Ok(())
        }

        fn step(&mut self) -> Result<Step, Error> {
            if self.fail_at == Some(self.remaining) {
                return Err(RuntimeFault::EndOfInput.into());
            }
            if self.remaining == 0 {
                return Ok(Step::Halt);
            }
            self.remaining -= 1;
            Ok(Step::Continue)
        }

        fn finish(&mut self) -> Result<(), Error> {
            self.finished = true;
            Ok(())
        }
    }

    #[test]
    fn test_run_until_halt() {
        let mut c = Countdown::new(5);
        let summary = c.run("", &Limits::default()).unwrap();
        assert_eq!(summary, RunSummary { steps: 5, stop: Stop::Halted });
        assert!(c.finished);
    }

    #[test]
    fn test_step_limit() {
        let mut c = Countdown::new(100);
        let summary = c.run("", &Limits::steps(10)).unwrap();
        assert_eq!(summary, RunSummary { steps: 10, stop: Stop::StepLimit });
        assert_eq!(c.remaining, 90);
    }

    #[test]
    fn test_cancelled_before_first_step() {
        let token = CancelToken::new();
        token.cancel();
        let limits = Limits { step_limit: None, cancel: Some(token) };
        let mut c = Countdown::new(100);
        let summary = c.run("", &limits).unwrap();
        assert_eq!(summary.stop, Stop::Cancelled);
        assert_eq!(c.remaining, 100);
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let token = CancelToken::new();
        let remote = token.clone();
        std::thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_parse_error_skips_execution() {
        let mut c = Countdown::new(5);
        let err = c.run("bad", &Limits::default()).unwrap_err();
        assert_eq!(err.as_parse(), Some(&ParseError::NoValidRotation));
        assert_eq!(c.remaining, 5);
        assert!(!c.finished);
    }

    #[test]
    fn test_finish_runs_after_fault() {
        let mut c = Countdown::new(5);
        c.fail_at = Some(3);
        let err = c.run("", &Limits::default()).unwrap_err();
        assert_eq!(err.as_fault(), Some(&RuntimeFault::EndOfInput));
        assert!(c.finished);
    }
}
