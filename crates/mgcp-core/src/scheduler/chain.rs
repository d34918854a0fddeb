//! Task chains
//!
//! A [`TaskChain`] is an immutable list of steps that run back to back on a
//! single queue. The per-run state travels through the steps as a context
//! value `C`, so one chain instance can be started any number of times
//! concurrently without sharing mutable fields.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Queue, Reschedule, Scheduler, Task, TaskHandle, panic_message};

/// Result of a successful step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Go straight on to the next step
    Continue,
    /// Resume with the next step once the delay has elapsed
    Wait(Duration),
}

/// One step of a chain
pub trait ChainStep<C, E>: Send + Sync {
    fn name(&self) -> &'static str;

    fn perform(&self, ctx: &mut C) -> Result<StepOutcome, E>;
}

/// Why a chain did not complete
#[derive(Debug)]
pub enum ChainFailure<E> {
    /// A step returned an error
    Step(E),
    /// A step panicked
    Panicked(String),
    /// The chain's task was cancelled before finishing
    Cancelled,
    /// The chain ran past its deadline
    TimedOut,
}

impl<E: fmt::Display> fmt::Display for ChainFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFailure::Step(e) => write!(f, "{}", e),
            ChainFailure::Panicked(message) => write!(f, "step panicked: {}", message),
            ChainFailure::Cancelled => f.write_str("chain cancelled"),
            ChainFailure::TimedOut => f.write_str("chain timed out"),
        }
    }
}

/// Receives exactly one of the two callbacks per chain run
pub trait ChainListener<C, E>: Send {
    fn on_complete(self: Box<Self>, ctx: C);

    fn on_exception(self: Box<Self>, ctx: C, failure: ChainFailure<E>);
}

/// An ordered, shareable sequence of steps
pub struct TaskChain<C, E> {
    name: String,
    queue: Queue,
    steps: Arc<[Arc<dyn ChainStep<C, E>>]>,
    deadline: Option<Duration>,
}

impl<C, E> Clone for TaskChain<C, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            queue: self.queue,
            steps: self.steps.clone(),
            deadline: self.deadline,
        }
    }
}

impl<C, E> fmt::Debug for TaskChain<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskChain")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl<C: Send + 'static, E: Send + 'static> TaskChain<C, E> {
    pub fn new(name: impl Into<String>, queue: Queue, steps: Vec<Arc<dyn ChainStep<C, E>>>) -> Self {
        Self {
            name: name.into(),
            queue,
            steps: steps.into(),
            deadline: None,
        }
    }

    /// Fail the run with [`ChainFailure::TimedOut`] if it has not completed
    /// within `deadline` of its first execution
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> Queue {
        self.queue
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Submit a run of this chain to `scheduler`
    pub fn start(
        &self,
        scheduler: &Scheduler,
        ctx: C,
        listener: Box<dyn ChainListener<C, E>>,
    ) -> TaskHandle {
        let runner = ChainRunner {
            name: self.name.clone(),
            steps: self.steps.clone(),
            index: 0,
            timeout: self.deadline,
            deadline: None,
            ctx: Some(ctx),
            listener: Some(listener),
        };
        scheduler.submit(runner, self.queue)
    }
}

struct ChainRunner<C, E> {
    name: String,
    steps: Arc<[Arc<dyn ChainStep<C, E>>]>,
    index: usize,
    timeout: Option<Duration>,
    deadline: Option<Duration>,
    ctx: Option<C>,
    listener: Option<Box<dyn ChainListener<C, E>>>,
}

impl<C, E> ChainRunner<C, E> {
    fn complete(&mut self, ctx: C) {
        if let Some(listener) = self.listener.take() {
            listener.on_complete(ctx);
        }
    }

    fn fail(&mut self, ctx: C, failure: ChainFailure<E>) {
        if let Some(listener) = self.listener.take() {
            listener.on_exception(ctx, failure);
        }
    }
}

impl<C: Send, E: Send> Task for ChainRunner<C, E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, now: Duration) -> Reschedule {
        if self.deadline.is_none() {
            self.deadline = self.timeout.map(|timeout| now + timeout);
        }

        let Some(mut ctx) = self.ctx.take() else {
            return Reschedule::Done;
        };

        while self.index < self.steps.len() {
            if self.deadline.map_or(false, |deadline| now > deadline) {
                warn!(chain = %self.name, step = self.index, "chain deadline exceeded");
                self.fail(ctx, ChainFailure::TimedOut);
                return Reschedule::Done;
            }

            let step = self.steps[self.index].clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| step.perform(&mut ctx)));
            match outcome {
                Ok(Ok(StepOutcome::Continue)) => self.index += 1,
                Ok(Ok(StepOutcome::Wait(delay))) => {
                    self.index += 1;
                    self.ctx = Some(ctx);
                    return Reschedule::After(delay);
                }
                Ok(Err(e)) => {
                    debug!(chain = %self.name, step = step.name(), "step failed");
                    self.fail(ctx, ChainFailure::Step(e));
                    return Reschedule::Done;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(chain = %self.name, step = step.name(), "step panicked: {}", message);
                    self.fail(ctx, ChainFailure::Panicked(message));
                    return Reschedule::Done;
                }
            }
        }

        self.complete(ctx);
        Reschedule::Done
    }

    fn cancelled(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.fail(ctx, ChainFailure::Cancelled);
        }
    }
}
