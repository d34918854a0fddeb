//! Cooperative priority scheduler
//!
//! A scheduler instance is a single logical worker. Work is expressed as
//! [`Task`]s that run to completion and either finish or ask to be run again
//! after a delay; nothing inside a task ever sleeps or blocks.
//!
//! Each [`tick`](Scheduler::tick) drains the queues in strict priority order:
//! the mixer queue is emptied before the input queue is touched, and so on.
//! Audio mixing therefore never waits behind control work queued on the same
//! instance.

pub mod chain;
pub mod driver;

use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::clock::ClockRef;

pub use chain::{ChainFailure, ChainListener, ChainStep, StepOutcome, TaskChain};
pub use driver::spawn_driver;

/// Scheduler queues, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Queue {
    /// Real-time audio mixing
    Mixer,
    /// Input I/O
    Input,
    /// Management and control work
    Management,
    /// Housekeeping timers
    Heartbeat,
}

impl Queue {
    pub const ALL: [Queue; 4] = [Queue::Mixer, Queue::Input, Queue::Management, Queue::Heartbeat];

    fn index(self) -> usize {
        match self {
            Queue::Mixer => 0,
            Queue::Input => 1,
            Queue::Management => 2,
            Queue::Heartbeat => 3,
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Queue::Mixer => "mixer",
            Queue::Input => "input",
            Queue::Management => "management",
            Queue::Heartbeat => "heartbeat",
        };
        f.write_str(name)
    }
}

/// What a task wants after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reschedule {
    /// The task is finished and will be dropped
    Done,
    /// Run again once the delay has elapsed. A zero delay means "next tick".
    After(Duration),
}

/// A unit of scheduled work
pub trait Task: Send {
    /// Name used in logs
    fn name(&self) -> &str {
        "task"
    }

    /// Execute one unit of work
    fn run(&mut self, now: Duration) -> Reschedule;

    /// Called instead of `run` when the task is found cancelled at an
    /// execution boundary
    fn cancelled(&mut self) {}
}

#[derive(Debug, Default)]
struct HandleState {
    cancelled: AtomicBool,
    finished: AtomicBool,
}

/// Cancellation handle for a submitted task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    state: Arc<HandleState>,
}

impl TaskHandle {
    fn new() -> Self {
        Self { state: Arc::new(HandleState::default()) }
    }

    /// Flag the task as cancelled. It is never interrupted mid-run; the flag
    /// is observed before its next execution.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Whether the scheduler has dropped the task
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    fn finish(&self) {
        self.state.finished.store(true, Ordering::Release);
    }
}

struct Entry {
    task: Box<dyn Task>,
    handle: TaskHandle,
    queue: Queue,
}

struct Delayed {
    due: Duration,
    seq: u64,
    entry: Entry,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    // Reversed so the max-heap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct State {
    queues: [VecDeque<Entry>; 4],
    delayed: BinaryHeap<Delayed>,
}

struct Inner {
    name: String,
    clock: ClockRef,
    state: Mutex<State>,
    seq: AtomicU64,
}

/// Tasks executed during one tick, per queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub executed: [usize; 4],
}

impl TickReport {
    pub fn executed_on(&self, queue: Queue) -> usize {
        self.executed[queue.index()]
    }

    pub fn total(&self) -> usize {
        self.executed.iter().sum()
    }
}

/// Handle to a scheduler instance. Clones share the same queues.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler instance reading time from `clock`
    pub fn new(name: impl Into<String>, clock: ClockRef) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                clock,
                state: Mutex::new(State::default()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current time of the scheduler's clock
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Enqueue a task for the next execution pass. Never runs it inline.
    pub fn submit<T: Task + 'static>(&self, task: T, queue: Queue) -> TaskHandle {
        self.submit_boxed(Box::new(task), queue)
    }

    pub fn submit_boxed(&self, task: Box<dyn Task>, queue: Queue) -> TaskHandle {
        let handle = TaskHandle::new();
        trace!(scheduler = %self.inner.name, task = task.name(), %queue, "task submitted");
        self.inner.state.lock().queues[queue.index()].push_back(Entry {
            task,
            handle: handle.clone(),
            queue,
        });
        handle
    }

    /// Enqueue a task that becomes eligible once `delay` has elapsed
    pub fn schedule<T: Task + 'static>(&self, task: T, queue: Queue, delay: Duration) -> TaskHandle {
        let handle = TaskHandle::new();
        let entry = Entry {
            task: Box::new(task),
            handle: handle.clone(),
            queue,
        };
        self.push_delayed(entry, self.now() + delay);
        handle
    }

    fn push_delayed(&self, entry: Entry, due: Duration) {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner.state.lock().delayed.push(Delayed { due, seq, entry });
    }

    /// Number of tasks waiting, ready or delayed
    pub fn pending(&self) -> usize {
        let state = self.inner.state.lock();
        state.queues.iter().map(VecDeque::len).sum::<usize>() + state.delayed.len()
    }

    /// Run one scheduling pass
    pub fn tick(&self) -> TickReport {
        let now = self.now();
        let mut report = TickReport::default();

        {
            let mut state = self.inner.state.lock();
            while state.delayed.peek().map_or(false, |top| top.due <= now) {
                if let Some(delayed) = state.delayed.pop() {
                    let queue = delayed.entry.queue.index();
                    state.queues[queue].push_back(delayed.entry);
                }
            }
        }

        while let Some(entry) = self.next_ready() {
            report.executed[entry.queue.index()] += 1;
            self.execute(entry, now);
        }

        report
    }

    fn next_ready(&self) -> Option<Entry> {
        let mut state = self.inner.state.lock();
        state.queues.iter_mut().find_map(VecDeque::pop_front)
    }

    fn execute(&self, mut entry: Entry, now: Duration) {
        if entry.handle.is_cancelled() {
            debug!(scheduler = %self.inner.name, task = entry.task.name(), "dropping cancelled task");
            entry.task.cancelled();
            entry.handle.finish();
            return;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.task.run(now)));
        match outcome {
            Ok(Reschedule::Done) => entry.handle.finish(),
            Ok(Reschedule::After(delay)) => {
                if entry.handle.is_cancelled() {
                    entry.task.cancelled();
                    entry.handle.finish();
                } else {
                    self.push_delayed(entry, now + delay);
                }
            }
            Err(payload) => {
                error!(
                    scheduler = %self.inner.name,
                    task = entry.task.name(),
                    "task panicked: {}",
                    panic_message(payload.as_ref())
                );
                entry.handle.finish();
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
