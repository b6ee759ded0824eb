//! Event Loop Implementation
//!
//! A single-threaded event loop with a microtask queue and a timer
//! (macrotask) queue running on virtual time. Promises defer their reaction
//! drains through the [`Scheduler`] trait; [`EventLoop`] implements it by
//! preferring the microtask queue and, when configured for the coarse
//! fallback, queueing a zero-delay timer instead.
//!
//! Each turn of [`EventLoop::run_to_completion`]:
//!   1. Drain all microtasks (budget-limited)
//!   2. Run the next ready macrotask, advancing virtual time if needed
//!   3. Repeat until both queues are empty

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// A unit of deferred work
pub type Job = Box<dyn FnOnce()>;

/// The deferral primitive promises use to run their reactions on a later turn.
///
/// Any `Fn(Job)` closure is a scheduler, which makes it easy to inject a
/// recording or synchronous-for-testing scheduler.
pub trait Scheduler {
    /// Queue `job` to run after the current call stack has unwound
    fn schedule(&self, job: Job);
}

impl<F> Scheduler for F
where
    F: Fn(Job),
{
    fn schedule(&self, job: Job) {
        self(job)
    }
}

/// Which queue deferred promise work lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    /// Fine-grained: the microtask queue (preferred)
    #[default]
    Microtask,
    /// Coarse fallback: a zero-delay timer on the macrotask queue
    Timer,
}

impl FromStr for SchedulingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "microtask" => Ok(SchedulingMode::Microtask),
            "timer" => Ok(SchedulingMode::Timer),
            other => Err(Error::invalid_config(EventLoopConfig::SCHEDULING_VAR, other)),
        }
    }
}

/// Configuration for an [`EventLoop`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Queue used by [`Scheduler::schedule`].
    pub scheduling: SchedulingMode,
    /// Maximum microtasks drained per tick (starvation protection).
    pub max_microtasks_per_tick: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            scheduling: SchedulingMode::Microtask,
            max_microtasks_per_tick: 10_000,
        }
    }
}

impl EventLoopConfig {
    /// Environment variable selecting the [`SchedulingMode`]
    pub const SCHEDULING_VAR: &'static str = "THENABLE_SCHEDULING";
    /// Environment variable overriding the per-tick microtask budget
    pub const MAX_MICROTASKS_VAR: &'static str = "THENABLE_MAX_MICROTASKS_PER_TICK";

    /// Set the scheduling mode
    pub fn with_scheduling(mut self, scheduling: SchedulingMode) -> Self {
        self.scheduling = scheduling;
        self
    }

    /// Set the per-tick microtask budget
    pub fn with_max_microtasks_per_tick(mut self, limit: usize) -> Self {
        self.max_microtasks_per_tick = limit;
        self
    }

    /// Build a configuration from the process environment, starting from defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(mode) = lookup(Self::SCHEDULING_VAR) {
            config.scheduling = mode.parse()?;
        }
        if let Some(limit) = lookup(Self::MAX_MICROTASKS_VAR) {
            config.max_microtasks_per_tick = limit
                .trim()
                .parse()
                .map_err(|_| Error::invalid_config(Self::MAX_MICROTASKS_VAR, &limit))?;
        }
        Ok(config)
    }
}

/// A timer waiting on the macrotask queue
struct Macrotask {
    id: u64,
    fire_at: u64,
    job: Job,
}

/// Result of running the event loop to completion via `run_to_completion()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Total number of microtasks that were dequeued and processed
    pub microtasks_processed: usize,
    /// Total number of macrotasks that were dequeued and processed
    pub macrotasks_processed: usize,
    /// Number of full event loop iterations (each iteration = drain microtasks + one macrotask)
    pub iterations: usize,
    /// The virtual time when the event loop finished
    pub final_time: u64,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopStats {
    /// Jobs handed to the loop through [`Scheduler::schedule`]
    pub jobs_scheduled: u64,
    /// Total microtasks processed across all ticks
    pub total_microtasks: u64,
    /// Total macrotasks processed across all ticks
    pub total_macrotasks: u64,
    /// Total number of event loop ticks
    pub total_ticks: u64,
    /// Maximum microtasks drained in a single tick
    pub max_microtasks_per_tick: u64,
    /// Longest tick duration in microseconds (wall-clock)
    pub longest_tick_us: u64,
}

struct Inner {
    config: EventLoopConfig,
    microtask_queue: RefCell<VecDeque<Job>>,
    macrotask_queue: RefCell<Vec<Macrotask>>,
    virtual_time: Cell<u64>,
    next_timer_id: Cell<u64>,
    running: Cell<bool>,
    stats: RefCell<EventLoopStats>,
}

/// The event loop manages task queues and execution order.
///
/// `EventLoop` is a cheap handle; clones share the same queues. No borrow of
/// the queues is held while a job runs, so jobs may freely schedule more work.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

/// Clears the running flag when a drive of the loop ends, even by unwinding
struct RunGuard<'a>(&'a Cell<bool>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("config", &self.inner.config)
            .field("microtasks", &self.inner.microtask_queue.borrow().len())
            .field("macrotasks", &self.inner.macrotask_queue.borrow().len())
            .field("virtual_time", &self.inner.virtual_time.get())
            .finish()
    }
}

impl EventLoop {
    /// Create a new event loop with the default configuration
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::default())
    }

    /// Create a new event loop with the given configuration
    pub fn with_config(config: EventLoopConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                microtask_queue: RefCell::new(VecDeque::new()),
                macrotask_queue: RefCell::new(Vec::new()),
                virtual_time: Cell::new(0),
                next_timer_id: Cell::new(1),
                running: Cell::new(false),
                stats: RefCell::new(EventLoopStats::default()),
            }),
        }
    }

    /// The configuration this loop was built with
    pub fn config(&self) -> &EventLoopConfig {
        &self.inner.config
    }

    /// Get current virtual time
    pub fn current_time(&self) -> u64 {
        self.inner.virtual_time.get()
    }

    /// Advance virtual time
    pub fn advance_time(&self, ms: u64) {
        self.inner.virtual_time.set(self.current_time().saturating_add(ms));
    }

    /// Enqueue a microtask
    pub fn enqueue_microtask<F>(&self, job: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner.microtask_queue.borrow_mut().push_back(Box::new(job));
    }

    /// Schedule `job` to run once `delay` ms of virtual time have passed.
    ///
    /// Timers with equal fire times run in the order they were set.
    pub fn set_timeout<F>(&self, job: F, delay: u64) -> u64
    where
        F: FnOnce() + 'static,
    {
        let id = self.inner.next_timer_id.get();
        self.inner.next_timer_id.set(id + 1);

        let fire_at = self.current_time().saturating_add(delay);
        self.inner.macrotask_queue.borrow_mut().push(Macrotask {
            id,
            fire_at,
            job: Box::new(job),
        });
        trace!(timer = id, fire_at, "timer scheduled");
        id
    }

    /// Cancel a timer by ID. Returns `false` if it already ran or never existed.
    pub fn clear_timeout(&self, id: u64) -> bool {
        let mut queue = self.inner.macrotask_queue.borrow_mut();
        match queue.iter().position(|t| t.id == id) {
            Some(idx) => {
                queue.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Check if there are pending microtasks
    pub fn has_pending_microtasks(&self) -> bool {
        !self.inner.microtask_queue.borrow().is_empty()
    }

    /// Check if there are pending macrotasks
    pub fn has_pending_macrotasks(&self) -> bool {
        !self.inner.macrotask_queue.borrow().is_empty()
    }

    /// Check if the event loop has any pending work
    pub fn has_pending_work(&self) -> bool {
        self.has_pending_microtasks() || self.has_pending_macrotasks()
    }

    fn enter(&self) -> Result<RunGuard<'_>> {
        if self.inner.running.replace(true) {
            return Err(Error::reentrant_run());
        }
        Ok(RunGuard(&self.inner.running))
    }

    /// Drain the microtask queue, including microtasks queued while draining.
    ///
    /// Returns the number of microtasks run, or a resource limit error once
    /// more than `max_microtasks_per_tick` run in one go. Unrun microtasks stay
    /// queued.
    pub fn run_microtasks(&self) -> Result<usize> {
        let _guard = self.enter()?;
        self.drain_microtasks()
    }

    fn drain_microtasks(&self) -> Result<usize> {
        let limit = self.inner.config.max_microtasks_per_tick;
        let mut count: usize = 0;

        loop {
            let job = self.inner.microtask_queue.borrow_mut().pop_front();
            let Some(job) = job else { break };
            if count >= limit {
                self.inner.microtask_queue.borrow_mut().push_front(job);
                self.record_microtasks(count);
                warn!(limit, "microtask budget exhausted");
                return Err(Error::microtask_limit_exceeded(limit));
            }
            job();
            count += 1;
        }

        self.record_microtasks(count);
        Ok(count)
    }

    fn record_microtasks(&self, count: usize) {
        let mut stats = self.inner.stats.borrow_mut();
        stats.total_microtasks += count as u64;
        stats.max_microtasks_per_tick = stats.max_microtasks_per_tick.max(count as u64);
    }

    /// Remove the next timer to fire, advancing virtual time to it if needed
    fn next_macrotask(&self) -> Option<Macrotask> {
        let mut queue = self.inner.macrotask_queue.borrow_mut();
        let idx = queue
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (t.fire_at, t.id))
            .map(|(i, _)| i)?;
        let task = queue.remove(idx);
        if task.fire_at > self.current_time() {
            self.inner.virtual_time.set(task.fire_at);
        }
        Some(task)
    }

    /// Run the event loop to completion following the standard algorithm:
    ///   1. Drain all microtasks
    ///   2. If a macrotask exists, execute it (advance time if needed)
    ///   3. Repeat from step 1
    ///   4. Stop when no microtasks and no macrotasks remain
    ///
    /// Returns a `RunResult` with statistics about what was processed.
    pub fn run_to_completion(&self) -> Result<RunResult> {
        let _guard = self.enter()?;
        let mut result = RunResult::default();

        loop {
            let tick_start = Instant::now();

            // Step 1: drain all microtasks (budget-limited)
            result.microtasks_processed += self.drain_microtasks()?;

            // Step 2: try to process one macrotask
            let macrotask = self.next_macrotask();
            let ran_macrotask = match macrotask {
                Some(task) => {
                    trace!(timer = task.id, at = self.current_time(), "timer fired");
                    (task.job)();
                    true
                }
                None => false,
            };

            {
                let mut stats = self.inner.stats.borrow_mut();
                stats.total_ticks += 1;
                let tick_us = tick_start.elapsed().as_micros() as u64;
                stats.longest_tick_us = stats.longest_tick_us.max(tick_us);
                if ran_macrotask {
                    stats.total_macrotasks += 1;
                }
            }

            if ran_macrotask {
                result.macrotasks_processed += 1;
                result.iterations += 1;
                // After processing a macrotask, loop back to drain microtasks again
                continue;
            }

            // No macrotask was available and the microtask queue is empty
            if !self.has_pending_microtasks() {
                break;
            }

            result.iterations += 1;
        }

        result.final_time = self.current_time();
        debug!(
            microtasks = result.microtasks_processed,
            macrotasks = result.macrotasks_processed,
            final_time = result.final_time,
            "event loop idle"
        );
        Ok(result)
    }

    /// Get a snapshot of the current event loop statistics.
    pub fn stats(&self) -> EventLoopStats {
        self.inner.stats.borrow().clone()
    }

    /// Reset all event loop statistics to zero.
    pub fn reset_stats(&self) {
        *self.inner.stats.borrow_mut() = EventLoopStats::default();
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, job: Job) {
        self.inner.stats.borrow_mut().jobs_scheduled += 1;
        match self.inner.config.scheduling {
            SchedulingMode::Microtask => {
                self.inner.microtask_queue.borrow_mut().push_back(job);
            }
            SchedulingMode::Timer => {
                self.set_timeout(job, 0);
            }
        }
    }
}

thread_local! {
    static CURRENT: RefCell<EventLoop> = RefCell::new(default_event_loop());
}

fn default_event_loop() -> EventLoop {
    let config = EventLoopConfig::from_env().unwrap_or_else(|err| {
        warn!(%err, "ignoring invalid event loop configuration");
        EventLoopConfig::default()
    });
    EventLoop::with_config(config)
}

/// The event loop of the current thread.
///
/// Created on first use from [`EventLoopConfig::from_env`]. Promises built
/// with [`Promise::new`](crate::Promise::new) schedule their work here.
pub fn current() -> EventLoop {
    CURRENT.with(|el| el.borrow().clone())
}

/// Replace the current thread's event loop, returning the previous one
pub fn set_current(event_loop: EventLoop) -> EventLoop {
    CURRENT.with(|el| el.replace(event_loop))
}
