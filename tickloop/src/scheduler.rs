//! The scheduler engine and its control surface.
//!
//! # Locking
//!
//! Shared state sits behind a single critical section so that control calls
//! arriving from interrupt context cannot observe a half-mutated task set.
//! Critical sections are short: lookups, single mutations, list drains.
//! Actions and timeout handlers always run with the lock released; an action
//! may add tasks or call [`Scheduler::stop`], and what it adds becomes
//! visible to the engine on the next tick.
//!
//! Conditions are the exception: they are evaluated inside the critical
//! section during the classification passes. Keep them short and do not
//! call back into the scheduler from one.

use core::cell::RefCell;
use core::marker::PhantomData;

use critical_section::Mutex;
use heapless::Vec;

use alloc::boxed::Box;

use crate::pid::PidAllocator;
use crate::store::{RemovalLedger, TaskStore};
use crate::task::{Action, Condition, Pid, Task, TimeoutFn};
use crate::time::{self, Monotonic};
use crate::{MAX_TASKS, MAX_WAIT};

/// Errors reported by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ScheduleError {
    /// The store already holds [`MAX_TASKS`] tasks.
    CapacityExceeded,
    /// The mutation was attempted while the engine is inside [`Scheduler::poll`].
    InLoop,
    /// No live task carries the given PID.
    NotFound,
    /// The task exists but is not a repeating task.
    NotRepeating,
}

struct Inner {
    store: TaskStore,
    ledger: RemovalLedger,
    pids: PidAllocator,
    sequential: bool,
    /// In sequential mode, time references are relative to this instant.
    last_sequential_finish: u32,
    will_stop: bool,
    on_hold: bool,
    in_loop: bool,
}

impl Inner {
    const fn new() -> Self {
        Self {
            store: TaskStore::new(),
            ledger: RemovalLedger::new(),
            pids: PidAllocator::new(),
            sequential: false,
            last_sequential_finish: 0,
            will_stop: false,
            on_hold: false,
            in_loop: false,
        }
    }

    fn insert(
        &mut self,
        action: Action,
        condition: Option<Condition>,
        condition_wait: u32,
        post_condition_delay: u32,
        repeat: bool,
        interval: u32,
        on_timeout: Option<TimeoutFn>,
    ) -> Result<Pid, ScheduleError> {
        if self.store.is_full() {
            log::warn!("task limit of {} reached, not adding", MAX_TASKS);
            return Err(ScheduleError::CapacityExceeded);
        }
        let store = &self.store;
        let pid = self.pids.allocate(|candidate| store.contains(candidate));
        let _ = self.store.push(Task {
            pid,
            action,
            repeat,
            interval,
            condition,
            condition_met: false,
            condition_wait,
            post_condition_delay,
            execute_at: 0,
            on_timeout,
        });
        Ok(pid)
    }
}

/// A cooperative, tick-driven task scheduler.
///
/// Tasks progress in one of two disciplines: **parallel** (all tasks advance
/// against wall-clock time, repetition allowed) or **sequential** (strict
/// FIFO, one task at a time, time references relative to the previous
/// task's completion).
///
/// `new` is `const`, so the intended deployment is a
/// `static SCHEDULER: Scheduler<SysClock>` that the main loop polls and that
/// actions and interrupt handlers call into.
pub struct Scheduler<M: Monotonic> {
    inner: Mutex<RefCell<Inner>>,
    _clock: PhantomData<M>,
}

/// Scope-bound marker for "the engine body is running". Cleared on every
/// exit path, including a panicking action.
struct LoopGuard<'a, M: Monotonic> {
    scheduler: &'a Scheduler<M>,
}

impl<M: Monotonic> Drop for LoopGuard<'_, M> {
    fn drop(&mut self) {
        self.scheduler.with(|inner| inner.in_loop = false);
    }
}

enum Verdict {
    Wait,
    Remove(Pid),
    Execute(Pid, Action),
}

impl<M: Monotonic> Default for Scheduler<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Monotonic> Scheduler<M> {
    /// Create an empty scheduler in parallel mode.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner::new())),
            _clock: PhantomData,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            f(&mut inner)
        })
    }

    /// Add a purely timed one-shot task: it runs `delay_ms` after its first
    /// evaluation by [`poll`](Self::poll) (parallel mode) or after the
    /// previous task's completion (sequential mode).
    pub fn add_timed_task<A>(&self, action: A, delay_ms: u32) -> Result<Pid, ScheduleError>
    where
        A: FnMut() + Send + 'static,
    {
        self.add(Box::new(action), None, 0, delay_ms, false, 0, None)
    }

    /// Add a repeating task: the first run comes `delay_ms` after the first
    /// evaluation, later runs every `interval_ms`.
    ///
    /// Repetition exists in parallel mode only. In sequential mode the task
    /// is added as a one-shot instead and a warning is logged.
    pub fn add_repeating_task<A>(
        &self,
        action: A,
        delay_ms: u32,
        interval_ms: u32,
    ) -> Result<Pid, ScheduleError>
    where
        A: FnMut() + Send + 'static,
    {
        self.add(Box::new(action), None, 0, delay_ms, true, interval_ms, None)
    }

    /// Add a conditional task: it runs as soon as `condition` turns true.
    ///
    /// A nonzero `wait_ms` bounds how long the condition may take; if the
    /// deadline expires the task is dropped and `on_timeout`, if provided,
    /// is called with the task's PID. `wait_ms == 0` waits indefinitely.
    pub fn add_conditional_task<A, C>(
        &self,
        action: A,
        condition: C,
        wait_ms: u32,
        on_timeout: Option<TimeoutFn>,
    ) -> Result<Pid, ScheduleError>
    where
        A: FnMut() + Send + 'static,
        C: FnMut() -> bool + Send + 'static,
    {
        self.add(
            Box::new(action),
            Some(Box::new(condition)),
            wait_ms,
            0,
            false,
            0,
            on_timeout,
        )
    }

    /// Add a conditional task with a post-condition delay: once `condition`
    /// turns true, wait another `post_delay_ms` before running.
    ///
    /// `wait_ms` bounds the condition as in
    /// [`add_conditional_task`](Self::add_conditional_task).
    pub fn add_conditional_timed_task<A, C>(
        &self,
        action: A,
        condition: C,
        post_delay_ms: u32,
        wait_ms: u32,
        on_timeout: Option<TimeoutFn>,
    ) -> Result<Pid, ScheduleError>
    where
        A: FnMut() + Send + 'static,
        C: FnMut() -> bool + Send + 'static,
    {
        self.add(
            Box::new(action),
            Some(Box::new(condition)),
            wait_ms,
            post_delay_ms,
            false,
            0,
            on_timeout,
        )
    }

    fn add(
        &self,
        action: Action,
        condition: Option<Condition>,
        condition_wait: u32,
        post_condition_delay: u32,
        repeat: bool,
        interval: u32,
        on_timeout: Option<TimeoutFn>,
    ) -> Result<Pid, ScheduleError> {
        self.with(|inner| {
            let mut repeat = repeat;
            let mut interval = interval;
            if inner.sequential && repeat {
                log::warn!("repeating tasks are not supported in sequential mode, adding as one-shot");
                repeat = false;
                interval = 0;
            }
            inner.insert(
                action,
                condition,
                condition_wait,
                post_condition_delay,
                repeat,
                interval,
                on_timeout,
            )
        })
    }

    /// Schedule the task carrying `pid` for removal at the next safe point.
    ///
    /// Not callable from inside an action: while [`poll`](Self::poll) runs,
    /// the engine owns the task set and the call is refused with
    /// [`ScheduleError::InLoop`].
    pub fn remove_task(&self, pid: Pid) -> Result<(), ScheduleError> {
        self.with(|inner| {
            if inner.in_loop {
                log::error!("cannot remove a task from within poll");
                return Err(ScheduleError::InLoop);
            }
            if !inner.store.contains(pid) {
                return Err(ScheduleError::NotFound);
            }
            inner.ledger.mark(pid);
            Ok(())
        })
    }

    /// Change a repeating task's interval.
    ///
    /// The task is reset to a fresh pending state, so its next run comes
    /// `interval_ms` after the next [`poll`](Self::poll). Refused with
    /// [`ScheduleError::InLoop`] from inside an action.
    pub fn set_repeating_task_interval(
        &self,
        pid: Pid,
        interval_ms: u32,
    ) -> Result<(), ScheduleError> {
        self.with(|inner| {
            if inner.in_loop {
                log::error!("cannot modify a task from within poll");
                return Err(ScheduleError::InLoop);
            }
            let task = inner.store.find_mut(pid).ok_or(ScheduleError::NotFound)?;
            if !task.repeat {
                return Err(ScheduleError::NotRepeating);
            }
            // The next cycle measures from re-activation, so the post
            // condition delay tracks the new interval as well.
            task.interval = interval_ms;
            task.post_condition_delay = interval_ms;
            task.execute_at = 0;
            Ok(())
        })
    }

    /// Switch between parallel and sequential dispatch.
    ///
    /// Entering sequential mode re-bases time references on "now" and
    /// disables repetition on any stored task (logged warning).
    pub fn set_sequential_mode(&self, sequential: bool) {
        let now = M::now();
        self.with(|inner| {
            inner.sequential = sequential;
            if sequential {
                inner.last_sequential_finish = now;
                let mut cleared = false;
                for task in inner.store.iter_mut() {
                    if task.repeat {
                        task.repeat = false;
                        cleared = true;
                    }
                }
                if cleared {
                    log::warn!("repeating tasks are not supported in sequential mode, repeat disabled");
                }
            }
        })
    }

    /// True when in sequential (strict FIFO) mode.
    pub fn is_sequential_mode(&self) -> bool {
        self.with(|inner| inner.sequential)
    }

    /// Pause dispatch: [`poll`](Self::poll) returns immediately until
    /// [`resume`](Self::resume). Idempotent; stored state is untouched.
    pub fn hold(&self) {
        self.with(|inner| inner.on_hold = true);
    }

    /// Undo [`hold`](Self::hold).
    pub fn resume(&self) {
        self.with(|inner| inner.on_hold = false);
    }

    /// Cancel every task currently present, effective at the next safe
    /// point.
    ///
    /// May be called from inside an action; tasks that the action adds
    /// survive the sweep.
    pub fn stop(&self) {
        self.with(|inner| {
            inner.will_stop = true;
            let Inner {
                ref store,
                ref mut ledger,
                ..
            } = *inner;
            for task in store.iter() {
                ledger.mark(task.pid);
            }
        })
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.with(|inner| inner.store.len())
    }

    /// Milliseconds until the next task is due, in `0..=`[`MAX_WAIT`].
    ///
    /// 0 when some task is past due or still needs activation; [`MAX_WAIT`]
    /// when there are no tasks.
    pub fn time_to_next_task(&self) -> u32 {
        let now = M::now();
        self.with(|inner| {
            let mut min = MAX_WAIT;
            for task in inner.store.iter() {
                if task.execute_at == 0 {
                    return 0;
                }
                let left = time::until(now, task.execute_at);
                if left < 0 {
                    return 0;
                }
                min = min.min(left as u32);
            }
            min
        })
    }

    /// Run one scheduler tick.
    ///
    /// Evaluates tasks, dispatches the ready ones and returns; it never
    /// blocks. Call repeatedly from the outer loop.
    pub fn poll(&self) {
        let (sequential, preexisting) = match self.enter() {
            Some(entered) => entered,
            None => return,
        };
        let _guard = LoopGuard { scheduler: self };
        let now = M::now();

        if sequential {
            self.poll_sequential(now, &preexisting);
        } else {
            self.poll_parallel(now, &preexisting);
        }
    }

    /// Guarded entry: apply pending stop/removals, mark the reentrancy
    /// scope and snapshot the PIDs present at tick entry.
    fn enter(&self) -> Option<(bool, Vec<Pid, MAX_TASKS>)> {
        self.with(|inner| {
            if inner.store.is_empty() || inner.on_hold {
                return None;
            }
            if inner.will_stop {
                // stop() was called outside of poll: everything present now
                // goes away, including tasks added after the stop call.
                inner.will_stop = false;
                inner.ledger.clear();
                inner.store.clear();
                return None;
            }
            if !inner.ledger.is_empty() {
                let Inner {
                    ref mut store,
                    ref mut ledger,
                    ..
                } = *inner;
                ledger.drain(store);
            }
            inner.in_loop = true;

            let mut preexisting = Vec::new();
            for task in inner.store.iter() {
                let _ = preexisting.push(task.pid);
            }
            Some((inner.sequential, preexisting))
        })
    }

    fn poll_parallel(&self, now: u32, preexisting: &[Pid]) {
        // Activation and classification passes, both under the lock.
        let (exec, timeouts) = self.with(|inner| {
            let mut exec: Vec<Pid, MAX_TASKS> = Vec::new();
            let mut timeouts: Vec<Pid, MAX_TASKS> = Vec::new();

            for task in inner.store.iter_mut() {
                if task.execute_at != 0 {
                    continue;
                }
                if task.indefinite() {
                    // No deadline to arm; check the condition every tick.
                    if task.condition_true() {
                        task.condition_met = true;
                        task.set_execute_at(now.wrapping_add(task.post_condition_delay));
                    }
                } else {
                    // Arm the condition deadline.
                    task.set_execute_at(now.wrapping_add(task.condition_wait));
                }
            }

            for task in inner.store.iter_mut() {
                if !task.condition_met {
                    if task.condition_true() {
                        // The condition just turned true; an armed deadline
                        // is superseded by the post-condition delay.
                        task.condition_met = true;
                        task.set_execute_at(now.wrapping_add(task.post_condition_delay));
                    } else if !task.indefinite() && time::reached(now, task.execute_at) {
                        let _ = timeouts.push(task.pid);
                    }
                } else if time::reached(now, task.execute_at) {
                    let _ = exec.push(task.pid);
                }
            }

            (exec, timeouts)
        });

        // Dispatch, lock released around each action.
        let mut done: Vec<Pid, MAX_TASKS> = Vec::new();
        for &pid in exec.iter() {
            let taken = self.with(|inner| inner.store.find_mut(pid).map(Task::take_action));
            let mut action = match taken {
                Some(action) => action,
                None => continue,
            };
            action();

            let stopped = self.with(|inner| {
                if let Some(task) = inner.store.find_mut(pid) {
                    task.action = action;
                }
                if !inner.will_stop {
                    let _ = done.push(pid);
                    return false;
                }
                // The action called stop. Whatever it added this tick
                // survives; everything that predates the tick is routed
                // through the uniform removal below, and the remaining
                // ready tasks are not run.
                inner.will_stop = false;
                done.clear();
                let Inner {
                    ref mut store,
                    ref mut ledger,
                    ..
                } = *inner;
                for &marked in ledger.pids() {
                    if !preexisting.contains(&marked) {
                        continue;
                    }
                    if let Some(task) = store.find_mut(marked) {
                        task.repeat = false;
                        let _ = done.push(marked);
                    }
                }
                ledger.clear();
                true
            });
            if stopped {
                break;
            }
        }

        // Reconcile and commit. Timed-out tasks leave first so their
        // handlers are captured even when stop routed the same PIDs through
        // `done`; handlers fire after the lock is released.
        let fired = self.with(|inner| {
            let mut fired: alloc::vec::Vec<(Pid, TimeoutFn)> = alloc::vec::Vec::new();
            for &pid in timeouts.iter() {
                if let Some(mut task) = inner.store.erase(pid) {
                    if let Some(handler) = task.on_timeout.take() {
                        fired.push((pid, handler));
                    }
                }
            }

            for &pid in done.iter() {
                match inner.store.find_mut(pid) {
                    Some(task) if task.repeat => {
                        // Back to a fresh pending state for the next cycle.
                        task.condition_met = false;
                        task.post_condition_delay = task.interval;
                        task.execute_at = 0;
                    }
                    _ => {
                        inner.store.erase(pid);
                    }
                }
            }

            fired
        });

        for (pid, mut on_timeout) in fired {
            on_timeout(pid);
        }
    }

    fn poll_sequential(&self, now: u32, preexisting: &[Pid]) {
        let verdict = self.with(|inner| {
            let baseline = inner.last_sequential_finish;
            let task = match inner.store.front_mut() {
                Some(task) => task,
                None => return Verdict::Wait,
            };

            if task.execute_at == 0 {
                // First evaluation: sequential time references are relative
                // to the previous task's completion.
                if task.condition_true() {
                    task.condition_met = true;
                    task.set_execute_at(baseline.wrapping_add(task.post_condition_delay));
                } else if !task.indefinite() {
                    task.set_execute_at(baseline.wrapping_add(task.condition_wait));
                }
            } else if !task.condition_met && task.condition_true() {
                // The delay runs from the moment the condition turned true.
                task.condition_met = true;
                task.set_execute_at(now.wrapping_add(task.post_condition_delay));
            }

            if !task.condition_met {
                if !task.indefinite() && time::reached(now, task.execute_at) {
                    return Verdict::Remove(task.pid);
                }
                return Verdict::Wait;
            }
            if time::reached(now, task.execute_at) {
                return Verdict::Execute(task.pid, task.take_action());
            }
            Verdict::Wait
        });

        match verdict {
            Verdict::Wait => {}
            Verdict::Remove(pid) => {
                // Condition deadline expired: the head never ran.
                let handler = self.with(|inner| {
                    let handler = inner
                        .store
                        .find_mut(pid)
                        .and_then(|task| task.on_timeout.take());
                    inner.store.erase(pid);
                    inner.last_sequential_finish = now;
                    handler
                });
                if let Some(mut on_timeout) = handler {
                    on_timeout(pid);
                }
            }
            Verdict::Execute(pid, mut action) => {
                action();
                self.with(|inner| {
                    if inner.will_stop {
                        // The action called stop: every task that predates
                        // this tick goes, whatever the action added stays.
                        inner.will_stop = false;
                        let Inner {
                            ref mut store,
                            ref mut ledger,
                            ..
                        } = *inner;
                        for &marked in ledger.pids() {
                            if marked != pid && preexisting.contains(&marked) {
                                store.erase(marked);
                            }
                        }
                        ledger.clear();
                    }
                    // Sequential tasks never repeat.
                    inner.store.erase(pid);
                    inner.last_sequential_finish = now;
                });
            }
        }
    }
}
