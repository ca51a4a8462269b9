//! The task record and the erased callable types it owns.

use alloc::boxed::Box;

/// Task identifier. Nonzero and unique within the live task set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Pid(pub(crate) u16);

impl Pid {
    /// The raw identifier value.
    pub const fn get(self) -> u16 {
        self.0
    }
}

/// A deferred effect run by the scheduler.
pub type Action = Box<dyn FnMut() + Send>;

/// A predicate gating a task's execution.
pub type Condition = Box<dyn FnMut() -> bool + Send>;

/// Invoked with the task's PID when its condition deadline expires.
pub type TimeoutFn = Box<dyn FnMut(Pid) + Send>;

/// A queued unit of deferred work.
pub(crate) struct Task {
    pub(crate) pid: Pid,
    pub(crate) action: Action,
    /// Parallel mode only; sequential tasks never repeat.
    pub(crate) repeat: bool,
    pub(crate) interval: u32,
    /// `None` is equivalent to a condition that is always true.
    pub(crate) condition: Option<Condition>,
    pub(crate) condition_met: bool,
    /// Maximum time the condition may take to turn true; 0 waits forever.
    pub(crate) condition_wait: u32,
    /// Delay between the condition turning true and the action running.
    pub(crate) post_condition_delay: u32,
    /// Condition deadline or execution time, depending on the phase.
    /// 0 means the current phase has not been activated yet.
    pub(crate) execute_at: u32,
    pub(crate) on_timeout: Option<TimeoutFn>,
}

impl Task {
    /// True when there is no deadline on the condition turning true.
    pub(crate) fn indefinite(&self) -> bool {
        self.condition_wait == 0
    }

    pub(crate) fn condition_true(&mut self) -> bool {
        match self.condition.as_mut() {
            Some(condition) => condition(),
            None => true,
        }
    }

    /// Set a definite execution time. 0 is the "not activated" sentinel, so
    /// a literal 0 tick is nudged to 1.
    pub(crate) fn set_execute_at(&mut self, at: u32) {
        self.execute_at = if at == 0 { 1 } else { at };
    }

    /// Take the action out for dispatch outside the lock, leaving a no-op
    /// in its place. The replacement closure is zero-sized, so this does
    /// not allocate.
    pub(crate) fn take_action(&mut self) -> Action {
        core::mem::replace(&mut self.action, Box::new(|| {}))
    }
}
