//! A cooperative, tick-driven task scheduler for single-threaded event loops.
//!
//! Tasks are deferred actions guarded by an optional condition and two
//! delays: a bound on how long the condition may take to turn true, and a
//! delay between the condition turning true and the action running. The
//! scheduler is driven by calling [`Scheduler::poll`] from the outer loop;
//! each call runs to completion without blocking.

#![no_std]
#![deny(missing_docs)]

extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod scheduler;
pub mod task;
pub mod time;

mod pid;
mod store;

pub use scheduler::{ScheduleError, Scheduler};
pub use task::{Action, Condition, Pid, TimeoutFn};
pub use time::Monotonic;

/// Maximum number of live tasks.
pub const MAX_TASKS: usize = 124;

/// Upper bound on [`Scheduler::time_to_next_task`], in milliseconds.
pub const MAX_WAIT: u32 = 60_000;
