//! Time source used by every polling loop in the crate.
//!
//! Timeouts are measured with [Clock::now] and waits go through [Clock::sleep], so tests can run
//! the disable workflow in simulated time (See [crate::hardware::simulation::SimClock]).

use std::{
    rc::Rc,
    sync::Arc,
    time::{Duration, Instant},
};

/// Monotonic clock with the ability to wait
pub trait Clock {
    /// Current monotonic time
    fn now(&self) -> Instant;

    /// Blocks for the given duration
    fn sleep(&self, duration: Duration);
}

/// Wall clock, backed by [Instant] and [std::thread::sleep]
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration)
        }
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}
