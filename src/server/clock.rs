use std::sync::atomic::{AtomicI64, Ordering};

use crate::now_millis;

/// Strictly increasing server timestamp source.
///
/// Every value handed out is greater than the previous one, even when two
/// writes land in the same millisecond or the wall clock steps backwards.
#[derive(Debug, Default)]
pub struct ServerClock {
    last: AtomicI64,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock whose next tick is at least `millis + 1`.
    pub fn starting_at(millis: i64) -> Self {
        Self {
            last: AtomicI64::new(millis),
        }
    }

    pub fn tick(&self) -> i64 {
        let wall = now_millis();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let next = wall.max(current + 1);
            match self
                .last
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Raises the floor so later ticks exceed `millis`.
    pub fn observe(&self, millis: i64) {
        self.last.fetch_max(millis, Ordering::SeqCst);
    }
}
