//! Silence debounce timer
//!
//! One timer at a time: arming cancels the previous timer and bumps the
//! generation, so a firing that raced with a re-arm can be recognized as
//! stale by the receiver.

use std::time::Duration;

use tokio::task::JoinHandle;

pub struct Debouncer {
    interval: Duration,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            generation: 0,
            timer: None,
        }
    }

    /// (Re)arm the timer; `on_fire` receives the generation it was armed with
    pub fn arm<F>(&mut self, on_fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.generation += 1;

        let generation = self.generation;
        let interval = self.interval;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            on_fire(generation);
        }));

        generation
    }

    /// Disarm without firing
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Whether a firing with `generation` belongs to the armed timer
    pub const fn is_current(&self, generation: u64) -> bool {
        self.timer.is_some() && generation == self.generation
    }

    /// Consume the armed timer after it fired
    pub fn clear(&mut self) {
        self.timer = None;
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
