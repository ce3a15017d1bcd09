use std::time::Duration;

/// Reconnect delay schedule. Each failure moves one step along the schedule
/// and the last step repeats until [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    schedule: Vec<Duration>,
    index: usize,
}

impl Backoff {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule, index: 0 }
    }

    /// Doubling delays from `initial`, capped at `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        let mut schedule = vec![initial.min(max)];
        let mut delay = initial;
        while delay < max {
            delay = delay.saturating_mul(2).min(max);
            schedule.push(delay);
        }
        Self::new(schedule)
    }

    pub fn on_failure(&mut self) -> Duration {
        let delay = self
            .schedule
            .get(self.index)
            .copied()
            .unwrap_or_else(|| Duration::from_secs(1));
        if self.index + 1 < self.schedule.len() {
            self.index += 1;
        }
        delay
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}
