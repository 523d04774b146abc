use std::time::{Duration, Instant};

/// Fixed-period trigger for the maintenance tick.
///
/// The first poll fires; after that at most once per `period`. Late polls do
/// not accumulate missed ticks.
#[derive(Clone, Debug)]
pub struct MaintenanceScheduler {
    period: Duration,
    last: Option<Instant>,
}

impl MaintenanceScheduler {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// `true` when a tick is due at `now`; marks it as taken.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Time left until the next tick is due.
    pub fn time_until_due(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => self
                .period
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}
