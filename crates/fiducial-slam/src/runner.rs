//! Single-thread run loop.
//!
//! Batches arrive on a channel from whatever transport the host uses. The
//! loop waits for a batch at most until the next maintenance tick is due, so
//! the tick keeps its rate with or without observation traffic. Every batch
//! and every tick is handled to completion before the shutdown flag is
//! checked again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use fiducial_slam_core::SightingBatch;

use crate::engine::{FiducialSlam, ShutdownReport};
use crate::scheduler::MaintenanceScheduler;
use crate::sink::PoseSink;

/// Session clock: the latest batch stamp advanced by wall time since it
/// arrived.
struct SessionClock {
    started: Instant,
    last: Option<(f64, Instant)>,
}

impl SessionClock {
    fn new(started: Instant) -> Self {
        Self {
            started,
            last: None,
        }
    }

    fn observe(&mut self, stamp: f64, at: Instant) {
        self.last = Some((stamp, at));
    }

    fn now(&self, at: Instant) -> f64 {
        match self.last {
            Some((stamp, seen)) => stamp + at.saturating_duration_since(seen).as_secs_f64(),
            None => at.saturating_duration_since(self.started).as_secs_f64(),
        }
    }
}

/// Drive `engine` until `running` drops or the channel disconnects, then
/// shut it down (saving unless read-only).
pub fn run<S: PoseSink>(
    mut engine: FiducialSlam,
    batches: Receiver<SightingBatch>,
    running: &AtomicBool,
    sink: &mut S,
) -> ShutdownReport {
    let start = Instant::now();
    let mut scheduler = MaintenanceScheduler::new(engine.config().tick_period());
    let mut clock = SessionClock::new(start);

    while running.load(Ordering::SeqCst) {
        let wait = scheduler.time_until_due(Instant::now());
        match batches.recv_timeout(wait) {
            Ok(batch) => {
                clock.observe(batch.stamp, Instant::now());
                engine.handle_batch(&batch, sink);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("input closed");
                break;
            }
        }

        let now = Instant::now();
        if scheduler.poll(now) {
            let report = engine.tick(clock.now(now), sink);
            if !report.inconsistent.is_empty() {
                log::warn!("{} inconsistent landmarks", report.inconsistent.len());
            }
        }
    }

    if !running.load(Ordering::SeqCst) {
        log::info!("shutdown requested");
    }
    engine.shutdown()
}
