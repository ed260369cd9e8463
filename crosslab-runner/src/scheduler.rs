//! Periodic re-evaluation loop.
//!
//! Runs a job immediately, then once per interval, until the cancel flag is
//! raised or `max_runs` is reached. A failing job is logged and the loop
//! carries on.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Granularity at which a sleeping scheduler notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    pub interval: Duration,
    pub max_runs: Option<usize>,
}

/// What a scheduler loop did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub runs: usize,
    pub failures: usize,
    pub cancelled: bool,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_runs: None,
        }
    }

    pub fn with_max_runs(mut self, max_runs: Option<usize>) -> Self {
        self.max_runs = max_runs;
        self
    }

    /// Run `job(iteration)` on schedule. Blocks the calling thread.
    pub fn run<F, E>(&self, cancel: Option<&AtomicBool>, mut job: F) -> ScheduleSummary
    where
        F: FnMut(usize) -> Result<(), E>,
        E: Display,
    {
        let is_cancelled = || cancel.is_some_and(|f| f.load(Ordering::Relaxed));
        let mut summary = ScheduleSummary::default();

        loop {
            if is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if let Some(max) = self.max_runs {
                if summary.runs >= max {
                    break;
                }
            }

            let started = Instant::now();
            if let Err(e) = job(summary.runs) {
                summary.failures += 1;
                tracing::warn!(run = summary.runs, error = %e, "scheduled job failed");
            }
            summary.runs += 1;

            if self.max_runs.is_some_and(|max| summary.runs >= max) {
                break;
            }

            let deadline = started + self.interval;
            while Instant::now() < deadline {
                if is_cancelled() {
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                std::thread::sleep(remaining.min(CANCEL_POLL));
            }
        }

        tracing::info!(
            runs = summary.runs,
            failures = summary.failures,
            cancelled = summary.cancelled,
            "scheduler stopped"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_after_max_runs() {
        let scheduler = Scheduler::new(Duration::ZERO).with_max_runs(Some(3));
        let mut seen = Vec::new();
        let summary = scheduler.run(None, |i| {
            seen.push(i);
            Ok::<(), String>(())
        });
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(summary.runs, 3);
        assert!(!summary.cancelled);
    }

    #[test]
    fn failures_do_not_stop_the_loop() {
        let scheduler = Scheduler::new(Duration::ZERO).with_max_runs(Some(4));
        let summary = scheduler.run(None, |i| if i % 2 == 0 { Err("boom") } else { Ok(()) });
        assert_eq!(summary.runs, 4);
        assert_eq!(summary.failures, 2);
    }

    #[test]
    fn cancel_during_wait_stops_promptly() {
        let flag = AtomicBool::new(false);
        let scheduler = Scheduler::new(Duration::from_secs(3600));
        let started = Instant::now();
        let summary = scheduler.run(Some(&flag), |_| {
            flag.store(true, Ordering::Relaxed);
            Ok::<(), String>(())
        });
        assert_eq!(summary.runs, 1);
        assert!(summary.cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn preset_flag_runs_nothing() {
        let flag = AtomicBool::new(true);
        let summary = Scheduler::new(Duration::ZERO).run(Some(&flag), |_| Ok::<(), String>(()));
        assert_eq!(summary.runs, 0);
        assert!(summary.cancelled);
    }
}
