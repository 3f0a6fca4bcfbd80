//! Prefetch Scheduler
//!
//! Runs independent units of work on a bounded pool of tasks:
//!
//! - at most `max_parallel` units in flight (semaphore permits)
//! - dispatches paced to `max_per_second` (interval ticks, delayed on miss)
//! - every finished unit is reported to a completion callback
//! - with `continue_on_error` off, dispatch stops after the first failure;
//!   units already in flight still finish and are reported
//! - a unit that panics is reported as a failed outcome

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Completed unit that may represent a failure
pub trait UnitOutcome: Send + 'static {
    /// Unit of work this outcome reports on
    type Unit;

    fn is_failure(&self) -> bool;

    /// Failed outcome for a unit whose task panicked
    fn panicked(unit: Self::Unit, message: String) -> Self;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// What a scheduler run did
#[derive(Debug)]
pub struct SchedulerReport<O> {
    /// Outcomes in completion order
    pub outcomes: Vec<O>,
    pub dispatched: usize,
    /// Units never dispatched because the run stopped early
    pub skipped: usize,
    /// Units whose task panicked; each is also reported as a failure
    pub panicked: usize,
    pub stopped_early: bool,
}

/// Bounded, paced worker pool
#[derive(Debug, Clone)]
pub struct PrefetchScheduler {
    max_parallel: usize,
    dispatch_interval: Duration,
    continue_on_error: bool,
}

impl PrefetchScheduler {
    pub fn new(max_parallel: usize, max_per_second: f64, continue_on_error: bool) -> Result<Self> {
        if max_parallel == 0 {
            return Err(Error::Config("max_parallel must be greater than 0".into()));
        }
        if !(max_per_second > 0.0) || !max_per_second.is_finite() {
            return Err(Error::Config(format!(
                "max_per_second must be a positive number, got {}",
                max_per_second
            )));
        }

        Ok(Self {
            max_parallel,
            dispatch_interval: Duration::from_secs_f64(1.0 / max_per_second),
            continue_on_error,
        })
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Minimum spacing between two dispatches
    pub fn dispatch_interval(&self) -> Duration {
        self.dispatch_interval
    }

    fn ticker(&self) -> Option<Interval> {
        if self.dispatch_interval.is_zero() {
            return None;
        }
        let mut ticker = interval(self.dispatch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(ticker)
    }

    /// Run `work` over every unit
    ///
    /// `on_complete` runs on the calling task, once per finished unit.
    pub async fn run<U, O, F, Fut>(
        &self,
        units: Vec<U>,
        work: F,
        mut on_complete: impl FnMut(&O),
    ) -> SchedulerReport<O>
    where
        U: Clone + Send + 'static,
        O: UnitOutcome<Unit = U>,
        F: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        let total = units.len();
        let work = Arc::new(work);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let (tx, mut rx) = mpsc::unbounded_channel::<O>();
        let mut ticker = self.ticker();
        let mut tasks = JoinSet::new();
        let panics = Arc::new(AtomicUsize::new(0));

        let mut outcomes = Vec::with_capacity(total);
        let mut stopped = false;
        let mut dispatched = 0;

        let mut handle = |outcome: O, outcomes: &mut Vec<O>, stopped: &mut bool| {
            on_complete(&outcome);
            if outcome.is_failure() && !self.continue_on_error && !*stopped {
                debug!("Unit failed, halting dispatch");
                *stopped = true;
            }
            outcomes.push(outcome);
        };

        for unit in units {
            if let Some(ticker) = ticker.as_mut() {
                ticker.tick().await;
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            while let Ok(outcome) = rx.try_recv() {
                handle(outcome, &mut outcomes, &mut stopped);
            }
            if stopped {
                break;
            }

            let work = Arc::clone(&work);
            let tx = tx.clone();
            let panics = Arc::clone(&panics);
            tasks.spawn(async move {
                let retained = unit.clone();
                let result = AssertUnwindSafe(async move { work(unit).await })
                    .catch_unwind()
                    .await;
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        warn!("Prefetch unit panicked: {}", message);
                        panics.fetch_add(1, Ordering::Relaxed);
                        O::panicked(retained, message)
                    }
                };
                // Report before freeing the slot so a failure is seen
                // ahead of the next dispatch
                let _ = tx.send(outcome);
                drop(permit);
            });
            dispatched += 1;
        }
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            handle(outcome, &mut outcomes, &mut stopped);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Prefetch task did not complete: {}", e);
            }
        }

        SchedulerReport {
            outcomes,
            dispatched,
            skipped: total - dispatched,
            panicked: panics.load(Ordering::Relaxed),
            stopped_early: stopped,
        }
    }
}
