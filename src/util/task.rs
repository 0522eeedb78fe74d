//! Fixed-period task driver with single-flight execution
//!
//! An atomic "available" flag is the lock: a tick that lands while the
//! previous run is still in flight invokes `on_busy` instead of starting a
//! concurrent run. This is the back-pressure mechanism for every periodic
//! job in the system.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

type ErrorCallback = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;
type BusyCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct ScheduledTaskOptions {
    pub on_error: Option<ErrorCallback>,
    pub on_busy: Option<BusyCallback>,
    pub run_immediately: bool,
}

/// Handle to a running periodic task. Aborts the ticker on `stop` or drop.
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `work` every `period`. `work` produces a fresh future per
    /// invocation; invocations never overlap.
    pub fn spawn<W, Fut>(period: Duration, options: ScheduledTaskOptions, work: W) -> Self
    where
        W: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let work = Arc::new(work);
        let available = Arc::new(AtomicBool::new(true));
        let on_error = options.on_error.clone();
        let on_busy = options.on_busy.clone();
        let run_immediately = options.run_immediately;

        let handle = tokio::spawn(async move {
            if run_immediately {
                run_once(&work, &available, on_error.as_ref());
            }

            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + period,
                period,
            );
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if available.load(Ordering::Acquire) {
                    run_once(&work, &available, on_error.as_ref());
                } else if let Some(cb) = on_busy.as_ref() {
                    cb();
                }
            }
        });

        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn run_once<W, Fut>(work: &Arc<W>, available: &Arc<AtomicBool>, on_error: Option<&ErrorCallback>)
where
    W: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    // claim the lock; released when the spawned run resolves
    if !available.swap(false, Ordering::AcqRel) {
        return;
    }
    let work = Arc::clone(work);
    let available = Arc::clone(available);
    let on_error = on_error.cloned();
    tokio::spawn(async move {
        if let Err(err) = work().await {
            if let Some(cb) = on_error.as_ref() {
                cb(&err);
            }
        }
        available.store(true, Ordering::Release);
    });
}
