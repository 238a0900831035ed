//! Repeating background tasks with a cooperative stop signal.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// A closure run every `period` on a tokio task until stopped.
///
/// The first run happens one full period after spawning. A panic inside one
/// run is logged and the schedule continues.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawn `job` on `runtime`, repeating every `period`
    pub fn spawn<F>(runtime: &Handle, name: impl Into<String>, period: Duration, job: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        // Sender dropped or stop requested
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if catch_unwind(AssertUnwindSafe(&job)).is_err() {
                            tracing::error!(task = %task_name, "Periodic task run panicked");
                        }
                    }
                }
            }

            tracing::debug!(task = %task_name, "Periodic task stopped");
        });

        Self {
            name,
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Ask the task to stop; the current run, if any, completes first
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Stop and wait for the task to exit
    pub async fn stop_and_wait(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(task = %self.name, "Periodic task join error: {}", e);
            }
        }
    }

    /// True once a stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Task name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
