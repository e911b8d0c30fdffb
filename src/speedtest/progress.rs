use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Live snapshot of a running phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntermediateSample {
    pub elapsed: Duration,
    pub bytes: u64,
}

impl IntermediateSample {
    pub fn mbps(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        self.bytes as f64 / seconds / 125_000.0
    }
}

/// Periodically hands the running byte total to a callback.
///
/// The reporter only ever loads the counter. [`ProgressReporter::stop`] returns once
/// the task has exited, so no callback can fire after it.
pub(crate) struct ProgressReporter {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn spawn<F>(
        total: Arc<AtomicU64>,
        started_at: Instant,
        period: Duration,
        on_progress: F,
    ) -> Self
    where
        F: Fn(IntermediateSample) + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(started_at + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => return,
                    _ = ticker.tick() => {
                        on_progress(IntermediateSample {
                            elapsed: started_at.elapsed(),
                            bytes: total.load(Ordering::Acquire),
                        });
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
