use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Periodic maintenance task owned by the store that started it.
///
/// The task stops when [`SweepTask::shutdown`] is awaited or when the handle
/// is dropped; it never outlives its owner.
pub struct SweepTask {
    name: &'static str,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SweepTask {
    /// Spawns `tick` every `every` on the current tokio runtime. The first
    /// run happens one full period after spawning.
    pub fn spawn<F>(name: &'static str, every: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let every = every.max(Duration::from_millis(1));
        let (stop, mut stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = interval.tick() => tick(),
                }
            }
            debug!(task = name, "sweep task stopped");
        });
        Self {
            name,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Signals the task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    fn signal(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        self.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let task = SweepTask::spawn("test", Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        task.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_task() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let task = SweepTask::spawn("test", Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(task);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
