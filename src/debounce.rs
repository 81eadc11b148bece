use tokio::sync::mpsc;
use tokio::time::Duration;

/// Collapses bursts of triggers into one call made `delay` after the last
/// trigger. Triggering is synchronous, so it can be called from any thread.
#[derive(Debug, Clone)]
pub struct Debouncer {
    trigger: mpsc::UnboundedSender<()>,
    delay: Duration,
}

impl Debouncer {
    /// Spawns the timer task on the current tokio runtime.
    pub fn spawn<F>(delay: Duration, on_fire: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (trigger, receiver) = mpsc::unbounded_channel::<()>();
        tokio::spawn(run_timer(delay, receiver, on_fire));
        Self { trigger, delay }
    }

    pub fn trigger(&self) {
        if self.trigger.send(()).is_err() {
            tracing::debug!("debouncer timer already stopped");
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

async fn run_timer<F>(delay: Duration, mut receiver: mpsc::UnboundedReceiver<()>, mut on_fire: F)
where
    F: FnMut() + Send + 'static,
{
    while receiver.recv().await.is_some() {
        loop {
            tokio::select! {
                next = receiver.recv() => {
                    if next.is_none() {
                        // Every handle is gone; nobody is left to act on the firing.
                        return;
                    }
                }
                _ = tokio::time::sleep(delay) => {
                    on_fire();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Debouncer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    fn counting(delay: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let debouncer = Debouncer::spawn(delay, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (debouncer, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_fires_once_after_quiet_period() {
        let (debouncer, fired) = counting(Duration::from_millis(500));
        for _ in 0..5 {
            debouncer.trigger();
            sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_fire_separately() {
        let (debouncer, fired) = counting(Duration::from_millis(200));
        debouncer.trigger();
        sleep(Duration::from_millis(300)).await;
        debouncer.trigger();
        debouncer.trigger();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn trigger_from_plain_thread_is_delivered() {
        let (debouncer, fired) = counting(Duration::from_millis(20));
        let remote = debouncer.clone();
        std::thread::spawn(move || remote.trigger())
            .join()
            .expect("trigger thread");
        sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
