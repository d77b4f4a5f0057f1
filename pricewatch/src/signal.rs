use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::Notify;

/// Cooperative stop flag shared by every periodic worker.
///
/// Workers check [`StopSignal::triggered`] at the top of each iteration and wait between
/// iterations with [`StopSignal::sleep`], which returns early once the signal fires.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`. Returns `false` if the signal fired first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.triggered() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = notified => false,
        }
    }

    /// Resolve once the signal fires.
    pub async fn wait(&self) {
        while self.sleep(Duration::from_secs(3_600)).await {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_signal() {
        let signal = StopSignal::new();
        assert!(signal.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_trigger_wakes_sleeper() {
        let signal = StopSignal::new();
        let sleeper = tokio::spawn({
            let signal = signal.clone();
            async move { signal.sleep(Duration::from_secs(60)).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger();

        assert!(!sleeper.await.unwrap());
        assert!(signal.triggered());
        assert!(!signal.sleep(Duration::from_secs(60)).await);
        signal.wait().await;
    }
}
