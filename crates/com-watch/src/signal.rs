//! Change signal sources
//!
//! A change signal fires whenever *some* device topology change may have
//! happened. It carries no payload: the watcher re-queries the enumerator to
//! find out what, if anything, changed for serial ports.
//!
//! Subscribing and activating are separate steps. A watcher subscribes while
//! it is built, but the signal only starts firing once the handle is
//! activated. Deactivation is asynchronous and is confirmed through a
//! callback.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Callback invoked each time the signal fires
pub type SignalCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked once teardown of a subscription has completed
pub type StopConfirmation = Box<dyn FnOnce() + Send>;

/// Source of coarse "device topology changed" notifications
pub trait ChangeSignal: Send {
    /// Register `callback` without starting delivery
    fn subscribe(self: Box<Self>, callback: SignalCallback) -> Box<dyn SignalHandle>;
}

/// A registered subscription
pub trait SignalHandle: Send {
    /// Start delivering notifications
    fn activate(&mut self);

    /// Stop delivering notifications
    ///
    /// `on_confirmed` runs once teardown is complete, possibly on another
    /// thread and possibly before this method returns.
    fn deactivate(&mut self, on_confirmed: StopConfirmation);
}

/// Default polling period, matching a one second device event window
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Change signal that fires on a fixed period
///
/// Used where no native device notification is wired up. Every tick runs
/// the callback on a blocking thread, so a slow enumerator can lead to
/// overlapping reconciliations.
#[derive(Debug, Clone)]
pub struct PollingSignal {
    period: Duration,
    runtime: Option<Handle>,
}

impl PollingSignal {
    /// Poll every `period` on the runtime current at subscription time
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            runtime: None,
        }
    }

    /// Poll on a specific runtime
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

impl Default for PollingSignal {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ChangeSignal for PollingSignal {
    fn subscribe(self: Box<Self>, callback: SignalCallback) -> Box<dyn SignalHandle> {
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());
        if runtime.is_none() {
            warn!("Polling signal subscribed outside a tokio runtime; it will never fire");
        }
        Box::new(PollingHandle {
            period: self.period,
            runtime,
            callback,
            task: None,
        })
    }
}

struct PollTask {
    shutdown: oneshot::Sender<StopConfirmation>,
    join: JoinHandle<()>,
}

struct PollingHandle {
    period: Duration,
    runtime: Option<Handle>,
    callback: SignalCallback,
    task: Option<PollTask>,
}

impl SignalHandle for PollingHandle {
    fn activate(&mut self) {
        if self.task.is_some() {
            return;
        }
        let Some(runtime) = &self.runtime else {
            warn!("Cannot activate polling signal without a tokio runtime");
            return;
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let join = runtime.spawn(run_poll_loop(
            self.period,
            self.callback.clone(),
            shutdown_rx,
        ));
        debug!("Polling signal active every {:?}", self.period);
        self.task = Some(PollTask { shutdown, join });
    }

    fn deactivate(&mut self, on_confirmed: StopConfirmation) {
        match self.task.take() {
            Some(task) => {
                // The loop may already have exited; confirm from here in that case
                if let Err(on_confirmed) = task.shutdown.send(on_confirmed) {
                    on_confirmed();
                }
            }
            None => on_confirmed(),
        }
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.join.abort();
        }
    }
}

async fn run_poll_loop(
    period: Duration,
    callback: SignalCallback,
    mut shutdown: oneshot::Receiver<StopConfirmation>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and the baseline is already seeded
    ticker.tick().await;

    loop {
        tokio::select! {
            confirm = &mut shutdown => {
                debug!("Polling signal stopped");
                if let Ok(confirm) = confirm {
                    confirm();
                }
                break;
            }
            _ = ticker.tick() => {
                // One callback at a time; ticks missed meanwhile are delayed
                let callback = callback.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || callback()).await {
                    warn!("Polling signal callback failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback() -> (SignalCallback, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let callback: SignalCallback = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_does_not_fire_before_activation() {
        let (callback, fired) = counting_callback();
        let _handle = Box::new(PollingSignal::new(Duration::from_millis(10))).subscribe(callback);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_polling_fires_and_confirms_stop() {
        let (callback, fired) = counting_callback();
        let mut handle = Box::new(PollingSignal::new(Duration::from_millis(5))).subscribe(callback);
        handle.activate();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while fired.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(fired.load(Ordering::SeqCst) > 0);

        let (tx, rx) = oneshot::channel();
        handle.deactivate(Box::new(move || {
            let _ = tx.send(());
        }));
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("stop confirmed in time")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_callback_never_overlaps() {
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let (r, o, c) = (running.clone(), overlap.clone(), calls.clone());
        let callback: SignalCallback = Arc::new(move || {
            if r.fetch_add(1, Ordering::SeqCst) > 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(20));
            r.fetch_sub(1, Ordering::SeqCst);
            c.fetch_add(1, Ordering::SeqCst);
        });
        let mut handle = Box::new(PollingSignal::new(Duration::from_millis(1))).subscribe(callback);
        handle.activate();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) < 3 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let (tx, rx) = oneshot::channel();
        handle.deactivate(Box::new(move || {
            let _ = tx.send(());
        }));
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("stop confirmed in time")
            .unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deactivate_without_activation_confirms_immediately() {
        let (callback, _) = counting_callback();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut handle = Box::new(PollingSignal::default().with_runtime(runtime.handle().clone()))
            .subscribe(callback);

        let confirmed = Arc::new(AtomicUsize::new(0));
        let counter = confirmed.clone();
        handle.deactivate(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(confirmed.load(Ordering::SeqCst), 1);
    }
}
