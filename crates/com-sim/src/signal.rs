//! Manually fired change signal

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use com_watch::{ChangeSignal, SignalCallback, SignalHandle, StopConfirmation};
use tracing::debug;

/// How a [`ManualSignal`] confirms teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmMode {
    /// Confirm before `deactivate` returns
    #[default]
    Immediate,
    /// Hold the confirmation until [`ManualSignal::confirm_stop`]
    Deferred,
    /// Confirm from a freshly spawned thread
    Threaded,
}

#[derive(Default)]
struct ManualShared {
    callback: Mutex<Option<SignalCallback>>,
    pending_stop: Mutex<Option<StopConfirmation>>,
    mode: Mutex<ConfirmMode>,
    active: AtomicBool,
    fired: AtomicUsize,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Change signal fired by the test
///
/// Clones share the same subscription: hand one clone to the watcher and
/// keep another to fire it.
#[derive(Clone, Default)]
pub struct ManualSignal {
    shared: Arc<ManualShared>,
}

impl ManualSignal {
    /// Signal confirming teardown immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal confirming teardown as `mode` says
    pub fn with_confirmation(mode: ConfirmMode) -> Self {
        let signal = Self::default();
        signal.set_confirm_mode(mode);
        signal
    }

    /// Change how later teardowns are confirmed
    pub fn set_confirm_mode(&self, mode: ConfirmMode) {
        *lock(&self.shared.mode) = mode;
    }

    /// Fire on the calling thread; false if the subscription is not active
    pub fn fire(&self) -> bool {
        if !self.is_active() {
            debug!("Manual signal fired while inactive");
            return false;
        }
        let callback = lock(&self.shared.callback).clone();
        match callback {
            Some(callback) => {
                self.shared.fired.fetch_add(1, Ordering::SeqCst);
                callback();
                true
            }
            None => false,
        }
    }

    /// Fire from a new thread, as an OS notification would arrive
    pub fn fire_on_thread(&self) -> JoinHandle<bool> {
        let signal = self.clone();
        std::thread::spawn(move || signal.fire())
    }

    /// Release a deferred teardown confirmation; false if none is pending
    pub fn confirm_stop(&self) -> bool {
        let pending = lock(&self.shared.pending_stop).take();
        match pending {
            Some(confirm) => {
                confirm();
                true
            }
            None => false,
        }
    }

    /// Whether a deferred confirmation is waiting
    pub fn stop_pending(&self) -> bool {
        lock(&self.shared.pending_stop).is_some()
    }

    /// Whether the subscription currently delivers
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Number of deliveries so far
    pub fn fired(&self) -> usize {
        self.shared.fired.load(Ordering::SeqCst)
    }

    /// Number of activations so far
    pub fn activations(&self) -> usize {
        self.shared.activations.load(Ordering::SeqCst)
    }

    /// Number of deactivations so far
    pub fn deactivations(&self) -> usize {
        self.shared.deactivations.load(Ordering::SeqCst)
    }
}

impl ChangeSignal for ManualSignal {
    fn subscribe(self: Box<Self>, callback: SignalCallback) -> Box<dyn SignalHandle> {
        *lock(&self.shared.callback) = Some(callback);
        Box::new(ManualHandle {
            shared: self.shared.clone(),
        })
    }
}

struct ManualHandle {
    shared: Arc<ManualShared>,
}

impl SignalHandle for ManualHandle {
    fn activate(&mut self) {
        self.shared.activations.fetch_add(1, Ordering::SeqCst);
        self.shared.active.store(true, Ordering::SeqCst);
    }

    fn deactivate(&mut self, on_confirmed: StopConfirmation) {
        self.shared.deactivations.fetch_add(1, Ordering::SeqCst);
        self.shared.active.store(false, Ordering::SeqCst);

        let mode = *lock(&self.shared.mode);
        match mode {
            ConfirmMode::Immediate => on_confirmed(),
            ConfirmMode::Deferred => *lock(&self.shared.pending_stop) = Some(on_confirmed),
            ConfirmMode::Threaded => {
                std::thread::spawn(on_confirmed);
            }
        }
    }
}
