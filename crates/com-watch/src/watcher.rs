//! Port watcher
//!
//! The watcher keeps the last known set of serial ports, listens to a coarse
//! change signal, and on every signal re-queries the enumerator and diffs the
//! result against what it remembers.
//!
//! # Lifecycle
//!
//! A watcher is built already seeded with the current ports but not yet
//! watching. [`PortWatcher::start_watching`] activates the change signal,
//! [`PortWatcher::stop_watching`] requests teardown, and the teardown
//! confirmation moves it to [`WatcherState::Stopped`]. A stopped watcher can
//! be started again.
//!
//! # Concurrency
//!
//! Signals may arrive on any thread and may overlap. Enumerator queries run
//! concurrently; the diff against the remembered snapshot and its update run
//! under one lock that is never held during I/O or while subscribers run.
//!
//! Stopping does not cancel a reconciliation already in flight. Such a
//! reconciliation completes and may still emit port events after the state
//! has moved to `StopRequested` or `Stopped`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use com_detect::{
    DetectError, PortEnumerator, PortFilter, PortId, PortScanner, ReservedPortFilter,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::context::{Dispatcher, ExecutionContext, Job, TokioContext};
use crate::diff::PortDiff;
use crate::error::WatchError;
use crate::events::WatcherEvent;
use crate::registry::{DiagnosticHandler, EventHandler, Registry, SubscriptionId};
use crate::signal::{ChangeSignal, PollingSignal, SignalCallback, SignalHandle};
use crate::state::WatcherState;

/// Remembered port set plus the ticket of the query it came from
#[derive(Default)]
struct Snapshot {
    ports: BTreeSet<PortId>,
    applied_ticket: u64,
}

/// State shared with the signal callback and the stop confirmation
struct Shared {
    enumerator: Arc<dyn PortEnumerator>,
    reserved: ReservedPortFilter,
    filters: Vec<Arc<dyn PortFilter>>,
    existing: Mutex<Snapshot>,
    tickets: AtomicU64,
    state: watch::Sender<WatcherState>,
    dispatcher: Dispatcher,
    subscribers: Registry<EventHandler>,
    diagnostics: Registry<DiagnosticHandler>,
}

impl Shared {
    fn lock_snapshot(&self) -> MutexGuard<'_, Snapshot> {
        self.existing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn keep(&self, port: &PortId) -> bool {
        self.reserved.accepts(port) && self.filters.iter().all(|f| f.accepts(port))
    }

    /// Blocking enumerator query with filters applied
    fn query_filtered(&self) -> Result<BTreeSet<PortId>, DetectError> {
        let ports = self.enumerator.query()?;
        Ok(ports.into_iter().filter(|p| self.keep(p)).collect())
    }

    fn reconcile(&self) -> Result<PortDiff, WatchError> {
        // Tickets order queries by start time so a slow, older snapshot
        // never overwrites a newer one.
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.query_filtered()?;

        let diff = {
            let mut snapshot = self.lock_snapshot();
            if ticket < snapshot.applied_ticket {
                debug!(
                    ticket,
                    applied = snapshot.applied_ticket,
                    "Discarding stale port snapshot"
                );
                return Ok(PortDiff::default());
            }
            snapshot.applied_ticket = ticket;
            let diff = PortDiff::between(&snapshot.ports, &current);
            diff.apply(&mut snapshot.ports);
            diff
        };

        if diff.is_empty() {
            debug!("Change signal without serial port change");
            return Ok(diff);
        }

        for port in &diff.added {
            info!("Port added: {}", port);
        }
        for port in &diff.removed {
            info!("Port removed: {}", port);
        }
        for event in diff.events() {
            self.emit(event);
        }
        Ok(diff)
    }

    fn on_signal(&self) {
        if let Err(e) = self.reconcile() {
            self.report(e);
        }
    }

    fn emit(&self, event: WatcherEvent) {
        let handlers = self.subscribers.snapshot();
        if handlers.is_empty() {
            return;
        }
        let job: Job = Box::new(move || {
            for handler in &handlers {
                handler(&event);
            }
        });
        if let Err(e) = self.dispatcher.run(job) {
            self.report(e.into());
        }
    }

    fn report(&self, error: WatchError) {
        warn!("Port watcher: {}", error);
        for handler in self.diagnostics.snapshot() {
            handler(&error);
        }
    }

    /// Atomically move to `to` if `allowed` holds for the current state
    ///
    /// Returns the rejected state on failure.
    fn transition(
        &self,
        allowed: impl FnOnce(WatcherState) -> bool,
        to: WatcherState,
    ) -> Result<(), WatcherState> {
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if allowed(*state) {
                *state = to;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        match rejected {
            Some(state) => Err(state),
            None => Ok(()),
        }
    }

    fn confirm_stopped(&self) {
        match self.transition(|s| s == WatcherState::StopRequested, WatcherState::Stopped) {
            Ok(()) => {
                info!("Port watcher stopped");
                self.emit(WatcherEvent::Stopped);
            }
            Err(state) => debug!("Ignoring stop confirmation in state {}", state),
        }
    }
}

/// Which execution context the builder should resolve
enum ContextChoice {
    Capture,
    Inline,
    Explicit(Arc<dyn ExecutionContext>),
}

/// Builder for [`PortWatcher`]
pub struct PortWatcherBuilder {
    enumerator: Arc<dyn PortEnumerator>,
    signal: Box<dyn ChangeSignal>,
    context: ContextChoice,
    config: WatcherConfig,
    filters: Vec<Arc<dyn PortFilter>>,
}

impl PortWatcherBuilder {
    /// Deliver events through `context`
    pub fn context(mut self, context: impl ExecutionContext + 'static) -> Self {
        self.context = ContextChoice::Explicit(Arc::new(context));
        self
    }

    /// Deliver events synchronously on the thread that detected them
    pub fn inline(mut self) -> Self {
        self.context = ContextChoice::Inline;
        self
    }

    /// Use a specific configuration
    pub fn config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a filter applied after the reserved-port filter
    pub fn filter(mut self, filter: impl PortFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Subscribe to the change signal and seed the port snapshot
    ///
    /// Without an explicit context the calling tokio runtime is captured;
    /// outside a runtime events are delivered inline. The change signal is
    /// registered but not active until [`PortWatcher::start_watching`].
    /// A failing enumerator query fails the build.
    pub async fn build(self) -> Result<PortWatcher, WatchError> {
        let dispatcher = match self.context {
            ContextChoice::Explicit(context) => Dispatcher::Context(context),
            ContextChoice::Inline => Dispatcher::Inline,
            ContextChoice::Capture => match TokioContext::current() {
                Some(context) => Dispatcher::Context(Arc::new(context)),
                None => Dispatcher::Inline,
            },
        };
        if dispatcher.is_inline() {
            debug!("Port watcher events are delivered inline");
        }

        let (state, _) = watch::channel(WatcherState::None);
        let shared = Arc::new(Shared {
            enumerator: self.enumerator,
            reserved: ReservedPortFilter::new(
                self.config.reserved_port,
                self.config.ignore_reserved_port,
            ),
            filters: self.filters,
            existing: Mutex::new(Snapshot::default()),
            tickets: AtomicU64::new(0),
            state,
            dispatcher,
            subscribers: Registry::new(),
            diagnostics: Registry::new(),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let callback: SignalCallback = Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_signal();
            }
        });
        let handle = self.signal.subscribe(callback);

        let ports = query_off_thread(&shared).await?;
        info!("Port watcher seeded with {} port(s)", ports.len());
        shared.lock_snapshot().ports = ports;

        Ok(PortWatcher {
            shared,
            handle: Mutex::new(handle),
        })
    }
}

/// Run the enumerator on a blocking thread when a runtime is available
async fn query_off_thread(shared: &Arc<Shared>) -> Result<BTreeSet<PortId>, WatchError> {
    match Handle::try_current() {
        Ok(runtime) => {
            let shared = shared.clone();
            let ports = runtime
                .spawn_blocking(move || shared.query_filtered())
                .await
                .map_err(|e| DetectError::TaskFailed(e.to_string()))??;
            Ok(ports)
        }
        Err(_) => Ok(shared.query_filtered()?),
    }
}

/// Watches for serial ports being attached and removed
pub struct PortWatcher {
    shared: Arc<Shared>,
    handle: Mutex<Box<dyn SignalHandle>>,
}

impl PortWatcher {
    /// Start building a watcher over the given collaborators
    pub fn builder(
        enumerator: impl PortEnumerator + 'static,
        signal: impl ChangeSignal + 'static,
    ) -> PortWatcherBuilder {
        PortWatcherBuilder {
            enumerator: Arc::new(enumerator),
            signal: Box::new(signal),
            context: ContextChoice::Capture,
            config: WatcherConfig::default(),
            filters: Vec::new(),
        }
    }

    /// Build a watcher over the system scanner with a polling change signal
    pub async fn system(config: WatcherConfig) -> Result<Self, WatchError> {
        let signal = PollingSignal::new(config.poll_interval);
        Self::builder(PortScanner::new(), signal)
            .config(config)
            .build()
            .await
    }

    /// Current lifecycle state
    pub fn state(&self) -> WatcherState {
        *self.shared.state.borrow()
    }

    /// Activate the change signal and raise `Started`
    ///
    /// Legal from `None` and `Stopped`.
    pub fn start_watching(&self) -> Result<(), WatchError> {
        self.shared
            .transition(WatcherState::can_start, WatcherState::Started)
            .map_err(|state| WatchError::InvalidState {
                operation: "start watching",
                state,
            })?;
        self.lock_handle().activate();
        info!("Port watcher started");
        self.shared.emit(WatcherEvent::Started);
        Ok(())
    }

    /// Request teardown of the change signal
    ///
    /// Legal only from `Started`. Returns once the state is `StopRequested`;
    /// `Stopped` follows when the signal confirms teardown.
    pub fn stop_watching(&self) -> Result<(), WatchError> {
        self.shared
            .transition(WatcherState::can_stop, WatcherState::StopRequested)
            .map_err(|state| WatchError::InvalidState {
                operation: "stop watching",
                state,
            })?;
        debug!("Port watcher stop requested");

        // `Some(confirmed)` while the handle lock is held. A confirmation
        // arriving then is recorded and applied after the lock is released,
        // so `Stopped` handlers may call back into the watcher.
        let deferred = Arc::new(Mutex::new(Some(false)));
        let weak = Arc::downgrade(&self.shared);
        let slot = deferred.clone();
        let on_confirmed = Box::new(move || {
            let released = match slot.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
                Some(confirmed) => {
                    *confirmed = true;
                    false
                }
                None => true,
            };
            if released {
                if let Some(shared) = weak.upgrade() {
                    shared.confirm_stopped();
                }
            }
        });
        self.lock_handle().deactivate(on_confirmed);

        let confirmed = deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(false);
        if confirmed {
            self.shared.confirm_stopped();
        }
        Ok(())
    }

    /// [`stop_watching`](Self::stop_watching), then wait for `Stopped`
    pub async fn stop_watching_and_wait(&self) -> Result<(), WatchError> {
        let mut state_rx = self.shared.state.subscribe();
        self.stop_watching()?;
        // The sender lives in `self`, so this only returns once stopped
        let _ = state_rx
            .wait_for(|state| *state == WatcherState::Stopped)
            .await;
        Ok(())
    }

    /// Re-query the enumerator and emit events for any difference
    ///
    /// This is what every change signal runs. It blocks on the enumerator.
    /// Enumeration failures leave the remembered ports unchanged.
    pub fn reconcile(&self) -> Result<PortDiff, WatchError> {
        self.shared.reconcile()
    }

    /// Query the enumerator now, bypassing the remembered snapshot
    pub async fn list_current_ports(&self) -> Result<BTreeSet<PortId>, WatchError> {
        query_off_thread(&self.shared).await
    }

    /// Numeric suffixes of the current ports (`COM3` -> 3)
    pub async fn list_current_port_numbers(&self) -> Result<BTreeSet<u8>, WatchError> {
        Ok(self
            .list_current_ports()
            .await?
            .iter()
            .filter_map(PortId::number)
            .collect())
    }

    /// The remembered snapshot
    pub fn known_ports(&self) -> BTreeSet<PortId> {
        self.shared.lock_snapshot().ports.clone()
    }

    /// Whether the reserved port is filtered out
    pub fn ignore_reserved_port(&self) -> bool {
        self.shared.reserved.is_enabled()
    }

    /// Toggle the reserved-port filter; takes effect on the next query
    pub fn set_ignore_reserved_port(&self, ignore: bool) {
        self.shared.reserved.set_enabled(ignore);
    }

    /// The port treated as reserved
    pub fn reserved_port(&self) -> &PortId {
        self.shared.reserved.reserved()
    }

    /// Register a handler for every watcher event
    pub fn subscribe(
        &self,
        handler: impl Fn(&WatcherEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.subscribers.add(Arc::new(handler))
    }

    /// Remove a handler registered with any `subscribe`/`on_*` method
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.remove(id) || self.shared.diagnostics.remove(id)
    }

    pub fn on_port_added(&self, handler: impl Fn(&PortId) + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(move |event| {
            if let WatcherEvent::PortAdded(port) = event {
                handler(port);
            }
        })
    }

    pub fn on_port_removed(
        &self,
        handler: impl Fn(&PortId) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(move |event| {
            if let WatcherEvent::PortRemoved(port) = event {
                handler(port);
            }
        })
    }

    pub fn on_started(&self, handler: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(move |event| {
            if *event == WatcherEvent::Started {
                handler();
            }
        })
    }

    pub fn on_stopped(&self, handler: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(move |event| {
            if *event == WatcherEvent::Stopped {
                handler();
            }
        })
    }

    /// Receive every event through a channel
    ///
    /// The subscription removes itself on the first event after the
    /// receiver is dropped.
    pub fn event_stream(&self) -> mpsc::UnboundedReceiver<WatcherEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let own_id = Arc::new(OnceLock::new());
        let slot = own_id.clone();
        let weak = Arc::downgrade(&self.shared);
        let id = self.subscribe(move |event| {
            if tx.send(event.clone()).is_err() {
                if let (Some(shared), Some(id)) = (weak.upgrade(), slot.get()) {
                    debug!("Event stream receiver dropped, unsubscribing");
                    shared.subscribers.remove(*id);
                }
            }
        });
        let _ = own_id.set(id);
        rx
    }

    /// Register a handler for enumeration and dispatch failures
    ///
    /// Diagnostic handlers run on the thread that hit the failure.
    pub fn on_diagnostic(
        &self,
        handler: impl Fn(&WatchError) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.diagnostics.add(Arc::new(handler))
    }

    fn lock_handle(&self) -> MutexGuard<'_, Box<dyn SignalHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PortWatcher {
    fn drop(&mut self) {
        if self.state() == WatcherState::Started {
            debug!("Port watcher dropped while watching, tearing down signal");
            let handle = self.handle.get_mut().unwrap_or_else(PoisonError::into_inner);
            handle.deactivate(Box::new(|| {}));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::signal::StopConfirmation;

    /// Enumerator returning whatever was last stored
    struct FixedEnumerator {
        ports: Mutex<Result<BTreeSet<PortId>, String>>,
    }

    impl FixedEnumerator {
        fn with(names: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                ports: Mutex::new(Ok(ports(names))),
            })
        }

        fn set(&self, names: &[&str]) {
            *self.ports.lock().unwrap() = Ok(ports(names));
        }

        fn fail(&self) {
            *self.ports.lock().unwrap() = Err("WMI unavailable".into());
        }
    }

    impl PortEnumerator for FixedEnumerator {
        fn query(&self) -> Result<BTreeSet<PortId>, DetectError> {
            self.ports
                .lock()
                .unwrap()
                .clone()
                .map_err(DetectError::EnumerationFailed)
        }
    }

    /// Signal that never fires and records (de)activation
    #[derive(Clone, Default)]
    struct QuietSignal {
        activations: Arc<AtomicUsize>,
        pending_stop: Arc<Mutex<Option<StopConfirmation>>>,
    }

    impl QuietSignal {
        fn confirm(&self) {
            if let Some(confirm) = self.pending_stop.lock().unwrap().take() {
                confirm();
            }
        }
    }

    impl ChangeSignal for QuietSignal {
        fn subscribe(self: Box<Self>, _callback: SignalCallback) -> Box<dyn SignalHandle> {
            self
        }
    }

    impl SignalHandle for QuietSignal {
        fn activate(&mut self) {
            self.activations.fetch_add(1, Ordering::SeqCst);
        }

        fn deactivate(&mut self, on_confirmed: StopConfirmation) {
            *self.pending_stop.lock().unwrap() = Some(on_confirmed);
        }
    }

    fn ports(names: &[&str]) -> BTreeSet<PortId> {
        names.iter().map(|n| PortId::from(*n)).collect()
    }

    fn com1_config() -> WatcherConfig {
        WatcherConfig {
            reserved_port: PortId::from("COM1"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_seeds_and_starts_in_none() {
        let enumerator = FixedEnumerator::with(&["COM1", "COM3"]);
        let watcher = PortWatcher::builder(enumerator, QuietSignal::default())
            .config(com1_config())
            .inline()
            .build()
            .await
            .unwrap();

        assert_eq!(watcher.state(), WatcherState::None);
        assert_eq!(watcher.known_ports(), ports(&["COM3"]));
    }

    #[tokio::test]
    async fn test_build_fails_when_enumeration_fails() {
        let enumerator = FixedEnumerator::with(&[]);
        enumerator.fail();
        let result = PortWatcher::builder(enumerator, QuietSignal::default())
            .inline()
            .build()
            .await;

        assert!(matches!(result, Err(WatchError::Enumeration(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_with_deferred_confirmation() {
        let signal = QuietSignal::default();
        let watcher = PortWatcher::builder(FixedEnumerator::with(&[]), signal.clone())
            .inline()
            .build()
            .await
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        watcher.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        watcher.start_watching().unwrap();
        assert_eq!(watcher.state(), WatcherState::Started);
        assert_eq!(signal.activations.load(Ordering::SeqCst), 1);

        watcher.stop_watching().unwrap();
        assert_eq!(watcher.state(), WatcherState::StopRequested);

        let err = watcher.stop_watching().unwrap_err();
        assert!(matches!(
            err,
            WatchError::InvalidState {
                state: WatcherState::StopRequested,
                ..
            }
        ));
        assert!(watcher.start_watching().is_err());

        signal.confirm();
        assert_eq!(watcher.state(), WatcherState::Stopped);
        assert_eq!(
            *events.lock().unwrap(),
            vec![WatcherEvent::Started, WatcherEvent::Stopped]
        );

        watcher.start_watching().unwrap();
        assert_eq!(signal.activations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reconcile_failure_keeps_snapshot_and_reports() {
        let enumerator = FixedEnumerator::with(&["COM3"]);
        let watcher = PortWatcher::builder(enumerator.clone(), QuietSignal::default())
            .inline()
            .build()
            .await
            .unwrap();

        let diagnostics = Arc::new(AtomicUsize::new(0));
        let counter = diagnostics.clone();
        watcher.on_diagnostic(move |e| {
            assert!(matches!(e, WatchError::Enumeration(_)));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        enumerator.fail();
        assert!(watcher.reconcile().is_err());
        watcher.shared.on_signal();
        assert_eq!(diagnostics.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.known_ports(), ports(&["COM3"]));

        enumerator.set(&["COM3", "COM4"]);
        let diff = watcher.reconcile().unwrap();
        assert_eq!(diff.added, ports(&["COM4"]));
    }

    #[tokio::test]
    async fn test_stale_ticket_is_discarded() {
        let enumerator = FixedEnumerator::with(&["COM3"]);
        let watcher = PortWatcher::builder(enumerator.clone(), QuietSignal::default())
            .inline()
            .build()
            .await
            .unwrap();

        // Pretend a newer query has already been applied
        watcher.shared.lock_snapshot().applied_ticket = 10;
        enumerator.set(&[]);
        let diff = watcher.reconcile().unwrap();
        assert!(diff.is_empty());
        assert_eq!(watcher.known_ports(), ports(&["COM3"]));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let enumerator = FixedEnumerator::with(&[]);
        let watcher = PortWatcher::builder(enumerator.clone(), QuietSignal::default())
            .inline()
            .build()
            .await
            .unwrap();

        let added = Arc::new(AtomicUsize::new(0));
        let counter = added.clone();
        let id = watcher.on_port_added(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        enumerator.set(&["COM3"]);
        watcher.reconcile().unwrap();
        assert!(watcher.unsubscribe(id));
        enumerator.set(&["COM3", "COM4"]);
        watcher.reconcile().unwrap();

        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert!(!watcher.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_event_stream_unsubscribes_after_receiver_dropped() {
        let enumerator = FixedEnumerator::with(&[]);
        let watcher = PortWatcher::builder(enumerator.clone(), QuietSignal::default())
            .inline()
            .build()
            .await
            .unwrap();

        let mut stream = watcher.event_stream();
        enumerator.set(&["COM3"]);
        watcher.reconcile().unwrap();
        assert_eq!(stream.recv().await, Some(WatcherEvent::PortAdded(PortId::from("COM3"))));
        assert_eq!(watcher.shared.subscribers.snapshot().len(), 1);

        drop(stream);
        enumerator.set(&["COM3", "COM4"]);
        watcher.reconcile().unwrap();
        assert!(watcher.shared.subscribers.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_drop_while_started_deactivates() {
        let signal = QuietSignal::default();
        let watcher = PortWatcher::builder(FixedEnumerator::with(&[]), signal.clone())
            .inline()
            .build()
            .await
            .unwrap();
        watcher.start_watching().unwrap();
        drop(watcher);

        assert!(signal.pending_stop.lock().unwrap().is_some());
        // Confirming after the watcher is gone is harmless
        signal.confirm();
    }
}
