//! Simulated port enumerator

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use com_detect::{DetectError, PortEnumerator, PortId};
use tracing::debug;

/// Mutable state behind the simulated enumerator
#[derive(Default)]
struct SimState {
    /// Ports currently "plugged in"
    ports: BTreeSet<PortId>,
    /// Snapshots returned by upcoming queries before falling back to `ports`
    script: VecDeque<Scripted>,
    /// Number of upcoming queries that fail
    failures: usize,
    /// Barrier every query waits on before reading state
    gate: Option<Arc<Barrier>>,
    /// Artificial query latency
    latency: Option<Duration>,
}

/// One scripted query result, optionally held until a barrier releases it
struct Scripted {
    ports: BTreeSet<PortId>,
    hold: Option<Arc<Barrier>>,
}

/// Port enumerator backed by an in-memory port set
///
/// Tests attach and detach ports, then fire a change signal. Scripted
/// snapshots and failures are consumed one query at a time.
#[derive(Default)]
pub struct SimulatedEnumerator {
    state: Mutex<SimState>,
    queries: AtomicUsize,
}

impl SimulatedEnumerator {
    /// Create an enumerator with the given ports present
    pub fn new<I, P>(ports: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PortId>,
    {
        Self {
            state: Mutex::new(SimState {
                ports: ports.into_iter().map(Into::into).collect(),
                ..Default::default()
            }),
            queries: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug a port in
    pub fn attach(&self, port: impl Into<PortId>) {
        let port = port.into();
        debug!("Simulated attach: {}", port);
        self.lock().ports.insert(port);
    }

    /// Pull a port out
    pub fn detach(&self, port: impl Into<PortId>) {
        let port = port.into();
        debug!("Simulated detach: {}", port);
        self.lock().ports.remove(&port);
    }

    /// Replace the whole port set
    pub fn set_ports<I, P>(&self, ports: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PortId>,
    {
        self.lock().ports = ports.into_iter().map(Into::into).collect();
    }

    /// Ports currently present
    pub fn ports(&self) -> BTreeSet<PortId> {
        self.lock().ports.clone()
    }

    /// Queue a snapshot for one upcoming query; it also becomes the port set
    pub fn push_snapshot<I, P>(&self, ports: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PortId>,
    {
        self.lock().script.push_back(Scripted {
            ports: ports.into_iter().map(Into::into).collect(),
            hold: None,
        });
    }

    /// Queue a snapshot whose query waits on `hold` before returning
    ///
    /// The snapshot is claimed when the query starts, so a later query can
    /// complete while this one is still held.
    pub fn push_held_snapshot<I, P>(&self, ports: I, hold: Arc<Barrier>)
    where
        I: IntoIterator<Item = P>,
        P: Into<PortId>,
    {
        self.lock().script.push_back(Scripted {
            ports: ports.into_iter().map(Into::into).collect(),
            hold: Some(hold),
        });
    }

    /// Make the next `count` queries fail
    pub fn fail_next(&self, count: usize) {
        self.lock().failures = count;
    }

    /// Make every query wait on `barrier` before reading the port set
    pub fn set_gate(&self, barrier: Option<Arc<Barrier>>) {
        self.lock().gate = barrier;
    }

    /// Delay every query
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Number of queries served so far, including failed ones
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl PortEnumerator for SimulatedEnumerator {
    fn query(&self) -> Result<BTreeSet<PortId>, DetectError> {
        let (gate, latency, scripted) = {
            let mut state = self.lock();
            let scripted = if state.failures == 0 {
                state.script.pop_front()
            } else {
                None
            };
            (state.gate.clone(), state.latency, scripted)
        };
        // Counted after claiming a script entry so waiters see it claimed
        self.queries.fetch_add(1, Ordering::SeqCst);

        // Wait outside the lock so other queries can reach the gate
        if let Some(gate) = gate {
            gate.wait();
        }
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }

        if let Some(Scripted { ports, hold }) = scripted {
            if let Some(hold) = hold {
                hold.wait();
            }
            self.lock().ports = ports.clone();
            return Ok(ports);
        }

        let mut state = self.lock();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(DetectError::EnumerationFailed(
                "simulated enumeration failure".to_string(),
            ));
        }
        Ok(state.ports.clone())
    }
}
