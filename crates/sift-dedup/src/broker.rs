//! Actor-owned dedup store.
//!
//! A [`StoreBroker`] moves a [`DedupStore`] onto its own thread and serves
//! requests from a channel. Workers hold cheap [`BrokerHandle`] clones and
//! never touch the sets directly, so every decide-and-update step is
//! linearized by the order the broker receives requests.

use crate::signature::Signature;
use crate::store::{DedupBackend, DedupStore, Result, StoreError, StoreSnapshot, StoreStats};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Messages understood by the broker thread.
enum Request {
    Decide {
        signature: Signature,
        online: bool,
        reply: Sender<bool>,
    },
    Snapshot {
        reply: Sender<StoreSnapshot>,
    },
    Stats {
        reply: Sender<StoreStats>,
    },
    Save {
        reply: Sender<Result<bool>>,
    },
    Shutdown,
}

/// Counters reported when the broker stops.
#[derive(Debug, Clone, Copy, Default)]
struct BrokerStats {
    checks: u64,
    rejected: u64,
    saves: u64,
}

/// Client side of a running broker.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    sender: Sender<Request>,
}

impl BrokerHandle {
    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Request) -> Result<T> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(build(reply))
            .map_err(|_| StoreError::BrokerUnavailable)?;
        response.recv().map_err(|_| StoreError::BrokerUnavailable)
    }
}

impl DedupBackend for BrokerHandle {
    fn decide(&self, signature: &Signature, online: bool) -> Result<bool> {
        let signature = signature.clone();
        self.request(|reply| Request::Decide {
            signature,
            online,
            reply,
        })
    }

    fn snapshot(&self) -> Result<StoreSnapshot> {
        self.request(|reply| Request::Snapshot { reply })
    }

    fn stats(&self) -> Result<StoreStats> {
        self.request(|reply| Request::Stats { reply })
    }

    fn save(&self) -> Result<bool> {
        self.request(|reply| Request::Save { reply })?
    }
}

/// Owner thread for a [`DedupStore`].
///
/// Dropping the broker stops the thread and waits for it; use
/// [`StoreBroker::shutdown`] to get the store back.
pub struct StoreBroker {
    handle: BrokerHandle,
    thread: Option<JoinHandle<DedupStore>>,
}

impl StoreBroker {
    /// Start the broker thread.
    pub fn spawn(store: DedupStore) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("sift-store-broker".into())
            .spawn(move || serve(store, receiver))
            .map_err(StoreError::Spawn)?;

        Ok(Self {
            handle: BrokerHandle { sender },
            thread: Some(thread),
        })
    }

    /// A new client handle.
    #[must_use]
    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }

    /// Stop the broker and return the store it owned.
    ///
    /// Requests already queued are served first. Handles used afterwards
    /// get [`StoreError::BrokerUnavailable`].
    pub fn shutdown(mut self) -> Result<DedupStore> {
        self.stop()
    }

    fn stop(&mut self) -> Result<DedupStore> {
        let thread = self.thread.take().ok_or(StoreError::BrokerUnavailable)?;
        // The thread may already have exited; join reports that.
        let _ = self.handle.sender.send(Request::Shutdown);
        thread.join().map_err(|_| StoreError::Poisoned)
    }
}

impl Drop for StoreBroker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Store broker did not stop cleanly");
            }
        }
    }
}

fn serve(mut store: DedupStore, receiver: Receiver<Request>) -> DedupStore {
    let mut stats = BrokerStats::default();

    // A dropped reply receiver only means the caller went away.
    while let Ok(request) = receiver.recv() {
        match request {
            Request::Decide {
                signature,
                online,
                reply,
            } => {
                let rejected = store.decide(&signature, online);
                stats.checks += 1;
                stats.rejected += u64::from(rejected);
                let _ = reply.send(rejected);
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(store.snapshot());
            }
            Request::Stats { reply } => {
                let _ = reply.send(store.stats());
            }
            Request::Save { reply } => {
                let result = store.save();
                if matches!(result, Ok(true)) {
                    stats.saves += 1;
                }
                let _ = reply.send(result);
            }
            Request::Shutdown => break,
        }
    }

    debug!(
        checks = stats.checks,
        rejected = stats.rejected,
        saves = stats.saves,
        seen = store.seen_len(),
        blacklist = store.blacklist_len(),
        "Store broker stopped"
    );
    store
}
