use super::report::{PassReport, PassState};
use super::Reconciler;
use crate::catalog::CatalogReader;
use crate::db::LibraryStore;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// What subscribers hear after each pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    Reconciled(PassReport),
    /// The pass was skipped or abandoned; the stored library is unchanged.
    NotUpToDate { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Ran on this thread. More than one pass means triggers arrived meanwhile.
    Completed { passes: usize },
    /// Another pass was in flight; it will run once more when it finishes.
    Coalesced,
}

#[derive(Debug)]
struct Flags {
    running: bool,
    dirty: bool,
    state: PassState,
}

/// Keeps `running` honest if a pass panics.
struct RunningGuard<'a> {
    flags: &'a Mutex<Flags>,
    armed: bool,
}

impl<'a> Drop for RunningGuard<'a> {
    fn drop(&mut self) {
        if self.armed {
            let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
            flags.running = false;
            flags.state = PassState::Idle;
        }
    }
}

/// Serializes passes over one store. At most one pass runs at a time; a
/// trigger that arrives during a pass marks the library dirty and the running
/// pass goes around once more instead of starting a second one.
pub struct LibrarySync<C, S> {
    reconciler: Reconciler,
    catalog: C,
    store: Mutex<S>,
    flags: Mutex<Flags>,
    subscribers: Mutex<Vec<Sender<LibraryEvent>>>,
}

impl<C, S> LibrarySync<C, S>
where
    C: CatalogReader,
    S: LibraryStore,
{
    pub fn new(reconciler: Reconciler, catalog: C, store: S) -> Self {
        Self {
            reconciler,
            catalog,
            store: Mutex::new(store),
            flags: Mutex::new(Flags {
                running: false,
                dirty: false,
                state: PassState::Idle,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<LibraryEvent> {
        let (tx, rx) = channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn state(&self) -> PassState {
        lock(&self.flags).state
    }

    pub fn is_running(&self) -> bool {
        lock(&self.flags).running
    }

    /// Gives read access to the store between passes.
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&lock(&self.store))
    }

    pub fn trigger(&self) -> TriggerOutcome {
        {
            let mut flags = lock(&self.flags);
            if flags.running {
                flags.dirty = true;
                info!(state = %flags.state, "Sync already in progress; will run again when it finishes");
                return TriggerOutcome::Coalesced;
            }
            flags.running = true;
            flags.dirty = false;
        }
        let mut guard = RunningGuard {
            flags: &self.flags,
            armed: true,
        };

        let mut passes = 0;
        loop {
            let result = {
                let mut store = lock(&self.store);
                self.reconciler
                    .run_pass(&self.catalog, &mut *store, |state| lock(&self.flags).state = state)
            };
            passes += 1;
            self.publish(match result {
                Ok(report) => LibraryEvent::Reconciled(report),
                Err(e) => {
                    warn!(error = ?e, "Library not yet up to date");
                    LibraryEvent::NotUpToDate { reason: e.reason() }
                }
            });

            let mut flags = lock(&self.flags);
            if flags.dirty {
                flags.dirty = false;
                continue;
            }
            flags.running = false;
            guard.armed = false;
            break;
        }
        TriggerOutcome::Completed { passes }
    }

    fn publish(&self, event: LibraryEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl<C, S> LibrarySync<C, S>
where
    C: CatalogReader + Send + Sync + 'static,
    S: LibraryStore + Send + 'static,
{
    /// Runs a pass for every trigger received until the sending side hangs up.
    pub fn spawn_worker(self: Arc<Self>, triggers: Receiver<()>) -> JoinHandle<()> {
        thread::spawn(move || {
            for () in triggers.iter() {
                // Triggers that queued up while we were busy are one change.
                while triggers.try_recv().is_ok() {}
                self.trigger();
            }
            info!("Sync worker stopped");
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
