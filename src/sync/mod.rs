//! Reconciliation of the system catalog into the stored library.
//!
//! One pass reads the whole catalog, loads the store into a [`PassContext`],
//! runs the stages in a fixed order and commits the resulting diff in a
//! single transaction. A pass that fails anywhere leaves the store as it was.

mod classify;
mod context;
mod create;
pub mod invariants;
mod ordering;
mod prune;
mod recalc;
pub mod report;
pub mod service;
mod relink;

pub use ordering::finder_cmp;
pub use report::{OrderingMode, PassReport, PassState};
pub use service::{LibraryEvent, LibrarySync, TriggerOutcome};

use crate::catalog::CatalogReader;
use crate::db::LibraryStore;
use crate::error::{Result, SyncError};
use crate::models::UNKNOWN_ARTIST;
use context::PassContext;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Folder title for songs without an album artist.
    pub unknown_artist_title: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            unknown_artist_title: UNKNOWN_ARTIST.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Runs one full pass. `on_state` sees every stage as it starts and
    /// `Idle` once the pass is over, whether it succeeded or not.
    pub fn run_pass<C, S, F>(&self, catalog: &C, store: &mut S, mut on_state: F) -> Result<PassReport>
    where
        C: CatalogReader + ?Sized,
        S: LibraryStore + ?Sized,
        F: FnMut(PassState),
    {
        let result = self.pass(catalog, store, &mut on_state);
        on_state(PassState::Idle);
        result
    }

    fn pass<C, S, F>(&self, catalog: &C, store: &mut S, on_state: &mut F) -> Result<PassReport>
    where
        C: CatalogReader + ?Sized,
        S: LibraryStore + ?Sized,
        F: FnMut(PassState),
    {
        on_state(PassState::Classifying);
        // The catalog is read before anything else so an unreadable catalog
        // never gets as far as the store.
        let snapshot = catalog.all_songs().map_err(SyncError::CatalogUnavailable)?;
        let stored = store.load().map_err(SyncError::Load)?;

        let mut ctx = PassContext::load(stored, &self.options.unknown_artist_title);
        classify::ingest(&mut ctx, snapshot);
        let classes = classify::classify(&ctx);

        on_state(PassState::Relinking);
        let relinked = relink::relink(&mut ctx, &classes.matched);

        on_state(PassState::Creating);
        create::create(&mut ctx, &classes.new_records, relinked);

        on_state(PassState::Pruning);
        prune::prune(&mut ctx, &classes.stale);

        on_state(PassState::Recalculating);
        recalc::recalculate(&mut ctx);

        on_state(PassState::Reindexing);
        recalc::reindex(&mut ctx);

        on_state(PassState::Saving);
        let changes = ctx.change_set();
        if changes.is_empty() {
            debug!("Library already up to date");
        } else {
            store.commit(&changes).map_err(SyncError::SaveFailure)?;
        }

        info!(report = %ctx.report, "Library reconciled");
        Ok(ctx.report)
    }
}
