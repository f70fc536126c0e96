use serde::Serialize;
use std::fmt;

/// Stages of one reconciliation pass, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassState {
    Idle,
    Classifying,
    Relinking,
    Creating,
    Pruning,
    Recalculating,
    Reindexing,
    Saving,
}

impl PassState {
    /// The stage after this one. `Saving` wraps back to `Idle`.
    pub fn next(self) -> PassState {
        match self {
            PassState::Idle => PassState::Classifying,
            PassState::Classifying => PassState::Relinking,
            PassState::Relinking => PassState::Creating,
            PassState::Creating => PassState::Pruning,
            PassState::Pruning => PassState::Recalculating,
            PassState::Recalculating => PassState::Reindexing,
            PassState::Reindexing => PassState::Saving,
            PassState::Saving => PassState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PassState::Idle => "idle",
            PassState::Classifying => "classifying",
            PassState::Relinking => "relinking",
            PassState::Creating => "creating",
            PassState::Pruning => "pruning",
            PassState::Recalculating => "recalculating",
            PassState::Reindexing => "reindexing",
            PassState::Saving => "saving",
        }
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How new containers and songs are positioned, chosen once per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingMode {
    /// First sync into an empty store: alphabetical folders, newest albums
    /// first, songs in disc/track order.
    Bootstrap,
    /// Store already has content: new items go on top, newest additions first.
    Incremental,
}

/// What a pass did. Counts are of rows, not of catalog records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub mode: OrderingMode,
    pub catalog_songs: usize,
    pub songs_created: usize,
    pub songs_relinked: usize,
    pub songs_deleted: usize,
    pub albums_created: usize,
    pub albums_deleted: usize,
    pub folders_created: usize,
    pub folders_deleted: usize,
    pub positions_updated: usize,
    pub release_dates_updated: usize,
    pub identity_collisions: usize,
    pub repairs: usize,
    pub rows_written: usize,
}

impl PassReport {
    pub fn new(mode: OrderingMode) -> Self {
        Self {
            mode,
            catalog_songs: 0,
            songs_created: 0,
            songs_relinked: 0,
            songs_deleted: 0,
            albums_created: 0,
            albums_deleted: 0,
            folders_created: 0,
            folders_deleted: 0,
            positions_updated: 0,
            release_dates_updated: 0,
            identity_collisions: 0,
            repairs: 0,
            rows_written: 0,
        }
    }

    /// True when the pass wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.rows_written == 0
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} pass over {} catalog songs: songs +{} ~{} -{}, albums +{} -{}, folders +{} -{}, \
             {} positions, {} release dates, {} rows written",
            self.mode,
            self.catalog_songs,
            self.songs_created,
            self.songs_relinked,
            self.songs_deleted,
            self.albums_created,
            self.albums_deleted,
            self.folders_created,
            self.folders_deleted,
            self.positions_updated,
            self.release_dates_updated,
            self.rows_written
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_cycle_back_to_idle() {
        let mut state = PassState::Idle;
        let mut seen = vec![state];
        loop {
            state = state.next();
            if state == PassState::Idle {
                break;
            }
            seen.push(state);
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(seen.last(), Some(&PassState::Saving));
    }
}
