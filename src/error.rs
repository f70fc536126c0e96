use std::path::PathBuf;
use thiserror::Error;

/// Failures reading the system music catalog. All of them mean the pass is
/// skipped before anything is touched.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog at {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog property list is unreadable")]
    Plist(#[from] plist::Error),

    #[error("catalog export is not valid JSON")]
    Json(#[from] serde_json::Error),

    #[error("catalog helper command failed: {0}")]
    Command(String),

    #[error("catalog is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare database location {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored library is inconsistent: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync skipped: catalog unavailable")]
    CatalogUnavailable(#[source] CatalogError),

    #[error("failed to load the library store")]
    Load(#[source] StoreError),

    #[error("save failed, pass discarded")]
    SaveFailure(#[source] StoreError),
}

impl SyncError {
    /// Short reason shown to the user as "library not yet up to date".
    pub fn reason(&self) -> String {
        match self {
            SyncError::CatalogUnavailable(e) => format!("catalog unavailable: {}", e),
            SyncError::Load(e) => format!("library store unreadable: {}", e),
            SyncError::SaveFailure(e) => format!("save failed: {}", e),
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
