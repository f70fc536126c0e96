use crate::error::CatalogError;
use crate::models::ExternalSongRecord;
use sha2::{Digest, Sha256};

/// Read-only view of the system music catalog. Every call returns the full
/// current snapshot; the catalog has no notion of deltas.
#[cfg_attr(test, mockall::automock)]
pub trait CatalogReader {
    fn all_songs(&self) -> Result<Vec<ExternalSongRecord>, CatalogError>;
}

impl<T: CatalogReader + ?Sized> CatalogReader for Box<T> {
    fn all_songs(&self) -> Result<Vec<ExternalSongRecord>, CatalogError> {
        (**self).all_songs()
    }
}

/// Fixed snapshot, for tests and for replaying an export.
impl CatalogReader for Vec<ExternalSongRecord> {
    fn all_songs(&self) -> Result<Vec<ExternalSongRecord>, CatalogError> {
        Ok(self.clone())
    }
}

/// Stable album identity for sources that only carry album artist and title.
/// Case and surrounding whitespace do not split an album.
pub fn album_key(album_artist: Option<&str>, album_title: Option<&str>) -> i64 {
    let mut hasher = Sha256::new();
    for part in [album_artist, album_title] {
        hasher.update(part.unwrap_or_default().trim().to_lowercase().as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Parses a catalog persistent id: 16 hex digits, read as the bits of an i64.
pub fn parse_persistent_id(id: &str) -> Option<i64> {
    let id = id.trim();
    if id.is_empty() || id.len() > 16 {
        return None;
    }
    u64::from_str_radix(id, 16).ok().map(|bits| bits as i64)
}
