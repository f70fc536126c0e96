use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder folder title for songs whose catalog entry has no album artist.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: i64,       // Database ID
    pub title: String, // Album artist
    pub position: i64, // Among all folders
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: i64,
    pub folder_id: i64,
    pub external_album_key: i64,
    pub position: i64, // Within its folder
    pub release_date_estimate: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Song {
    pub id: i64,
    pub album_id: i64,
    pub external_song_key: i64,
    pub position: i64, // Within its album
}

/// Everything the store holds, as read at the start of a pass.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StoredLibrary {
    pub folders: Vec<Folder>,
    pub albums: Vec<Album>,
    pub songs: Vec<Song>,
}

impl StoredLibrary {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.albums.is_empty() && self.songs.is_empty()
    }
}

/// One song as reported by the system music catalog.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExternalSongRecord {
    pub external_song_key: i64,
    pub external_album_key: i64,
    pub album_artist: Option<String>,
    pub album_title: Option<String>,
    pub disc_number: u32,
    pub track_number: u32,
    pub title: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub date_added: DateTime<Utc>,
}

impl ExternalSongRecord {
    /// Folder title this record files under, falling back to `placeholder`
    /// when the album artist is missing or blank.
    pub fn folder_title<'a>(&'a self, placeholder: &'a str) -> &'a str {
        match self.album_artist.as_deref().map(str::trim) {
            Some(artist) if !artist.is_empty() => artist,
            _ => placeholder,
        }
    }
}
