use crate::catalog::{album_key, parse_persistent_id, CatalogReader};
use crate::error::CatalogError;
use crate::models::ExternalSongRecord;
use chrono::{DateTime, NaiveDate, Utc};
use plist::{Dictionary, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads the catalog from a Music/iTunes `Library.xml` export.
pub struct LibraryXmlReader {
    path: PathBuf,
}

impl LibraryXmlReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogReader for LibraryXmlReader {
    fn all_songs(&self) -> Result<Vec<ExternalSongRecord>, CatalogError> {
        let file = File::open(&self.path).map_err(|source| CatalogError::Io {
            path: self.path.clone(),
            source,
        })?;
        let value = Value::from_reader(BufReader::new(file))?;
        let songs = parse_library(&value)?;
        debug!(path = ?self.path, songs = songs.len(), "Read Library.xml");
        Ok(songs)
    }
}

pub fn parse_library(value: &Value) -> Result<Vec<ExternalSongRecord>, CatalogError> {
    let root_dict = value
        .as_dictionary()
        .ok_or_else(|| CatalogError::Malformed("root is not a dictionary".to_string()))?;
    let tracks_dict = root_dict
        .get("Tracks")
        .ok_or_else(|| CatalogError::Malformed("no Tracks key".to_string()))?
        .as_dictionary()
        .ok_or_else(|| CatalogError::Malformed("Tracks is not a dictionary".to_string()))?;

    let mut songs = Vec::with_capacity(tracks_dict.len());
    for (key, track_value) in tracks_dict {
        let Some(track_info) = track_value.as_dictionary() else {
            warn!(track = %key, "Skipping track entry that is not a dictionary");
            continue;
        };
        if let Some(song) = parse_track(track_info) {
            songs.push(song);
        }
    }
    Ok(songs)
}

fn string(track_info: &Dictionary, key: &str) -> Option<String> {
    track_info
        .get(key)
        .and_then(|v| v.as_string())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn number(track_info: &Dictionary, key: &str) -> u32 {
    track_info
        .get(key)
        .and_then(|v| v.as_unsigned_integer())
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn date(track_info: &Dictionary, key: &str) -> Option<DateTime<Utc>> {
    track_info
        .get(key)
        .and_then(|v| v.as_date())
        .map(|d| DateTime::<Utc>::from(std::time::SystemTime::from(d.clone())))
}

fn parse_track(track_info: &Dictionary) -> Option<ExternalSongRecord> {
    // Skip remote/streamed tracks
    if let Some(type_str) = track_info.get("Track Type").and_then(|v| v.as_string()) {
        if type_str == "Remote" || type_str == "Stream" {
            return None;
        }
    }

    let Some(song_key) = track_info
        .get("Persistent ID")
        .and_then(|v| v.as_string())
        .and_then(parse_persistent_id)
    else {
        debug!("Skipping track without a usable persistent id");
        return None;
    };

    let album_artist = string(track_info, "Album Artist").or_else(|| string(track_info, "Artist"));
    let album_title = string(track_info, "Album");
    let release_date = date(track_info, "Release Date").or_else(|| {
        let year = i32::try_from(number(track_info, "Year")).ok().filter(|y| *y > 0)?;
        NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc())
    });

    Some(ExternalSongRecord {
        external_song_key: song_key,
        external_album_key: album_key(album_artist.as_deref(), album_title.as_deref()),
        album_artist,
        album_title,
        disc_number: number(track_info, "Disc Number"),
        track_number: number(track_info, "Track Number"),
        title: string(track_info, "Name"),
        release_date,
        date_added: date(track_info, "Date Added").unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    })
}
