use crate::catalog::{parse_persistent_id, CatalogReader};
use crate::error::CatalogError;
use crate::models::ExternalSongRecord;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

/// Keys arrive either as plain integers or as persistent-id hex strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExternalKey {
    Number(i64),
    Hex(String),
}

impl ExternalKey {
    fn resolve(&self) -> Result<i64, CatalogError> {
        match self {
            ExternalKey::Number(n) => Ok(*n),
            ExternalKey::Hex(s) => parse_persistent_id(s)
                .ok_or_else(|| CatalogError::Malformed(format!("invalid key {:?}", s))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LibraryExport {
    songs: Vec<ExternalSong>,
}

#[derive(Debug, Deserialize)]
struct ExternalSong {
    pub song_key: ExternalKey,
    pub album_key: ExternalKey,
    #[serde(default)]
    pub album_artist: Option<String>,
    #[serde(default)]
    pub album_title: Option<String>,
    #[serde(default)]
    pub disc_number: u32,
    #[serde(default)]
    pub track_number: u32,
    #[serde(default)]
    pub title: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub release_date: Option<i64>,
    pub date_added: i64,
}

impl ExternalSong {
    fn into_record(self) -> Result<ExternalSongRecord, CatalogError> {
        let date_added = DateTime::from_timestamp(self.date_added, 0)
            .ok_or_else(|| CatalogError::Malformed(format!("date_added out of range: {}", self.date_added)))?;
        Ok(ExternalSongRecord {
            external_song_key: self.song_key.resolve()?,
            external_album_key: self.album_key.resolve()?,
            album_artist: self.album_artist,
            album_title: self.album_title,
            disc_number: self.disc_number,
            track_number: self.track_number,
            title: self.title,
            release_date: self.release_date.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            date_added,
        })
    }
}

/// Where the JSON export comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSource {
    File(PathBuf),
    /// Helper program that prints the export on stdout.
    Command { program: String, args: Vec<String> },
}

/// Reads the catalog from the JSON export produced by the platform helper.
pub struct SystemLibraryReader {
    source: ExportSource,
}

impl SystemLibraryReader {
    pub fn new(source: ExportSource) -> Self {
        Self { source }
    }

    fn fetch(&self) -> Result<String, CatalogError> {
        match &self.source {
            ExportSource::File(path) => std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
                path: path.clone(),
                source,
            }),
            ExportSource::Command { program, args } => {
                let output = Command::new(program).args(args).output().map_err(|e| {
                    CatalogError::Command(format!("failed to execute {}: {}", program, e))
                })?;

                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(CatalogError::Command(format!(
                        "{} exited with {}: {}",
                        program,
                        output.status,
                        stderr.trim()
                    )));
                }

                String::from_utf8(output.stdout)
                    .map_err(|_| CatalogError::Command(format!("{} printed non UTF-8 output", program)))
            }
        }
    }
}

impl CatalogReader for SystemLibraryReader {
    fn all_songs(&self) -> Result<Vec<ExternalSongRecord>, CatalogError> {
        let json_str = self.fetch()?;
        let songs = parse_export(&json_str)?;
        debug!(source = ?self.source, songs = songs.len(), "Read catalog export");
        Ok(songs)
    }
}

/// Unreadable JSON fails the whole export; a single bad entry is skipped.
pub fn parse_export(json_str: &str) -> Result<Vec<ExternalSongRecord>, CatalogError> {
    let library_export: LibraryExport = serde_json::from_str(json_str)?;
    let mut songs = Vec::with_capacity(library_export.songs.len());
    for (index, song) in library_export.songs.into_iter().enumerate() {
        match song.into_record() {
            Ok(record) => songs.push(record),
            Err(e) => warn!(index, error = %e, "Skipping malformed export entry"),
        }
    }
    Ok(songs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EXPORT: &str = r#"{
        "songs": [
            {
                "song_key": "00000000000000A1",
                "album_key": 77,
                "album_artist": "Zaz",
                "album_title": "Recto Verso",
                "disc_number": 1,
                "track_number": 3,
                "title": "On ira",
                "release_date": 1304208000,
                "date_added": 1700000000
            },
            {
                "song_key": 5,
                "album_key": "FFFFFFFFFFFFFFFF",
                "date_added": 1700000001
            }
        ]
    }"#;

    #[test]
    fn test_parse_export() {
        let songs = parse_export(EXPORT).unwrap();
        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].external_song_key, 0xA1);
        assert_eq!(songs[0].external_album_key, 77);
        assert_eq!(songs[0].release_date, Some(Utc.with_ymd_and_hms(2011, 5, 1, 0, 0, 0).unwrap()));
        assert_eq!(songs[1].external_album_key, -1);
        assert_eq!(songs[1].album_artist, None);
        assert_eq!(songs[1].track_number, 0);
    }

    #[test]
    fn test_bad_hex_key_is_malformed() {
        let err = ExternalKey::Hex("xyz".to_string()).resolve().unwrap_err();
        assert!(matches!(err, CatalogError::Malformed(_)));
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let songs = parse_export(
            r#"{"songs":[
                {"song_key":"xyz","album_key":1,"date_added":0},
                {"song_key":2,"album_key":1,"date_added":9223372036854775807},
                {"song_key":3,"album_key":"0G","date_added":0},
                {"song_key":4,"album_key":1,"date_added":1700000000}
            ]}"#,
        )
        .unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].external_song_key, 4);
    }

    #[test]
    fn test_invalid_json_is_reported() {
        assert!(matches!(parse_export("{"), Err(CatalogError::Json(_))));
    }

    #[test]
    fn test_reads_export_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        std::fs::write(&path, EXPORT).unwrap();
        let reader = SystemLibraryReader::new(ExportSource::File(path));
        assert_eq!(reader.all_songs().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_helper_is_a_command_error() {
        let reader = SystemLibraryReader::new(ExportSource::Command {
            program: "songshelf-helper-that-does-not-exist".to_string(),
            args: Vec::new(),
        });
        assert!(matches!(reader.all_songs(), Err(CatalogError::Command(_))));
    }
}
