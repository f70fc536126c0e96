//! Consistency checks over a stored library, against the catalog it was
//! synced from. Used by `songshelf check` and throughout the tests.

use crate::models::{ExternalSongRecord, StoredLibrary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Child positions under `parent` are not exactly `0..n`.
    Positions { parent: String, positions: Vec<i64> },
    EmptyAlbum { album_id: i64 },
    EmptyFolder { folder_id: i64 },
    DanglingParent { child: String },
    DuplicateSong { external_song_key: i64 },
    /// A stored song whose key the catalog no longer reports.
    OrphanSong { external_song_key: i64 },
    /// A catalog song that has no stored counterpart.
    MissingSong { external_song_key: i64 },
    ReleaseEstimate {
        album_id: i64,
        stored: Option<DateTime<Utc>>,
        expected: Option<DateTime<Utc>>,
    },
    WrongAlbum { external_song_key: i64, album_id: i64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Positions { parent, positions } => {
                write!(f, "{} has non-contiguous child positions {:?}", parent, positions)
            }
            Violation::EmptyAlbum { album_id } => write!(f, "album {} has no songs", album_id),
            Violation::EmptyFolder { folder_id } => write!(f, "folder {} has no albums", folder_id),
            Violation::DanglingParent { child } => write!(f, "{} points at a missing parent", child),
            Violation::DuplicateSong { external_song_key } => {
                write!(f, "song key {} is stored more than once", external_song_key)
            }
            Violation::OrphanSong { external_song_key } => {
                write!(f, "song key {} is not in the catalog", external_song_key)
            }
            Violation::MissingSong { external_song_key } => {
                write!(f, "catalog song {} is not stored", external_song_key)
            }
            Violation::ReleaseEstimate {
                album_id,
                stored,
                expected,
            } => write!(
                f,
                "album {} release estimate is {:?}, expected {:?}",
                album_id, stored, expected
            ),
            Violation::WrongAlbum {
                external_song_key,
                album_id,
            } => write!(
                f,
                "song key {} sits in album {} but the catalog puts it elsewhere",
                external_song_key, album_id
            ),
        }
    }
}

fn check_positions(parent: String, mut positions: Vec<i64>, out: &mut Vec<Violation>) {
    positions.sort_unstable();
    if positions.iter().enumerate().any(|(i, p)| *p != i as i64) {
        out.push(Violation::Positions { parent, positions });
    }
}

/// Returns every violation found; an empty list means the library is
/// consistent with `catalog`. Duplicate catalog keys resolve to the later
/// record, as a sync pass does.
pub fn verify(library: &StoredLibrary, catalog: &[ExternalSongRecord]) -> Vec<Violation> {
    let mut out = Vec::new();
    let records: HashMap<i64, &ExternalSongRecord> = catalog
        .iter()
        .map(|r| (r.external_song_key, r))
        .collect();

    check_positions(
        "library root".to_string(),
        library.folders.iter().map(|f| f.position).collect(),
        &mut out,
    );

    let folder_ids: HashSet<i64> = library.folders.iter().map(|f| f.id).collect();
    let mut albums_per_folder: HashMap<i64, Vec<i64>> = HashMap::new();
    for album in &library.albums {
        if !folder_ids.contains(&album.folder_id) {
            out.push(Violation::DanglingParent {
                child: format!("album {}", album.id),
            });
        }
        albums_per_folder.entry(album.folder_id).or_default().push(album.position);
    }
    for folder in &library.folders {
        match albums_per_folder.remove(&folder.id) {
            Some(positions) => check_positions(format!("folder {}", folder.id), positions, &mut out),
            None => out.push(Violation::EmptyFolder { folder_id: folder.id }),
        }
    }

    let albums: HashMap<i64, i64> = library
        .albums
        .iter()
        .map(|a| (a.id, a.external_album_key))
        .collect();
    let mut songs_per_album: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut dates_per_album: HashMap<i64, Option<DateTime<Utc>>> = HashMap::new();
    let mut seen: HashSet<i64> = HashSet::new();
    for song in &library.songs {
        let key = song.external_song_key;
        if !seen.insert(key) {
            out.push(Violation::DuplicateSong { external_song_key: key });
        }
        songs_per_album.entry(song.album_id).or_default().push(song.position);
        let Some(&album_key) = albums.get(&song.album_id) else {
            out.push(Violation::DanglingParent {
                child: format!("song {}", song.id),
            });
            continue;
        };
        match records.get(&key) {
            Some(record) => {
                if record.external_album_key != album_key {
                    out.push(Violation::WrongAlbum {
                        external_song_key: key,
                        album_id: song.album_id,
                    });
                }
                let latest = dates_per_album.entry(song.album_id).or_default();
                *latest = (*latest).max(record.release_date);
            }
            None => out.push(Violation::OrphanSong { external_song_key: key }),
        }
    }
    for key in records.keys() {
        if !seen.contains(key) {
            out.push(Violation::MissingSong { external_song_key: *key });
        }
    }

    for album in &library.albums {
        match songs_per_album.remove(&album.id) {
            Some(positions) => check_positions(format!("album {}", album.id), positions, &mut out),
            None => out.push(Violation::EmptyAlbum { album_id: album.id }),
        }
        let expected = dates_per_album
            .get(&album.id)
            .copied()
            .flatten()
            .and_then(|d| DateTime::from_timestamp(d.timestamp(), 0));
        if album.release_date_estimate != expected {
            out.push(Violation::ReleaseEstimate {
                album_id: album.id,
                stored: album.release_date_estimate,
                expected,
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Album, Folder, Song};
    use chrono::TimeZone;

    fn record(song: i64, album: i64) -> ExternalSongRecord {
        ExternalSongRecord {
            external_song_key: song,
            external_album_key: album,
            album_artist: Some("A".to_string()),
            album_title: None,
            disc_number: 1,
            track_number: 1,
            title: None,
            release_date: Some(Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap()),
            date_added: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn library() -> StoredLibrary {
        StoredLibrary {
            folders: vec![Folder {
                id: 1,
                title: "A".to_string(),
                position: 0,
            }],
            albums: vec![Album {
                id: 10,
                folder_id: 1,
                external_album_key: 100,
                position: 0,
                release_date_estimate: Some(Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap()),
            }],
            songs: vec![
                Song {
                    id: 20,
                    album_id: 10,
                    external_song_key: 1,
                    position: 0,
                },
                Song {
                    id: 21,
                    album_id: 10,
                    external_song_key: 2,
                    position: 1,
                },
            ],
        }
    }

    #[test]
    fn consistent_library_passes() {
        assert!(verify(&library(), &[record(1, 100), record(2, 100)]).is_empty());
    }

    #[test]
    fn reports_each_kind_of_drift() {
        let mut lib = library();
        lib.songs[1].position = 4;
        lib.folders.push(Folder {
            id: 2,
            title: "Empty".to_string(),
            position: 1,
        });
        let violations = verify(&lib, &[record(1, 100), record(2, 101), record(3, 100)]);

        assert!(violations.contains(&Violation::Positions {
            parent: "album 10".to_string(),
            positions: vec![0, 4],
        }));
        assert!(violations.contains(&Violation::EmptyFolder { folder_id: 2 }));
        assert!(violations.contains(&Violation::WrongAlbum {
            external_song_key: 2,
            album_id: 10,
        }));
        assert!(violations.contains(&Violation::MissingSong { external_song_key: 3 }));
    }

    #[test]
    fn stale_release_estimate_is_flagged() {
        let mut lib = library();
        lib.albums[0].release_date_estimate = None;
        let violations = verify(&lib, &[record(1, 100), record(2, 100)]);
        assert_eq!(violations.len(), 1);
        assert!(matches!(violations[0], Violation::ReleaseEstimate { album_id: 10, .. }));
    }
}
