use crate::error::StoreError;
use crate::models::{Album, Folder, Song, StoredLibrary};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use tracing::debug;

const DB_SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS folders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL UNIQUE,
        position INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS albums (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder_id INTEGER NOT NULL,
        external_album_key INTEGER NOT NULL UNIQUE,
        position INTEGER NOT NULL,
        release_date_estimate INTEGER,
        FOREIGN KEY(folder_id) REFERENCES folders(id)
    );

    CREATE TABLE IF NOT EXISTS songs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        album_id INTEGER NOT NULL,
        external_song_key INTEGER NOT NULL UNIQUE,
        position INTEGER NOT NULL,
        FOREIGN KEY(album_id) REFERENCES albums(id)
    );

    CREATE INDEX IF NOT EXISTS idx_albums_folder ON albums(folder_id, position);
    CREATE INDEX IF NOT EXISTS idx_songs_album ON songs(album_id, position);
"#;

/// Points at a parent row that either already exists or is created earlier
/// in the same change set (index into the matching `created_*` list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRef {
    Stored(i64),
    Created(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFolder {
    pub title: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlbum {
    pub folder: RowRef,
    pub external_album_key: i64,
    pub position: i64,
    pub release_date_estimate: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSong {
    pub album: RowRef,
    pub external_song_key: i64,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderUpdate {
    pub id: i64,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumUpdate {
    pub id: i64,
    pub position: i64,
    pub release_date_estimate: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongUpdate {
    pub id: i64,
    pub album: RowRef,
    pub position: i64,
}

/// Every write a pass wants to make, applied atomically by [`LibraryStore::commit`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub created_folders: Vec<NewFolder>,
    pub created_albums: Vec<NewAlbum>,
    pub created_songs: Vec<NewSong>,
    pub updated_folders: Vec<FolderUpdate>,
    pub updated_albums: Vec<AlbumUpdate>,
    pub updated_songs: Vec<SongUpdate>,
    pub deleted_folders: Vec<i64>,
    pub deleted_albums: Vec<i64>,
    pub deleted_songs: Vec<i64>,
}

impl ChangeSet {
    /// Number of row writes this change set performs.
    pub fn len(&self) -> usize {
        self.created_folders.len()
            + self.created_albums.len()
            + self.created_songs.len()
            + self.updated_folders.len()
            + self.updated_albums.len()
            + self.updated_songs.len()
            + self.deleted_folders.len()
            + self.deleted_albums.len()
            + self.deleted_songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transactional object store holding the Folder → Album → Song hierarchy.
#[cfg_attr(test, mockall::automock)]
pub trait LibraryStore {
    /// Fetches every folder, album and song.
    fn load(&self) -> Result<StoredLibrary, StoreError>;

    /// Applies all of `changes` in one transaction, or none of them.
    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StoreError>;
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(DB_SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn get_folders(&self) -> Result<Vec<Folder>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, position FROM folders ORDER BY position ASC, id ASC")?;
        let folders = stmt
            .query_map([], |row| {
                Ok(Folder {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    position: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
        Ok(folders)
    }

    pub fn get_albums(&self) -> Result<Vec<Album>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, folder_id, external_album_key, position, release_date_estimate
             FROM albums ORDER BY folder_id ASC, position ASC, id ASC",
        )?;
        let albums = stmt
            .query_map([], |row| {
                let release: Option<i64> = row.get(4)?;
                Ok(Album {
                    id: row.get(0)?,
                    folder_id: row.get(1)?,
                    external_album_key: row.get(2)?,
                    position: row.get(3)?,
                    release_date_estimate: release.and_then(|secs| DateTime::from_timestamp(secs, 0)),
                })
            })?
            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
        Ok(albums)
    }

    pub fn get_songs(&self) -> Result<Vec<Song>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, album_id, external_song_key, position
             FROM songs ORDER BY album_id ASC, position ASC, id ASC",
        )?;
        let songs = stmt
            .query_map([], |row| {
                Ok(Song {
                    id: row.get(0)?,
                    album_id: row.get(1)?,
                    external_song_key: row.get(2)?,
                    position: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
        Ok(songs)
    }

    pub fn song_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?)
    }
}

impl LibraryStore for Database {
    fn load(&self) -> Result<StoredLibrary, StoreError> {
        Ok(StoredLibrary {
            folders: self.get_folders()?,
            albums: self.get_albums()?,
            songs: self.get_songs()?,
        })
    }

    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        // Dropping the transaction on any early return rolls everything back.
        let tx = self.conn.transaction()?;
        apply_changes(&tx, changes)?;
        tx.commit()?;
        debug!(writes = changes.len(), "Committed library change set");
        Ok(())
    }
}

fn apply_changes(tx: &Transaction<'_>, changes: &ChangeSet) -> Result<(), StoreError> {
    for id in &changes.deleted_songs {
        tx.execute("DELETE FROM songs WHERE id = ?1", params![id])?;
    }
    // Containers that are already empty go before any insert can reuse their
    // unique key or title.
    for id in &changes.deleted_albums {
        tx.execute(
            "DELETE FROM albums WHERE id = ?1 AND NOT EXISTS (SELECT 1 FROM songs WHERE album_id = ?1)",
            params![id],
        )?;
    }
    for id in &changes.deleted_folders {
        tx.execute(
            "DELETE FROM folders WHERE id = ?1 AND NOT EXISTS (SELECT 1 FROM albums WHERE folder_id = ?1)",
            params![id],
        )?;
    }

    let mut folder_ids = Vec::with_capacity(changes.created_folders.len());
    {
        let mut stmt = tx.prepare("INSERT INTO folders (title, position) VALUES (?1, ?2)")?;
        for folder in &changes.created_folders {
            stmt.execute(params![folder.title, folder.position])?;
            folder_ids.push(tx.last_insert_rowid());
        }
    }

    let mut album_ids = Vec::with_capacity(changes.created_albums.len());
    {
        let mut stmt = tx.prepare(
            "INSERT INTO albums (folder_id, external_album_key, position, release_date_estimate)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for album in &changes.created_albums {
            let folder_id = resolve(album.folder, &folder_ids, "folder")?;
            stmt.execute(params![
                folder_id,
                album.external_album_key,
                album.position,
                album.release_date_estimate.map(|d| d.timestamp())
            ])?;
            album_ids.push(tx.last_insert_rowid());
        }
    }

    for update in &changes.updated_folders {
        tx.execute(
            "UPDATE folders SET position = ?1 WHERE id = ?2",
            params![update.position, update.id],
        )?;
    }

    for update in &changes.updated_albums {
        tx.execute(
            "UPDATE albums SET position = ?1, release_date_estimate = ?2 WHERE id = ?3",
            params![
                update.position,
                update.release_date_estimate.map(|d| d.timestamp()),
                update.id
            ],
        )?;
    }

    for update in &changes.updated_songs {
        let album_id = resolve(update.album, &album_ids, "album")?;
        tx.execute(
            "UPDATE songs SET album_id = ?1, position = ?2 WHERE id = ?3",
            params![album_id, update.position, update.id],
        )?;
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO songs (album_id, external_song_key, position) VALUES (?1, ?2, ?3)",
        )?;
        for song in &changes.created_songs {
            let album_id = resolve(song.album, &album_ids, "album")?;
            stmt.execute(params![album_id, song.external_song_key, song.position])?;
        }
    }

    // The rest go last, once relinked songs have left them.
    for id in &changes.deleted_albums {
        tx.execute("DELETE FROM albums WHERE id = ?1", params![id])?;
    }
    for id in &changes.deleted_folders {
        tx.execute("DELETE FROM folders WHERE id = ?1", params![id])?;
    }

    Ok(())
}

fn resolve(row: RowRef, created: &[i64], kind: &str) -> Result<i64, StoreError> {
    match row {
        RowRef::Stored(id) => Ok(id),
        RowRef::Created(index) => created.get(index).copied().ok_or_else(|| {
            StoreError::Corrupt(format!("change set references unknown new {} #{}", kind, index))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seed_changes() -> ChangeSet {
        ChangeSet {
            created_folders: vec![NewFolder {
                title: "Zaz".to_string(),
                position: 0,
            }],
            created_albums: vec![NewAlbum {
                folder: RowRef::Created(0),
                external_album_key: 500,
                position: 0,
                release_date_estimate: Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()),
            }],
            created_songs: vec![
                NewSong {
                    album: RowRef::Created(0),
                    external_song_key: 1,
                    position: 0,
                },
                NewSong {
                    album: RowRef::Created(0),
                    external_song_key: 2,
                    position: 1,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_commit_resolves_new_parents() {
        let mut db = Database::open_in_memory().unwrap();
        db.commit(&seed_changes()).unwrap();

        let library = db.load().unwrap();
        assert_eq!(library.folders.len(), 1);
        assert_eq!(library.albums.len(), 1);
        assert_eq!(library.albums[0].folder_id, library.folders[0].id);
        assert_eq!(
            library.albums[0].release_date_estimate,
            Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
        );
        let keys: Vec<i64> = library.songs.iter().map(|s| s.external_song_key).collect();
        assert_eq!(keys, vec![1, 2]);
        assert!(library.songs.iter().all(|s| s.album_id == library.albums[0].id));
    }

    #[test]
    fn test_failed_commit_leaves_store_untouched() {
        let mut db = Database::open_in_memory().unwrap();
        db.commit(&seed_changes()).unwrap();
        let before = db.load().unwrap();

        // Second insert of song key 1 violates the unique index halfway through.
        let clashing = ChangeSet {
            updated_folders: vec![FolderUpdate {
                id: before.folders[0].id,
                position: 7,
            }],
            created_songs: vec![NewSong {
                album: RowRef::Stored(before.albums[0].id),
                external_song_key: 1,
                position: 2,
            }],
            ..Default::default()
        };
        assert!(db.commit(&clashing).is_err());
        assert_eq!(db.load().unwrap(), before);
    }

    #[test]
    fn test_relink_then_delete_old_album_in_one_commit() {
        let mut db = Database::open_in_memory().unwrap();
        db.commit(&seed_changes()).unwrap();
        let before = db.load().unwrap();
        let old_album = before.albums[0].id;

        let changes = ChangeSet {
            created_albums: vec![NewAlbum {
                folder: RowRef::Stored(before.folders[0].id),
                external_album_key: 501,
                position: 0,
                release_date_estimate: None,
            }],
            updated_songs: before
                .songs
                .iter()
                .enumerate()
                .map(|(i, s)| SongUpdate {
                    id: s.id,
                    album: RowRef::Created(0),
                    position: i as i64,
                })
                .collect(),
            deleted_albums: vec![old_album],
            ..Default::default()
        };
        db.commit(&changes).unwrap();

        let after = db.load().unwrap();
        assert_eq!(after.albums.len(), 1);
        assert_eq!(after.albums[0].external_album_key, 501);
        assert!(after.songs.iter().all(|s| s.album_id == after.albums[0].id));
    }

    #[test]
    fn test_empty_album_can_be_replaced_in_one_commit() {
        let mut db = Database::open_in_memory().unwrap();
        db.commit(&seed_changes()).unwrap();
        let before = db.load().unwrap();

        let changes = ChangeSet {
            created_albums: vec![NewAlbum {
                folder: RowRef::Stored(before.folders[0].id),
                external_album_key: 500,
                position: 0,
                release_date_estimate: None,
            }],
            created_songs: vec![NewSong {
                album: RowRef::Created(0),
                external_song_key: 3,
                position: 0,
            }],
            deleted_songs: before.songs.iter().map(|s| s.id).collect(),
            deleted_albums: vec![before.albums[0].id],
            ..Default::default()
        };
        db.commit(&changes).unwrap();

        let after = db.load().unwrap();
        assert_eq!(after.albums.len(), 1);
        assert_ne!(after.albums[0].id, before.albums[0].id);
        assert_eq!(after.songs.len(), 1);
        assert_eq!(after.songs[0].album_id, after.albums[0].id);
    }

    #[test]
    fn test_on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("library.db");
        {
            let mut db = Database::new(&path).unwrap();
            db.commit(&seed_changes()).unwrap();
        }
        let reopened = Database::new(&path).unwrap();
        assert_eq!(reopened.song_count().unwrap(), 2);
    }
}
