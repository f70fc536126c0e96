//! The working copy of the library for one pass.
//!
//! Everything a pass reads or writes goes through [`PassContext`]: the stored
//! rows are loaded once into arenas, parents keep their children as ordered
//! index lists, and lookups by album key and folder title are maintained as
//! containers come and go. Creating a folder for one record therefore makes it
//! visible to the next record without touching the store, and nothing leaves
//! the context until [`PassContext::change_set`] hands the diff to the store.

use super::report::{OrderingMode, PassReport};
use crate::db::{AlbumUpdate, ChangeSet, FolderUpdate, NewAlbum, NewFolder, NewSong, RowRef, SongUpdate};
use crate::models::{Album, ExternalSongRecord, Folder, Song, StoredLibrary};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FolderIdx(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AlbumIdx(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SongIdx(pub(crate) usize);

#[derive(Debug)]
pub(crate) struct FolderNode {
    pub stored: Option<Folder>,
    pub title: String,
    pub position: i64,
    pub albums: Vec<AlbumIdx>,
    pub deleted: bool,
}

#[derive(Debug)]
pub(crate) struct AlbumNode {
    pub stored: Option<Album>,
    pub folder: FolderIdx,
    pub external_album_key: i64,
    pub position: i64,
    pub release_date_estimate: Option<DateTime<Utc>>,
    pub songs: Vec<SongIdx>,
    pub deleted: bool,
}

#[derive(Debug)]
pub(crate) struct SongNode {
    pub stored: Option<Song>,
    pub album: AlbumIdx,
    pub external_song_key: i64,
    pub position: i64,
    pub deleted: bool,
}

/// A song waiting for the creator: either a brand new catalog record or an
/// existing song the relinker detached from its old album.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub record: usize,
    pub song: Option<SongIdx>,
}

pub(crate) struct PassContext {
    pub folders: Vec<FolderNode>,
    pub albums: Vec<AlbumNode>,
    pub songs: Vec<SongNode>,
    /// Folder order at the top of the hierarchy.
    pub root: Vec<FolderIdx>,
    pub folders_by_title: HashMap<String, FolderIdx>,
    pub albums_by_key: HashMap<i64, AlbumIdx>,
    /// Deduplicated catalog snapshot, in catalog order.
    pub records: Vec<ExternalSongRecord>,
    pub record_index: HashMap<i64, usize>,
    pub mode: OrderingMode,
    pub placeholder: String,
    pub report: PassReport,
    staged: Staged,
}

/// Children created during the current stage, per parent, in creation order.
/// They are spliced in front of the existing children by
/// [`PassContext::merge_staged`].
#[derive(Debug, Default)]
struct Staged {
    root: Vec<FolderIdx>,
    albums: HashMap<FolderIdx, Vec<AlbumIdx>>,
    songs: HashMap<AlbumIdx, Vec<SongIdx>>,
}

impl PassContext {
    /// Builds the working copy from the stored rows. Children are ordered by
    /// stored position (then id); anything inconsistent is repaired here and
    /// logged, and the repair is written back by the pass.
    pub fn load(stored: StoredLibrary, placeholder: &str) -> Self {
        let mode = if stored.songs.is_empty() {
            OrderingMode::Bootstrap
        } else {
            OrderingMode::Incremental
        };
        let mut ctx = Self {
            folders: Vec::with_capacity(stored.folders.len()),
            albums: Vec::with_capacity(stored.albums.len()),
            songs: Vec::with_capacity(stored.songs.len()),
            root: Vec::new(),
            folders_by_title: HashMap::new(),
            albums_by_key: HashMap::new(),
            records: Vec::new(),
            record_index: HashMap::new(),
            mode,
            placeholder: placeholder.to_string(),
            report: PassReport::new(mode),
            staged: Staged::default(),
        };

        let mut folder_ids: HashMap<i64, FolderIdx> = HashMap::new();
        let mut folders = stored.folders;
        folders.sort_by_key(|f| (f.position, f.id));
        for folder in folders {
            let idx = FolderIdx(ctx.folders.len());
            folder_ids.insert(folder.id, idx);
            ctx.folders_by_title.entry(folder.title.clone()).or_insert(idx);
            ctx.root.push(idx);
            ctx.folders.push(FolderNode {
                title: folder.title.clone(),
                position: folder.position,
                stored: Some(folder),
                albums: Vec::new(),
                deleted: false,
            });
        }

        let mut album_ids: HashMap<i64, AlbumIdx> = HashMap::new();
        let mut albums = stored.albums;
        albums.sort_by_key(|a| (a.position, a.id));
        for album in albums {
            let idx = AlbumIdx(ctx.albums.len());
            let Some(&folder) = folder_ids.get(&album.folder_id) else {
                warn!(album_id = album.id, folder_id = album.folder_id, "Album points at a missing folder; dropping it");
                ctx.report.repairs += 1;
                ctx.albums.push(AlbumNode {
                    folder: FolderIdx(usize::MAX),
                    external_album_key: album.external_album_key,
                    position: album.position,
                    release_date_estimate: album.release_date_estimate,
                    stored: Some(album),
                    songs: Vec::new(),
                    deleted: true,
                });
                continue;
            };
            album_ids.insert(album.id, idx);
            ctx.albums_by_key.entry(album.external_album_key).or_insert(idx);
            ctx.folders[folder.0].albums.push(idx);
            ctx.albums.push(AlbumNode {
                folder,
                external_album_key: album.external_album_key,
                position: album.position,
                release_date_estimate: album.release_date_estimate,
                stored: Some(album),
                songs: Vec::new(),
                deleted: false,
            });
        }

        let mut songs = stored.songs;
        songs.sort_by_key(|s| (s.position, s.id));
        for song in songs {
            let idx = SongIdx(ctx.songs.len());
            let album = album_ids.get(&song.album_id).copied();
            if album.is_none() {
                warn!(song_id = song.id, album_id = song.album_id, "Song points at a missing album; dropping it");
                ctx.report.repairs += 1;
            }
            if let Some(album) = album {
                ctx.albums[album.0].songs.push(idx);
            }
            ctx.songs.push(SongNode {
                album: album.unwrap_or(AlbumIdx(usize::MAX)),
                external_song_key: song.external_song_key,
                position: song.position,
                stored: Some(song),
                deleted: album.is_none(),
            });
        }

        ctx.check_positions();
        ctx
    }

    /// Logs every parent whose stored positions are not exactly `0..n`.
    /// Reindexing rewrites them.
    fn check_positions(&mut self) {
        let mut damaged = 0;
        if !is_dense(self.root.iter().map(|f| self.folders[f.0].position)) {
            warn!("Folder positions are not contiguous; repairing");
            damaged += 1;
        }
        for folder in self.live_folders() {
            let node = &self.folders[folder.0];
            if !is_dense(node.albums.iter().map(|a| self.albums[a.0].position)) {
                warn!(folder = %node.title, "Album positions are not contiguous; repairing");
                damaged += 1;
            }
        }
        for album in self.live_albums() {
            let node = &self.albums[album.0];
            if !is_dense(node.songs.iter().map(|s| self.songs[s.0].position)) {
                warn!(album_key = node.external_album_key, "Song positions are not contiguous; repairing");
                damaged += 1;
            }
        }
        self.report.repairs += damaged;
    }

    pub fn record(&self, index: usize) -> &ExternalSongRecord {
        &self.records[index]
    }

    /// Catalog record for a live song, if the catalog still has it.
    pub fn record_for_song(&self, song: SongIdx) -> Option<&ExternalSongRecord> {
        let key = self.songs[song.0].external_song_key;
        self.record_index.get(&key).map(|&i| &self.records[i])
    }

    /// Title of the folder a record ends up in: the folder of its album when
    /// that album already exists, otherwise its album artist.
    pub fn target_folder_title(&self, record: usize) -> String {
        let record = &self.records[record];
        match self.albums_by_key.get(&record.external_album_key) {
            Some(album) => self.folders[self.albums[album.0].folder.0].title.clone(),
            None => record.folder_title(&self.placeholder).to_string(),
        }
    }

    pub fn live_folders(&self) -> Vec<FolderIdx> {
        (0..self.folders.len())
            .filter(|&i| !self.folders[i].deleted)
            .map(FolderIdx)
            .collect()
    }

    pub fn live_albums(&self) -> Vec<AlbumIdx> {
        (0..self.albums.len())
            .filter(|&i| !self.albums[i].deleted)
            .map(AlbumIdx)
            .collect()
    }

    pub fn live_songs(&self) -> Vec<SongIdx> {
        (0..self.songs.len())
            .filter(|&i| !self.songs[i].deleted)
            .map(SongIdx)
            .collect()
    }

    /// New children are staged, not inserted: after [`Self::merge_staged`]
    /// they sit above the parent's existing children, in creation order.
    pub fn create_folder(&mut self, title: String) -> FolderIdx {
        let idx = FolderIdx(self.folders.len());
        self.folders.push(FolderNode {
            stored: None,
            title: title.clone(),
            position: self.staged.root.len() as i64,
            albums: Vec::new(),
            deleted: false,
        });
        self.folders_by_title.insert(title, idx);
        self.staged.root.push(idx);
        self.report.folders_created += 1;
        idx
    }

    pub fn create_album(&mut self, folder: FolderIdx, external_album_key: i64) -> AlbumIdx {
        let idx = AlbumIdx(self.albums.len());
        let staged = self.staged.albums.entry(folder).or_default();
        self.albums.push(AlbumNode {
            stored: None,
            folder,
            external_album_key,
            position: staged.len() as i64,
            release_date_estimate: None,
            songs: Vec::new(),
            deleted: false,
        });
        staged.push(idx);
        self.albums_by_key.insert(external_album_key, idx);
        self.report.albums_created += 1;
        idx
    }

    pub fn create_song(&mut self, album: AlbumIdx, external_song_key: i64) -> SongIdx {
        let idx = SongIdx(self.songs.len());
        self.songs.push(SongNode {
            stored: None,
            album,
            external_song_key,
            position: 0,
            deleted: false,
        });
        self.attach_song(idx, album);
        self.report.songs_created += 1;
        idx
    }

    pub fn attach_song(&mut self, song: SongIdx, album: AlbumIdx) {
        let staged = self.staged.songs.entry(album).or_default();
        let node = &mut self.songs[song.0];
        node.album = album;
        node.position = staged.len() as i64;
        staged.push(song);
    }

    /// Splices every staged child in front of its parent's existing children.
    /// Each touched parent list is rebuilt once.
    pub fn merge_staged(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        if !staged.root.is_empty() {
            self.root = prepend(staged.root, std::mem::take(&mut self.root));
        }
        for (folder, albums) in staged.albums {
            let node = &mut self.folders[folder.0];
            node.albums = prepend(albums, std::mem::take(&mut node.albums));
        }
        for (album, songs) in staged.songs {
            let node = &mut self.albums[album.0];
            node.songs = prepend(songs, std::mem::take(&mut node.songs));
        }
    }

    /// Removes songs from their albums' children. The albums may become
    /// empty; the pruner deals with that.
    pub fn detach_songs(&mut self, songs: &[SongIdx]) {
        let leaving: HashSet<SongIdx> = songs.iter().copied().collect();
        let albums: HashSet<AlbumIdx> = songs.iter().map(|s| self.songs[s.0].album).collect();
        for album in albums {
            if let Some(node) = self.albums.get_mut(album.0) {
                node.songs.retain(|s| !leaving.contains(s));
            }
        }
    }

    /// Marks a song deleted. Its parent list keeps the entry until
    /// [`Self::compact`].
    pub fn delete_song(&mut self, song: SongIdx) {
        self.songs[song.0].deleted = true;
        self.report.songs_deleted += 1;
    }

    pub fn delete_album(&mut self, album: AlbumIdx) {
        let node = &mut self.albums[album.0];
        node.deleted = true;
        let key = node.external_album_key;
        if self.albums_by_key.get(&key) == Some(&album) {
            self.albums_by_key.remove(&key);
        }
        self.report.albums_deleted += 1;
    }

    pub fn delete_folder(&mut self, folder: FolderIdx) {
        let node = &mut self.folders[folder.0];
        node.deleted = true;
        if self.folders_by_title.get(&node.title) == Some(&folder) {
            self.folders_by_title.remove(&node.title);
        }
        self.report.folders_deleted += 1;
    }

    /// Drops deleted children from every parent list in one sweep.
    pub fn compact(&mut self) {
        let songs = &self.songs;
        for album in self.albums.iter_mut().filter(|a| !a.deleted) {
            album.songs.retain(|s| !songs[s.0].deleted);
        }
        let albums = &self.albums;
        for folder in self.folders.iter_mut().filter(|f| !f.deleted) {
            folder.albums.retain(|a| !albums[a.0].deleted);
        }
        let folders = &self.folders;
        self.root.retain(|f| !folders[f.0].deleted);
    }

    /// Diffs the working copy against what was loaded. Only rows whose
    /// persisted fields actually changed are written.
    pub fn change_set(&mut self) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let mut new_folders: HashMap<usize, usize> = HashMap::new();
        let mut new_albums: HashMap<usize, usize> = HashMap::new();
        let mut positions_updated = 0;
        let mut release_dates_updated = 0;

        for (i, folder) in self.folders.iter().enumerate() {
            match (&folder.stored, folder.deleted) {
                (Some(stored), true) => changes.deleted_folders.push(stored.id),
                (Some(stored), false) => {
                    if stored.position != folder.position {
                        positions_updated += 1;
                        changes.updated_folders.push(FolderUpdate {
                            id: stored.id,
                            position: folder.position,
                        });
                    }
                }
                (None, false) => {
                    new_folders.insert(i, changes.created_folders.len());
                    changes.created_folders.push(NewFolder {
                        title: folder.title.clone(),
                        position: folder.position,
                    });
                }
                (None, true) => {}
            }
        }

        for (i, album) in self.albums.iter().enumerate() {
            match (&album.stored, album.deleted) {
                (Some(stored), true) => changes.deleted_albums.push(stored.id),
                (Some(stored), false) => {
                    let moved = stored.position != album.position;
                    let redated = stored.release_date_estimate != album.release_date_estimate;
                    if moved || redated {
                        positions_updated += usize::from(moved);
                        release_dates_updated += usize::from(redated);
                        changes.updated_albums.push(AlbumUpdate {
                            id: stored.id,
                            position: album.position,
                            release_date_estimate: album.release_date_estimate,
                        });
                    }
                }
                (None, false) => {
                    let folder = self.folder_ref(album.folder, &new_folders);
                    new_albums.insert(i, changes.created_albums.len());
                    changes.created_albums.push(NewAlbum {
                        folder,
                        external_album_key: album.external_album_key,
                        position: album.position,
                        release_date_estimate: album.release_date_estimate,
                    });
                }
                (None, true) => {}
            }
        }

        for song in &self.songs {
            match (&song.stored, song.deleted) {
                (Some(stored), true) => changes.deleted_songs.push(stored.id),
                (Some(stored), false) => {
                    let album = self.album_ref(song.album, &new_albums);
                    let moved = stored.position != song.position;
                    if moved || album != RowRef::Stored(stored.album_id) {
                        positions_updated += usize::from(moved);
                        changes.updated_songs.push(SongUpdate {
                            id: stored.id,
                            album,
                            position: song.position,
                        });
                    }
                }
                (None, false) => changes.created_songs.push(NewSong {
                    album: self.album_ref(song.album, &new_albums),
                    external_song_key: song.external_song_key,
                    position: song.position,
                }),
                (None, true) => {}
            }
        }

        self.report.positions_updated = positions_updated;
        self.report.release_dates_updated = release_dates_updated;
        self.report.rows_written = changes.len();
        changes
    }

    // A parent missing from `created` turns into a reference the store
    // rejects at commit time.
    fn folder_ref(&self, folder: FolderIdx, created: &HashMap<usize, usize>) -> RowRef {
        match &self.folders[folder.0].stored {
            Some(stored) => RowRef::Stored(stored.id),
            None => RowRef::Created(created.get(&folder.0).copied().unwrap_or(usize::MAX)),
        }
    }

    fn album_ref(&self, album: AlbumIdx, created: &HashMap<usize, usize>) -> RowRef {
        match &self.albums[album.0].stored {
            Some(stored) => RowRef::Stored(stored.id),
            None => RowRef::Created(created.get(&album.0).copied().unwrap_or(usize::MAX)),
        }
    }
}

fn prepend<T>(mut front: Vec<T>, back: Vec<T>) -> Vec<T> {
    front.extend(back);
    front
}

fn is_dense(positions: impl Iterator<Item = i64>) -> bool {
    positions.enumerate().all(|(i, p)| p == i as i64)
}
