use crate::catalog::CatalogReader;
use crate::config::Config;
use crate::db::{Database, LibraryStore};
use crate::library_watcher::start_library_watcher;
use crate::models::{ExternalSongRecord, StoredLibrary};
use crate::sync::invariants::{verify, Violation};
use crate::sync::{LibraryEvent, LibrarySync, PassReport, ReconcileOptions, Reconciler};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::mpsc::channel;
use std::sync::Arc;
use tracing::{debug, error, info};

pub fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path)
        .with_context(|| format!("Failed to open library database {:?}", config.database_path))
}

fn reconciler(config: &Config) -> Reconciler {
    Reconciler::new(ReconcileOptions {
        unknown_artist_title: config.unknown_artist_title.clone(),
    })
}

/// One pass, on this thread.
pub fn sync_once(config: &Config) -> Result<PassReport> {
    let mut db = open_database(config)?;
    let catalog = config.open_catalog();
    let report = reconciler(config).run_pass(&catalog, &mut db, |state| debug!(%state, "Sync stage"))?;
    Ok(report)
}

/// Syncs once, then again after every burst of catalog changes. Only returns
/// if the watcher or the worker goes away.
pub fn watch(config: &Config) -> Result<()> {
    let sync = Arc::new(LibrarySync::new(
        reconciler(config),
        config.open_catalog(),
        open_database(config)?,
    ));
    let events = sync.subscribe();

    let (triggers_tx, triggers_rx) = channel();
    let watcher = start_library_watcher(&config.watch_paths, config.debounce, triggers_tx.clone())
        .context("Failed to start library watcher")?;
    let worker = Arc::clone(&sync).spawn_worker(triggers_rx);

    // Catch up with anything that changed while we were not running.
    triggers_tx.send(()).context("Sync worker is not running")?;
    drop(triggers_tx);
    info!(paths = ?watcher.watching(), "Watching for catalog changes");

    for event in events {
        match event {
            LibraryEvent::Reconciled(report) if report.is_noop() => {
                debug!("Library already up to date")
            }
            LibraryEvent::Reconciled(report) => println!("{}", report),
            LibraryEvent::NotUpToDate { reason } => {
                error!(%reason, "Library not yet up to date");
                eprintln!("Library not yet up to date: {}", reason);
            }
        }
    }

    drop(watcher);
    let _ = worker.join();
    Ok(())
}

/// Catalog snapshot for display and checking; titles are optional in `tree`.
fn read_catalog(config: &Config) -> Result<Vec<ExternalSongRecord>> {
    config
        .open_catalog()
        .all_songs()
        .context("Failed to read the music catalog")
}

pub fn tree(config: &Config) -> Result<String> {
    let db = open_database(config)?;
    let library = db.load()?;
    let catalog = match read_catalog(config) {
        Ok(catalog) => catalog,
        Err(e) => {
            debug!(error = ?e, "Catalog unavailable; showing keys only");
            Vec::new()
        }
    };
    Ok(render_tree(&library, &catalog))
}

/// Renders the hierarchy in position order, with catalog titles where known.
pub fn render_tree(library: &StoredLibrary, catalog: &[ExternalSongRecord]) -> String {
    let records: HashMap<i64, &ExternalSongRecord> = catalog
        .iter()
        .map(|r| (r.external_song_key, r))
        .collect();

    let mut folders: Vec<_> = library.folders.iter().collect();
    folders.sort_by_key(|f| (f.position, f.id));
    let mut albums: Vec<_> = library.albums.iter().collect();
    albums.sort_by_key(|a| (a.position, a.id));
    let mut songs: Vec<_> = library.songs.iter().collect();
    songs.sort_by_key(|s| (s.position, s.id));

    let mut out = String::new();
    for folder in folders {
        let _ = writeln!(out, "{}", folder.title);
        for album in albums.iter().filter(|a| a.folder_id == folder.id) {
            let children: Vec<_> = songs.iter().filter(|s| s.album_id == album.id).collect();
            let title = children
                .iter()
                .find_map(|s| records.get(&s.external_song_key))
                .and_then(|r| r.album_title.clone())
                .unwrap_or_else(|| format!("album {:016X}", album.external_album_key));
            let year = album
                .release_date_estimate
                .map(|d| format!(" ({})", d.format("%Y")))
                .unwrap_or_default();
            let _ = writeln!(out, "  {}{}", title, year);
            for song in children {
                let title = records
                    .get(&song.external_song_key)
                    .and_then(|r| r.title.clone())
                    .unwrap_or_else(|| format!("song {:016X}", song.external_song_key));
                let _ = writeln!(out, "    {}. {}", song.position + 1, title);
            }
        }
    }
    out
}

pub fn check(config: &Config) -> Result<Vec<Violation>> {
    let catalog = read_catalog(config)?;
    let db = open_database(config)?;
    let library = db.load()?;
    let violations = verify(&library, &catalog);
    info!(
        folders = library.folders.len(),
        albums = library.albums.len(),
        songs = library.songs.len(),
        violations = violations.len(),
        "Checked library"
    );
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CatalogSource, FileConfig};
    use crate::system_library::ExportSource;
    use chrono::{TimeZone, Utc};

    fn record(key: i64, album: i64, artist: &str, title: &str) -> ExternalSongRecord {
        ExternalSongRecord {
            external_song_key: key,
            external_album_key: album,
            album_artist: Some(artist.to_string()),
            album_title: Some(format!("Album {}", album)),
            disc_number: 1,
            track_number: key as u32,
            title: Some(title.to_string()),
            release_date: Some(Utc.with_ymd_and_hms(1999, 6, 1, 0, 0, 0).unwrap()),
            date_added: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::resolve(FileConfig::default()).unwrap();
        config.database_path = dir.join("library.db");
        let export = dir.join("export.json");
        std::fs::write(
            &export,
            r#"{"songs":[
                {"song_key":1,"album_key":7,"album_artist":"Zaz","album_title":"Zaz","track_number":1,"title":"Les passants","release_date":1273449600,"date_added":1700000000},
                {"song_key":2,"album_key":7,"album_artist":"Zaz","album_title":"Zaz","track_number":2,"title":"Je veux","date_added":1700000000}
            ]}"#,
        )
        .unwrap();
        config.catalog = CatalogSource::Export(ExportSource::File(export));
        config
    }

    #[test]
    fn test_render_tree_uses_catalog_titles() {
        let mut db = Database::open_in_memory().unwrap();
        let catalog = vec![record(2, 5, "Air", "Sexy Boy"), record(1, 5, "Air", "La femme d'argent")];
        Reconciler::default().run_pass(&catalog, &mut db, |_| {}).unwrap();

        let rendered = render_tree(&db.load().unwrap(), &catalog);
        assert_eq!(
            rendered,
            "Air\n  Album 5 (1999)\n    1. La femme d'argent\n    2. Sexy Boy\n"
        );
    }

    #[test]
    fn test_render_tree_without_catalog_shows_keys() {
        let mut db = Database::open_in_memory().unwrap();
        let catalog = vec![record(1, 5, "Air", "x")];
        Reconciler::default().run_pass(&catalog, &mut db, |_| {}).unwrap();

        let rendered = render_tree(&db.load().unwrap(), &[]);
        assert!(rendered.contains("album 0000000000000005"));
        assert!(rendered.contains("1. song 0000000000000001"));
    }

    #[test]
    fn test_sync_then_check_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let report = sync_once(&config).unwrap();
        assert_eq!(report.songs_created, 2);
        assert!(check(&config).unwrap().is_empty());
        assert!(tree(&config).unwrap().contains("2. Je veux"));
    }
}
