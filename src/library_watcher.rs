use notify::event::{AccessKind, AccessMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Keeps the file system watch alive. Dropping it stops the watch, which in
/// turn ends the forwarding thread.
pub struct LibraryWatcher {
    _watcher: RecommendedWatcher,
    watching: Vec<PathBuf>,
}

impl LibraryWatcher {
    pub fn watching(&self) -> &[PathBuf] {
        &self.watching
    }
}

/// Watches the catalog files and sends one `()` on `triggers` per burst of
/// changes, once `debounce` has passed without further relevant events.
pub fn start_library_watcher(
    paths: &[PathBuf],
    debounce: Duration,
    triggers: Sender<()>,
) -> notify::Result<LibraryWatcher> {
    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(tx, Config::default())?;

    let mut watching = Vec::new();
    for path in paths {
        if path.exists() {
            // Recursive to catch changes inside .musiclibrary packages
            match watcher.watch(path, RecursiveMode::Recursive) {
                Ok(()) => {
                    info!(path = ?path, "Started watching");
                    watching.push(path.clone());
                }
                Err(e) => warn!(path = ?path, error = %e, "Failed to watch path"),
            }
        } else if let Some(parent) = path.parent().filter(|p| p.exists()) {
            // The file may not exist yet; its directory sees it appear.
            match watcher.watch(parent, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    info!(path = ?parent, missing = ?path, "Watching parent of missing path");
                    watching.push(parent.to_path_buf());
                }
                Err(e) => warn!(path = ?parent, error = %e, "Failed to watch path"),
            }
        } else {
            debug!(path = ?path, "Path not found; skipping");
        }
    }
    if watching.is_empty() {
        warn!("No catalog files found to watch; changes will not trigger a sync");
    }

    thread::spawn(move || forward_changes(rx, debounce, triggers));
    Ok(LibraryWatcher {
        _watcher: watcher,
        watching,
    })
}

/// Filters out noise: temp files, lock files and plain reads.
pub fn is_relevant(event: &Event) -> bool {
    if let EventKind::Access(kind) = &event.kind {
        if *kind != AccessKind::Close(AccessMode::Write) {
            return false;
        }
    }
    event.paths.iter().any(|p| !is_noise(p))
}

/// Only the file name counts; a catalog under a `.tmp` directory is not noise.
fn is_noise(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy();
    name.ends_with(".lock") || name.contains(".tmp")
}

fn forward_changes(events: Receiver<notify::Result<Event>>, debounce: Duration, triggers: Sender<()>) {
    loop {
        match events.recv() {
            Ok(Ok(event)) if is_relevant(&event) => {
                debug!(kind = ?event.kind, paths = ?event.paths, "Catalog changed");
            }
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => {
                warn!(error = %e, "Watch error");
                continue;
            }
            Err(_) => break,
        }

        let mut deadline = Instant::now() + debounce;
        let mut disconnected = false;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(wait) {
                Ok(Ok(event)) if is_relevant(&event) => deadline = Instant::now() + debounce,
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        info!("Detected changes in the music catalog");
        if triggers.send(()).is_err() || disconnected {
            break;
        }
    }
    debug!("Library watcher stopped");
}
