use crate::catalog::CatalogReader;
use crate::library_parser::LibraryXmlReader;
use crate::models::UNKNOWN_ARTIST;
use crate::system_library::{ExportSource, SystemLibraryReader};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "songshelf";
const DEFAULT_DEBOUNCE_SECS: u64 = 5;

/// The TOML file as written by the user. Everything is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub database_path: Option<PathBuf>,
    pub unknown_artist_title: Option<String>,

    pub catalog: Option<CatalogConfig>,
    pub watcher: Option<WatcherConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    /// Music/iTunes `Library.xml` export.
    pub library_xml: Option<PathBuf>,
    /// JSON export written by the platform helper.
    pub json_file: Option<PathBuf>,
    /// Helper program printing the JSON export on stdout.
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WatcherConfig {
    pub debounce_secs: Option<u64>,
    pub paths: Option<Vec<PathBuf>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "songshelf_lib=debug".
    pub level: Option<String>,
    pub directory: Option<PathBuf>,
    /// Set to false to log to stderr only.
    pub file: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    LibraryXml(PathBuf),
    Export(ExportSource),
}

/// Resolved settings with every default filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub unknown_artist_title: String,
    pub catalog: CatalogSource,
    pub debounce: Duration,
    pub watch_paths: Vec<PathBuf>,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// `~/.config/songshelf/config.toml` on Linux, the platform equivalent elsewhere.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    /// Loads `path`, or the default location when none is given. A missing
    /// default file just means defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => FileConfig::load(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => FileConfig::load(&default)?,
                _ => FileConfig::default(),
            },
        };
        Self::resolve(file)
    }

    pub fn resolve(file: FileConfig) -> Result<Self> {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        let catalog = resolve_catalog(file.catalog.unwrap_or_default())?;
        let watcher = file.watcher.unwrap_or_default();
        let logging = file.logging.unwrap_or_default();

        let watch_paths = match watcher.paths {
            Some(paths) => paths,
            None => default_watch_paths(&catalog),
        };
        let log_dir = match logging.file {
            Some(false) => None,
            _ => Some(logging.directory.unwrap_or_else(default_log_dir)),
        };

        Ok(Self {
            database_path: file.database_path.unwrap_or_else(|| data_dir.join("library.db")),
            unknown_artist_title: file
                .unknown_artist_title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            catalog,
            debounce: Duration::from_secs(watcher.debounce_secs.unwrap_or(DEFAULT_DEBOUNCE_SECS)),
            watch_paths,
            log_level: logging.level.unwrap_or_else(|| "info".to_string()),
            log_dir,
        })
    }

    pub fn open_catalog(&self) -> Box<dyn CatalogReader + Send + Sync> {
        match &self.catalog {
            CatalogSource::LibraryXml(path) => Box::new(LibraryXmlReader::new(path)),
            CatalogSource::Export(source) => Box::new(SystemLibraryReader::new(source.clone())),
        }
    }
}

fn resolve_catalog(catalog: CatalogConfig) -> Result<CatalogSource> {
    let CatalogConfig {
        library_xml,
        json_file,
        command,
        args,
    } = catalog;
    match (library_xml, json_file, command) {
        (Some(path), None, None) => Ok(CatalogSource::LibraryXml(path)),
        (None, Some(path), None) => Ok(CatalogSource::Export(ExportSource::File(path))),
        (None, None, Some(program)) => Ok(CatalogSource::Export(ExportSource::Command {
            program,
            args: args.unwrap_or_default(),
        })),
        (None, None, None) => Ok(CatalogSource::LibraryXml(default_library_xml())),
        _ => bail!("catalog: set only one of library_xml, json_file or command"),
    }
}

fn music_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Music")))
        .unwrap_or_else(|| PathBuf::from("/Users/Shared/Music"))
}

/// First Library.xml found at the usual Music/iTunes locations.
fn default_library_xml() -> PathBuf {
    let music = music_dir();
    let candidates = [
        music.join("Music/Library.xml"),
        music.join("iTunes/iTunes Library.xml"),
        music.join("iTunes/iTunes Music Library.xml"),
    ];
    candidates
        .iter()
        .find(|p| p.exists())
        .unwrap_or(&candidates[0])
        .clone()
}

fn default_watch_paths(catalog: &CatalogSource) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    match catalog {
        CatalogSource::LibraryXml(path) | CatalogSource::Export(ExportSource::File(path)) => {
            paths.push(path.clone())
        }
        CatalogSource::Export(ExportSource::Command { .. }) => {}
    }
    // The library package changes on every edit in the Music app.
    paths.push(music_dir().join("Music/Music Library.musiclibrary"));
    paths
}

fn default_log_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("logs")
}
