use anyhow::{Context as _, Result};
use chrono::Local;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Maximum size per log file before rotation (~5 MB)
const MAX_LOG_FILE_SIZE: u64 = 5 * 1024 * 1024;
/// Number of rotated log files to keep
const MAX_LOG_FILES: usize = 5;

/// Persistent log file, written as a `tracing` layer.
///
/// Lines look like `[2024-01-01 12:00:00.000] [INFO] message key=value`.
/// DEBUG and TRACE events are only written in debug mode.
pub struct LogState {
    log_dir: PathBuf,
    debug_mode: AtomicBool,
    write_lock: Mutex<()>,
}

impl LogState {
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

        let state = Self {
            log_dir,
            debug_mode: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        };
        state.write_line(
            "INFO",
            &format!(
                "=== songshelf session started at {} ===",
                Local::now().format("%Y-%m-%d %H:%M:%S %Z")
            ),
        );
        Ok(state)
    }

    /// The current (active) log file path.
    pub fn current_log_path(&self) -> PathBuf {
        self.log_dir.join("songshelf.log")
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Rotate log files: songshelf.log → songshelf.1.log → songshelf.2.log → …
    fn rotate_if_needed(&self) {
        let current = self.current_log_path();
        let file_size = fs::metadata(&current).map(|m| m.len()).unwrap_or(0);
        if file_size < MAX_LOG_FILE_SIZE {
            return;
        }

        // The oldest file falls off the end.
        let _ = fs::remove_file(self.log_dir.join(format!("songshelf.{}.log", MAX_LOG_FILES)));
        for i in (1..MAX_LOG_FILES).rev() {
            let from = self.log_dir.join(format!("songshelf.{}.log", i));
            let to = self.log_dir.join(format!("songshelf.{}.log", i + 1));
            let _ = fs::rename(&from, &to);
        }
        let _ = fs::rename(&current, self.log_dir.join("songshelf.1.log"));
    }

    /// Append a formatted line to the persistent log file.
    pub fn write_line(&self, level: &str, message: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.rotate_if_needed();

        let line = format!(
            "[{}] [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            message
        );

        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_log_path())
        {
            let _ = file.write_all(line.as_bytes());
        }
    }

    pub fn is_debug(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogState {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO && !self.is_debug() {
            return;
        }
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        self.write_line(level.as_str(), &format!("{}{}", visitor.message, visitor.fields));
    }
}

/// Installs the global subscriber: human-readable output on stderr, plus the
/// rotating log file when `log_dir` is set. `RUST_LOG` overrides `level`.
pub fn init(level: &str, log_dir: Option<&Path>, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("Invalid log level {:?}", default_level))?;

    let file_layer = match log_dir {
        Some(dir) => {
            let state = LogState::new(dir)?;
            state.set_debug(verbose);
            Some(state)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}
