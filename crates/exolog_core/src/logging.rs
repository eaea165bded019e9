//! Process-wide rolling file logging for the event log.
//!
//! # Responsibility
//! - Start the file logger at most once per process.
//! - Route panics into the log before the default hook runs.
//!
//! # Invariants
//! - Logging is opt-in: nothing is written until a directory is configured.
//! - Once started, the level and directory are fixed for the process.
//! - Event text, summaries and tags never reach the log; only ids, counts
//!   and status codes do.

use crate::config::CoreConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "exolog";
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const KEEP_ROTATED_FILES: usize = 7;
const PANIC_PAYLOAD_MAX_CHARS: usize = 160;
const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: &'static str,
    dir: PathBuf,
    _handle: LoggerHandle,
}

/// Logging setup failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    UnknownLevel(String),
    /// Directory is blank, relative or not UTF-8.
    BadDirectory(String),
    /// Logger already running with a different level or directory.
    AlreadyStarted {
        level: &'static str,
        dir: PathBuf,
    },
    Backend(String),
}

impl Display for LogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected {}",
                LEVELS.join("|")
            ),
            Self::BadDirectory(message) => write!(f, "invalid log directory: {message}"),
            Self::AlreadyStarted { level, dir } => write!(
                f,
                "logging already started at `{}` with level `{level}`",
                dir.display()
            ),
            Self::Backend(message) => write!(f, "log backend failed: {message}"),
        }
    }
}

impl Error for LogError {}

/// Starts rolling file logs under `log_dir`.
///
/// Repeating the call with the same level and directory is a no-op.
///
/// # Errors
/// - `UnknownLevel` / `BadDirectory` for unusable arguments.
/// - `AlreadyStarted` when a different level or directory is already active.
/// - `Backend` when the directory cannot be created or the logger fails.
pub fn init_logging(level: &str, log_dir: &Path) -> Result<(), LogError> {
    let level = normalize_level(level)?;
    let dir = check_log_dir(log_dir)?;

    let active = ACTIVE.get_or_try_init(|| start_logger(level, &dir))?;
    if active.level != level || active.dir != dir {
        return Err(LogError::AlreadyStarted {
            level: active.level,
            dir: active.dir.clone(),
        });
    }
    Ok(())
}

/// Starts logging when `config.log_dir` is set.
///
/// Returns whether a logger is now active.
pub fn init_logging_from_config(config: &CoreConfig) -> Result<bool, LogError> {
    match config.log_dir.as_deref() {
        Some(dir) => init_logging(config.log_level, dir).map(|()| true),
        None => Ok(false),
    }
}

/// Returns `(level, directory)` of the running logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE.get().map(|active| (active.level, active.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Maps a user-supplied level onto its canonical spelling.
pub(crate) fn normalize_level(level: &str) -> Result<&'static str, LogError> {
    let lowered = level.trim().to_ascii_lowercase();
    let wanted = if lowered == "warning" { "warn" } else { lowered.as_str() };
    LEVELS
        .iter()
        .copied()
        .find(|known| *known == wanted)
        .ok_or(LogError::UnknownLevel(lowered))
}

fn check_log_dir(log_dir: &Path) -> Result<PathBuf, LogError> {
    let text = log_dir
        .to_str()
        .ok_or_else(|| LogError::BadDirectory(format!("`{}` is not UTF-8", log_dir.display())))?
        .trim();
    if text.is_empty() {
        return Err(LogError::BadDirectory("path is blank".to_string()));
    }
    let dir = PathBuf::from(text);
    if !dir.is_absolute() {
        return Err(LogError::BadDirectory(format!("`{text}` is not absolute")));
    }
    Ok(dir)
}

fn start_logger(level: &'static str, dir: &Path) -> Result<ActiveLogger, LogError> {
    std::fs::create_dir_all(dir)
        .map_err(|err| LogError::Backend(format!("create `{}`: {err}", dir.display())))?;

    let handle = Logger::try_with_str(level)
        .map_err(|err| LogError::Backend(err.to_string()))?
        .log_to_file(FileSpec::default().directory(dir).basename(LOG_FILE_BASENAME))
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_ROTATED_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LogError::Backend(err.to_string()))?;

    install_panic_hook();
    info!(
        "event=logging_start module=core status=ok level={} os={} version={}",
        level,
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        level,
        dir: dir.to_path_buf(),
        _handle: handle,
    })
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            "event=panic module=core status=error location={} payload={}",
            location,
            panic_payload(info)
        );
        previous(info);
    }));
}

// Payloads can echo event text: keep them on one line and short.
fn panic_payload(info: &PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string>".to_string());
    one_line(&payload, PANIC_PAYLOAD_MAX_CHARS)
}

fn one_line(value: &str, max_chars: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::{
        check_log_dir, init_logging, init_logging_from_config, logging_status, normalize_level,
        one_line, LogError,
    };
    use crate::config::CoreConfig;
    use std::path::Path;

    #[test]
    fn levels_are_trimmed_lowercased_and_aliased() {
        assert_eq!(normalize_level(" INFO "), Ok("info"));
        assert_eq!(normalize_level("Warning"), Ok("warn"));
        assert_eq!(
            normalize_level("loud"),
            Err(LogError::UnknownLevel("loud".to_string()))
        );
    }

    #[test]
    fn relative_and_blank_directories_are_rejected() {
        assert!(matches!(
            check_log_dir(Path::new("logs/dev")),
            Err(LogError::BadDirectory(_))
        ));
        assert!(matches!(
            check_log_dir(Path::new("  ")),
            Err(LogError::BadDirectory(_))
        ));
    }

    #[test]
    fn config_without_log_dir_leaves_logging_off() {
        assert_eq!(init_logging_from_config(&CoreConfig::default()), Ok(false));
    }

    #[test]
    fn one_line_flattens_and_truncates() {
        assert_eq!(one_line("a\nb", 10), "a b");
        let cut = one_line("line1\nline2\rline3", 8);
        assert_eq!(cut, "line1 li...");
    }

    #[test]
    fn second_start_must_match_the_first() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("logs");
        let other = root.path().join("other");

        init_logging("info", &dir).unwrap();
        init_logging("INFO", &dir).unwrap();

        assert!(matches!(
            init_logging("debug", &dir),
            Err(LogError::AlreadyStarted { level: "info", .. })
        ));
        assert!(matches!(
            init_logging("info", &other),
            Err(LogError::AlreadyStarted { .. })
        ));
        assert_eq!(logging_status(), Some(("info", dir)));
    }
}
