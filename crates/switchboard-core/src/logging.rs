use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "switchboard";
const LOG_FILE_SUFFIX: &str = "log";
const DEFAULT_RETAINED_FILES: usize = 7;

/// Return the log directory path.
///
/// `SWITCHBOARD_LOG_DIR` wins; otherwise the platform state directory
/// (falling back to local data) under `switchboard/logs`.
pub fn log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SWITCHBOARD_LOG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|base| base.join("switchboard").join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("switchboard").join("logs"))
}

/// Where and how one process writes its logs.
///
/// The runner and every provider process log under their own component name,
/// so a shared log directory holds one rolling series per component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub component: String,
    pub dir: PathBuf,
    /// Daily files kept per component; older ones are pruned on rotation.
    pub retained_files: usize,
}

impl LogSettings {
    pub fn for_component(component: &str) -> Self {
        Self {
            component: component.to_string(),
            dir: log_dir(),
            retained_files: DEFAULT_RETAINED_FILES,
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// File name prefix, e.g. `switchboard-github` for provider `github`.
    /// Characters that do not belong in a file name are replaced.
    pub fn file_prefix(&self) -> String {
        let component: String = self
            .component
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if component.is_empty() {
            LOG_FILE_PREFIX.to_string()
        } else {
            format!("{LOG_FILE_PREFIX}-{component}")
        }
    }

    /// Open the daily rolling file for this component, creating the
    /// directory if needed.
    pub fn file_appender(&self) -> Result<RollingFileAppender> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create log directory {}", self.dir.display()))?;

        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(self.file_prefix())
            .filename_suffix(LOG_FILE_SUFFIX)
            .max_log_files(self.retained_files.max(1))
            .build(&self.dir)
            .with_context(|| format!("failed to open log file in {}", self.dir.display()))
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("SWITCHBOARD_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging for one component (e.g. `"runner"` or a provider id)
/// in the default log directory.
pub fn init(component: &str) -> Result<()> {
    init_with(&LogSettings::for_component(component))
}

/// Install the global subscriber.
///
/// Filter controlled by `SWITCHBOARD_LOG` or `RUST_LOG` (default: `info`).
/// Console output goes to stderr; stdout belongs to the RPC channel. Fails
/// when a subscriber is already installed.
pub fn init_with(settings: &LogSettings) -> Result<()> {
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(settings.file_appender()?)
        .with_ansi(false)
        .with_target(true);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
