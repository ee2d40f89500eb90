//! File logging for the server and the terminal viewer.
//!
//! Both processes log to `<data-dir>/logs`, never to the terminal: the
//! viewer draws into it and hooks run `set` inside the agent's own output.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Which process is logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Server,
    Viewer,
}

impl LogTarget {
    pub fn file_name(self) -> &'static str {
        match self {
            LogTarget::Server => "server.log",
            LogTarget::Viewer => "viewer.log",
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            LogTarget::Server => "info,tower_http=warn,hyper=warn",
            // Reconnect churn from the socket stack would drown the viewer's own events
            LogTarget::Viewer => "info,tungstenite=warn,tokio_tungstenite=warn",
        }
    }

    fn default_format(self) -> LogFormat {
        match self {
            LogTarget::Server => LogFormat::Json,
            LogTarget::Viewer => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("json") {
            Some(LogFormat::Json)
        } else if value.eq_ignore_ascii_case("pretty") {
            Some(LogFormat::Pretty)
        } else {
            None
        }
    }
}

/// Logging options resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub target: LogTarget,
    pub filter: String,
    pub format: LogFormat,
    pub truncate: bool,
}

impl LogSettings {
    pub fn from_env(target: LogTarget) -> Self {
        Self::resolve(target, |key| std::env::var(key).ok())
    }

    /// `AGENT_AVATAR_LOG_FILTER`, then `RUST_LOG`, then the target's default.
    /// Directives that do not parse are skipped.
    pub fn resolve(target: LogTarget, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = ["AGENT_AVATAR_LOG_FILTER", "RUST_LOG"]
            .into_iter()
            .filter_map(&lookup)
            .find(|value| EnvFilter::try_new(value).is_ok())
            .unwrap_or_else(|| target.default_filter().to_string());

        let format = lookup("AGENT_AVATAR_LOG_FORMAT")
            .and_then(|value| LogFormat::parse(&value))
            .unwrap_or_else(|| target.default_format());

        let truncate = lookup("AGENT_AVATAR_TRUNCATE_LOG_ON_START").as_deref() == Some("1");

        Self {
            target,
            filter,
            format,
            truncate,
        }
    }
}

/// Install a file-backed subscriber for `target` under `log_dir`.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the writer.
pub fn init_logging(log_dir: &Path, target: LogTarget) -> anyhow::Result<WorkerGuard> {
    let settings = LogSettings::from_env(target);
    std::fs::create_dir_all(log_dir)?;
    let file_name = target.file_name();
    let log_path = log_dir.join(file_name);

    if settings.truncate {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)?;
    }

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry().with(EnvFilter::try_new(&settings.filter)?);
    match settings.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?,
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        pid = std::process::id(),
        target = ?settings.target,
        log_path = %log_path.display(),
        format = ?settings.format,
        filter = %settings.filter,
    );

    Ok(guard)
}
