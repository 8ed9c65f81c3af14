//! File logging for the CLI host.
//!
//! Filter: `CAMPUSLINK_LOG_FILTER` > `RUST_LOG` > built-in default. The first
//! directive that parses wins. Output goes to `<data dir>/logs/notify.log`,
//! JSON unless `CAMPUSLINK_LOG_FORMAT=pretty`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::paths;

const DEFAULT_FILTER: &str = "info,reqwest=warn,tungstenite=warn";
const LOG_FILE: &str = "notify.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

pub struct LoggingHandle {
    pub run_id: String,
    /// Flushes buffered lines when dropped; hold it for the process lifetime
    pub guard: WorkerGuard,
}

/// First candidate that parses as a filter, else the default
fn resolve_filter<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> EnvFilter {
    candidates
        .into_iter()
        .flatten()
        .find_map(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn new_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("pid-{}-{}", std::process::id(), millis)
}

pub fn init_logging(data_dir: &Path) -> anyhow::Result<LoggingHandle> {
    let log_dir = paths::log_dir(data_dir);
    std::fs::create_dir_all(&log_dir)?;

    let configured = std::env::var("CAMPUSLINK_LOG_FILTER").ok();
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = resolve_filter([configured.as_deref(), rust_log.as_deref()]);
    let applied_filter = filter.to_string();
    let format = LogFormat::from_env_value(std::env::var("CAMPUSLINK_LOG_FORMAT").ok().as_deref());

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, LOG_FILE));
    install(filter, format, writer)?;

    let run_id = std::env::var("CAMPUSLINK_RUN_ID").unwrap_or_else(|_| new_run_id());
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_path = %log_dir.join(LOG_FILE).display(),
        format = format.as_str(),
        filter = %applied_filter,
    );

    Ok(LoggingHandle { run_id, guard })
}

fn install(filter: EnvFilter, format: LogFormat, writer: NonBlocking) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_file(true)
        .with_line_number(true)
        .with_target(true);
    match format {
        LogFormat::Pretty => registry.with(layer.with_ansi(false).pretty()).try_init()?,
        LogFormat::Json => registry
            .with(layer.json().flatten_event(true).with_current_span(true))
            .try_init()?,
    }
    Ok(())
}
