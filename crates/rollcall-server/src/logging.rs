//! Tracing setup for the server.
//!
//! Role events forwarded by the event pump are logged under their own
//! target, [`ROLE_EVENT_TARGET`]. In production they also go to a separate
//! daily `rollcall-events` file so a session's detections and
//! acknowledgments can be read back without the HTTP and radio noise.
//!
//! - **Production**: JSON files (all logs plus role events only) and compact stdout
//! - **Development**: pretty stdout; `role` spans print when a run starts and ends

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Target of every role event the server logs.
pub const ROLE_EVENT_TARGET: &str = "rollcall::events";

/// Non-blocking writers flush on drop; keep them for the process lifetime.
static GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Whether `ROLLCALL_ENV` selects the production configuration.
#[must_use]
pub fn is_production() -> bool {
    std::env::var("ROLLCALL_ENV").is_ok_and(|env| env.eq_ignore_ascii_case("production"))
}

/// Filter used when `RUST_LOG` is unset.
///
/// `level` applies to everything except role events, which always log at
/// `info` so a `warn` level does not hide detections, and `tower_http`
/// request traces, which are held at `warn` unless `RUST_LOG` asks for them.
#[must_use]
pub fn default_directives(level: &str) -> String {
    format!("{level},{ROLE_EVENT_TARGET}=info,tower_http=warn")
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise [`default_directives`] is built
/// from `ROLLCALL_LOG_LEVEL` (default `info`).
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let level = std::env::var("ROLLCALL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(&level)))?;

    if is_production {
        init_production(env_filter, &log_directory());
    } else {
        init_development(env_filter);
    }
    Ok(())
}

fn init_production(env_filter: EnvFilter, log_dir: &Path) {
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!("Cannot create log directory {}: {err}", log_dir.display());
    }

    let (all_writer, all_guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        log_dir,
        "rollcall",
    ));
    let (events_writer, events_guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        log_dir,
        "rollcall-events",
    ));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let all_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(all_writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // Role spans carry `kind` and `run_id`, which tie an event to its run.
    let events_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(events_writer)
        .with_current_span(true)
        .with_span_list(false)
        .with_filter(role_event_filter());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(all_layer)
        .with(events_layer)
        .with(stdout_layer)
        .init();

    let _ = GUARDS.set(vec![all_guard, events_guard, stdout_guard]);
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Passes role events only.
fn role_event_filter() -> Targets {
    Targets::new().with_target(ROLE_EVENT_TARGET, Level::INFO)
}

fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/rollcall")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "rollcall")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
