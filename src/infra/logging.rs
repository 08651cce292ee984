//! Usage: Tracing subscriber setup (stderr + optional daily rolling file).

use crate::infra::settings::ClientSettings;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const ENV_LOG_FILTER: &str = "TALEEX_LOG";
const LOG_FILE_PREFIX: &str = "taleex-api-client.log";

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber once. Later calls are no-ops and return `None`.
///
/// Keep the returned guard alive for as long as file logging should flush.
pub fn init(settings: &ClientSettings) -> Option<WorkerGuard> {
    let mut guard = None;
    INITIALIZED.get_or_init(|| {
        guard = install(settings);
    });
    guard
}

fn build_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG_FILTER)
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn install(settings: &ClientSettings) -> Option<WorkerGuard> {
    // reqwest/hyper emit through `log`; forward those records into tracing.
    let _ = tracing_log::LogTracer::init();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(build_filter(&settings.log_filter));

    let (file_layer, guard) = match settings.log_dir.as_deref() {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(build_filter(&settings.log_filter));
                (Some(layer), Some(guard))
            }
            Err(err) => {
                eprintln!("log dir {} unavailable: {err}", dir.display());
                (None, None)
            }
        },
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer);
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        // Another subscriber (e.g. from the embedding app or a test harness) already owns logging.
        tracing::debug!("tracing subscriber already installed: {}", err);
        return None;
    }

    tracing::debug!(
        filter = %settings.log_filter,
        log_dir = ?settings.log_dir,
        "logging initialized"
    );
    guard
}
