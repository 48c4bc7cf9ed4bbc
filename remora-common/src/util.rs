use crate::config::BaseConfig;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn get_vehicle_id(config: &BaseConfig) -> String {
    std::env::var("VEHICLE_ID").unwrap_or_else(|_| config.vehicle_id.clone())
}

/// Installs the global subscriber: pretty stdout plus a daily file under `logs/`.
///
/// Keep the returned guard alive for the lifetime of the process or buffered
/// file output is lost.
pub fn setup_logging(log_level: &str, service_name: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", format!("{}.log", service_name));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let level: Directive = log_level
        .parse()
        .unwrap_or_else(|_| Level::INFO.into());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(file_writer),
        )
        .with(
            EnvFilter::from_default_env()
                .add_directive(level)
                .add_directive("tokio=info".parse().unwrap())
                .add_directive("hyper=info".parse().unwrap())
                .add_directive("tower_http=debug".parse().unwrap()),
        )
        .try_init()
        .expect("Failed to initialize logging");

    guard
}
