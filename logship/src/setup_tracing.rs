use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

/// Set to `true` for debug level, human-readable logs.
const ENV_DEBUG: &str = "LOGSHIP_DEBUG";

/// Panic hook to send panic info to `tracing` instead of stderr, so a panic in a delivery task
/// ends up on one line of the same log stream as everything else.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    // noop if the RUST_BACKTRACE or RUST_LIB_BACKTRACE backtrace variables are both not set
    let backtrace = Backtrace::capture();
    let backtrace_captured = backtrace.status() == BacktraceStatus::Captured;
    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        Some(*s)
    } else {
        panic_info
            .payload()
            .downcast_ref::<String>()
            .map(|s| s.as_str())
    };

    match (panic_info.location(), payload, backtrace_captured) {
        (Some(location), Some(payload), false) => {
            tracing::error!(
                "{}:{}:{}: {}",
                location.file(),
                location.line(),
                location.column(),
                payload,
            );
        }
        _ => {
            tracing::error!("{}\n{}", panic_info, backtrace);
        }
    };
}

/// Logs go to stderr; stdout is never written.
pub fn register() {
    // RUST_LOG can be used to set the log level. The default log level is `info`.
    let debug_mode = std::env::var(ENV_DEBUG).is_ok_and(|v| v.to_lowercase() == "true");
    let default_log_level = if debug_mode {
        // the SDK's own request logging is too noisy at debug
        "debug,aws_smithy_runtime=info,aws_config=info"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_log_level))
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()));

    let layer = if debug_mode {
        fmt::layer().with_writer(std::io::stderr).boxed()
    } else {
        // JSON format, flattened
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    std::panic::set_hook(Box::new(report_panic));
}
