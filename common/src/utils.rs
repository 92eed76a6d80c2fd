use slog::LevelFilter;
use slog::{Drain, Logger, o};
use std::fs;
use std::fs::OpenOptions;
use std::sync::OnceLock;

static GLOBAL_LOGGER: OnceLock<Logger> = OnceLock::new();

pub fn set_global_logger(logger: Logger) {
    let _ = GLOBAL_LOGGER.set(logger);
}

/// Global logger, or a discarding one before `setup_logging` ran.
pub fn get_logger() -> Logger {
    GLOBAL_LOGGER
        .get()
        .cloned()
        .unwrap_or_else(|| Logger::root(slog::Discard, o!()))
}

/// Console logger duplicated into `./logs/<policy_name>.log`, filtered at Info.
/// Also installed as the global logger.
pub fn setup_logging(policy_name: &str) -> Logger {
    let stdout_decorator = slog_term::TermDecorator::new().build();
    let stdout_drain = slog_term::FullFormat::new(stdout_decorator).build().fuse();
    let stdout_drain = slog_async::Async::new(stdout_drain).build().fuse();

    fs::create_dir_all("./logs").unwrap_or(());
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(format!("./logs/{}.log", policy_name));

    let clogger = match file {
        Ok(file) => {
            let file_decorator = slog_term::PlainDecorator::new(file);
            let file_drain = slog_term::FullFormat::new(file_decorator).build().fuse();
            let file_drain = slog_async::Async::new(file_drain).build().fuse();

            let drain = slog::Duplicate::new(stdout_drain, file_drain).map(slog::Fuse);
            let drain = LevelFilter::new(drain, slog::Level::Info).map(slog::Fuse);
            Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
        }
        Err(_) => {
            // console only when the log directory is not writable
            let drain = LevelFilter::new(stdout_drain, slog::Level::Info).map(slog::Fuse);
            Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
        }
    };

    set_global_logger(clogger.clone());
    clogger
}

/// Lowercase hex of `bytes`.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
