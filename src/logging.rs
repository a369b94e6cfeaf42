use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Once, OnceLock};

use slog::Drain;

/// Map a `RUST_LOG`-style value onto a level, ignoring module filters.
fn parse_level(value: &str, default: log::LevelFilter) -> log::LevelFilter {
    let lower = value.to_ascii_lowercase();
    let levels = [
        ("trace", log::LevelFilter::Trace),
        ("debug", log::LevelFilter::Debug),
        ("info", log::LevelFilter::Info),
        ("warn", log::LevelFilter::Warn),
        ("error", log::LevelFilter::Error),
        ("off", log::LevelFilter::Off),
    ];
    levels
        .iter()
        .find(|(name, _)| lower.contains(name))
        .map(|(_, level)| *level)
        .unwrap_or(default)
}

fn resolve_level(verbose: bool) -> log::LevelFilter {
    let default = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    match std::env::var("RUST_LOG") {
        Ok(value) => parse_level(&value, default),
        Err(_) => default,
    }
}

fn install<D>(drain: D, level: log::LevelFilter)
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    static LOGGER_GUARD: OnceLock<slog_scope::GlobalLoggerGuard> = OnceLock::new();
    static STDLOG_INIT: Once = Once::new();

    let drain = slog_async::Async::new(drain)
        .overflow_strategy(slog_async::OverflowStrategy::Block)
        .build()
        .fuse();
    let logger = slog::Logger::root(drain, slog::o!("app" => "vpndesk"));

    if LOGGER_GUARD.get().is_none() {
        let _ = LOGGER_GUARD.set(slog_scope::set_global_logger(logger));
    }
    STDLOG_INIT.call_once(|| {
        let _ = slog_stdlog::init();
    });
    log::set_max_level(level);
}

/// Compact stderr logging for interactive commands.
pub fn init_terminal(verbose: bool) {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    install(drain, resolve_level(verbose));
}

/// Full-format file logging for the backend daemon.
pub fn init_file(path: &Path, verbose: bool) -> anyhow::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    install(drain, resolve_level(verbose));
    Ok(())
}
