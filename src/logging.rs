//! Logging setup for overkill

use fern::Dispatch;
use log::LevelFilter;

/// Map the `-v` count to a level filter
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Setup logging for interactive use, with local timestamps on stderr
pub fn setup(verbosity: u8) -> Result<(), fern::InitError> {
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level_for(verbosity))
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}

/// Setup logging for the fan daemon.
///
/// The journal stamps every line itself, so no timestamp is written, and the
/// daemon never logs below Info so that fan decisions stay visible.
pub fn setup_daemon(verbosity: u8) -> Result<(), fern::InitError> {
    let level = level_for(verbosity).max(LevelFilter::Info);

    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}
