//! Main entry point for overkill

use anyhow::Context;
use clap::Parser;
use log::debug;
use overkill::{args::Args, commands::App, config::Settings, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.is_daemon() {
        logging::setup_daemon(args.verbose)?;
    } else {
        logging::setup(args.verbose)?;
    }

    debug!(
        "overkill v{} (git {}) built {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("unknown"),
        option_env!("BUILD_TIME").unwrap_or("unknown")
    );

    let settings_path = Settings::resolve_path(args.config.as_deref());
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;

    App::new(settings).handle_args(args).await?;
    Ok(())
}
