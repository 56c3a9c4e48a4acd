//! Latin Trainer - Leitner-box vocabulary training for Latin and German.

mod app;
mod config;
mod db;
mod import;
mod terminal;

use app::App;
use config::Config;
use db::Database;
use std::io;
use terminal::TerminalPrompter;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = Config::load();
    init_tracing(&config.log_level);

    // Write the defaults once so there is a file to edit.
    if Config::config_path().is_some_and(|p| !p.exists()) {
        if let Err(e) = config.save() {
            tracing::warn!(error = %e, "could not write default config");
        }
    }

    let db_path = config.db_path().unwrap_or_else(|| "latin.db".into());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&db_path, &config.storage.profile)?;
    tracing::debug!(path = %db_path.display(), profile = %config.storage.profile, "opened database");

    let prompter = TerminalPrompter::new(io::stdin().lock(), io::stdout().lock(), &config.display);
    let mut app = App::new(db, &config, prompter);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        app.run()
    } else {
        app.run_command(&args.join(" ")).map(|_| ())
    }
}

/// Log to stderr so prompts on stdout stay readable.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
