//! `3pio` CLI entry point — wraps whatever test command follows it.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use threepio::config::RunConfig;
use threepio::orchestrator;
use threepio::run::RunPaths;

#[derive(Parser)]
#[command(name = "3pio")]
#[command(about = "Wraps a test command and turns its output into durable, hierarchical Markdown reports")]
#[command(version)]
struct Cli {
    /// Directory to run the wrapped command in
    #[arg(long, default_value = ".")]
    cwd: PathBuf,

    /// The test command to wrap, e.g. `npx jest --ci`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RunConfig::from_env();
    let cwd = std::fs::canonicalize(&cli.cwd).unwrap_or(cli.cwd);

    let terminal_level = if config.debug { Level::DEBUG } else { Level::WARN };
    let terminal_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(tracing_subscriber::filter::LevelFilter::from_level(terminal_level));

    std::fs::create_dir_all(cwd.join(".3pio")).ok();
    let debug_log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(RunPaths::debug_log(&cwd))
        .ok();
    let debug_layer = debug_log.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(debug_layer)
        .init();

    let code = orchestrator::run(cli.command, &cwd, config).await?;
    std::process::exit(code);
}
