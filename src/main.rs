mod app;
mod cli;
mod config;
mod db;
mod http;
mod paths;
mod telemetry;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    telemetry::init_tracing()?;
    app::run(cli)
}
