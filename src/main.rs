mod auth;
mod cli;
mod config;
mod error;
mod gcp;
mod job;
mod listener;
mod logreduce;
mod output;
mod router;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting ocpci-logreduce listener");
    cli.execute().await?;

    Ok(())
}
