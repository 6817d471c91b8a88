use std::io::IsTerminal;

use clap::Parser;
use color_eyre::eyre::{self, Context};
use tracing_subscriber::EnvFilter;

mod args;
mod environment;
mod list;
mod start;
mod watch;

use args::{Args, Command};
use environment::Environment;

fn init_logging() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .json()
            .init();
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install().context("installing color_eyre")?;
    init_logging();

    let args = Args::parse();
    tracing::debug!(?args, "parsed command line arguments");

    let config = config::Config::load(args.config.as_deref()).context("loading configuration")?;
    let env = Environment::new(config);

    match args.command {
        Command::Devices { json } => list::run(&env, json).await,
        Command::Launch(launch_args) => start::run(&env, launch_args).await,
        Command::Watch(watch_args) => watch::run(&env, watch_args).await,
    }
}
