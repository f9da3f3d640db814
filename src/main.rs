mod app;
mod config;
mod exchange;
mod logging;
mod peer;
mod server;
mod store;
mod tracker;
mod transfer;
mod util;

use std::{env, process::exit};

use clap::Parser;
use ctrlc;
use log::{error, info, LevelFilter};
use tokio::sync::mpsc::unbounded_channel;

use crate::app::Command;

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), long_about = None)]
struct Args {
    /// Location of configuration file
    #[arg(short, long, value_name = "/path/to/config.yaml")]
    config: Option<String>,

    /// Enable debug output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    if args.verbose >= 1 {
        env::set_var("RUST_BACKTRACE", "1");
    }

    let role = match &args.command {
        Command::Tracker => String::from("tracker"),
        Command::Peer { port } => format!("peer:{port}"),
        _ => String::from("client"),
    };

    if let Err(e) = logging::setup_logger(role, log_level) {
        eprintln!("Failed to initialize logger: {e}. ");
        exit(1);
    }

    info!("Started {} version {}. ", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = unbounded_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received termination signal, shutting down. ");
        if shutdown_tx.send(()).is_err() {
            exit(0);
        }
    }) {
        error!("Failed to set signal handler: {e}. ");
        exit(1);
    }

    let config = match &args.config {
        Some(config_path) => config::Config::new(config_path),
        None => config::Config::parse(""),
    };

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to parse configuration file: {e}. ");
            exit(1);
        },
    };

    let app = app::App::new(config, args.config, args.verbose, shutdown_rx);

    if let Err(e) = app.start(args.command).await {
        eprintln!("Program failed: {e}. ");
        exit(1);
    }
}
