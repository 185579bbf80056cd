// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

mod adapter;
mod catalog;
mod cmd;
mod config;
mod error;
mod partition;
mod planner;
mod printer;
mod runlog;
mod runner;
mod stage;
mod strategy;

use clap::Parser;
use cmd::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cmd::run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
