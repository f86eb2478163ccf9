//! `chainwatch` watches a fleet of full-node endpoints that should agree on
//! one chain, isolates the exact heights where they stop agreeing, and
//! publishes a compact cross-node report for the dashboard.

pub mod cli;
pub mod flags;
pub mod server;

use clap::Parser;

fn main() {
    if let Err(err) = cli::Cli::parse().run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
