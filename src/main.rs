mod cli;
mod converter;
mod db;
mod error;
mod fmt;
mod loader;
mod mdb;
mod models;
mod normalizer;
mod resolver;
mod settings;
mod sync;

use std::env;

use clap::Parser;
use log::LevelFilter;

use cli::{Cli, Commands};

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    if verbose {
        builder.filter_module("gesty_migrate", LevelFilter::Debug);
    } else if env::var("RUST_LOG").is_err() {
        builder.filter_module("gesty_migrate", LevelFilter::Info);
    }
    let _ = builder.format_timestamp_millis().try_init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Sync {
            source,
            destination,
            yes,
            no_backup,
            normalize,
            prefix,
        } => cli::sync::run(cli::sync::SyncArgs {
            source: &source,
            destination: destination.as_deref(),
            yes,
            no_backup,
            normalize,
            prefix: prefix.as_deref(),
        }),
        Commands::Plan {
            source,
            destination,
            prefix,
        } => cli::plan::run(&source, destination.as_deref(), prefix.as_deref()),
        Commands::Convert {
            source,
            output,
            no_dates,
        } => cli::convert::run(&source, output.as_deref(), no_dates),
        Commands::Normalize {
            database,
            tables,
            no_dates,
            no_backup,
        } => cli::normalize::run(&database, &tables, no_dates, no_backup),
        Commands::Backup { database } => cli::backup::run(&database),
        Commands::Config { init } => cli::config::run(init),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
