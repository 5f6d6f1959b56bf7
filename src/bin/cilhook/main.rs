mod app;
mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;

use crate::app::{Cli, Command};

/// Exit code for failures of any command
const EXIT_FAILURE: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Show cilhook info+ on stderr unless --json; --verbose or --debug enables debug; RUST_LOG overrides
    if !cli.global.json {
        let debug = matches!(cli.command, Command::Inject { debug: true, .. });
        let level = if cli.global.verbose || debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("cilhook", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    let result = match &cli.command {
        Command::Inject {
            image,
            loader,
            config,
            debug,
        } => commands::inject::run(image, loader, config.as_deref(), *debug, &cli.global),
        Command::Check { image, config } => {
            commands::check::run(image, config.as_deref(), &cli.global)
        }
        Command::Restore { image, suffix } => commands::restore::run(image, suffix, &cli.global),
        Command::Inspect { image, config } => {
            commands::inspect::run(image, config.as_deref(), &cli.global)
        }
        Command::Load { base, config } => commands::load::run(base, config.as_deref(), &cli.global),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
