use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cilhook - inject a loader hook into a CIL image and run plugins in a persisted order
#[derive(Debug, Parser)]
#[command(name = "cilhook", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Insert the loader entry call into the host image.
    ///
    /// Exits with 0 when the call was inserted, 1 when the image already has it and 2 on failure.
    Inject {
        /// Path to the host image.
        #[arg(long, value_name = "FILE")]
        image: PathBuf,

        /// Path to the loader image defining the entry method.
        #[arg(long, value_name = "FILE")]
        loader: PathBuf,

        /// JSON file with hook settings.
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,

        /// Log the target method before patching.
        #[arg(long)]
        debug: bool,
    },

    /// Report whether the host image already calls the loader entry.
    Check {
        /// Path to the host image.
        #[arg(long, value_name = "FILE")]
        image: PathBuf,

        /// JSON file with hook settings.
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,
    },

    /// Restore the host image from its backup.
    Restore {
        /// Path to the host image.
        #[arg(long, value_name = "FILE")]
        image: PathBuf,

        /// Backup file suffix.
        #[arg(long, default_value = ".orig")]
        suffix: String,
    },

    /// Disassemble the method the entry call goes into.
    Inspect {
        /// Path to the host image.
        #[arg(long, value_name = "FILE")]
        image: PathBuf,

        /// JSON file with hook settings.
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,
    },

    /// Run the startup sequence: scan, reconcile the load order and dispatch plugins.
    Load {
        /// Base directory containing the plugin directory.
        #[arg(long, value_name = "DIR", default_value = ".")]
        base: PathBuf,

        /// JSON file with loader settings (defaults to <base>/cilhook.json if present).
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,
    },
}
