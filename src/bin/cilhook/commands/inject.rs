use std::{path::Path, process::ExitCode};

use cilhook::prelude::*;
use serde::Serialize;

use crate::{app::GlobalOptions, commands::common::load_hook, output::print_output};

#[derive(Debug, Serialize)]
struct InjectInfo {
    image: String,
    injected: bool,
    summary: Option<PatchSummary>,
}

/// Exits with 0 when the call was inserted and 1 when the image already had it.
pub fn run(
    image: &Path,
    loader: &Path,
    config: Option<&Path>,
    debug: bool,
    opts: &GlobalOptions,
) -> anyhow::Result<ExitCode> {
    let config = PatchConfig::new(image, loader)
        .with_hook(load_hook(config)?)
        .with_debug(debug);

    let outcome = PatchSession::new(config).run()?;
    let info = match outcome {
        PatchOutcome::Injected(summary) => InjectInfo {
            image: image.display().to_string(),
            injected: true,
            summary: Some(summary),
        },
        PatchOutcome::AlreadyInjected => InjectInfo {
            image: image.display().to_string(),
            injected: false,
            summary: None,
        },
    };

    print_output(&info, opts, |info| match &info.summary {
        Some(summary) => {
            println!("Injected into {}", summary.method);
            println!(
                "  position:     IL_#{}{}",
                summary.position,
                if summary.iterator { " (iterator step method)" } else { "" }
            );
            println!(
                "  instructions: {} -> {}",
                summary.instructions_before, summary.instructions_after
            );
            println!("  backup:       {}", summary.backup.display());
            println!("  sha1:         {} -> {}", summary.sha1_before, summary.sha1_after);
        }
        None => println!("{}: already injected, nothing to do", info.image),
    })?;

    Ok(if info.injected {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
