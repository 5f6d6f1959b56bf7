use std::{path::Path, process::ExitCode};

use cilhook::patch::Backup;
use serde::Serialize;

use crate::{app::GlobalOptions, output::print_output};

#[derive(Debug, Serialize)]
struct RestoreInfo {
    image: String,
    backup: String,
}

pub fn run(image: &Path, suffix: &str, opts: &GlobalOptions) -> anyhow::Result<ExitCode> {
    let backup = Backup::new(image, suffix);
    backup.restore()?;

    let info = RestoreInfo {
        image: image.display().to_string(),
        backup: backup.path().display().to_string(),
    };
    print_output(&info, opts, |info| {
        println!("Restored {} from {}", info.image, info.backup);
    })?;
    Ok(ExitCode::SUCCESS)
}
