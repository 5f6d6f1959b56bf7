use std::{path::Path, process::ExitCode};

use cilhook::prelude::*;

use crate::{app::GlobalOptions, commands::common::load_hook, output::print_output};

pub fn run(image: &Path, config: Option<&Path>, opts: &GlobalOptions) -> anyhow::Result<ExitCode> {
    // The loader image is not needed to locate the hook point
    let config = PatchConfig::new(image, "").with_hook(load_hook(config)?);
    let inspection = PatchSession::new(config).inspect()?;

    print_output(&inspection, opts, |inspection| println!("{inspection}"))?;
    Ok(ExitCode::SUCCESS)
}
