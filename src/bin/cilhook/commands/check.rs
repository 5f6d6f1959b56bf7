use std::{path::Path, process::ExitCode};

use cilhook::{
    image::Image,
    patch::{find_injections, Injection},
};
use serde::Serialize;

use crate::{app::GlobalOptions, commands::common::load_hook, output::print_output};

#[derive(Debug, Serialize)]
struct CheckInfo {
    image: String,
    entry: String,
    injected: bool,
    calls: Vec<String>,
}

/// Exits with 0 if the image calls the entry and 1 if it does not.
pub fn run(path: &Path, config: Option<&Path>, opts: &GlobalOptions) -> anyhow::Result<ExitCode> {
    let spec = load_hook(config)?;
    let image = Image::from_file(path)?;
    let found = find_injections(&image, &spec);

    let info = CheckInfo {
        image: path.display().to_string(),
        entry: spec.entry_signature(),
        injected: !found.is_empty(),
        calls: found
            .iter()
            .map(|Injection { method, position }| {
                format!("{} IL_#{}", image.method_full_name(*method), position)
            })
            .collect(),
    };

    print_output(&info, opts, |info| {
        if info.injected {
            println!("{}: injected", info.image);
            for call in &info.calls {
                println!("  {call}");
            }
        } else {
            println!("{}: not injected ({} is never called)", info.image, info.entry);
        }
    })?;

    Ok(if info.injected {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
