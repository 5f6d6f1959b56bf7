use std::{path::Path, process::ExitCode};

use anyhow::Context;
use cilhook::loader::startup;
use cilhook::prelude::*;
use serde::Serialize;

use crate::{app::GlobalOptions, output::print_output};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PluginInfo {
    file_name: String,
    reserved: bool,
    invoked: Vec<String>,
    failures: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadInfo {
    plugin_dir: String,
    store: String,
    saved: bool,
    pruned: Vec<String>,
    added: Vec<String>,
    plugins: Vec<PluginInfo>,
}

pub fn run(base: &Path, config: Option<&Path>, opts: &GlobalOptions) -> anyhow::Result<ExitCode> {
    let config = match config {
        Some(path) => LoaderConfig::from_file(path, base)
            .with_context(|| format!("failed to load loader settings from {}", path.display()))?,
        None => LoaderConfig::discover(base)?,
    };

    let report = startup::run(&config, &NativeLoader::new(), &[])?;

    let info = LoadInfo {
        plugin_dir: config.plugin_path().display().to_string(),
        store: format!("{} ({})", config.store_path().display(), report.status),
        saved: report.saved,
        pruned: report.reconcile.pruned,
        added: report.reconcile.added,
        plugins: report
            .dispatch
            .plugins
            .into_iter()
            .map(|plugin| PluginInfo {
                file_name: plugin.file_name,
                reserved: plugin.reserved,
                invoked: plugin.invoked,
                failures: plugin.failures.iter().map(ToString::to_string).collect(),
            })
            .collect(),
    };

    print_output(&info, opts, |info| {
        println!("Plugins: {}", info.plugin_dir);
        println!("Load order: {}{}", info.store, if info.saved { "" } else { ", not saved" });
        for name in &info.pruned {
            println!("  - {name}");
        }
        for name in &info.added {
            println!("  + {name}");
        }
        for (index, plugin) in info.plugins.iter().enumerate() {
            if plugin.reserved {
                println!("{:>3}. {} (reserved, skipped)", index + 1, plugin.file_name);
                continue;
            }
            let state = if plugin.failures.is_empty() { "ok" } else { "failed" };
            println!("{:>3}. {} [{}]", index + 1, plugin.file_name, state);
            for entry in &plugin.invoked {
                println!("       ran {entry}");
            }
            for failure in &plugin.failures {
                println!("       {failure}");
            }
        }
    })?;
    Ok(ExitCode::SUCCESS)
}
