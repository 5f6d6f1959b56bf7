use std::path::Path;

use anyhow::Context;
use cilhook::config::HookSpec;

/// Hook settings from `config`, or the defaults.
pub fn load_hook(config: Option<&Path>) -> anyhow::Result<HookSpec> {
    match config {
        Some(path) => HookSpec::from_file(path)
            .with_context(|| format!("failed to load hook settings from {}", path.display())),
        None => Ok(HookSpec::default()),
    }
}
