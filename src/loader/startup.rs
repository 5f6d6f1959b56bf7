//! The startup sequence run by the injected entry call.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};

use crate::{
    config::LoaderConfig,
    loader::{
        dispatch::{DispatchReport, Dispatcher},
        module::{ArgValue, ModuleLoader},
        native::NativeLoader,
        scanner::scan,
        store::{LoadOrderStore, LoadStatus, Loaded, ReconcileSummary},
    },
    Error, Result,
};

/// Outcome of [`run`].
#[derive(Debug)]
pub struct StartupReport {
    /// How the load order was obtained
    pub status: LoadStatus,
    /// What reconciliation changed
    pub reconcile: ReconcileSummary,
    /// True if the reconciled load order was written back
    pub saved: bool,
    /// Per plugin results
    pub dispatch: DispatchReport,
}

/// Scan, load and reconcile the load order, save it and dispatch every plugin.
///
/// A failed save is logged and the in-memory order is dispatched anyway.
///
/// # Errors
/// Returns an error if the plugin directory cannot be created or read.
pub fn run(
    config: &LoaderConfig,
    loader: &dyn ModuleLoader,
    args: &[ArgValue],
) -> Result<StartupReport> {
    let plugin_dir = config.plugin_path();
    std::fs::create_dir_all(&plugin_dir).map_err(|e| Error::write(&plugin_dir, e))?;

    let discovered = scan(&plugin_dir)?;
    let store_path = config.store_path();
    let Loaded { mut store, status } = LoadOrderStore::load(&store_path);
    info!(
        "Load order {} ({}), {} plugin(s) on disk",
        store_path.display(),
        status,
        discovered.len()
    );

    let reconcile = store.reconcile(&discovered);
    let saved = match store.save(&store_path) {
        Ok(()) => true,
        Err(error) => {
            warn!("Continuing with unsaved load order: {error}");
            false
        }
    };

    let dispatch = Dispatcher::new(config.entry_query(), args.to_vec()).dispatch(
        loader,
        &store,
        &plugin_dir,
    );

    Ok(StartupReport {
        status,
        reconcile,
        saved,
        dispatch,
    })
}

static STARTED: AtomicBool = AtomicBool::new(false);

fn init_from_current_dir() -> Result<StartupReport> {
    let base = std::env::current_dir()?;
    let config = LoaderConfig::discover(base)?;
    run(&config, &NativeLoader::new(), &[])
}

/// Native side of the injected entry call.
///
/// Runs [`run`] once per process, rooted at the current directory with the native loader.
/// Returns 0 on success (and on repeated calls) and -1 if the sequence failed or panicked.
#[no_mangle]
pub extern "C" fn cilhook_init() -> i32 {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("cilhook=info"),
    )
    .try_init();

    if STARTED.swap(true, Ordering::SeqCst) {
        info!("cilhook_init already ran");
        return 0;
    }

    match std::panic::catch_unwind(init_from_current_dir) {
        Ok(Ok(report)) => {
            info!(
                "Startup finished: {} plugin(s), {} failure(s)",
                report.dispatch.plugins.len(),
                report.dispatch.failure_count()
            );
            0
        }
        Ok(Err(error)) => {
            error!("Startup failed: {error}");
            -1
        }
        Err(_) => {
            error!("Startup panicked");
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::module::{EntryPoint, PluginModule};
    use std::{env::consts::DLL_EXTENSION, path::Path};
    use tempfile::tempdir;

    struct Noop;

    impl PluginModule for Noop {
        fn entries(&self) -> &[EntryPoint] {
            &[]
        }

        fn invoke(&self, _index: usize, _args: &[ArgValue]) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    struct NoopLoader;

    impl ModuleLoader for NoopLoader {
        fn load(&self, _path: &Path) -> std::result::Result<Box<dyn PluginModule>, String> {
            Ok(Box::new(Noop))
        }
    }

    #[test]
    fn creates_directory_and_store() {
        let dir = tempdir().unwrap();
        let config = LoaderConfig::for_base_dir(dir.path());

        let report = run(&config, &NoopLoader, &[]).unwrap();
        assert_eq!(report.status, LoadStatus::Created);
        assert!(report.saved);
        assert!(report.dispatch.plugins.is_empty());
        assert!(config.plugin_path().is_dir());
        assert!(config.store_path().is_file());
    }

    #[test]
    fn reconciles_before_dispatch() {
        let dir = tempdir().unwrap();
        let config = LoaderConfig::for_base_dir(dir.path());
        std::fs::create_dir_all(config.plugin_path()).unwrap();
        let plugin = format!("alpha.{DLL_EXTENSION}");
        std::fs::write(config.plugin_path().join(&plugin), b"").unwrap();

        let report = run(&config, &NoopLoader, &[]).unwrap();
        assert_eq!(report.reconcile.added, vec![plugin.clone()]);
        assert_eq!(report.dispatch.plugins[0].file_name, plugin);
        // no entry named Init
        assert_eq!(report.dispatch.failure_count(), 1);

        let stored = LoadOrderStore::load(&config.store_path());
        assert_eq!(stored.status, LoadStatus::Loaded);
        assert_eq!(stored.store.file_names().collect::<Vec<_>>(), vec![plugin.as_str()]);
    }
}
