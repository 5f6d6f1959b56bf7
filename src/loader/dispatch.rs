//! Invoking plugins in load order.
//!
//! Every plugin is handled on its own: a load, resolution, binding or invocation failure, or a
//! panic, is recorded in that plugin's [`PluginReport`] and the dispatcher moves on.

use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{
    loader::{
        module::{ArgValue, EntryQuery, ModuleLoader},
        scanner::is_reserved,
        store::LoadOrderStore,
    },
    PluginError,
};

/// What happened to one plugin.
#[derive(Debug)]
pub struct PluginReport {
    /// File name from the load order
    pub file_name: String,
    /// Resolved path
    pub path: PathBuf,
    /// True if the file name is reserved and was skipped
    pub reserved: bool,
    /// Entry points that ran successfully
    pub invoked: Vec<String>,
    /// Failures, in the order they happened
    pub failures: Vec<PluginError>,
}

impl PluginReport {
    fn new(file_name: &str, path: PathBuf) -> Self {
        PluginReport {
            file_name: file_name.to_string(),
            path,
            reserved: false,
            invoked: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// True if nothing failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reports of one dispatch run, in load order.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// One report per record
    pub plugins: Vec<PluginReport>,
}

impl DispatchReport {
    /// Number of entry points that ran successfully
    #[must_use]
    pub fn invoked_count(&self) -> usize {
        self.plugins.iter().map(|plugin| plugin.invoked.len()).sum()
    }

    /// Number of recorded failures
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.plugins.iter().map(|plugin| plugin.failures.len()).sum()
    }

    /// All failures with the plugin they belong to
    pub fn failures(&self) -> impl Iterator<Item = &PluginError> {
        self.plugins.iter().flat_map(|plugin| plugin.failures.iter())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Loads and invokes plugins.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    query: EntryQuery,
    args: Vec<ArgValue>,
}

impl Dispatcher {
    /// A dispatcher invoking entries selected by `query` with `args`.
    #[must_use]
    pub fn new(query: EntryQuery, args: Vec<ArgValue>) -> Self {
        Dispatcher { query, args }
    }

    /// Invoke every plugin of `store`, in order, from `plugin_dir`.
    pub fn dispatch(
        &self,
        loader: &dyn ModuleLoader,
        store: &LoadOrderStore,
        plugin_dir: &Path,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for record in store.entries() {
            let path = plugin_dir.join(&record.file_name);
            let mut plugin = PluginReport::new(&record.file_name, path);

            if is_reserved(&record.file_name) {
                debug!("Skipping reserved {}", record.file_name);
                plugin.reserved = true;
            } else {
                self.dispatch_one(loader, &mut plugin);
            }

            report.plugins.push(plugin);
        }

        info!(
            "Dispatched {} plugin(s): {} entr{} invoked, {} failure(s)",
            report.plugins.len(),
            report.invoked_count(),
            if report.invoked_count() == 1 { "y" } else { "ies" },
            report.failure_count()
        );
        report
    }

    fn dispatch_one(&self, loader: &dyn ModuleLoader, plugin: &mut PluginReport) {
        let file_name = plugin.file_name.clone();

        let module = match catch_unwind(AssertUnwindSafe(|| loader.load(&plugin.path))) {
            Ok(Ok(module)) => module,
            Ok(Err(reason)) => {
                warn!("Failed to load {file_name}: {reason}");
                plugin.failures.push(PluginError::Load { file_name, reason });
                return;
            }
            Err(payload) => {
                let reason = format!("panicked: {}", panic_message(payload.as_ref()));
                warn!("Failed to load {file_name}: {reason}");
                plugin.failures.push(PluginError::Load { file_name, reason });
                return;
            }
        };

        let selected = self.query.resolve(module.entries());
        if selected.is_empty() {
            warn!("No entry matching {} in {file_name}", self.query);
            plugin.failures.push(PluginError::Resolve {
                file_name,
                query: self.query.to_string(),
            });
            return;
        }

        for index in selected {
            let entry = &module.entries()[index];
            let rendered = entry.to_string();

            let args = match entry.bind(&self.args) {
                Ok(args) => args,
                Err(reason) => {
                    warn!("Skipping {rendered} in {file_name}: {reason}");
                    plugin.failures.push(PluginError::Binding {
                        file_name: file_name.clone(),
                        entry: rendered,
                        reason,
                    });
                    continue;
                }
            };

            debug!("Invoking {rendered} in {file_name}");
            match catch_unwind(AssertUnwindSafe(|| module.invoke(index, &args))) {
                Ok(Ok(())) => plugin.invoked.push(rendered),
                Ok(Err(reason)) => {
                    warn!("{rendered} in {file_name} failed: {reason}");
                    plugin.failures.push(PluginError::Invoke {
                        file_name: file_name.clone(),
                        entry: rendered,
                        reason,
                    });
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!("{rendered} in {file_name} panicked: {message}");
                    plugin.failures.push(PluginError::Panicked {
                        file_name: file_name.clone(),
                        entry: rendered,
                        message,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::module::{EntryPoint, ParamKind, PluginModule};
    use std::{cell::RefCell, collections::HashMap, rc::Rc};

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Fail,
        Panic,
    }

    struct MockModule {
        entries: Vec<EntryPoint>,
        behavior: Behavior,
        calls: Rc<RefCell<Vec<String>>>,
        name: String,
    }

    impl PluginModule for MockModule {
        fn entries(&self) -> &[EntryPoint] {
            &self.entries
        }

        fn invoke(&self, index: usize, _args: &[ArgValue]) -> std::result::Result<(), String> {
            self.calls
                .borrow_mut()
                .push(format!("{}:{}", self.name, self.entries[index].type_name));
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => Err("returned 1".into()),
                Behavior::Panic => panic!("plugin exploded"),
            }
        }
    }

    #[derive(Default)]
    struct MockLoader {
        plugins: HashMap<String, (Vec<EntryPoint>, Behavior)>,
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl MockLoader {
        fn with(mut self, name: &str, entries: Vec<EntryPoint>, behavior: Behavior) -> Self {
            self.plugins.insert(name.to_string(), (entries, behavior));
            self
        }
    }

    impl ModuleLoader for MockLoader {
        fn load(&self, path: &Path) -> std::result::Result<Box<dyn PluginModule>, String> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let (entries, behavior) = self.plugins.get(&name).ok_or("not a library")?;
            Ok(Box::new(MockModule {
                entries: entries.clone(),
                behavior: *behavior,
                calls: Rc::clone(&self.calls),
                name,
            }))
        }
    }

    fn init(type_name: &str) -> Vec<EntryPoint> {
        vec![EntryPoint::new(type_name, "Init", vec![])]
    }

    fn store(names: &[&str]) -> LoadOrderStore {
        let mut store = LoadOrderStore::new();
        store.reconcile(&names.iter().map(|n| n.to_string()).collect::<Vec<_>>());
        store
    }

    #[test]
    fn isolates_failures() {
        let loader = MockLoader::default()
            .with("a", init("A"), Behavior::Ok)
            .with("b", init("B"), Behavior::Panic)
            .with("c", init("C"), Behavior::Ok);
        let dispatcher = Dispatcher::new(EntryQuery::new("Init", None), vec![]);

        let report = dispatcher.dispatch(&loader, &store(&["a", "b", "c"]), Path::new("Mods"));
        assert_eq!(*loader.calls.borrow(), vec!["a:A", "b:B", "c:C"]);
        assert_eq!(report.invoked_count(), 2);
        assert!(matches!(
            report.plugins[1].failures[0],
            PluginError::Panicked { ref message, .. } if message == "plugin exploded"
        ));
        assert!(report.plugins[0].is_success() && report.plugins[2].is_success());
    }

    #[test]
    fn records_each_failure_kind() {
        let loader = MockLoader::default()
            .with("fails", init("F"), Behavior::Fail)
            .with("other", vec![EntryPoint::new("O", "Start", vec![])], Behavior::Ok)
            .with(
                "typed",
                vec![EntryPoint::new("T", "Init", vec![ParamKind::Str])],
                Behavior::Ok,
            );
        let dispatcher = Dispatcher::new(EntryQuery::new("Init", None), vec![]);
        let report = dispatcher.dispatch(
            &loader,
            &store(&["missing", "fails", "other", "typed"]),
            Path::new("Mods"),
        );

        let kinds: Vec<_> = report
            .failures()
            .map(|failure| match failure {
                PluginError::Load { .. } => "load",
                PluginError::Resolve { .. } => "resolve",
                PluginError::Binding { .. } => "binding",
                PluginError::Invoke { .. } => "invoke",
                PluginError::Panicked { .. } => "panicked",
            })
            .collect();
        assert_eq!(kinds, vec!["load", "invoke", "resolve", "binding"]);
        assert_eq!(report.invoked_count(), 0);
    }

    #[test]
    fn invokes_every_matching_entry() {
        let loader = MockLoader::default().with(
            "multi",
            vec![
                EntryPoint::new("First", "Init", vec![]),
                EntryPoint::new("Second", "Init", vec![ParamKind::Int]),
            ],
            Behavior::Ok,
        );
        let dispatcher = Dispatcher::new(EntryQuery::new("Init", None), vec![ArgValue::Int(1)]);
        let report = dispatcher.dispatch(&loader, &store(&["multi"]), Path::new("Mods"));
        assert_eq!(report.plugins[0].invoked.len(), 2);

        let dispatcher = Dispatcher::new(
            EntryQuery::new("Init", Some("Second".into())),
            vec![ArgValue::Null],
        );
        let report = dispatcher.dispatch(&loader, &store(&["multi"]), Path::new("Mods"));
        assert_eq!(report.plugins[0].invoked, vec!["Second::Init(int)"]);
    }

    #[test]
    fn skips_reserved() {
        let reserved = crate::loader::scanner::reserved_names()[0].clone();
        let loader = MockLoader::default().with(&reserved, init("L"), Behavior::Ok);
        let dispatcher = Dispatcher::new(EntryQuery::new("Init", None), vec![]);
        let report = dispatcher.dispatch(&loader, &store(&[&reserved]), Path::new("Mods"));
        assert!(report.plugins[0].reserved);
        assert!(loader.calls.borrow().is_empty());
    }
}
