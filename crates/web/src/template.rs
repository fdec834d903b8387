//! Named template sets rendered into response bodies.
//!
//! A set is compiled from one main file plus the files it extends or
//! includes; all of them are registered under their base names, and the set
//! itself is named after the main file. Sets are swapped atomically, so a
//! render that already started keeps using the set it loaded.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwap;
use minijinja::Environment;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template {0:?} not found")]
    NotFound(String),

    #[error("can't read template {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("can't parse template {path:?}: {source}")]
    Parse { path: PathBuf, source: minijinja::Error },

    #[error("can't execute template {name:?}: {source}")]
    Execute { name: String, source: minijinja::Error },

    #[error("can't watch templates: {0}")]
    Watch(#[from] notify::Error),
}

struct TemplateSet {
    name: String,
    files: Vec<PathBuf>,
    env: Environment<'static>,
}

impl TemplateSet {
    fn compile(main: &Path, dependencies: &[PathBuf]) -> Result<Self, TemplateError> {
        let name = base_name(main);
        let mut env = Environment::new();
        let mut files = Vec::with_capacity(dependencies.len() + 1);

        for path in std::iter::once(main).chain(dependencies.iter().map(PathBuf::as_path)) {
            let source =
                fs::read_to_string(path).map_err(|source| TemplateError::Io { path: path.to_path_buf(), source })?;
            env.add_template_owned(base_name(path), source)
                .map_err(|source| TemplateError::Parse { path: path.to_path_buf(), source })?;
            files.push(fs::canonicalize(path).unwrap_or_else(|_missing| path.to_path_buf()));
        }

        Ok(Self { name, files, env })
    }
}

type Sets = HashMap<String, Arc<TemplateSet>>;

/// Registry of compiled template sets, cheap to clone.
#[derive(Clone)]
pub struct TemplateManager {
    inner: Arc<Inner>,
}

struct Inner {
    sets: ArcSwap<Sets>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl Default for TemplateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateManager {
    pub fn new() -> Self {
        Self { inner: Arc::new(Inner { sets: ArcSwap::from_pointee(HashMap::new()), watcher: Mutex::new(None) }) }
    }

    /// Compiles `main` with its dependencies and registers the set under the
    /// base name of `main`, replacing any set of that name. Returns the name.
    pub fn add_template(&self, main: impl AsRef<Path>, dependencies: &[PathBuf]) -> Result<String, TemplateError> {
        let set = Arc::new(TemplateSet::compile(main.as_ref(), dependencies)?);
        let name = set.name.clone();
        self.install(set);
        Ok(name)
    }

    fn install(&self, set: Arc<TemplateSet>) {
        self.inner.sets.rcu(|sets| {
            let mut sets = Sets::clone(sets);
            sets.insert(set.name.clone(), Arc::clone(&set));
            sets
        });
    }

    /// Recompiles a set from the files it was built from. On failure the
    /// current set stays in place.
    pub fn reload(&self, name: &str) -> Result<(), TemplateError> {
        let current = self.get(name)?;
        let (main, dependencies) = current.files.split_first().ok_or_else(|| TemplateError::NotFound(name.to_owned()))?;
        let set = TemplateSet::compile(main, dependencies)?;
        self.install(Arc::new(set));
        Ok(())
    }

    /// Drops a set. Returns whether it existed.
    pub fn invalidate(&self, name: &str) -> bool {
        let mut removed = false;
        self.inner.sets.rcu(|sets| {
            let mut sets = Sets::clone(sets);
            removed = sets.remove(name).is_some();
            sets
        });
        removed
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.sets.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.sets.load().contains_key(name)
    }

    /// Renders set `name` with `data` into `sink`.
    pub fn execute<W: io::Write>(&self, sink: W, name: &str, data: impl Serialize) -> Result<(), TemplateError> {
        let set = self.get(name)?;
        let template = set
            .env
            .get_template(&set.name)
            .map_err(|source| TemplateError::Execute { name: name.to_owned(), source })?;
        template.render_to_write(data, sink).map_err(|source| TemplateError::Execute { name: name.to_owned(), source })?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Arc<TemplateSet>, TemplateError> {
        self.inner.sets.load().get(name).cloned().ok_or_else(|| TemplateError::NotFound(name.to_owned()))
    }

    /// Watches the directories of every registered file and recompiles the
    /// sets whose files change. Calling it again rewatches the current sets.
    pub fn start(&self) -> Result<(), TemplateError> {
        let inner = Arc::downgrade(&self.inner);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| on_event(&inner, res))?;

        let directories: HashSet<PathBuf> = self
            .inner
            .sets
            .load()
            .values()
            .flat_map(|set| set.files.iter())
            .filter_map(|file| file.parent().map(Path::to_path_buf))
            .collect();

        for directory in &directories {
            watcher.watch(directory, RecursiveMode::NonRecursive)?;
        }
        info!(directories = directories.len(), "template watcher started");

        *lock(&self.inner.watcher) = Some(watcher);
        Ok(())
    }

    pub fn stop(&self) {
        if lock(&self.inner.watcher).take().is_some() {
            info!("template watcher stopped");
        }
    }
}

fn on_event(inner: &Weak<Inner>, res: notify::Result<Event>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            warn!(cause = %e, "template watch error");
            return;
        }
    };

    if !(event.kind.is_modify() || event.kind.is_create()) {
        return;
    }
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let manager = TemplateManager { inner };

    let changed: Vec<PathBuf> =
        event.paths.iter().map(|path| fs::canonicalize(path).unwrap_or_else(|_gone| path.clone())).collect();

    let affected: Vec<String> = manager
        .inner
        .sets
        .load()
        .values()
        .filter(|set| set.files.iter().any(|file| changed.contains(file)))
        .map(|set| set.name.clone())
        .collect();

    for name in affected {
        match manager.reload(&name) {
            Ok(()) => info!(template = %name, "template reloaded"),
            Err(e) => error!(cause = %e, template = %name, "template reload failed, keeping previous version"),
        }
    }
}

fn lock(watcher: &Mutex<Option<RecommendedWatcher>>) -> std::sync::MutexGuard<'_, Option<RecommendedWatcher>> {
    watcher.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn base_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.to_string_lossy().into_owned(), |name| name.to_string_lossy().into_owned())
}

impl std::fmt::Debug for TemplateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateManager").field("names", &self.names()).finish_non_exhaustive()
    }
}
