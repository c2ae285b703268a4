//! Filesystem side of the watch loop.
//!
//! [`FsWatcher`] wraps a `notify` watcher. Its callback runs on notify's own
//! thread, filters the raw events down to files the build actually reads,
//! and forwards each one as [`WatchEvent::Changed`]. A forwarded change also
//! trips the build's [`CancelToken`] so a build that is already running on
//! stale inputs stops at its next stage boundary.

use super::{WatchError, WatchEvent};
use crate::build::{BuildRequest, CancelToken};
use crate::config::ProjectConfig;
use crate::load;
use crate::template::TemplateRef;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

/// The files and directories a build depends on.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    files: HashSet<PathBuf>,
    dirs: Vec<PathBuf>,
    ignored: HashSet<PathBuf>,
}

impl WatchSet {
    /// Inputs, bibliography, declared assets and the template directory of
    /// `request`. Build outputs are ignored so writing them never triggers
    /// a rebuild.
    ///
    /// Inputs that don't load are still watched on their own, so fixing a
    /// typo in them triggers the next build.
    pub fn for_request(request: &BuildRequest, config: &ProjectConfig) -> Self {
        let mut set = Self::default();
        for input in &request.inputs {
            set.add_file(input);
        }
        if let Some(bib) = &request.bibliography {
            set.add_file(bib);
        }
        set.ignore(&request.output);
        set.ignore(&request.html_path());

        let document = load::load(&request.inputs, config.assets.default_dpi).ok();
        if let Some(doc) = &document {
            if let Some(bib) = &doc.bibliography {
                set.add_file(bib);
            }
            for asset in &doc.assets {
                set.add_file(&asset.path);
            }
        }

        let spec = request
            .template
            .as_deref()
            .or(document.as_ref().and_then(|d| d.theme.as_deref()))
            .unwrap_or(&config.build.theme);
        if let Ok(template) = TemplateRef::resolve(spec, &request.root) {
            set.add_dir(&template.dir);
            set.add_dir(&template.assets_dir());
        }
        set
    }

    pub fn add_file(&mut self, path: &Path) {
        self.files.insert(normalize(path));
    }

    /// Watch everything below `dir`.
    pub fn add_dir(&mut self, dir: &Path) {
        let dir = normalize(dir);
        if !self.dirs.contains(&dir) {
            self.dirs.push(dir);
        }
    }

    pub fn ignore(&mut self, path: &Path) {
        self.ignored.insert(normalize(path));
    }

    /// Whether a change to `path` affects the build.
    pub fn matches(&self, path: &Path) -> bool {
        if is_temp_file(path) {
            return false;
        }
        let path = normalize(path);
        if self.ignored.contains(&path) {
            return false;
        }
        self.files.contains(&path) || self.dirs.iter().any(|d| path.starts_with(d))
    }

    /// Paths to register with the OS watcher: the parent directory of every
    /// file (files get replaced on save, so watching the file itself loses
    /// track of it) and every directory recursively.
    fn roots(&self) -> Vec<(PathBuf, RecursiveMode)> {
        let mut roots: Vec<(PathBuf, RecursiveMode)> = Vec::new();
        for file in &self.files {
            if let Some(parent) = file.parent()
                && !roots.iter().any(|(p, _)| p == parent)
            {
                roots.push((parent.to_path_buf(), RecursiveMode::NonRecursive));
            }
        }
        for dir in &self.dirs {
            roots.push((dir.clone(), RecursiveMode::Recursive));
        }
        roots
    }
}

/// Absolute, symlink-free form of `path`, also for files that no longer
/// exist (their parent is resolved instead).
fn normalize(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// Editor swap files, backups and dot-files.
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// Content changes only. Metadata-only modifications (mtime, chmod) and
/// access events are noise.
fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Paths of `event` worth a rebuild.
pub fn relevant_paths(event: &notify::Event, set: &WatchSet) -> Vec<PathBuf> {
    if !is_content_change(&event.kind) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| set.matches(p))
        .cloned()
        .collect()
}

/// Bridges `notify` to the watch loop's event queue.
pub struct FsWatcher {
    watcher: RecommendedWatcher,
    set: Arc<Mutex<WatchSet>>,
    registered: HashSet<PathBuf>,
}

impl FsWatcher {
    pub fn new(events: Sender<WatchEvent>, cancel: CancelToken) -> Result<Self, WatchError> {
        let set = Arc::new(Mutex::new(WatchSet::default()));
        let filter = Arc::clone(&set);
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let paths = {
                        let set = filter.lock().unwrap_or_else(PoisonError::into_inner);
                        relevant_paths(&event, &set)
                    };
                    for path in paths {
                        tracing::debug!("{:?} {}", event.kind, path.display());
                        cancel.cancel();
                        let _ = events.send(WatchEvent::Changed(path));
                    }
                }
                Err(e) => tracing::warn!("watch error: {e}"),
            }
        })?;
        Ok(Self {
            watcher,
            set,
            registered: HashSet::new(),
        })
    }

    /// Replace the filter and start watching any roots not seen before.
    /// Roots that don't exist yet are skipped until a later update.
    pub fn update(&mut self, set: WatchSet) -> Result<(), WatchError> {
        for (root, mode) in set.roots() {
            if self.registered.contains(&root) || !root.exists() {
                continue;
            }
            self.watcher.watch(&root, mode)?;
            tracing::debug!("watching {}", root.display());
            self.registered.insert(root);
        }
        *self.set.lock().unwrap_or_else(PoisonError::into_inner) = set;
        Ok(())
    }
}
