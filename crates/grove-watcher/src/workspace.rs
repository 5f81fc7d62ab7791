//! Filesystem-backed resource store
//!
//! The workspace root directory holds one sub-directory per project. A
//! project qualifies for the model when it contains the nature marker file;
//! its members are the regular files directly inside it.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use grove_core::{
    ProjectInfo, RecordedChange, ResourceChange, ResourceChangeListener, ResourceDelta,
    ResourceFlags, ResourceKind, ResourcePath, ResourceStore, Subscribers, SubscriptionId,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_NATURE_MARKER: &str = ".grove";

/// Settings of the filesystem store and its watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// File whose presence makes a project part of the model.
    pub nature_marker: String,
    /// Globs relative to the workspace root. A path is ignored when it or
    /// one of its ancestors matches.
    pub ignore: Vec<String>,
    /// Quiet period before a batch of filesystem events is delivered.
    pub debounce_ms: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        WorkspaceConfig {
            nature_marker: DEFAULT_NATURE_MARKER.to_string(),
            ignore: vec!["**/.git".to_string(), "**/target".to_string()],
            debounce_ms: 50,
        }
    }
}

pub struct FsWorkspace {
    root: PathBuf,
    config: WorkspaceConfig,
    ignore: GlobSet,
    closed: RwLock<BTreeSet<String>>,
    subscribers: Subscribers,
}

impl FsWorkspace {
    pub fn open(root: impl AsRef<Path>, config: WorkspaceConfig) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .with_context(|| format!("Cannot open workspace {}", root.display()))?;
        if !root.is_dir() {
            bail!("Workspace root {} is not a directory", root.display());
        }
        let ignore = compile_ignore(&config.ignore)?;
        info!("Opened workspace {}", root.display());
        Ok(FsWorkspace {
            root,
            config,
            ignore,
            closed: RwLock::new(BTreeSet::new()),
            subscribers: Subscribers::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Location of `path` on disk.
    pub fn local_path(&self, path: &ResourcePath) -> PathBuf {
        path.segments()
            .iter()
            .fold(self.root.clone(), |local, segment| local.join(segment))
    }

    /// Store path of a location on disk, or `None` when it lies outside the
    /// workspace or is not valid UTF-8.
    pub fn resource_path(&self, local: &Path) -> Option<ResourcePath> {
        let relative = local.strip_prefix(&self.root).ok()?;
        let mut path = ResourcePath::root();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => path = path.join(segment.to_str()?),
                _ => return None,
            }
        }
        Some(path)
    }

    pub fn is_ignored(&self, path: &ResourcePath) -> bool {
        let segments = path.segments();
        if segments.first().is_some_and(|project| project.starts_with('.')) {
            return true;
        }
        (1..=segments.len()).any(|len| self.ignore.is_match(segments[..len].join("/")))
    }

    pub fn is_closed(&self, project: &str) -> bool {
        self.closed.read().contains(project)
    }

    /// Closes a project. Its members become inaccessible until it is
    /// reopened. Closing a closed project does nothing.
    pub fn close_project(&self, name: &str) -> Result<()> {
        self.require_project(name)?;
        if !self.closed.write().insert(name.to_string()) {
            return Ok(());
        }
        info!("Closed project {}", name);
        self.publish(&open_state_batch(name));
        Ok(())
    }

    pub fn open_project(&self, name: &str) -> Result<()> {
        self.require_project(name)?;
        if !self.closed.write().remove(name) {
            return Ok(());
        }
        info!("Opened project {}", name);
        self.publish(&open_state_batch(name));
        Ok(())
    }

    /// Delivers a batch to every subscriber.
    pub fn publish(&self, batch: &ResourceDelta) {
        if batch.is_empty() {
            return;
        }
        debug!(
            "Publishing batch with {} top-level changes",
            batch.children.len()
        );
        self.subscribers.dispatch(batch);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// A removed project directory takes its closed state with it.
    pub(crate) fn forget_project(&self, name: &str) {
        self.closed.write().remove(name);
    }

    fn require_project(&self, name: &str) -> Result<()> {
        if self.project(name)?.is_none() {
            bail!("No project named {name} in {}", self.root.display());
        }
        Ok(())
    }

    fn is_project_dir(&self, name: &str) -> bool {
        !name.is_empty()
            && !name.contains('/')
            && !self.is_ignored(&ResourcePath::root().join(name))
            && self.root.join(name).is_dir()
    }

    fn info(&self, name: &str) -> ProjectInfo {
        ProjectInfo {
            name: name.to_string(),
            open: !self.is_closed(name),
            qualifies: self.root.join(name).join(&self.config.nature_marker).is_file(),
        }
    }
}

impl ResourceStore for FsWorkspace {
    fn projects(&self) -> Result<Vec<ProjectInfo>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Cannot list workspace {}", self.root.display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str()
                && self.is_project_dir(name)
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names.iter().map(|name| self.info(name)).collect())
    }

    fn project(&self, name: &str) -> Result<Option<ProjectInfo>> {
        Ok(self.is_project_dir(name).then(|| self.info(name)))
    }

    fn members(&self, project: &str) -> Result<Vec<String>> {
        if !self.is_project_dir(project) || self.is_closed(project) {
            bail!("Project {project} is not accessible");
        }
        let dir = self.root.join(project);
        let entries =
            fs::read_dir(&dir).with_context(|| format!("Cannot list {}", dir.display()))?;
        let project_path = ResourcePath::root().join(project);
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name == self.config.nature_marker
                || !entry.file_type()?.is_file()
                || self.is_ignored(&project_path.join(&name))
            {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &ResourcePath) -> bool {
        match path.segments() {
            [] => true,
            [project] => self.is_project_dir(project),
            [project, ..] => {
                self.is_project_dir(project)
                    && !self.is_closed(project)
                    && !self.is_ignored(path)
                    && self.local_path(path).exists()
            }
        }
    }

    fn read(&self, path: &ResourcePath) -> Result<String> {
        let [project, _, ..] = path.segments() else {
            bail!("{path} is not a file");
        };
        if self.is_closed(project) {
            bail!("Project {project} is closed");
        }
        let local = self.local_path(path);
        fs::read_to_string(&local).with_context(|| format!("Cannot read {}", local.display()))
    }

    fn subscribe(&self, listener: Arc<dyn ResourceChangeListener>) -> SubscriptionId {
        self.subscribers.add(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }
}

fn compile_ignore(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid ignore glob '{pattern}'"))?);
    }
    Ok(builder.build()?)
}

fn open_state_batch(project: &str) -> ResourceDelta {
    let mut batch = ResourceDelta::root();
    batch.record(
        RecordedChange::new(
            ResourcePath::root().join(project),
            ResourceKind::Container,
            ResourceChange::Changed,
        )
        .flags(ResourceFlags::OPEN),
    );
    batch
}
