//! Test utilities for Grove: an in-memory resource store and a line-based
//! structure builder

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Context, anyhow, bail};
use parking_lot::Mutex;

use crate::body::TextRange;
use crate::cache::ModelConfig;
use crate::events::{ElementChangeEvent, ElementChangeListener};
use crate::manager::ModelManager;
use crate::model::Element;
use crate::resource::{
    ProjectInfo, RecordedChange, ResourceChange, ResourceChangeListener, ResourceDelta,
    ResourceFlags, ResourceKind, ResourcePath, ResourceStore, Subscribers, SubscriptionId,
};
use crate::structure::{SourceConstruct, StructureBuilder};

#[derive(Debug, Clone, Default)]
struct ProjectState {
    open: bool,
    nature: bool,
    files: BTreeMap<String, String>,
}

/// Resource store held in memory. Every mutation is delivered to subscribers
/// as its own batch, shaped like the batches a real workspace produces.
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<BTreeMap<String, ProjectState>>,
    subscribers: Subscribers,
    fail_queries: AtomicBool,
}

fn leaf(path: &str, change: ResourceChange) -> RecordedChange {
    RecordedChange::new(ResourcePath::parse(path), ResourceKind::Leaf, change)
}

fn container(name: &str, change: ResourceChange) -> RecordedChange {
    RecordedChange::new(ResourcePath::root().join(name), ResourceKind::Container, change)
}

fn split(path: &str) -> (String, String) {
    let path = ResourcePath::parse(path);
    match path.segments() {
        [project, file] => (project.clone(), file.clone()),
        _ => panic!("expected /project/file, got {path}"),
    }
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every project query fail until reset.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    fn apply(&self, changes: Vec<RecordedChange>, mutate: impl FnOnce(&mut BTreeMap<String, ProjectState>)) {
        mutate(&mut self.projects.lock());
        let mut batch = ResourceDelta::root();
        for change in changes {
            batch.record(change);
        }
        self.subscribers.dispatch(&batch);
    }

    /// Creates an open project, with the model nature when `nature` is set.
    pub fn add_project(&self, name: &str, nature: bool) {
        self.apply(vec![container(name, ResourceChange::Added)], |projects| {
            projects.insert(
                name.to_string(),
                ProjectState {
                    open: true,
                    nature,
                    files: BTreeMap::new(),
                },
            );
        });
    }

    /// Seeds a file without notifying subscribers.
    pub fn seed(&self, path: &str, text: &str) {
        let (project, file) = split(path);
        if let Some(state) = self.projects.lock().get_mut(&project) {
            state.files.insert(file, text.to_string());
        }
    }

    /// Creates or overwrites a file.
    pub fn write(&self, path: &str, text: &str) {
        let (project, file) = split(path);
        let exists = self.exists(&ResourcePath::parse(path));
        let change = if exists {
            leaf(path, ResourceChange::Changed).flags(ResourceFlags::CONTENT)
        } else {
            leaf(path, ResourceChange::Added)
        };
        self.apply(vec![change], |projects| {
            if let Some(state) = projects.get_mut(&project) {
                state.files.insert(file, text.to_string());
            }
        });
    }

    /// Reports a content change without altering the text.
    pub fn touch(&self, path: &str) {
        self.apply(
            vec![leaf(path, ResourceChange::Changed).flags(ResourceFlags::CONTENT)],
            |_| {},
        );
    }

    /// Reports a marker-only change.
    pub fn mark(&self, path: &str) {
        self.apply(
            vec![leaf(path, ResourceChange::Changed).flags(ResourceFlags::MARKERS)],
            |_| {},
        );
    }

    pub fn copy(&self, from: &str, to: &str) {
        let text = self.read(&ResourcePath::parse(from)).unwrap_or_default();
        let (project, file) = split(to);
        self.apply(vec![leaf(to, ResourceChange::Added)], |projects| {
            if let Some(state) = projects.get_mut(&project) {
                state.files.insert(file, text);
            }
        });
    }

    pub fn delete(&self, path: &str) {
        let (project, file) = split(path);
        self.apply(vec![leaf(path, ResourceChange::Removed)], |projects| {
            if let Some(state) = projects.get_mut(&project) {
                state.files.remove(&file);
            }
        });
    }

    pub fn move_file(&self, from: &str, to: &str) {
        let (from_project, from_file) = split(from);
        let (to_project, to_file) = split(to);
        let changes = vec![
            leaf(from, ResourceChange::Removed).moved_to(ResourcePath::parse(to)),
            leaf(to, ResourceChange::Added).moved_from(ResourcePath::parse(from)),
        ];
        self.apply(changes, |projects| {
            let text = projects
                .get_mut(&from_project)
                .and_then(|state| state.files.remove(&from_file))
                .unwrap_or_default();
            if let Some(state) = projects.get_mut(&to_project) {
                state.files.insert(to_file, text);
            }
        });
    }

    pub fn delete_project(&self, name: &str) {
        self.apply(vec![container(name, ResourceChange::Removed)], |projects| {
            projects.remove(name);
        });
    }

    pub fn move_project(&self, from: &str, to: &str) {
        let changes = vec![
            container(from, ResourceChange::Removed).moved_to(ResourcePath::root().join(to)),
            container(to, ResourceChange::Added).moved_from(ResourcePath::root().join(from)),
        ];
        self.apply(changes, |projects| {
            if let Some(state) = projects.remove(from) {
                projects.insert(to.to_string(), state);
            }
        });
    }

    pub fn close_project(&self, name: &str) {
        self.set_open(name, false);
    }

    pub fn open_project(&self, name: &str) {
        self.set_open(name, true);
    }

    fn set_open(&self, name: &str, open: bool) {
        let change = container(name, ResourceChange::Changed).flags(ResourceFlags::OPEN);
        self.apply(vec![change], |projects| {
            if let Some(state) = projects.get_mut(name) {
                state.open = open;
            }
        });
    }

    /// Adds or removes the model nature of a project.
    pub fn set_nature(&self, name: &str, nature: bool) {
        let change = container(name, ResourceChange::Changed).flags(ResourceFlags::DESCRIPTION);
        self.apply(vec![change], |projects| {
            if let Some(state) = projects.get_mut(name) {
                state.nature = nature;
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl ResourceStore for MemoryStore {
    fn projects(&self) -> anyhow::Result<Vec<ProjectInfo>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(self
            .projects
            .lock()
            .iter()
            .map(|(name, state)| ProjectInfo {
                name: name.clone(),
                open: state.open,
                qualifies: state.nature,
            })
            .collect())
    }

    fn project(&self, name: &str) -> anyhow::Result<Option<ProjectInfo>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(self.projects.lock().get(name).map(|state| ProjectInfo {
            name: name.to_string(),
            open: state.open,
            qualifies: state.nature,
        }))
    }

    fn members(&self, project: &str) -> anyhow::Result<Vec<String>> {
        let projects = self.projects.lock();
        let state = projects
            .get(project)
            .filter(|state| state.open)
            .with_context(|| format!("project {project} is not accessible"))?;
        Ok(state.files.keys().cloned().collect())
    }

    fn exists(&self, path: &ResourcePath) -> bool {
        let projects = self.projects.lock();
        match path.segments() {
            [] => true,
            [project] => projects.contains_key(project),
            [project, file] => projects
                .get(project)
                .is_some_and(|state| state.open && state.files.contains_key(file)),
            _ => false,
        }
    }

    fn read(&self, path: &ResourcePath) -> anyhow::Result<String> {
        let projects = self.projects.lock();
        match path.segments() {
            [project, file] => projects
                .get(project)
                .and_then(|state| state.files.get(file))
                .cloned()
                .ok_or_else(|| anyhow!("{path} does not exist")),
            _ => bail!("{path} is not a file"),
        }
    }

    fn subscribe(&self, listener: Arc<dyn ResourceChangeListener>) -> SubscriptionId {
        self.subscribers.add(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }
}

/// Structure builder reading one declaration per line:
/// `var NAME` or `def NAME(p1, p2)`. A line `!fail` makes the build fail.
#[derive(Default)]
pub struct LineStructureBuilder {
    builds: AtomicUsize,
}

impl LineStructureBuilder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of builds performed so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl StructureBuilder for LineStructureBuilder {
    fn build(&self, _file: &Element, source: &str) -> anyhow::Result<Vec<SourceConstruct>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let mut constructs = Vec::new();
        let mut offset = 0;
        for line in source.split_inclusive('\n') {
            let text = line.trim_end();
            let full_range = TextRange::new(offset, text.len());
            if text == "!fail" {
                bail!("syntax error at offset {offset}");
            } else if let Some(name) = text.strip_prefix("var ") {
                let identifying = TextRange::new(offset + 4, name.len());
                constructs.push(SourceConstruct::var(name, full_range, identifying));
            } else if let Some(rest) = text.strip_prefix("def ") {
                let (name, params) = rest
                    .split_once('(')
                    .and_then(|(name, rest)| Some((name, rest.strip_suffix(')')?)))
                    .ok_or_else(|| anyhow!("malformed def at offset {offset}"))?;
                let parameter_names = params
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
                let identifying = TextRange::new(offset + 4, name.len());
                constructs.push(SourceConstruct::def(name, parameter_names, full_range, identifying));
            }
            offset += line.len();
        }
        Ok(constructs)
    }
}

/// Collects every event delivered to it.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ElementChangeEvent>>>,
}

impl EventLog {
    pub fn attach(manager: &ModelManager) -> Self {
        let log = EventLog::default();
        let sink = log.clone();
        manager.add_listener(move |event: &ElementChangeEvent| sink.record(event));
        log
    }

    pub fn record(&self, event: &ElementChangeEvent) {
        self.events.lock().push(event.clone());
    }

    pub fn take(&self) -> Vec<ElementChangeEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

/// Listener that always panics.
pub struct PanickingListener;

impl ElementChangeListener for PanickingListener {
    fn element_changed(&self, _event: &ElementChangeEvent) {
        panic!("listener failure");
    }
}

/// A store with project `P1` (model nature) and a running model over it.
pub fn model_fixture() -> (Arc<MemoryStore>, Arc<LineStructureBuilder>, Arc<ModelManager>) {
    model_fixture_with(ModelConfig::default())
}

pub fn model_fixture_with(
    config: ModelConfig,
) -> (Arc<MemoryStore>, Arc<LineStructureBuilder>, Arc<ModelManager>) {
    let store = MemoryStore::new();
    store.add_project("P1", true);
    store.seed("/P1/f.foo", "var x\ndef f(a, b)\n");
    let builder = LineStructureBuilder::new();
    let manager = ModelManager::startup(store.clone(), builder.clone(), config).unwrap();
    (store, builder, manager)
}

pub fn project(name: &str) -> Element {
    Element::project(name).unwrap()
}

pub fn file(project_name: &str, name: &str) -> Element {
    project(project_name).file(name).unwrap()
}
