//! The model context: lifecycle, on-demand materialization, working copies
//! and change notification

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::body::{Body, SourceAttributes};
use crate::cache::{CacheStats, ModelCache, ModelConfig};
use crate::delta::{DeltaBuilder, DeltaFlags, ElementDelta};
use crate::error::{Existence, ModelError, Result};
use crate::events::{
    ChangeEventKind, ElementChangeEvent, ElementChangeListener, ListenerId, Notifier,
};
use crate::model::{Element, ElementKind, has_file_extension};
use crate::processor::DeltaProcessor;
use crate::reconcile::structure_delta;
use crate::resource::{
    ResourceChangeListener, ResourceDelta, ResourcePath, ResourceStore, SubscriptionId,
};
use crate::structure::{FileStructure, StructureBuilder, assemble};

/// Mirrors a [`ResourceStore`] as a tree of elements.
///
/// Created by [`ModelManager::startup`], which subscribes it to the store.
/// After [`ModelManager::shutdown`] every operation fails with
/// [`ModelError::NotRunning`].
pub struct ModelManager {
    store: Arc<dyn ResourceStore>,
    builder: Arc<dyn StructureBuilder>,
    config: ModelConfig,
    cache: Mutex<ModelCache>,
    working_copies: DashMap<Element, String>,
    notifier: Notifier,
    subscription: Mutex<Option<SubscriptionId>>,
    running: AtomicBool,
}

struct StoreSubscription {
    manager: Weak<ModelManager>,
}

impl ResourceChangeListener for StoreSubscription {
    fn resource_changed(&self, delta: &ResourceDelta) {
        if let Some(manager) = self.manager.upgrade() {
            manager.process_batch(delta);
        }
    }
}

impl ModelManager {
    pub fn startup(
        store: Arc<dyn ResourceStore>,
        builder: Arc<dyn StructureBuilder>,
        config: ModelConfig,
    ) -> Result<Arc<ModelManager>> {
        if config.file_cache_capacity == 0 {
            return Err(ModelError::invalid("file cache capacity must be at least 1"));
        }
        let manager = Arc::new(ModelManager {
            store,
            builder,
            cache: Mutex::new(ModelCache::new(&config)),
            config,
            working_copies: DashMap::new(),
            notifier: Notifier::default(),
            subscription: Mutex::new(None),
            running: AtomicBool::new(true),
        });
        // Deltas compare against the pre-batch project list, so it must exist
        // before the first notification.
        {
            let mut cache = manager.cache.lock();
            manager.open_locked(&mut cache, &Element::model())?;
        }
        let subscription = StoreSubscription {
            manager: Arc::downgrade(&manager),
        };
        let id = manager.store.subscribe(Arc::new(subscription));
        *manager.subscription.lock() = Some(id);
        info!(
            "Model started (file cache capacity {})",
            manager.config.file_cache_capacity
        );
        Ok(manager)
    }

    /// Detaches from the store and drops all state. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(id) = self.subscription.lock().take() {
            self.store.unsubscribe(id);
        }
        self.cache.lock().clear();
        self.working_copies.clear();
        self.notifier.clear();
        info!("Model shut down");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ModelError::NotRunning)
        }
    }

    // ── Read API ────────────────────────────────────────────

    /// The body of `element`, materializing it on a cache miss.
    pub fn body(&self, element: &Element) -> Result<Arc<Body>> {
        self.ensure_running()?;
        let mut cache = self.cache.lock();
        self.open_locked(&mut cache, element)
    }

    pub fn children(&self, element: &Element) -> Result<Vec<Element>> {
        Ok(self.body(element)?.children().to_vec())
    }

    pub fn projects(&self) -> Result<Vec<Element>> {
        self.children(&Element::model())
    }

    pub fn files(&self, project: &Element) -> Result<Vec<Element>> {
        expect_kind(project, ElementKind::Project)?;
        self.children(project)
    }

    pub fn vars(&self, file: &Element) -> Result<Vec<Element>> {
        self.constructs_of(file, ElementKind::Var)
    }

    pub fn defs(&self, file: &Element) -> Result<Vec<Element>> {
        self.constructs_of(file, ElementKind::Def)
    }

    fn constructs_of(&self, file: &Element, kind: ElementKind) -> Result<Vec<Element>> {
        expect_kind(file, ElementKind::File)?;
        Ok(self
            .body(file)?
            .children()
            .iter()
            .filter(|child| child.kind() == kind)
            .cloned()
            .collect())
    }

    pub fn attributes(&self, element: &Element) -> Result<Option<SourceAttributes>> {
        Ok(self.body(element)?.attributes().cloned())
    }

    pub fn parameter_names(&self, def: &Element) -> Result<Vec<String>> {
        expect_kind(def, ElementKind::Def)?;
        Ok(self
            .attributes(def)?
            .map(|attributes| attributes.parameter_names)
            .unwrap_or_default())
    }

    /// Whether `element` currently exists.
    ///
    /// Structural elements are checked against the store without
    /// materializing anything; source constructs require their file's body.
    pub fn exists(&self, element: &Element) -> bool {
        if !self.is_running() {
            return false;
        }
        match element.kind() {
            ElementKind::Model => true,
            ElementKind::Project | ElementKind::File => self.validate_existence(element).is_ok(),
            ElementKind::Var | ElementKind::Def => self.body(element).is_ok(),
        }
    }

    pub(crate) fn project_names(&self) -> Result<Vec<String>> {
        Ok(self
            .projects()?
            .iter()
            .map(|project| project.name().to_string())
            .collect())
    }

    pub(crate) fn store(&self) -> &dyn ResourceStore {
        self.store.as_ref()
    }

    // ── Materialization ─────────────────────────────────────

    // Called with the cache lock held for the whole build.
    fn open_locked(&self, cache: &mut ModelCache, element: &Element) -> Result<Arc<Body>> {
        if let Some(body) = cache.get(element) {
            return Ok(body);
        }
        match element.kind() {
            ElementKind::Var | ElementKind::Def => {
                let missing = || ModelError::not_found(element, Existence::Missing);
                let file = element.parent().ok_or_else(missing)?;
                if cache.get(file).is_some() {
                    // Opening the file installed the bodies of all its children.
                    return cache.get(element).ok_or_else(missing);
                }
                // Read from the build itself since the cache may not keep it.
                let structure = self.open_file_locked(cache, file)?;
                structure.children.get(element).cloned().ok_or_else(missing)
            }
            ElementKind::File => Ok(self.open_file_locked(cache, element)?.body),
            ElementKind::Model | ElementKind::Project => {
                if let Some(parent) = element.parent() {
                    self.open_locked(cache, parent)?;
                }
                self.validate_existence(element)?;
                let body = Arc::new(self.build_container(element)?);
                debug!("Materialized {} ({} children)", element, body.children().len());
                cache.put(element, body.clone());
                Ok(body)
            }
        }
    }

    fn open_file_locked(&self, cache: &mut ModelCache, file: &Element) -> Result<FileStructure> {
        if let Some(project) = file.parent() {
            self.open_locked(cache, project)?;
        }
        self.validate_existence(file)?;
        let structure = self.build_file(file)?;
        install_structure(cache, file, structure.clone());
        Ok(structure)
    }

    fn validate_existence(&self, element: &Element) -> Result<()> {
        match element.kind() {
            ElementKind::Model => Ok(()),
            ElementKind::Project => {
                let info = self
                    .store
                    .project(element.name())
                    .map_err(ModelError::store)?
                    .ok_or_else(|| ModelError::not_found(element, Existence::Missing))?;
                if !info.open {
                    Err(ModelError::not_found(element, Existence::NotOpen))
                } else if !info.qualifies {
                    Err(ModelError::not_found(element, Existence::NotQualifying))
                } else {
                    Ok(())
                }
            }
            ElementKind::File => {
                if let Some(project) = element.parent() {
                    self.validate_existence(project)?;
                }
                if self.working_copies.contains_key(element)
                    || self.store.exists(&resource_path(element)?)
                {
                    Ok(())
                } else {
                    Err(ModelError::not_found(element, Existence::Missing))
                }
            }
            ElementKind::Var | ElementKind::Def => Ok(()),
        }
    }

    fn build_container(&self, element: &Element) -> Result<Body> {
        let children = match element.kind() {
            ElementKind::Model => self
                .store
                .projects()
                .map_err(ModelError::store)?
                .into_iter()
                .filter(|info| info.is_model_project())
                .filter_map(|info| match Element::project(&info.name) {
                    Ok(project) => Some(project),
                    Err(err) => {
                        warn!("Skipping project '{}': {}", info.name, err);
                        None
                    }
                })
                .collect(),
            ElementKind::Project => {
                let mut files: Vec<Element> = self
                    .store
                    .members(element.name())
                    .map_err(ModelError::store)?
                    .iter()
                    .filter(|name| has_file_extension(name))
                    .filter_map(|name| element.file(name).ok())
                    .collect();
                // Working copies without a persisted file still belong to the project.
                let mut buffered: Vec<Element> = self
                    .working_copies
                    .iter()
                    .map(|entry| entry.key().clone())
                    .filter(|file| file.parent() == Some(element) && !files.contains(file))
                    .collect();
                buffered.sort_by(|a, b| a.name().cmp(b.name()));
                files.extend(buffered);
                files
            }
            _ => return Err(ModelError::invalid(format!("{element} is not a container"))),
        };
        Ok(Body::new(children))
    }

    fn build_file(&self, file: &Element) -> Result<FileStructure> {
        let source = match self.working_copies.get(file) {
            Some(buffer) => buffer.value().clone(),
            None => self
                .store
                .read(&resource_path(file)?)
                .map_err(|err| ModelError::build(file, err))?,
        };
        let constructs = self
            .builder
            .build(file, &source)
            .map_err(|err| ModelError::build(file, err))?;
        let structure = assemble(file, &source, constructs)?;
        debug!("Built {} ({} children)", file, structure.children.len());
        Ok(structure)
    }

    // ── Tree maintenance used by delta processing ───────────

    /// Attaches `element` to its parent's cached body and drops any stale
    /// body of its own.
    pub(crate) fn add_to_model(&self, element: &Element) {
        let mut cache = self.cache.lock();
        if let Some(parent) = element.parent() {
            if let Some(updated) = cache.peek(parent).and_then(|body| body.with_child(element)) {
                cache.put(parent, Arc::new(updated));
            }
        }
        self.close_locked(&mut cache, element);
    }

    /// Detaches `element` from its parent's cached body and drops its body.
    pub(crate) fn remove_from_model(&self, element: &Element) {
        let mut cache = self.cache.lock();
        if let Some(parent) = element.parent() {
            if let Some(updated) = cache.peek(parent).and_then(|body| body.without_child(element))
            {
                cache.put(parent, Arc::new(updated));
            }
        }
        self.close_locked(&mut cache, element);
    }

    /// Whether the parent's cached body lists `element`. `None` if the parent
    /// has no cached body.
    pub(crate) fn is_attached(&self, element: &Element) -> Option<bool> {
        let cache = self.cache.lock();
        let parent = element.parent()?;
        cache.peek(parent).map(|body| body.contains(element))
    }

    /// Drops the cached bodies of `element` and its descendants.
    pub(crate) fn close(&self, element: &Element) {
        let mut cache = self.cache.lock();
        self.close_locked(&mut cache, element);
    }

    fn close_locked(&self, cache: &mut ModelCache, element: &Element) {
        if cache.is_pinned(element) {
            return;
        }
        if element.kind() == ElementKind::File {
            // Child bodies can outlive an evicted file body.
            cache.remove(element);
            return;
        }
        let Some(body) = cache.peek(element) else {
            return;
        };
        for child in body.children() {
            self.close_locked(cache, child);
        }
        cache.remove(element);
    }

    pub fn is_working_copy(&self, file: &Element) -> bool {
        self.working_copies.contains_key(file)
    }

    // ── Working copies ──────────────────────────────────────

    /// Puts `file` in working copy mode with `text` as its buffer, or the
    /// persisted contents when `text` is `None`.
    pub fn become_working_copy(&self, file: &Element, text: Option<String>) -> Result<()> {
        self.ensure_running()?;
        expect_kind(file, ElementKind::File)?;
        if self.is_working_copy(file) {
            return Err(ModelError::invalid(format!("{file} is already a working copy")));
        }
        if let Some(project) = file.parent() {
            self.validate_existence(project)?;
        }
        let path = resource_path(file)?;
        let persisted = self.store.exists(&path);
        let text = match text {
            Some(text) => text,
            None if persisted => self
                .store
                .read(&path)
                .map_err(|err| ModelError::build(file, err))?,
            None => String::new(),
        };

        self.working_copies.insert(file.clone(), text);
        {
            let mut cache = self.cache.lock();
            let structure = match self.build_file(file) {
                Ok(structure) => structure,
                Err(err) => {
                    drop(cache);
                    self.working_copies.remove(file);
                    return Err(err);
                }
            };
            cache.pin(file);
            install_structure(&mut cache, file, structure);
        }
        info!("{} is now a working copy", file);

        let mut builder = DeltaBuilder::new(Element::model());
        if persisted {
            builder.changed(file, DeltaFlags::WORKING_COPY);
        } else {
            self.add_to_model(file);
            builder.added(file, DeltaFlags::WORKING_COPY);
        }
        self.fire(ChangeEventKind::PostChange, builder.into_delta());
        Ok(())
    }

    /// Replaces the buffer of a working copy. The model sees the new text on
    /// the next [`reconcile`](Self::reconcile).
    pub fn update_working_copy(&self, file: &Element, text: impl Into<String>) -> Result<()> {
        self.ensure_running()?;
        match self.working_copies.get_mut(file) {
            Some(mut buffer) => {
                *buffer = text.into();
                Ok(())
            }
            None => Err(ModelError::invalid(format!("{file} is not a working copy"))),
        }
    }

    /// Rebuilds a working copy from its buffer and reports the fine-grained
    /// changes. Returns the delta that was fired, if any.
    pub fn reconcile(&self, file: &Element) -> Result<Option<ElementDelta>> {
        self.ensure_running()?;
        if !self.is_working_copy(file) {
            return Err(ModelError::invalid(format!("{file} is not a working copy")));
        }
        let builder = {
            let mut cache = self.cache.lock();
            let old = match cache.peek(file) {
                Some(body) => FileStructure {
                    body,
                    children: cache.children_of(file),
                },
                None => FileStructure::empty(),
            };
            let new = self.build_file(file)?;
            let builder = structure_delta(file, &old, &new);
            install_structure(&mut cache, file, new);
            builder
        };
        if builder.is_empty() {
            debug!("Reconciled {} without changes", file);
            return Ok(None);
        }
        let delta = builder.into_delta();
        self.fire(ChangeEventKind::PostReconcile, delta.clone());
        Ok(Some(delta))
    }

    /// Leaves working copy mode, discarding the buffer.
    pub fn release_working_copy(&self, file: &Element) -> Result<()> {
        self.ensure_running()?;
        if self.working_copies.remove(file).is_none() {
            return Err(ModelError::invalid(format!("{file} is not a working copy")));
        }
        {
            let mut cache = self.cache.lock();
            cache.unpin(file);
            cache.remove(file);
        }
        info!("{} is no longer a working copy", file);

        let mut builder = DeltaBuilder::new(Element::model());
        if self.store.exists(&resource_path(file)?) {
            builder.changed(file, DeltaFlags::WORKING_COPY);
        } else {
            self.remove_from_model(file);
            builder.removed(file, DeltaFlags::WORKING_COPY);
        }
        self.fire(ChangeEventKind::PostChange, builder.into_delta());
        Ok(())
    }

    // ── Notification ────────────────────────────────────────

    pub fn add_listener(&self, listener: impl ElementChangeListener + 'static) -> ListenerId {
        self.notifier.add(Arc::new(listener))
    }

    /// Returns whether the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.notifier.remove(id)
    }

    fn fire(&self, kind: ChangeEventKind, delta: ElementDelta) {
        self.notifier.fire(&ElementChangeEvent::new(kind, delta));
    }

    /// Translates one store batch into a model delta and notifies listeners.
    pub fn process_batch(&self, delta: &ResourceDelta) {
        if !self.is_running() {
            return;
        }
        let mut processor = DeltaProcessor::new(self);
        delta.accept(&mut processor);
        let builder = processor.into_builder();
        if builder.is_empty() {
            debug!("Batch had no effect on the model");
            return;
        }
        self.fire(ChangeEventKind::PostChange, builder.into_delta());
    }
}

impl Drop for ModelManager {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.get_mut().take() {
            self.store.unsubscribe(id);
        }
    }
}

fn install_structure(cache: &mut ModelCache, file: &Element, structure: FileStructure) {
    cache.put(file, structure.body);
    // The put may evict the file itself when pinned entries fill the cache.
    if cache.peek(file).is_some() {
        cache.replace_children(file, structure.children);
    } else {
        cache.remove(file);
    }
}

fn expect_kind(element: &Element, kind: ElementKind) -> Result<()> {
    if element.kind() == kind {
        Ok(())
    } else {
        Err(ModelError::invalid(format!("expected a {kind:?}, got {element:?}")))
    }
}

fn resource_path(element: &Element) -> Result<ResourcePath> {
    element
        .resource_path()
        .ok_or_else(|| ModelError::invalid(format!("{element} has no underlying resource")))
}
