//! Body cache with per-kind storage and a bounded, overflowing LRU for files

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::body::Body;
use crate::model::{Element, ElementKind};

/// Default number of file bodies kept in the bounded store.
pub const DEFAULT_FILE_CAPACITY: usize = 100;

/// Sizing knobs for the model cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Number of file bodies kept before least-recently-used ones are evicted.
    pub file_cache_capacity: usize,
    /// Initial capacity of the project table.
    pub project_cache_hint: usize,
    /// Initial capacity of the table holding bodies of file children.
    pub children_cache_hint: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            file_cache_capacity: DEFAULT_FILE_CAPACITY,
            project_cache_hint: 5,
            // average 20 children per file
            children_cache_hint: DEFAULT_FILE_CAPACITY * 20,
        }
    }
}

/// Bounded store of file bodies evicting the least-recently-used entries.
///
/// Each entry costs one unit of space. Pinned entries are never evicted; when
/// they alone exceed the limit the store overflows until they are unpinned.
#[derive(Debug)]
pub struct ElementCache {
    lru: LruCache<Element, Arc<Body>>,
    default_limit: usize,
    space_limit: usize,
    space_limit_parent: Option<Element>,
    pinned: HashSet<Element>,
}

impl ElementCache {
    pub fn new(limit: usize) -> Self {
        ElementCache {
            lru: LruCache::unbounded(),
            default_limit: limit,
            space_limit: limit,
            space_limit_parent: None,
            pinned: HashSet::new(),
        }
    }

    /// Looks up a body and marks it most recently used.
    pub fn get(&mut self, element: &Element) -> Option<Arc<Body>> {
        self.lru.get(element).cloned()
    }

    /// Looks up a body without touching its recency.
    pub fn peek(&self, element: &Element) -> Option<Arc<Body>> {
        self.lru.peek(element).cloned()
    }

    /// Inserts a body as most recently used. Returns the elements evicted to
    /// make room for it.
    pub fn put(&mut self, element: Element, body: Arc<Body>) -> Vec<Element> {
        self.lru.put(element, body);
        self.shrink()
    }

    pub fn remove(&mut self, element: &Element) -> Option<Arc<Body>> {
        self.lru.pop(element)
    }

    pub fn contains(&self, element: &Element) -> bool {
        self.lru.contains(element)
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    pub fn space_limit(&self) -> usize {
        self.space_limit
    }

    /// Number of entries held beyond the space limit.
    pub fn overflow(&self) -> usize {
        self.lru.len().saturating_sub(self.space_limit)
    }

    pub fn pin(&mut self, element: &Element) {
        self.pinned.insert(element.clone());
    }

    /// Unpins an entry and sweeps any overflow it was holding up.
    pub fn unpin(&mut self, element: &Element) -> Vec<Element> {
        self.pinned.remove(element);
        self.shrink()
    }

    pub fn is_pinned(&self, element: &Element) -> bool {
        self.pinned.contains(element)
    }

    /// Widens the limit so that `parent`'s `child_count` files fit alongside
    /// the current entries. Returns elements evicted while sweeping overflow.
    pub fn ensure_space_limit(&mut self, child_count: usize, parent: &Element) -> Vec<Element> {
        let needed = 1 + (child_count + self.overflow()) * 4 / 3;
        if self.space_limit >= needed {
            return Vec::new();
        }
        let evicted = self.shrink();
        debug!(
            "Widening file cache limit {} -> {} for {}",
            self.space_limit, needed, parent
        );
        self.space_limit = needed;
        self.space_limit_parent = Some(parent.clone());
        evicted
    }

    /// Restores the default limit if it was widened for `parent`.
    pub fn reset_space_limit(&mut self, parent: &Element) -> Vec<Element> {
        if self.space_limit_parent.as_ref() != Some(parent) {
            return Vec::new();
        }
        self.space_limit = self.default_limit;
        self.space_limit_parent = None;
        self.shrink()
    }

    fn shrink(&mut self) -> Vec<Element> {
        if self.lru.len() <= self.space_limit {
            return Vec::new();
        }
        let excess = self.lru.len() - self.space_limit;
        // Least recently used first.
        let victims: Vec<Element> = self
            .lru
            .iter()
            .rev()
            .map(|(element, _)| element)
            .filter(|element| !self.pinned.contains(*element))
            .take(excess)
            .cloned()
            .collect();
        for victim in &victims {
            self.lru.pop(victim);
        }
        if !victims.is_empty() {
            debug!("Evicted {} file bodies from cache", victims.len());
        }
        victims
    }
}

/// Counters describing the cache contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub has_model: bool,
    pub projects: usize,
    pub files: usize,
    pub children: usize,
    pub file_limit: usize,
    pub file_overflow: usize,
}

/// Per-kind body storage for the whole model.
///
/// The model body is a singleton slot, project bodies are cached
/// unconditionally, file bodies live in a bounded [`ElementCache`] and the
/// bodies of source constructs are indexed by their owning file so that
/// dropping a file drops all of them.
#[derive(Debug)]
pub struct ModelCache {
    model_body: Option<Arc<Body>>,
    project_cache: HashMap<Element, Arc<Body>>,
    file_cache: ElementCache,
    children_cache: HashMap<Element, HashMap<Element, Arc<Body>>>,
}

impl ModelCache {
    pub fn new(config: &ModelConfig) -> Self {
        ModelCache {
            model_body: None,
            project_cache: HashMap::with_capacity(config.project_cache_hint),
            file_cache: ElementCache::new(config.file_cache_capacity),
            children_cache: HashMap::with_capacity(
                config.children_cache_hint / config.file_cache_capacity.max(1),
            ),
        }
    }

    /// Looks up a body, refreshing file recency.
    pub fn get(&mut self, element: &Element) -> Option<Arc<Body>> {
        match element.kind() {
            ElementKind::Model => self.model_body.clone(),
            ElementKind::Project => self.project_cache.get(element).cloned(),
            ElementKind::File => self.file_cache.get(element),
            ElementKind::Var | ElementKind::Def => self.child_body(element),
        }
    }

    /// Looks up a body without side effects.
    pub fn peek(&self, element: &Element) -> Option<Arc<Body>> {
        match element.kind() {
            ElementKind::Model => self.model_body.clone(),
            ElementKind::Project => self.project_cache.get(element).cloned(),
            ElementKind::File => self.file_cache.peek(element),
            ElementKind::Var | ElementKind::Def => self.child_body(element),
        }
    }

    pub fn put(&mut self, element: &Element, body: Arc<Body>) {
        match element.kind() {
            ElementKind::Model => self.model_body = Some(body),
            ElementKind::Project => {
                let child_count = body.children().len();
                self.project_cache.insert(element.clone(), body);
                let evicted = self.file_cache.ensure_space_limit(child_count, element);
                self.drop_children_of(&evicted);
            }
            ElementKind::File => {
                let evicted = self.file_cache.put(element.clone(), body);
                self.drop_children_of(&evicted);
            }
            ElementKind::Var | ElementKind::Def => {
                if let Some(owner) = element.parent() {
                    self.children_cache
                        .entry(owner.clone())
                        .or_default()
                        .insert(element.clone(), body);
                }
            }
        }
    }

    pub fn remove(&mut self, element: &Element) {
        match element.kind() {
            ElementKind::Model => self.model_body = None,
            ElementKind::Project => {
                self.project_cache.remove(element);
                let evicted = self.file_cache.reset_space_limit(element);
                self.drop_children_of(&evicted);
            }
            ElementKind::File => {
                self.file_cache.remove(element);
                self.children_cache.remove(element);
            }
            ElementKind::Var | ElementKind::Def => {
                if let Some(owner) = element.parent() {
                    if let Some(children) = self.children_cache.get_mut(owner) {
                        children.remove(element);
                    }
                }
            }
        }
    }

    /// Replaces every cached child body of `file` with `bodies`.
    pub fn replace_children(&mut self, file: &Element, bodies: HashMap<Element, Arc<Body>>) {
        if bodies.is_empty() {
            self.children_cache.remove(file);
        } else {
            self.children_cache.insert(file.clone(), bodies);
        }
    }

    /// Snapshot of the child bodies cached for `file`.
    pub fn children_of(&self, file: &Element) -> HashMap<Element, Arc<Body>> {
        self.children_cache.get(file).cloned().unwrap_or_default()
    }

    pub fn pin(&mut self, file: &Element) {
        self.file_cache.pin(file);
    }

    pub fn unpin(&mut self, file: &Element) {
        let evicted = self.file_cache.unpin(file);
        self.drop_children_of(&evicted);
    }

    pub fn is_pinned(&self, file: &Element) -> bool {
        self.file_cache.is_pinned(file)
    }

    /// Drops every body.
    pub fn clear(&mut self) {
        self.model_body = None;
        self.project_cache.clear();
        self.file_cache = ElementCache::new(self.file_cache.default_limit);
        self.children_cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            has_model: self.model_body.is_some(),
            projects: self.project_cache.len(),
            files: self.file_cache.len(),
            children: self.children_cache.values().map(HashMap::len).sum(),
            file_limit: self.file_cache.space_limit(),
            file_overflow: self.file_cache.overflow(),
        }
    }

    fn child_body(&self, element: &Element) -> Option<Arc<Body>> {
        let owner = element.parent()?;
        self.children_cache.get(owner)?.get(element).cloned()
    }

    fn drop_children_of(&mut self, evicted: &[Element]) {
        for file in evicted {
            self.children_cache.remove(file);
        }
    }
}
