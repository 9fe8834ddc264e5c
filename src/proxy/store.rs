//! Keyed object store with field indexes
//!
//! Each informer owns one store: a `(namespace, name)` keyed map of objects
//! plus named field indexes mapping a dotted path to the set of objects
//! whose rendered field equals a value. Watch events mutate the store;
//! readers get cloned snapshots so a LIST is never interleaved with a
//! concurrently arriving event.

use std::collections::{HashMap, HashSet};

use crate::meta::selectors::{FieldSelector, LabelSelector};
use crate::meta::{DynamicObject, ObjectKey};

use super::indexers::FieldIndexer;

/// In-memory object store for one resource collection
pub struct Store {
    objects: HashMap<ObjectKey, DynamicObject>,
    indexers: Vec<FieldIndexer>,
    /// path → rendered value → keys
    indexes: HashMap<String, HashMap<String, HashSet<ObjectKey>>>,
    /// most recently observed collection resourceVersion
    resource_version: String,
}

impl Store {
    pub fn new(indexers: Vec<FieldIndexer>) -> Self {
        let indexes = indexers
            .iter()
            .map(|indexer| (indexer.path.clone(), HashMap::new()))
            .collect();
        Self {
            objects: HashMap::new(),
            indexers,
            indexes,
            resource_version: String::new(),
        }
    }

    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }

    pub fn set_resource_version(&mut self, rv: &str) {
        if !rv.is_empty() {
            self.resource_version = rv.to_string();
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Insert or update an object, maintaining every index
    pub fn upsert(&mut self, obj: DynamicObject) {
        let key = obj.key();
        if let Some(old) = self.objects.remove(&key) {
            self.unindex(&key, &old);
        }
        self.index(&key, &obj);
        self.set_resource_version(obj.resource_version());
        self.objects.insert(key, obj);
    }

    /// Remove an object, maintaining every index
    pub fn delete(&mut self, key: &ObjectKey) {
        if let Some(old) = self.objects.remove(key) {
            self.unindex(key, &old);
        }
    }

    /// Replace the entire contents with a freshly listed collection
    pub fn replace(&mut self, objects: Vec<DynamicObject>, resource_version: &str) {
        self.objects.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
        for obj in objects {
            let key = obj.key();
            self.index(&key, &obj);
            self.objects.insert(key, obj);
        }
        self.set_resource_version(resource_version);
    }

    /// Get one object by key
    pub fn get(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .get(&ObjectKey::new(namespace, name))
            .cloned()
    }

    /// List objects matching a namespace and selectors, as a consistent
    /// snapshot in freshly allocated storage.
    ///
    /// Equality conjuncts on indexed paths are served from the indexes
    /// (candidate-set intersection); every remaining conjunct is applied by
    /// scanning.
    pub fn list(
        &self,
        namespace: &str,
        label_selector: &LabelSelector,
        field_selector: &FieldSelector,
    ) -> Vec<DynamicObject> {
        // narrow with indexes first
        let mut candidates: Option<HashSet<ObjectKey>> = None;
        let mut residual = Vec::new();
        for req in &field_selector.requirements {
            if req.negated || !self.indexes.contains_key(&req.path) {
                residual.push(req.clone());
                continue;
            }
            let keys = self
                .indexes
                .get(&req.path)
                .and_then(|index| index.get(&req.value))
                .cloned()
                .unwrap_or_default();
            candidates = Some(match candidates {
                None => keys,
                Some(existing) => existing.intersection(&keys).cloned().collect(),
            });
        }
        let residual_selector = FieldSelector {
            requirements: residual,
        };

        let mut matched: Vec<DynamicObject> = self
            .objects
            .iter()
            .filter(|(key, _)| {
                candidates
                    .as_ref()
                    .map(|set| set.contains(*key))
                    .unwrap_or(true)
            })
            .filter(|(key, _)| namespace.is_empty() || key.namespace == namespace)
            .filter(|(_, obj)| label_selector.matches(obj.labels()))
            .filter(|(_, obj)| residual_selector.matches(|path| self.render_field(obj, path)))
            .map(|(_, obj)| obj.clone())
            .collect();

        matched.sort_by(|a, b| a.key().cmp(&b.key()));
        matched
    }

    /// Render a field the way the matching indexer would, falling back to
    /// the generic dotted-path lookup
    fn render_field(&self, obj: &DynamicObject, path: &str) -> Option<String> {
        for indexer in &self.indexers {
            if indexer.path == path {
                return (indexer.extract)(obj);
            }
        }
        obj.field(path)
    }

    fn index(&mut self, key: &ObjectKey, obj: &DynamicObject) {
        for indexer in &self.indexers {
            if let Some(value) = (indexer.extract)(obj) {
                if let Some(index) = self.indexes.get_mut(&indexer.path) {
                    index.entry(value).or_default().insert(key.clone());
                }
            }
        }
    }

    fn unindex(&mut self, key: &ObjectKey, obj: &DynamicObject) {
        for indexer in &self.indexers {
            if let Some(value) = (indexer.extract)(obj) {
                if let Some(index) = self.indexes.get_mut(&indexer.path) {
                    if let Some(keys) = index.get_mut(&value) {
                        keys.remove(key);
                        if keys.is_empty() {
                            index.remove(&value);
                        }
                    }
                }
            }
        }
    }
}
