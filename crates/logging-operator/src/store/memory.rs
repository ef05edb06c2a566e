use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};

use super::{parse_selector, ObjectStore, StoreError};

/// Write counters of an [`InMemoryStore`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: u64,
    pub updates: u64,
    pub status_updates: u64,
    pub deletes: u64,
}

/// Process-local [`ObjectStore`] with API-server-like semantics.
///
/// Writes bump `metadata.resourceVersion`; an update carrying a stale
/// resourceVersion is rejected with [`StoreError::Conflict`].
pub struct InMemoryStore<K> {
    kind: String,
    objects: Mutex<BTreeMap<String, K>>,
    version: AtomicU64,
    injected_conflicts: AtomicU32,
    creates: AtomicU64,
    updates: AtomicU64,
    status_updates: AtomicU64,
    deletes: AtomicU64,
}

impl<K> InMemoryStore<K>
where
    K: Resource + Clone + Send + Sync,
    <K as Resource>::DynamicType: Default,
{
    pub fn new() -> Self {
        Self {
            kind: K::kind(&Default::default()).to_string(),
            objects: Mutex::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            injected_conflicts: AtomicU32::new(0),
            creates: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            status_updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Seed the store without counting a write.
    pub fn insert(&self, mut obj: K) {
        self.stamp(&mut obj);
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(obj.name_any(), obj);
        }
    }

    /// Make the next `n` updates fail with a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn write_counts(&self) -> WriteCounts {
        WriteCounts {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            status_updates: self.status_updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, name: &str) -> Option<K> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(name).cloned())
    }

    fn stamp(&self, obj: &mut K) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        obj.meta_mut().resource_version = Some(version.to_string());
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, K>>, StoreError> {
        self.objects
            .lock()
            .map_err(|_| StoreError::Invalid(format!("{} store lock poisoned", self.kind)))
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn conflict(&self, name: &str, message: &str) -> StoreError {
        StoreError::Conflict {
            kind: self.kind.clone(),
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    /// Replace `name` with `obj` after the optimistic-concurrency check.
    fn replace(&self, obj: &K, keep_live: impl FnOnce(&K, &mut K)) -> Result<K, StoreError> {
        let name = obj.name_any();
        if self.take_injected_conflict() {
            return Err(self.conflict(&name, "injected conflict"));
        }
        let mut objects = self.lock()?;
        let live = objects.get(&name).ok_or_else(|| StoreError::NotFound {
            kind: self.kind.clone(),
            name: name.clone(),
        })?;
        if let Some(expected) = obj.meta().resource_version.as_deref() {
            if live.meta().resource_version.as_deref() != Some(expected) {
                return Err(self.conflict(
                    &name,
                    "the object has been modified; please apply your changes to the latest version",
                ));
            }
        }
        let mut next = obj.clone();
        keep_live(live, &mut next);
        self.stamp(&mut next);
        objects.insert(name, next.clone());
        Ok(next)
    }
}

impl<K> Default for InMemoryStore<K>
where
    K: Resource + Clone + Send + Sync,
    <K as Resource>::DynamicType: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K> ObjectStore<K> for InMemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    <K as Resource>::DynamicType: Default,
{
    async fn get(&self, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.lock()?.get(name).cloned())
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        if name.is_empty() {
            return Err(StoreError::Invalid(format!("{} without a name", self.kind)));
        }
        let mut objects = self.lock()?;
        if objects.contains_key(&name) {
            return Err(StoreError::AlreadyExists {
                kind: self.kind.clone(),
                name,
            });
        }
        let mut created = obj.clone();
        self.stamp(&mut created);
        objects.insert(name, created.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let updated = self.replace(obj, |_, _| {})?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        // The status subresource keeps the live metadata (labels, annotations, finalizers).
        let updated = self.replace(obj, |live, next| {
            *next.meta_mut() = live.meta().clone();
        })?;
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut objects = self.lock()?;
        if objects.remove(name).is_none() {
            return Err(StoreError::NotFound {
                kind: self.kind.clone(),
                name: name.to_string(),
            });
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, selector: &str) -> Result<Vec<K>, StoreError> {
        let terms = parse_selector(selector)?;
        let objects = self.lock()?;
        Ok(objects
            .values()
            .filter(|obj| {
                let labels = obj.labels();
                terms
                    .iter()
                    .all(|(key, value)| labels.get(key) == Some(value))
            })
            .cloned()
            .collect())
    }
}
