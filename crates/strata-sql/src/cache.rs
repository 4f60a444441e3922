use crate::SqlQuery;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Optional second-level cache consulted between the in-process map and a
/// fresh compile, for deployments that share compiled structures across
/// processes.
pub trait Accelerator: Send + Sync {
    fn get(&self, key: &str) -> Option<SqlQuery>;

    fn put(&self, key: &str, query: &SqlQuery, ttl: Duration);
}

#[derive(Debug, Default)]
struct CacheEntry {
    query: Option<SqlQuery>,
    hits: u64,
}

/// In-process cache of compiled query structures, keyed by the search
/// signature. Entries are cloned on the way out so a caller can never
/// mutate the cached tree.
pub struct QueryCache {
    entries: Mutex<IndexMap<String, CacheEntry>>,
    accelerator: Option<Arc<dyn Accelerator>>,
    ttl: Duration,
}

impl Default for QueryCache {
    fn default() -> QueryCache {
        QueryCache::new()
    }
}

impl QueryCache {
    pub fn new() -> QueryCache {
        QueryCache {
            entries: Mutex::new(IndexMap::new()),
            accelerator: None,
            ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_accelerator(accelerator: Arc<dyn Accelerator>, ttl: Duration) -> QueryCache {
        QueryCache {
            entries: Mutex::new(IndexMap::new()),
            accelerator: Some(accelerator),
            ttl,
        }
    }

    /// The signature of a compilation request: everything that affects the
    /// compiled structure, digested.
    pub fn signature(components: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for component in components {
            hasher.update(component.as_bytes());
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<SqlQuery> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key) {
            if let Some(query) = &entry.query {
                entry.hits += 1;
                return Some(query.clone());
            }
        }
        drop(entries);

        let accelerated = self.accelerator.as_ref()?.get(key)?;
        let mut entries = self.lock();
        let entry = entries.entry(key.to_string()).or_default();
        entry.hits += 1;
        entry.query = Some(accelerated.clone());
        Some(accelerated)
    }

    pub fn put(&self, key: &str, query: &SqlQuery) {
        let mut entries = self.lock();
        entries.entry(key.to_string()).or_default().query = Some(query.clone());
        drop(entries);
        if let Some(accelerator) = &self.accelerator {
            accelerator.put(key, query, self.ttl);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Hit count per signature.
    pub fn stats(&self) -> Vec<(String, u64)> {
        self.lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.hits))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
