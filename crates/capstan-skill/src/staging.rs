// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory staging of files written by file actions.
//!
//! Each run gets its own [`StagingArea`], leased from a host-owned
//! [`StagingRegistry`]. Dropping the lease clears the area and removes it
//! from the registry, whatever way the run ends.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Files staged by one run, keyed by path.
#[derive(Debug)]
pub struct StagingArea {
    run_id: String,
    installation_id: String,
    files: Mutex<BTreeMap<String, String>>,
}

impl StagingArea {
    pub fn new(run_id: impl Into<String>, installation_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            installation_id: installation_id.into(),
            files: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    pub fn get(&self, path: &str) -> Option<String> {
        lock(&self.files).get(path).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        lock(&self.files).contains_key(path)
    }

    /// Stages a new file. Returns `false` and changes nothing if `path` exists.
    pub fn create(&self, path: &str, content: &str) -> bool {
        let mut files = lock(&self.files);
        if files.contains_key(path) {
            return false;
        }
        files.insert(path.to_string(), content.to_string());
        true
    }

    /// Writes `path`, returning the previous content.
    pub fn put(&self, path: &str, content: &str) -> Option<String> {
        lock(&self.files).insert(path.to_string(), content.to_string())
    }

    pub fn remove(&self, path: &str) -> Option<String> {
        lock(&self.files).remove(path)
    }

    /// Snapshot of every staged file, ordered by path.
    pub fn files(&self) -> Vec<(String, String)> {
        lock(&self.files)
            .iter()
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.files).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.files).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.files).clear();
    }
}

/// Live staging areas, keyed by run id.
#[derive(Debug, Clone, Default)]
pub struct StagingRegistry {
    areas: Arc<Mutex<HashMap<String, Arc<StagingArea>>>>,
}

impl StagingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the staging area for a run.
    pub fn lease(&self, run_id: &str, installation_id: &str) -> StagingLease {
        let area = Arc::new(StagingArea::new(run_id, installation_id));
        lock(&self.areas).insert(run_id.to_string(), Arc::clone(&area));
        StagingLease {
            area,
            registry: self.clone(),
        }
    }

    /// The live staging area of `run_id`, if its run still holds the lease.
    pub fn get(&self, run_id: &str) -> Option<Arc<StagingArea>> {
        lock(&self.areas).get(run_id).cloned()
    }

    /// Number of live staging areas.
    pub fn live(&self) -> usize {
        lock(&self.areas).len()
    }
}

/// Ownership of one run's staging area.
#[derive(Debug)]
pub struct StagingLease {
    area: Arc<StagingArea>,
    registry: StagingRegistry,
}

impl StagingLease {
    pub fn area(&self) -> &Arc<StagingArea> {
        &self.area
    }
}

impl Drop for StagingLease {
    fn drop(&mut self) {
        let discarded = self.area.len();
        self.area.clear();
        lock(&self.registry.areas).remove(self.area.run_id());
        debug!(run_id = self.area.run_id(), discarded, "staging area released");
    }
}
