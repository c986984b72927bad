//! Disk-spillable hash set.
//!
//! The first `memory_threshold` members live in a `HashSet`. Later members
//! are appended to a temp file; only their hash and file location stay in
//! memory, and membership checks decode the candidates that share a hash.

use super::{SpillError, SpillFile, SpillOptions, SpillResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Set with membership test, deduplication and full scan
pub struct BigHashSet<T> {
    state: Mutex<SetState<T>>,
    memory_threshold: usize,
    temp_dir: Option<PathBuf>,
}

struct SetState<T> {
    memory: HashSet<T>,
    spilled: Option<SpilledMembers>,
    closed: bool,
}

struct SpilledMembers {
    file: SpillFile,
    index: HashMap<u64, Vec<(u64, u32)>>,
}

fn hash_of<T: Hash>(item: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    item.hash(&mut hasher);
    hasher.finish()
}

impl<T> BigHashSet<T>
where
    T: Hash + Eq + Serialize + DeserializeOwned,
{
    pub fn new(options: &SpillOptions) -> Self {
        BigHashSet {
            state: Mutex::new(SetState {
                memory: HashSet::new(),
                spilled: None,
                closed: false,
            }),
            memory_threshold: options.memory_threshold,
            temp_dir: options.temp_dir.clone(),
        }
    }

    /// Insert `item`; returns true if it was not a member yet
    pub fn add(&self, item: T) -> SpillResult<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SpillError::Closed);
        }
        if state.memory.contains(&item) {
            return Ok(false);
        }
        let hash = hash_of(&item);
        if let Some(spilled) = state.spilled.as_mut() {
            if spilled.contains(hash, &item)? {
                return Ok(false);
            }
        }
        if state.memory.len() < self.memory_threshold {
            state.memory.insert(item);
            return Ok(true);
        }
        if state.spilled.is_none() {
            tracing::debug!(members = state.memory.len(), "hash_set_spilling");
            state.spilled = Some(SpilledMembers {
                file: SpillFile::create(self.temp_dir.as_deref())?,
                index: HashMap::new(),
            });
        }
        if let Some(spilled) = state.spilled.as_mut() {
            let location = spilled.file.append(&item)?;
            spilled.index.entry(hash).or_default().push(location);
        }
        Ok(true)
    }

    pub fn contains(&self, item: &T) -> SpillResult<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SpillError::Closed);
        }
        if state.memory.contains(item) {
            return Ok(true);
        }
        match state.spilled.as_mut() {
            Some(spilled) => spilled.contains(hash_of(item), item),
            None => Ok(false),
        }
    }

    /// Scan members until `predicate` holds for one of them
    pub fn any<F>(&self, mut predicate: F) -> SpillResult<bool>
    where
        F: FnMut(&T) -> bool,
    {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SpillError::Closed);
        }
        if state.memory.iter().any(&mut predicate) {
            return Ok(true);
        }
        match state.spilled.as_mut() {
            Some(spilled) => spilled.file.scan(predicate),
            None => Ok(false),
        }
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.memory.len()
            + state
                .spilled
                .as_ref()
                .map_or(0, |s| s.file.records as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release memory and temp file; safe to call repeatedly
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.memory = HashSet::new();
        state.spilled = None;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl SpilledMembers {
    fn contains<T>(&mut self, hash: u64, item: &T) -> SpillResult<bool>
    where
        T: Eq + DeserializeOwned,
    {
        let Some(locations) = self.index.get(&hash) else {
            return Ok(false);
        };
        for &(offset, len) in locations {
            let candidate: T = self.file.read_at(offset, len)?;
            if &candidate == item {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
