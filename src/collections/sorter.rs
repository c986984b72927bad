//! Disk-spillable bounded sorter.
//!
//! Keys accumulate in a `BTreeMap<K, count>`. The map never holds more than
//! `limit` rows (counting repeats): once over the cap the largest entries are
//! trimmed. When the map reaches `memory_threshold` distinct keys it is
//! written out as a sorted run. Draining merges the in-memory map with all
//! runs, combines equal keys and stops after `limit` rows.

use super::{RunFile, SpillError, SpillOptions, SpillResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{btree_map, BTreeMap, BinaryHeap};
use std::path::PathBuf;

/// Bounded external sorter yielding `(key, repeat count)` pairs
pub struct Sorter<K> {
    state: Mutex<SorterState<K>>,
    limit: u64,
    memory_threshold: usize,
    temp_dir: Option<PathBuf>,
}

struct SorterState<K> {
    map: BTreeMap<K, u64>,
    size: u64,
    runs: Vec<RunFile>,
    closed: bool,
}

impl<K> Sorter<K>
where
    K: Ord + Serialize + DeserializeOwned,
{
    /// `limit` caps the number of rows returned (`u64::MAX` = unlimited)
    pub fn new(limit: u64, options: &SpillOptions) -> Self {
        Sorter {
            state: Mutex::new(SorterState {
                map: BTreeMap::new(),
                size: 0,
                runs: Vec::new(),
                closed: false,
            }),
            limit,
            memory_threshold: options.memory_threshold.max(1),
            temp_dir: options.temp_dir.clone(),
        }
    }

    pub fn add(&self, key: K) -> SpillResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SpillError::Closed);
        }
        if self.limit == 0 {
            return Ok(());
        }
        match state.map.get_mut(&key) {
            Some(count) => {
                *count += 1;
                state.size += 1;
            }
            None => {
                state.map.insert(key, 1);
                state.size += 1;
            }
        }
        while state.size > self.limit {
            let excess = state.size - self.limit;
            let Some(mut last) = state.map.last_entry() else {
                break;
            };
            if *last.get() > excess {
                *last.get_mut() -= excess;
                state.size -= excess;
            } else {
                let removed = last.remove();
                state.size -= removed;
            }
        }
        if state.map.len() >= self.memory_threshold {
            let run = RunFile::write(self.temp_dir.as_deref(), state.map.iter())?;
            tracing::debug!(
                entries = state.map.len(),
                runs = state.runs.len() + 1,
                "sorter_run_spilled"
            );
            state.runs.push(run);
            state.map.clear();
            state.size = 0;
        }
        Ok(())
    }

    /// Take everything added so far, in sorted order
    pub fn drain(&self) -> SpillResult<SortedEntries<K>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SpillError::Closed);
        }
        let map = std::mem::take(&mut state.map);
        let runs = std::mem::take(&mut state.runs);
        state.size = 0;
        SortedEntries::new(map.into_iter(), runs, self.limit)
    }

    /// Release memory and temp files; safe to call repeatedly
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.map = BTreeMap::new();
        state.runs.clear();
        state.size = 0;
    }
}

enum Source<K> {
    Memory(btree_map::IntoIter<K, u64>),
    Run(RunFile),
}

impl<K: DeserializeOwned> Source<K> {
    fn next_entry(&mut self) -> SpillResult<Option<(K, u64)>> {
        match self {
            Source::Memory(iter) => Ok(iter.next()),
            Source::Run(run) => run.next_entry(),
        }
    }
}

struct HeapEntry<K> {
    key: K,
    count: u64,
    source: usize,
}

impl<K: Ord> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord> Eq for HeapEntry<K> {}

impl<K: Ord> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeapEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// K-way merge over the memory map and the spilled runs
pub struct SortedEntries<K> {
    sources: Vec<Source<K>>,
    heap: BinaryHeap<Reverse<HeapEntry<K>>>,
    remaining: u64,
}

impl<K> SortedEntries<K>
where
    K: Ord + DeserializeOwned,
{
    fn new(
        memory: btree_map::IntoIter<K, u64>,
        runs: Vec<RunFile>,
        limit: u64,
    ) -> SpillResult<Self> {
        let mut sources = vec![Source::Memory(memory)];
        sources.extend(runs.into_iter().map(Source::Run));
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, src) in sources.iter_mut().enumerate() {
            if let Some((key, count)) = src.next_entry()? {
                heap.push(Reverse(HeapEntry { key, count, source }));
            }
        }
        Ok(SortedEntries {
            sources,
            heap,
            remaining: limit,
        })
    }

    fn refill(&mut self, source: usize) -> SpillResult<()> {
        if let Some((key, count)) = self.sources[source].next_entry()? {
            self.heap.push(Reverse(HeapEntry { key, count, source }));
        }
        Ok(())
    }

    fn next_merged(&mut self) -> SpillResult<Option<(K, u64)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let Some(Reverse(first)) = self.heap.pop() else {
            return Ok(None);
        };
        self.refill(first.source)?;
        let mut count = first.count;
        while self
            .heap
            .peek()
            .is_some_and(|Reverse(next)| next.key == first.key)
        {
            if let Some(Reverse(dup)) = self.heap.pop() {
                count += dup.count;
                self.refill(dup.source)?;
            }
        }
        let count = count.min(self.remaining);
        self.remaining -= count;
        Ok(Some((first.key, count)))
    }
}

impl<K> Iterator for SortedEntries<K>
where
    K: Ord + DeserializeOwned,
{
    type Item = SpillResult<(K, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_merged() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}
