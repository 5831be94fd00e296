//! Processed entries: split command streams and the geometry built from them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::CommandBuffer;
use crate::command::Category;
use crate::error::{DrawError, DrawResult};
use crate::geometry::GeometryBuffers;
use crate::hash::DrawHash;
use crate::jobs::Promise;
use crate::scope::ScopeId;
use crate::viewer::ViewerId;

/// Command stream of an entry, possibly still being produced.
#[derive(Debug, Clone)]
pub(crate) enum EntryCommands {
    Ready(Arc<CommandBuffer>),
    Pending(Promise<Arc<CommandBuffer>>),
}

impl EntryCommands {
    /// Move a finished promise into `Ready`. Returns the stream if available.
    pub fn resolve(&mut self) -> Option<&Arc<CommandBuffer>> {
        if let EntryCommands::Pending(promise) = self {
            if !promise.is_complete() {
                return None;
            }
            // Cloned, not taken: queued builds read the same slot.
            let buffer = promise.get_cloned().unwrap_or_default();
            *self = EntryCommands::Ready(buffer);
        }
        match self {
            EntryCommands::Ready(buffer) => Some(buffer),
            EntryCommands::Pending(_) => None,
        }
    }

    pub fn promise(&self) -> Option<&Promise<Arc<CommandBuffer>>> {
        match self {
            EntryCommands::Pending(promise) => Some(promise),
            EntryCommands::Ready(_) => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum GeometryState {
    Pending(Promise<GeometryBuffers>),
    Ready(GeometryBuffers),
}

impl GeometryState {
    pub fn resolve(&mut self) -> Option<&GeometryBuffers> {
        if let GeometryState::Pending(promise) = self {
            let buffers = promise.take()?;
            *self = GeometryState::Ready(buffers);
        }
        match self {
            GeometryState::Ready(buffers) => Some(buffers),
            GeometryState::Pending(_) => None,
        }
    }

    pub fn into_ready(self) -> Option<GeometryBuffers> {
        match self {
            GeometryState::Ready(buffers) => Some(buffers),
            GeometryState::Pending(promise) => promise.take(),
        }
    }
}

/// Geometry built from one revision of an entry's stream.
#[derive(Debug)]
pub(crate) struct BuiltGeometry {
    /// `None` for static geometry shared by all viewers.
    pub viewer: Option<ViewerId>,
    pub epoch: u64,
    pub revision: u64,
    pub state: GeometryState,
}

/// One category's worth of a submission.
#[derive(Debug)]
pub(crate) struct ProcessedEntry {
    pub category: Category,
    pub hash: Option<DrawHash>,
    /// Epoch the entry was submitted in.
    pub frame_scope: u64,
    pub custom_scope: Option<ScopeId>,
    /// Last epoch the entry was drawn in.
    pub version: u64,
    pub viewers: Option<Arc<[ViewerId]>>,
    pub draw_order: u64,
    pub generation: u64,
    pub commands: EntryCommands,
    /// Bumped whenever `commands` changes (persistence filtering).
    pub revision: u64,
    pub built: Vec<BuiltGeometry>,
    /// Version last handed to each viewer.
    pub presented: HashMap<ViewerId, u64>,
}

impl ProcessedEntry {
    pub fn visible_to(&self, viewer: ViewerId) -> bool {
        self.viewers
            .as_ref()
            .map_or(true, |viewers| viewers.contains(&viewer))
    }

    /// Whether the resolved stream is known to be empty.
    pub fn is_dead(&mut self) -> bool {
        self.commands.resolve().is_some_and(|buffer| buffer.is_empty())
    }
}

/// Slot storage for entries, with a hash index for cache lookups.
#[derive(Debug, Default)]
pub(crate) struct ProcessedStore {
    entries: Vec<Option<ProcessedEntry>>,
    free: Vec<usize>,
    by_hash: HashMap<DrawHash, Vec<usize>>,
    len: usize,
}

impl ProcessedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ProcessedEntry) -> usize {
        let hash = entry.hash;
        let index = match self.free.pop() {
            Some(index) => {
                self.entries[index] = Some(entry);
                index
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        if let Some(hash) = hash {
            self.by_hash.entry(hash).or_default().push(index);
        }
        self.len += 1;
        index
    }

    pub fn remove(&mut self, index: usize) -> DrawResult<ProcessedEntry> {
        let entry = self
            .entries
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(DrawError::StaleEntry(index))?;
        if let Some(hash) = entry.hash {
            if let Some(indices) = self.by_hash.get_mut(&hash) {
                indices.retain(|&i| i != index);
                if indices.is_empty() {
                    self.by_hash.remove(&hash);
                }
            }
        }
        self.free.push(index);
        self.len -= 1;
        Ok(entry)
    }

    pub fn get(&self, index: usize) -> Option<&ProcessedEntry> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ProcessedEntry> {
        self.entries.get_mut(index).and_then(Option::as_mut)
    }

    /// Indices of entries tagged with `hash`.
    pub fn lookup(&self, hash: DrawHash) -> &[usize] {
        self.by_hash.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|_| i))
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut ProcessedEntry)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, e)| e.as_mut().map(|e| (i, e)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Remove every entry and return them.
    pub fn drain(&mut self) -> Vec<ProcessedEntry> {
        self.free.clear();
        self.by_hash.clear();
        self.len = 0;
        std::mem::take(&mut self.entries)
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: Option<DrawHash>) -> ProcessedEntry {
        ProcessedEntry {
            category: Category::Static,
            hash,
            frame_scope: 0,
            custom_scope: None,
            version: 0,
            viewers: None,
            draw_order: 0,
            generation: 0,
            commands: EntryCommands::Ready(Arc::new(CommandBuffer::new())),
            revision: 0,
            built: Vec::new(),
            presented: HashMap::new(),
        }
    }

    #[test]
    fn insert_remove_reuses_slots() {
        let mut store = ProcessedStore::new();
        let a = store.insert(entry(None));
        let b = store.insert(entry(None));
        assert_ne!(a, b);
        store.remove(a).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.insert(entry(None)), a);
    }

    #[test]
    fn double_remove_is_stale() {
        let mut store = ProcessedStore::new();
        let a = store.insert(entry(None));
        store.remove(a).unwrap();
        assert_eq!(store.remove(a).unwrap_err(), DrawError::StaleEntry(a));
        assert_eq!(store.remove(99).unwrap_err(), DrawError::StaleEntry(99));
    }

    #[test]
    fn hash_index_follows_removal() {
        let mut store = ProcessedStore::new();
        let hash = DrawHash(7);
        let a = store.insert(entry(Some(hash)));
        let b = store.insert(entry(Some(hash)));
        assert_eq!(store.lookup(hash), &[a, b]);
        store.remove(a).unwrap();
        assert_eq!(store.lookup(hash), &[b]);
        store.remove(b).unwrap();
        assert!(store.lookup(hash).is_empty());
    }

    #[test]
    fn empty_stream_is_dead() {
        let mut e = entry(None);
        assert!(e.is_dead());
        assert!(e.visible_to(ViewerId(3)));
        e.viewers = Some(Arc::from(vec![ViewerId(1)]));
        assert!(!e.visible_to(ViewerId(3)));
    }
}
