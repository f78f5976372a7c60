use std::{
    collections::{HashMap, VecDeque},
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::Result;

/// Bounded FIFO cache of source sentence → on-disk grammar file, one per
/// context. Grammars are expensive to extract but go stale the moment a
/// learning event touches the extractor's bitext, so `learn` invalidates
/// aggressively while repeated translations of the same sentence reuse the
/// cached file.
pub struct GrammarCache {
    index: HashMap<String, PathBuf>,
    order: VecDeque<String>,
    cache_size: usize,
}

impl GrammarCache {
    pub fn new(cache_size: usize) -> Self {
        assert!(cache_size > 0, "grammar cache capacity must be at least 1");
        Self {
            index: HashMap::new(),
            order: VecDeque::new(),
            cache_size,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, source: &str) -> Option<&Path> {
        self.index.get(source).map(PathBuf::as_path)
    }

    /// Records a freshly extracted grammar, evicting the oldest cached
    /// entry when the cache is full.
    pub fn insert(&mut self, source: String, path: PathBuf) -> Result<()> {
        // A learn-invalidated entry may still sit in the order queue; a
        // re-extracted source must not end up queued twice.
        self.order.retain(|queued| queued != &source);
        if self.order.len() == self.cache_size {
            if let Some(oldest) = self.order.pop_front() {
                // Absent when learn already invalidated this entry.
                if let Some(stale) = self.index.remove(&oldest) {
                    debug!(source = oldest.as_str(), "evicting cached grammar");
                    fs::remove_file(&stale)?;
                }
            }
        }
        self.order.push_back(source.clone());
        self.index.insert(source, path);
        Ok(())
    }

    /// Drops the cached grammar for `source`, removing its file. The source
    /// may linger in the order queue; eviction tolerates the residual.
    pub fn invalidate(&mut self, source: &str) -> Result<()> {
        if let Some(path) = self.index.remove(source) {
            debug!(source, "invalidating cached grammar");
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
