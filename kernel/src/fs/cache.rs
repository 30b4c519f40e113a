//! Per-superblock inode cache keyed by inode number, using a
//! power-of-two open-chaining hash. `find(ino)` refs-and-returns;
//! `add(node)` resizes the table on high load. Grounded on
//! `util::hashmap::HashMap`'s bucket-vector + resize-on-load-factor
//! shape, specialized to `u64` inode keys and `Weak<Node>` entries so the
//! cache never keeps a node alive on its own.

use super::node::Node;
use alloc::{sync::Arc, sync::Weak, vec, vec::Vec};
use util::mutex::Mutex;

const INITIAL_BUCKETS: usize = 16;
/// Resize when `entries / buckets` would exceed this.
const LOAD_FACTOR_NUM: usize = 3;
const LOAD_FACTOR_DEN: usize = 4;

struct Inner {
    buckets: Vec<Vec<(u64, Weak<Node>)>>,
    live: usize,
}

pub struct NodeCache {
    inner: Mutex<Inner>,
}

fn bucket_index(ino: u64, bucket_count: usize) -> usize {
    // bucket_count is always a power of two, so this is a cheap mask
    // instead of a division.
    let hash = ino.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (hash as usize) & (bucket_count - 1)
}

impl NodeCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buckets: vec![Vec::new(); INITIAL_BUCKETS],
                live: 0,
            }),
        }
    }

    /// Refs-and-returns: upgrades the cached `Weak` if the node is still
    /// alive, pruning the slot if it is not (a node can only disappear
    /// here after its last external `Arc` dropped, at which point it is
    /// no longer reachable regardless of whether this lazy prune already
    /// ran).
    pub fn find(&self, ino: u64) -> Option<Arc<Node>> {
        let mut inner = self.inner.lock();
        let idx = bucket_index(ino, inner.buckets.len());
        let bucket = &mut inner.buckets[idx];
        let mut found = None;
        bucket.retain(|(key, weak)| {
            if *key != ino {
                return true;
            }
            match weak.upgrade() {
                Some(node) => {
                    found = Some(node);
                    true
                }
                None => false,
            }
        });
        found
    }

    /// Installs `node` in the cache, resizing first if that would push
    /// the load factor over threshold.
    pub fn add(&self, node: &Arc<Node>) {
        let mut inner = self.inner.lock();
        if (inner.live + 1) * LOAD_FACTOR_DEN > inner.buckets.len() * LOAD_FACTOR_NUM {
            Self::grow(&mut inner);
        }
        let idx = bucket_index(node.ino, inner.buckets.len());
        inner.buckets[idx].push((node.ino, Arc::downgrade(node)));
        inner.live += 1;
        node.set_cached(true);
    }

    /// Explicit removal, used by `unlink`-style operations that must
    /// evict an inode even while other references are briefly alive.
    /// Ordinary garbage collection happens lazily through
    /// [`Self::find`]/[`Self::grow`] instead.
    pub fn remove(&self, ino: u64) {
        let mut inner = self.inner.lock();
        let idx = bucket_index(ino, inner.buckets.len());
        let before = inner.buckets[idx].len();
        inner.buckets[idx].retain(|(key, _)| *key != ino);
        inner.live -= before - inner.buckets[idx].len();
    }

    /// Number of entries whose `Weak` still upgrades, used by
    /// `Superblock::is_busy` to refuse an unmount while a node under the
    /// mount is still referenced.
    pub fn live_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .buckets
            .iter()
            .flatten()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    fn grow(inner: &mut Inner) {
        let new_count = inner.buckets.len() * 2;
        let mut new_buckets: Vec<Vec<(u64, Weak<Node>)>> = vec![Vec::new(); new_count];
        let mut live = 0;
        for (ino, weak) in inner.buckets.drain(..).flatten() {
            if weak.strong_count() == 0 {
                continue;
            }
            let idx = bucket_index(ino, new_count);
            new_buckets[idx].push((ino, weak));
            live += 1;
        }
        inner.buckets = new_buckets;
        inner.live = live;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::node::{NodeAttr, NodeKind};
    use crate::fs::Superblock;

    #[test]
    fn find_refs_and_returns_and_resurrects_nothing_after_drop() {
        let sb = Superblock::new("testfs", 0);
        let cache = NodeCache::new();
        let node = Node::new(sb, 42, NodeKind::Regular, NodeAttr::new(0o644), None, None, None);
        cache.add(&node);
        assert!(cache.find(42).is_some());
        drop(node);
        assert!(cache.find(42).is_none());
    }

    #[test]
    fn grows_past_load_factor() {
        let sb = Superblock::new("testfs", 0);
        let cache = NodeCache::new();
        let mut keep = Vec::new();
        for ino in 0..64u64 {
            let node = Node::new(sb.clone(), ino, NodeKind::Regular, NodeAttr::new(0o644), None, None, None);
            cache.add(&node);
            keep.push(node);
        }
        for ino in 0..64u64 {
            assert!(cache.find(ino).is_some(), "ino {ino} missing after resize");
        }
    }
}
