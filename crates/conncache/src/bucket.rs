//! Insertion-ordered entry list for one bucket
//!
//! Uses an intrusive linked list over a local index arena, so unlinking a
//! retrieved entry is O(1) and no node ever holds a pointer.
//!
//! Entries are pushed at the head and never re-stamped, so timestamps are
//! non-increasing from head to tail. Once one node is expired, everything
//! behind it is expired too and can be cut off in a single pass.

use crate::key::PeerKey;

/// Entries detached from a bucket, head-side first
pub type Evicted<T> = Vec<(PeerKey, T)>;

/// Node in the bucket's doubly-linked list
struct Node<T> {
    key: PeerKey,
    payload: T,
    inserted_at: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Entries sharing one hash value, freshest first
pub struct BucketList<T> {
    nodes: Vec<Option<Node<T>>>,
    head: Option<usize>,
    free_list: Vec<usize>,
    count: usize,
}

/// True once an entry stamped `inserted_at` has lived `ttl` milliseconds
pub fn is_expired(inserted_at: u64, now: u64, ttl: u64) -> bool {
    now >= inserted_at.saturating_add(ttl)
}

impl<T> BucketList<T> {
    /// Create an empty bucket
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: None,
            free_list: Vec::new(),
            count: 0,
        }
    }

    /// Number of entries in the list
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if the bucket is empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Insert at the head and return the node index
    ///
    /// The stamp is clamped to the current head's stamp so a late caller
    /// with a slightly older reading cannot break the ordering.
    pub fn push_front(&mut self, key: PeerKey, payload: T, now: u64) -> usize {
        let inserted_at = match self.head.and_then(|idx| self.nodes[idx].as_ref()) {
            Some(head) => now.max(head.inserted_at),
            None => now,
        };

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            key,
            payload,
            inserted_at,
            prev: None,
            next: self.head,
        });

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        self.count += 1;
        idx
    }

    /// Successor of the node at `idx`
    pub fn next_of(&self, idx: usize) -> Option<usize> {
        self.nodes.get(idx).and_then(|slot| slot.as_ref()).and_then(|node| node.next)
    }

    /// Index of the head node
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// If the node at `start` has expired, detach it and its whole suffix
    ///
    /// The list is consistent again before this returns, so the caller is
    /// free to run cleanup on the detached entries (head-side first).
    pub fn truncate_expired(&mut self, start: Option<usize>, now: u64, ttl: u64) -> Evicted<T> {
        let Some(start) = start else {
            return Vec::new();
        };
        let prev = match &self.nodes[start] {
            Some(node) if is_expired(node.inserted_at, now, ttl) => node.prev,
            _ => return Vec::new(),
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = None;
                }
            }
            None => {
                self.head = None;
            }
        }

        let mut removed = Vec::new();
        let mut cursor = Some(start);
        while let Some(idx) = cursor {
            let Some(node) = self.nodes[idx].take() else {
                break;
            };
            self.free_list.push(idx);
            cursor = node.next;
            removed.push((node.key, node.payload));
        }

        self.count -= removed.len();
        self.reset_if_empty();
        removed
    }

    /// Find and unlink the entry for `key`
    ///
    /// Walks from the head. Hitting an expired node first truncates from
    /// there and reports a miss. On a match, the successor is checked for
    /// expiry before the entry is unlinked. Returns the payload (if any) and
    /// the entries detached on the way.
    pub fn take(&mut self, key: PeerKey, now: u64, ttl: u64) -> (Option<T>, Evicted<T>) {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = &self.nodes[idx] else {
                break;
            };

            if is_expired(node.inserted_at, now, ttl) {
                return (None, self.truncate_expired(Some(idx), now, ttl));
            }

            if node.key == key {
                let next = node.next;
                let evicted = self.truncate_expired(next, now, ttl);
                return (self.unlink(idx), evicted);
            }

            cursor = node.next;
        }

        (None, Vec::new())
    }

    /// Detach from the first expired node onwards, wherever it sits
    pub fn evict_expired(&mut self, now: u64, ttl: u64) -> Evicted<T> {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = &self.nodes[idx] else {
                break;
            };
            if is_expired(node.inserted_at, now, ttl) {
                return self.truncate_expired(Some(idx), now, ttl);
            }
            cursor = node.next;
        }
        Vec::new()
    }

    /// Remove every entry without calling back, freshest first
    pub fn drain(&mut self) -> Vec<T> {
        let mut payloads = Vec::with_capacity(self.count);
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = self.nodes[idx].take() else {
                break;
            };
            cursor = node.next;
            payloads.push(node.payload);
        }

        self.count = 0;
        self.head = None;
        self.reset_if_empty();
        payloads
    }

    /// Keys and stamps from head to tail
    pub fn entries(&self) -> Vec<(PeerKey, u64)> {
        let mut out = Vec::with_capacity(self.count);
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = &self.nodes[idx] else {
                break;
            };
            out.push((node.key, node.inserted_at));
            cursor = node.next;
        }
        out
    }

    fn unlink(&mut self, idx: usize) -> Option<T> {
        let node = self.nodes[idx].take()?;

        match node.prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = node.next;
                }
            }
            None => {
                self.head = node.next;
            }
        }

        if let Some(next_idx) = node.next {
            if let Some(next_node) = &mut self.nodes[next_idx] {
                next_node.prev = node.prev;
            }
        }

        self.free_list.push(idx);
        self.count -= 1;
        self.reset_if_empty();
        Some(node.payload)
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }

    // Empty buckets give their arena back
    fn reset_if_empty(&mut self) {
        if self.count == 0 {
            self.nodes = Vec::new();
            self.free_list = Vec::new();
            self.head = None;
        }
    }

    /// Assert link consistency, counter accuracy and stamp ordering
    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        let mut seen = ahash::AHashSet::new();
        let mut count = 0usize;
        let mut prev = None;
        let mut prev_stamp = u64::MAX;
        let mut cursor = self.head;

        while let Some(idx) = cursor {
            assert!(seen.insert(idx), "cycle at node {}", idx);
            let node = self.nodes[idx].as_ref().expect("linked node missing");
            assert_eq!(node.prev, prev);
            assert!(node.inserted_at <= prev_stamp, "stamps out of order");

            prev = Some(idx);
            prev_stamp = node.inserted_at;
            cursor = node.next;
            count += 1;
            assert!(count <= self.count);
        }

        assert_eq!(count, self.count);
        assert_eq!(
            self.nodes.iter().filter(|slot| slot.is_some()).count(),
            self.count
        );
    }
}

impl<T> Default for BucketList<T> {
    fn default() -> Self {
        Self::new()
    }
}
