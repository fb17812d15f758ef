//! Concurrent Trie Module
//!
//! Compressed prefix tree mapping string keys to values, with exact lookup,
//! insert, remove and whole-subtree removal by key prefix.
//!
//! # Locking
//! Every node owns a `RwLock` over its value, its children and a `detached`
//! flag. Locks are only ever taken top-down and at most one read lock is held
//! while descending, so unrelated keys do not contend beyond the shared
//! ancestors they pass through. Structural edits (new leaf, edge split,
//! subtree detach, unlinking an empty leaf) write-lock the parent and
//! re-validate what they saw under the read lock.
//!
//! A node that has been unlinked from the tree is flagged `detached` before
//! its lock is released. Any operation that meets a detached node restarts
//! from the root, which is how in-flight readers and writers converge on the
//! live tree after a concurrent split or prune.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

type Children<V> = HashMap<char, Arc<TrieNode<V>>>;

// == Trie Node ==
struct TrieNode<V> {
    /// Edge label from the parent; immutable once linked
    label: String,
    state: RwLock<NodeState<V>>,
}

struct NodeState<V> {
    value: Option<V>,
    /// Keyed by the first char of each child's label
    children: Children<V>,
    detached: bool,
}

impl<V> TrieNode<V> {
    fn new(label: &str, value: Option<V>, children: Children<V>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            state: RwLock::new(NodeState {
                value,
                children,
                detached: false,
            }),
        })
    }
}

/// Inserts `node` into `children` under the first char of its label.
fn link<V>(children: &mut Children<V>, node: Arc<TrieNode<V>>) {
    debug_assert!(!node.label.is_empty(), "only the root has an empty label");
    if let Some(first) = node.label.chars().next() {
        children.insert(first, node);
    }
}

/// Byte length of the longest common prefix, always on a char boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .take_while(|((_, ca), cb)| ca == cb)
        .last()
        .map(|((idx, c), _)| idx + c.len_utf8())
        .unwrap_or(0)
}

enum Locate {
    Found,
    Missing,
    Detached,
}

// == Concurrent Trie ==
/// Thread-safe prefix tree keyed by strings.
///
/// The empty string is a valid key stored on the root node, and
/// `remove_by_prefix("")` clears the whole trie.
pub struct ConcurrentTrie<V> {
    root: Arc<TrieNode<V>>,
    /// Number of stored values
    count: AtomicUsize,
}

impl<V> ConcurrentTrie<V> {
    // == Constructor ==
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self {
            root: TrieNode::new("", None, HashMap::new()),
            count: AtomicUsize::new(0),
        }
    }

    // == Locate ==
    /// Fills `path` with the nodes from the root down to the node spelling
    /// exactly `key`. The target's own state is not inspected.
    fn locate(&self, key: &str, path: &mut Vec<Arc<TrieNode<V>>>) -> Locate {
        path.clear();
        let mut node = Arc::clone(&self.root);
        let mut rest = key;

        loop {
            let Some(first) = rest.chars().next() else {
                path.push(node);
                return Locate::Found;
            };

            let child = {
                let state = node.state.read();
                if state.detached {
                    return Locate::Detached;
                }
                state.children.get(&first).cloned()
            };
            path.push(node);

            match child {
                Some(child) if rest.starts_with(child.label.as_str()) => {
                    rest = &rest[child.label.len()..];
                    node = child;
                }
                _ => return Locate::Missing,
            }
        }
    }

    /// Runs `f` against the value stored at `key` under the node's read lock.
    fn with_value<R>(&self, key: &str, f: impl Fn(Option<&V>) -> R) -> R {
        let mut path = Vec::new();
        loop {
            match self.locate(key, &mut path) {
                Locate::Missing => return f(None),
                Locate::Detached => continue,
                Locate::Found => {}
            }
            let Some(node) = path.last() else {
                return f(None);
            };
            let state = node.state.read();
            if state.detached {
                continue;
            }
            return f(state.value.as_ref());
        }
    }

    // == Contains ==
    /// Checks whether a value is stored at exactly `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.with_value(key, |value| value.is_some())
    }

    // == Set ==
    /// Stores `value` at `key`, creating or splitting nodes along the path.
    ///
    /// Returns the value that was replaced, if any.
    pub fn set(&self, key: &str, value: V) -> Option<V> {
        let mut value = Some(value);

        'restart: loop {
            let mut node = Arc::clone(&self.root);
            let mut rest = key;

            loop {
                let Some(first) = rest.chars().next() else {
                    let mut state = node.state.write();
                    if state.detached {
                        continue 'restart;
                    }
                    if state.value.is_none() {
                        self.count.fetch_add(1, Ordering::Relaxed);
                    }
                    return mem::replace(&mut state.value, value.take());
                };

                // Fast path: descend under the read lock
                let child = {
                    let state = node.state.read();
                    if state.detached {
                        continue 'restart;
                    }
                    state.children.get(&first).cloned()
                };
                if let Some(child) = child.filter(|c| rest.starts_with(c.label.as_str())) {
                    rest = &rest[child.label.len()..];
                    node = child;
                    continue;
                }

                let mut state = node.state.write();
                if state.detached {
                    continue 'restart;
                }
                match state.children.get(&first).cloned() {
                    None => {
                        trace!(key, "trie: new leaf");
                        self.count.fetch_add(1, Ordering::Relaxed);
                        link(&mut state.children, TrieNode::new(rest, value.take(), HashMap::new()));
                        return None;
                    }
                    Some(child) if rest.starts_with(child.label.as_str()) => {
                        // Linked while we were waiting for the write lock
                        drop(state);
                        rest = &rest[child.label.len()..];
                        node = child;
                    }
                    Some(child) => {
                        trace!(key, label = %child.label, "trie: split edge");
                        self.count.fetch_add(1, Ordering::Relaxed);
                        let split = Self::split(&child, rest, &mut value);
                        link(&mut state.children, split);
                        return None;
                    }
                }
            }
        }
    }

    /// Replaces `child` with a node labelled by the common prefix of its
    /// label and `rest`, holding the old node's contents as a tail child and
    /// `value` either on itself or on a new leaf.
    ///
    /// The caller holds the parent's write lock.
    fn split(child: &Arc<TrieNode<V>>, rest: &str, value: &mut Option<V>) -> Arc<TrieNode<V>> {
        let common = common_prefix_len(&child.label, rest);

        let mut old = child.state.write();
        let tail = TrieNode::new(
            &child.label[common..],
            old.value.take(),
            mem::take(&mut old.children),
        );
        old.detached = true;
        drop(old);

        let mut children = HashMap::new();
        link(&mut children, tail);

        let own_value = if common == rest.len() {
            value.take()
        } else {
            link(&mut children, TrieNode::new(&rest[common..], value.take(), HashMap::new()));
            None
        };

        TrieNode::new(&child.label[..common], own_value, children)
    }

    // == Remove ==
    /// Removes the value stored at exactly `key`.
    ///
    /// Values stored under longer keys are untouched. Returns the removed
    /// value, or `None` when nothing was stored.
    pub fn remove(&self, key: &str) -> Option<V> {
        let mut path = Vec::new();
        loop {
            match self.locate(key, &mut path) {
                Locate::Missing => return None,
                Locate::Detached => continue,
                Locate::Found => {}
            }
            let Some(node) = path.last() else {
                return None;
            };
            let mut state = node.state.write();
            if state.detached {
                continue;
            }
            let removed = state.value.take();
            let emptied = removed.is_some() && state.children.is_empty();
            drop(state);

            if removed.is_some() {
                self.count.fetch_sub(1, Ordering::Relaxed);
            }
            if emptied {
                self.compact(&path);
            }
            return removed;
        }
    }

    /// Unlinks nodes left with neither value nor children, walking upwards
    /// along `path` until one is still in use. The root is never unlinked.
    ///
    /// Stops as soon as a parent on `path` has been detached or relinked by a
    /// concurrent split. An empty leaf can then remain under the split's tail
    /// node; it holds no value and is dropped with its subtree by the next
    /// prefix removal or clear. Value-less nodes with a single child are
    /// never merged back into their parent.
    fn compact(&self, path: &[Arc<TrieNode<V>>]) {
        for pair in path.windows(2).rev() {
            let (parent, node) = (&pair[0], &pair[1]);
            let Some(first) = node.label.chars().next() else {
                return;
            };

            let mut parent_state = parent.state.write();
            if parent_state.detached {
                return;
            }
            let still_linked = parent_state
                .children
                .get(&first)
                .is_some_and(|linked| Arc::ptr_eq(linked, node));
            if !still_linked {
                return;
            }

            let mut state = node.state.write();
            if state.detached || state.value.is_some() || !state.children.is_empty() {
                return;
            }
            state.detached = true;
            drop(state);

            parent_state.children.remove(&first);
            trace!(label = %node.label, "trie: unlinked empty node");
        }
    }

    // == Remove By Prefix ==
    /// Removes every value whose key starts with `prefix`, including a value
    /// stored at `prefix` itself.
    ///
    /// The matching subtree is unlinked under its parent's write lock and then
    /// drained; every node in it is flagged detached before this returns.
    /// Returns the removed keys in sorted order, empty when nothing matched.
    pub fn remove_by_prefix(&self, prefix: &str) -> Vec<String> {
        if prefix.is_empty() {
            return self.drain_root();
        }

        'restart: loop {
            let mut node = Arc::clone(&self.root);
            let mut rest = prefix;
            let mut consumed = String::with_capacity(prefix.len());

            loop {
                let Some(first) = rest.chars().next() else {
                    return Vec::new();
                };

                let child = {
                    let state = node.state.read();
                    if state.detached {
                        continue 'restart;
                    }
                    state.children.get(&first).cloned()
                };
                let Some(child) = child else {
                    return Vec::new();
                };

                if rest.len() > child.label.len() && rest.starts_with(child.label.as_str()) {
                    consumed.push_str(&child.label);
                    rest = &rest[child.label.len()..];
                    node = child;
                    continue;
                }
                if !child.label.starts_with(rest) {
                    return Vec::new();
                }

                // Every key below `child` starts with the prefix
                let mut state = node.state.write();
                if state.detached {
                    continue 'restart;
                }
                let still_linked = state
                    .children
                    .get(&first)
                    .is_some_and(|linked| Arc::ptr_eq(linked, &child));
                if !still_linked {
                    continue 'restart;
                }
                state.children.remove(&first);
                drop(state);

                consumed.push_str(&child.label);
                let removed = self.drain(vec![(child, consumed)]);
                trace!(prefix, removed = removed.len(), "trie: pruned subtree");
                return removed;
            }
        }
    }

    /// Empties the root in place; the root itself is never detached.
    fn drain_root(&self) -> Vec<String> {
        let (value, children) = {
            let mut state = self.root.state.write();
            (state.value.take(), mem::take(&mut state.children))
        };

        let mut removed = Vec::new();
        if value.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
            removed.push(String::new());
        }
        let stack = children
            .into_values()
            .map(|child| {
                let key = child.label.clone();
                (child, key)
            })
            .collect();
        removed.extend(self.drain(stack));
        removed.sort();
        removed
    }

    /// Flags every node reachable from `stack` detached and collects the keys
    /// of the values dropped on the way.
    fn drain(&self, mut stack: Vec<(Arc<TrieNode<V>>, String)>) -> Vec<String> {
        let mut removed = Vec::new();

        while let Some((node, key)) = stack.pop() {
            let (value, children) = {
                let mut state = node.state.write();
                state.detached = true;
                (state.value.take(), mem::take(&mut state.children))
            };
            for child in children.into_values() {
                let child_key = format!("{}{}", key, child.label);
                stack.push((child, child_key));
            }
            if value.is_some() {
                removed.push(key);
            }
        }

        self.count.fetch_sub(removed.len(), Ordering::Relaxed);
        removed.sort();
        removed
    }

    // == Clear ==
    /// Removes every value. Returns the number of values removed.
    pub fn clear(&self) -> usize {
        self.remove_by_prefix("").len()
    }

    // == Keys ==
    /// Returns a sorted snapshot of the stored keys.
    ///
    /// Nodes are visited one at a time, so the snapshot is not atomic with
    /// respect to concurrent writers.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let mut stack = vec![(Arc::clone(&self.root), String::new())];

        while let Some((node, key)) = stack.pop() {
            let state = node.state.read();
            if state.detached {
                continue;
            }
            if state.value.is_some() {
                keys.push(key.clone());
            }
            for child in state.children.values() {
                stack.push((Arc::clone(child), format!("{}{}", key, child.label)));
            }
        }

        keys.sort();
        keys
    }

    // == Length ==
    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    // == Is Empty ==
    /// Returns true if no value is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> ConcurrentTrie<V> {
    // == Try Get ==
    /// Returns a clone of the value stored at exactly `key`.
    pub fn try_get(&self, key: &str) -> Option<V> {
        self.with_value(key, |value| value.cloned())
    }
}

impl<V> Default for ConcurrentTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for ConcurrentTrie<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentTrie")
            .field("len", &self.len())
            .finish()
    }
}
