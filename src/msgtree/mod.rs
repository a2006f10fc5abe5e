//! MsgTree — a trie over the sequence of lines emitted per key.
//!
//! Each node (`MsgTreeElem`) holds a parent pointer, a
//! `children: HashMap<line, child>` map, and the set of keys ("sources")
//! that produced that exact line sequence, so that `add`/`message`/walk
//! naturally dedupe identical output across many keys into one shared
//! path through the trie.

use std::collections::HashMap;
use std::hash::Hash;

use rustc_hash::FxHashSet;

/// Mode governing which operations are legal on a MsgTree:
/// `DEFER` only builds (enumerate at the end), `SHIFT` additionally
/// allows `remove`, `TRACE` additionally preserves and exposes internal
/// nodes for hierarchical display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Defer,
    Shift,
    Trace,
}

type NodeId = usize;

struct Node<K> {
    parent: Option<NodeId>,
    line: Option<String>,
    children: HashMap<String, NodeId>,
    keys: FxHashSet<K>,
}

/// A trie keyed by arbitrary hashable keys (node names, or `(worker, key)`
/// pairs), gathering identical output lines across many keys into shared
/// prefixes.
pub struct MsgTree<K: Eq + Hash + Clone> {
    mode: Mode,
    nodes: Vec<Node<K>>,
    // Which node currently holds each key, for O(1) lookup on `add`/`get`.
    location: HashMap<K, NodeId>,
}

const ROOT: NodeId = 0;

impl<K: Eq + Hash + Clone> MsgTree<K> {
    pub fn new(mode: Mode) -> Self {
        let root = Node { parent: None, line: None, children: HashMap::new(), keys: FxHashSet::default() };
        MsgTree { mode, nodes: vec![root], location: HashMap::new() }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// `add(key, line)`: move `key` one step down the trie under the
    /// child labelled `line`, creating it if needed. Preserves the
    /// invariant that the key-sets at any two distinct nodes are
    /// disjoint.
    pub fn add(&mut self, key: K, line: impl Into<String>) {
        let line = line.into();
        let current = self.location.get(&key).copied().unwrap_or(ROOT);
        self.nodes[current].keys.remove(&key);

        let child = if let Some(&id) = self.nodes[current].children.get(&line) {
            id
        } else {
            let id = self.nodes.len();
            self.nodes.push(Node {
                parent: Some(current),
                line: Some(line.clone()),
                children: HashMap::new(),
                keys: FxHashSet::default(),
            });
            self.nodes[current].children.insert(line, id);
            id
        };

        self.nodes[child].keys.insert(key.clone());
        self.location.insert(key, child);
    }

    /// `get(key)`: the concatenation of lines from root to the node
    /// currently holding `key`, or `None` if the key is unknown.
    pub fn get(&self, key: &K) -> Option<String> {
        let mut node = *self.location.get(key)?;
        let mut rev = Vec::new();
        while let Some(line) = &self.nodes[node].line {
            rev.push(line.clone());
            node = self.nodes[node].parent.unwrap();
        }
        rev.reverse();
        Some(rev.join("\n"))
    }

    /// `walk()`: `(message, key-set)` for every node currently holding at
    /// least one key.
    pub fn walk(&self) -> Vec<(String, Vec<K>)> {
        let mut out = Vec::new();
        for (id, node) in self.nodes.iter().enumerate() {
            if node.keys.is_empty() {
                continue;
            }
            out.push((self.message_of(id), node.keys.iter().cloned().collect()));
        }
        out
    }

    /// `walk_trace()`: `(line, key-set, depth, n_children)` for every
    /// internal node, used for hierarchical output. Only meaningful (and
    /// only populated beyond the leaves holding keys) in `Trace` mode,
    /// though the walk itself is always available.
    pub fn walk_trace(&self) -> Vec<(String, Vec<K>, usize, usize)> {
        let mut out = Vec::new();
        for (id, node) in self.nodes.iter().enumerate() {
            if id == ROOT {
                continue;
            }
            let depth = self.depth_of(id);
            out.push((
                node.line.clone().unwrap_or_default(),
                node.keys.iter().cloned().collect(),
                depth,
                node.children.len(),
            ));
        }
        out
    }

    /// Remove `key` from the tree entirely. Only legal in `Shift`/`Trace`
    /// mode.
    pub fn remove(&mut self, key: &K) -> bool {
        if self.mode == Mode::Defer {
            return false;
        }
        if let Some(node) = self.location.remove(key) {
            self.nodes[node].keys.remove(key);
            true
        } else {
            false
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.location.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.location.len()
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_empty()
    }

    fn message_of(&self, mut node: NodeId) -> String {
        let mut rev = Vec::new();
        while let Some(line) = &self.nodes[node].line {
            rev.push(line.clone());
            node = self.nodes[node].parent.unwrap();
        }
        rev.reverse();
        rev.join("\n")
    }

    fn depth_of(&self, mut node: NodeId) -> usize {
        let mut d = 0;
        while let Some(p) = self.nodes[node].parent {
            d += 1;
            node = p;
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_partitions_known_keys() {
        let mut t = MsgTree::new(Mode::Defer);
        t.add("node1", "hello");
        t.add("node2", "hello");
        t.add("node3", "world");
        t.add("node1", "again");

        let walked = t.walk();
        let total: usize = walked.iter().map(|(_, ks)| ks.len()).sum();
        assert_eq!(total, 3);

        // key-sets are pairwise disjoint
        for i in 0..walked.len() {
            for j in (i + 1)..walked.len() {
                for k in &walked[i].1 {
                    assert!(!walked[j].1.contains(k));
                }
            }
        }
    }

    #[test]
    fn get_concatenates_root_to_node() {
        let mut t = MsgTree::new(Mode::Defer);
        t.add("n1", "line1");
        t.add("n1", "line2");
        assert_eq!(t.get(&"n1").unwrap(), "line1\nline2");
    }

    #[test]
    fn shared_prefix_shares_storage() {
        let mut t = MsgTree::new(Mode::Defer);
        for n in 0..1000 {
            t.add(n, "same output line");
        }
        // All 1000 keys collapse onto a single child of root.
        assert_eq!(t.nodes.len(), 2);
    }

    #[test]
    fn remove_requires_shift_or_trace_mode() {
        let mut defer = MsgTree::new(Mode::Defer);
        defer.add("n1", "x");
        assert!(!defer.remove(&"n1"));

        let mut shift = MsgTree::new(Mode::Shift);
        shift.add("n1", "x");
        assert!(shift.remove(&"n1"));
        assert!(!shift.contains_key(&"n1"));
    }

    #[test]
    fn crlf_and_lf_yield_same_message() {
        let mut a = MsgTree::new(Mode::Defer);
        a.add("n1", "hello");
        let mut b = MsgTree::new(Mode::Defer);
        b.add("n1", "hello");
        assert_eq!(a.get(&"n1"), b.get(&"n1"));
    }
}
