//! Topology file parsing and tree validation.
//!
//! A topology file is a set of routes, each mapping an upstream host (or
//! set of hosts) to the downstream NodeSet it forwards traffic to.
//! `Topology::to_tree` turns that route list into a validated
//! [`PropagationTree`] rooted at a caller-chosen host: a cycle, a node
//! with more than one parent, or a root that isn't actually reachable
//! all fail with `Error::Topology`.

pub mod channel;
pub mod gateway;
pub mod propagator;
pub mod router;

pub use propagator::Propagator;
pub use router::Router;

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::nodeset::NodeSet;

/// One parsed `UPSTREAM: DOWNSTREAM` line.
#[derive(Debug, Clone)]
pub struct Route {
    pub upstream: NodeSet,
    pub downstream: NodeSet,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    routes: Vec<Route>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an INI-style topology file: one non-empty, non-comment line
    /// per route, `UPSTREAM: DOWNSTREAM`, both sides NodeSet literals.
    pub fn parse(text: &str) -> Result<Self> {
        let mut routes = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let (upstream, downstream) = line.trim().split_once(':').ok_or_else(|| {
                Error::Topology(format!("line {}: expected 'UPSTREAM: DOWNSTREAM'", lineno + 1))
            })?;
            routes.push(Route {
                upstream: NodeSet::parse(upstream.trim())?,
                downstream: NodeSet::parse(downstream.trim())?,
            });
        }
        Ok(Topology { routes })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Validate tree invariants relative to `root` and build the
    /// resulting [`PropagationTree`]: exactly one root, every non-root
    /// node the destination of exactly one route, no cycles, root
    /// actually reachable.
    pub fn to_tree(&self, root: &str) -> Result<PropagationTree> {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut parent_of: HashMap<String, String> = HashMap::new();
        let mut all_nodes: HashSet<String> = HashSet::new();

        for route in &self.routes {
            for up in route.upstream.iter() {
                all_nodes.insert(up.clone());
                for down in route.downstream.iter() {
                    all_nodes.insert(down.clone());
                    if let Some(existing) = parent_of.insert(down.clone(), up.clone()) {
                        if existing != up {
                            return Err(Error::Topology(format!(
                                "{down} has multiple parents ({existing} and {up})"
                            )));
                        }
                    }
                    let kids = children.entry(up.clone()).or_default();
                    if !kids.contains(&down) {
                        kids.push(down.clone());
                    }
                }
            }
        }

        if !all_nodes.contains(root) {
            return Err(Error::Topology(format!("root {root:?} does not appear in the topology")));
        }
        if parent_of.contains_key(root) {
            return Err(Error::Topology(format!("{root} is not a root: it has a parent")));
        }

        let roots: Vec<&String> =
            all_nodes.iter().filter(|n| !parent_of.contains_key(n.as_str())).collect();
        if roots.len() != 1 {
            return Err(Error::Topology(format!(
                "expected exactly one root, found {}: {:?}",
                roots.len(),
                roots
            )));
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut on_stack: HashSet<String> = HashSet::new();
        detect_cycle(root, &children, &mut visited, &mut on_stack)?;

        if visited.len() != all_nodes.len() {
            let unreachable: Vec<&String> = all_nodes.difference(&visited).collect();
            return Err(Error::Topology(format!(
                "unreachable from root {root:?}: {unreachable:?}"
            )));
        }

        Ok(PropagationTree { root: root.to_string(), children, parent_of })
    }
}

fn detect_cycle(
    node: &str,
    children: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    on_stack: &mut HashSet<String>,
) -> Result<()> {
    if on_stack.contains(node) {
        return Err(Error::Topology(format!("cycle detected at {node}")));
    }
    if visited.contains(node) {
        return Ok(());
    }
    visited.insert(node.to_string());
    on_stack.insert(node.to_string());
    if let Some(kids) = children.get(node) {
        for kid in kids {
            detect_cycle(kid, children, visited, on_stack)?;
        }
    }
    on_stack.remove(node);
    Ok(())
}

/// A validated, rooted propagation tree: `children(parent)` and
/// `parent(child)` lookups over the host graph a [`Router`] routes
/// against.
#[derive(Debug, Clone)]
pub struct PropagationTree {
    root: String,
    children: HashMap<String, Vec<String>>,
    parent_of: HashMap<String, String>,
}

impl PropagationTree {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn children_of(&self, node: &str) -> &[String] {
        self.children.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent_of(&self, node: &str) -> Option<&str> {
        self.parent_of.get(node).map(String::as_str)
    }

    /// Every host in `node`'s subtree, `node` included.
    pub fn subtree(&self, node: &str) -> Vec<String> {
        let mut out = vec![node.to_string()];
        let mut i = 0;
        while i < out.len() {
            let current = out[i].clone();
            out.extend(self.children_of(&current).iter().cloned());
            i += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_builds_tree() {
        let topo = Topology::parse("root: gw[0-1]\ngw0: node[0-9]\ngw1: node[10-19]\n").unwrap();
        let tree = topo.to_tree("root").unwrap();
        assert_eq!(tree.children_of("root"), &["gw0".to_string(), "gw1".to_string()]);
        assert_eq!(tree.parent_of("node5"), Some("gw0"));
        assert_eq!(tree.subtree("gw0").len(), 11); // gw0 + node0..node9
    }

    #[test]
    fn rejects_multi_parent() {
        let topo = Topology::parse("root: gw[0-1]\ngw0: node1\ngw1: node1\n").unwrap();
        assert!(topo.to_tree("root").is_err());
    }

    #[test]
    fn rejects_cycle() {
        let topo = Topology::parse("a: b\nb: a\n").unwrap();
        assert!(matches!(topo.to_tree("a"), Err(Error::Topology(_))));
    }

    #[test]
    fn rejects_missing_root() {
        let topo = Topology::parse("a: b\n").unwrap();
        assert!(topo.to_tree("nonexistent").is_err());
    }

    #[test]
    fn rejects_node_with_parent_as_root() {
        let topo = Topology::parse("a: b\n").unwrap();
        assert!(topo.to_tree("b").is_err());
    }
}
