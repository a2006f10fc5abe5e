//! Routing over a validated [`PropagationTree`]: next-hop resolution,
//! unreachable-gateway tracking, and fanout-proportional work
//! distribution across a root's children.

use std::collections::HashSet;

use super::PropagationTree;
use crate::error::{Error, Result};
use crate::nodeset::NodeSet;

/// Resolves a destination host to the next hop on the path from the
/// tree's root, honoring gateways marked unreachable mid-run.
#[derive(Debug, Clone)]
pub struct Router {
    tree: PropagationTree,
    unreachable: HashSet<String>,
}

impl Router {
    pub fn new(tree: PropagationTree) -> Self {
        Router { tree, unreachable: HashSet::new() }
    }

    pub fn tree(&self) -> &PropagationTree {
        &self.tree
    }

    /// Permanently remove `gw` from future routing. Any destination
    /// whose path passes through `gw` subsequently fails to resolve.
    pub fn mark_unreachable(&mut self, gw: &str) {
        self.unreachable.insert(gw.to_string());
    }

    pub fn is_unreachable(&self, gw: &str) -> bool {
        self.unreachable.contains(gw)
    }

    /// The member of the root's children whose subtree contains `dst`.
    pub fn next_hop(&self, dst: &str) -> Result<String> {
        if self.unreachable.contains(dst) {
            return Err(Error::RouteResolving(dst.to_string()));
        }
        let root = self.tree.root();
        let mut current = dst.to_string();
        loop {
            if current == root {
                return Err(Error::RouteResolving(dst.to_string()));
            }
            let parent = self
                .tree
                .parent_of(&current)
                .ok_or_else(|| Error::RouteResolving(dst.to_string()))?;
            if self.unreachable.contains(&current) {
                return Err(Error::RouteResolving(dst.to_string()));
            }
            if parent == root {
                return Ok(current);
            }
            current = parent.to_string();
        }
    }

    /// Partition `targets` by next-hop gateway, pairing each non-empty
    /// partition with a fanout slice proportional to its share of
    /// `targets`. Destinations that don't resolve (unreachable gateway,
    /// host outside the tree) are silently excluded — the caller is
    /// expected to have already surfaced a *route-resolving error* for
    /// any destination it cares about individually.
    pub fn distribute(&self, targets: &NodeSet, fanout: usize) -> Result<Vec<(String, NodeSet, usize)>> {
        let mut by_gateway: Vec<(String, Vec<String>)> = Vec::new();
        for host in targets.iter() {
            let Ok(gw) = self.next_hop(&host) else { continue };
            match by_gateway.iter_mut().find(|(g, _)| *g == gw) {
                Some((_, hosts)) => hosts.push(host),
                None => by_gateway.push((gw, vec![host])),
            }
        }

        let total = targets.len().max(1);
        let mut out = Vec::with_capacity(by_gateway.len());
        for (gw, hosts) in by_gateway {
            let slice = ((fanout * hosts.len()) / total).max(1);
            let subset = NodeSet::from_names(hosts.iter().map(String::as_str))?;
            out.push((gw, subset, slice));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;

    fn sample_router() -> Router {
        let topo = Topology::parse("root: gw[0-1]\ngw0: node[0-9]\ngw1: node[10-19]\n").unwrap();
        Router::new(topo.to_tree("root").unwrap())
    }

    #[test]
    fn next_hop_resolves_through_gateway() {
        let router = sample_router();
        assert_eq!(router.next_hop("node3").unwrap(), "gw0");
        assert_eq!(router.next_hop("node15").unwrap(), "gw1");
    }

    #[test]
    fn mark_unreachable_blocks_subsequent_routing() {
        let mut router = sample_router();
        router.mark_unreachable("gw0");
        assert!(router.next_hop("node3").is_err());
        assert!(router.next_hop("node15").is_ok());
    }

    #[test]
    fn distribute_partitions_by_next_hop() {
        let router = sample_router();
        let targets = NodeSet::parse("node[2-18]").unwrap();
        let mut plan = router.distribute(&targets, 16).unwrap();
        plan.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].0, "gw0");
        assert_eq!(plan[0].1.len(), 8); // node2..node9
        assert_eq!(plan[1].0, "gw1");
        assert_eq!(plan[1].1.len(), 9); // node10..node18
    }
}
