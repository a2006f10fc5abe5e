//! Shared topology fixtures, used by both the library's own unit tests
//! and the top-level integration tests so the tree shape stays in one
//! place.

use clustershell::topology::Topology;

/// A two-gateway, twenty-node tree: `root` forwards to `gw0`/`gw1`, each
/// covering ten targets.
pub fn sample_topology() -> Topology {
    Topology::parse("root: gw[0-1]\ngw0: node[0-9]\ngw1: node[10-19]\n")
        .expect("fixture topology text is well-formed")
}
