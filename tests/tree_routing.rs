use clustershell::nodeset::NodeSet;
use clustershell::topology::Router;

#[test]
fn distributes_across_two_gateways() {
    let topo = test_utils::sample_topology();
    let router = Router::new(topo.to_tree("root").unwrap());

    let targets = NodeSet::parse("node[2-18]").unwrap();
    let mut plan = router.distribute(&targets, 16).unwrap();
    plan.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0].0, "gw0");
    assert_eq!(plan[0].1.fold(), "node[2-9]");
    assert_eq!(plan[1].0, "gw1");
    assert_eq!(plan[1].1.fold(), "node[10-18]");
}

#[test]
fn next_hop_matches_subtree_membership() {
    let topo = test_utils::sample_topology();
    let tree = topo.to_tree("root").unwrap();
    let router = Router::new(tree);

    for host in NodeSet::parse("node[0-19]").unwrap().iter() {
        let gw = router.next_hop(&host).unwrap();
        assert!(router.tree().subtree(&gw).contains(&host));
    }
}
