use clustershell::msgtree::{Mode, MsgTree};
use clustershell::nodeset::NodeSet;

#[test]
fn gather_groups_nodes_by_identical_output() {
    let mut tree: MsgTree<String> = MsgTree::new(Mode::Defer);
    tree.add("node1".to_string(), "ok");
    tree.add("node2".to_string(), "ok");
    tree.add("node3".to_string(), "fail");

    let mut blocks = tree.walk();
    blocks.sort_by_key(|(_, nodes)| nodes.len());

    assert_eq!(blocks.len(), 2);

    let (fail_msg, fail_nodes) = &blocks[0];
    assert_eq!(fail_msg, "fail");
    let fail_set = NodeSet::from_names(fail_nodes.iter().map(String::as_str)).unwrap();
    assert_eq!(fail_set.fold(), "node3");

    let (ok_msg, ok_nodes) = &blocks[1];
    assert_eq!(ok_msg, "ok");
    let ok_set = NodeSet::from_names(ok_nodes.iter().map(String::as_str)).unwrap();
    assert_eq!(ok_set.fold(), "node[1-2]");
}
