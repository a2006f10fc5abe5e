//! Drives a single command across a [`Router`]'s gateways: one
//! [`ControllerGateway`] per distinct next hop, fed by
//! [`Router::distribute`], with output demultiplexed into the same
//! kind of MsgTrees a direct [`Task`] gathers into.
//!
//! A gateway channel that errors out — or whose subprocess disappears
//! before sending `CTL(eof)` — is handled per the propagation policy:
//! the gateway is marked unreachable on the `Router` (so it is excluded
//! from any later distribution in the same run) and every node in its
//! subtree that hasn't yet produced a retcode is recorded as timed out.
//! No retry is attempted within the same run.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::TaskInfo;
use crate::msgtree::{Mode, MsgTree};
use crate::nodeset::NodeSet;

use super::gateway::ControllerGateway;
use super::router::Router;
use super::channel::Message;

pub struct Propagator {
    router: Router,
    gateways: HashMap<String, ControllerGateway>,
    stdout: MsgTree<String>,
    stderr: MsgTree<String>,
    retcodes: HashMap<String, i32>,
    timedout: Vec<String>,
}

impl Propagator {
    pub fn new(router: Router) -> Self {
        Propagator {
            router,
            gateways: HashMap::new(),
            stdout: MsgTree::new(Mode::Defer),
            stderr: MsgTree::new(Mode::Defer),
            retcodes: HashMap::new(),
            timedout: Vec::new(),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Partition `targets` across the router's gateways and build the
    /// `CFG`/`CTL(shell)` messages each one needs sent, keyed by gateway
    /// name. Gateways with no live route to any target are skipped.
    pub fn start(
        &mut self,
        info: &TaskInfo,
        targets: &NodeSet,
        cmd: &str,
        grooming_delay: Duration,
    ) -> crate::error::Result<Vec<(String, Vec<Message>)>> {
        let plan = self.router.distribute(targets, info.fanout)?;
        let mut out = Vec::with_capacity(plan.len());
        for (gw, subset, _slice) in plan {
            let channel = self.gateways.entry(gw.clone()).or_insert_with(|| ControllerGateway::new(gw.as_str(), grooming_delay));
            let messages = channel.start(info, &subset, cmd);
            out.push((gw, messages));
        }
        Ok(out)
    }

    /// Feed one inbound message from gateway `gw`, folding any `CTL(res)`
    /// payload into the propagator's own output trees. Returns the
    /// reply to send back to that gateway, if any.
    pub fn demux(&mut self, gw: &str, msg: &Message) -> Option<Message> {
        let channel = self.gateways.get_mut(gw)?;
        let (reply, _eof) = channel.demux(msg, &mut self.stdout, &mut self.stderr, &mut self.retcodes);
        reply
    }

    /// A gateway channel broke before producing `eof`: mark it
    /// unreachable for the rest of this run and record every node in
    /// its subtree that hasn't yet reported a retcode as timed out.
    pub fn fail_gateway(&mut self, gw: &str) {
        self.router.mark_unreachable(gw);
        for node in self.router.tree().subtree(gw) {
            if node == gw {
                continue;
            }
            if !self.retcodes.contains_key(&node) {
                self.timedout.push(node);
            }
        }
        self.gateways.remove(gw);
    }

    pub fn stdout(&self) -> &MsgTree<String> {
        &self.stdout
    }

    pub fn stderr(&self) -> &MsgTree<String> {
        &self.stderr
    }

    pub fn retcodes(&self) -> &HashMap<String, i32> {
        &self.retcodes
    }

    pub fn timedout(&self) -> &[String] {
        &self.timedout
    }

    pub fn all_closed(&self) -> bool {
        self.gateways.values().all(ControllerGateway::is_closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::channel::CtlAction;
    use crate::topology::Topology;

    fn sample_router() -> Router {
        let topo = Topology::parse("root: gw[0-1]\ngw0: node[0-9]\ngw1: node[10-19]\n").unwrap();
        Router::new(topo.to_tree("root").unwrap())
    }

    #[test]
    fn start_partitions_targets_per_gateway() {
        let mut prop = Propagator::new(sample_router());
        let targets = NodeSet::parse("node[2-18]").unwrap();
        let info = TaskInfo::default();
        let mut plan = prop.start(&info, &targets, "uptime", Duration::from_millis(250)).unwrap();
        plan.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].0, "gw0");
        assert!(matches!(plan[0].1[0], Message::Cfg { .. }));
        assert!(matches!(plan[0].1[1], Message::Ctl { action: CtlAction::Shell { .. }, .. }));
    }

    #[test]
    fn fail_gateway_records_timeouts_and_blocks_future_routing() {
        let mut prop = Propagator::new(sample_router());
        let targets = NodeSet::parse("node[2-18]").unwrap();
        let info = TaskInfo::default();
        prop.start(&info, &targets, "uptime", Duration::from_millis(250)).unwrap();

        prop.demux(
            "gw0",
            &Message::Ctl {
                msgid: 1,
                targets: "node3".to_string(),
                action: CtlAction::Res {
                    node: "node3".to_string(),
                    stream: None,
                    line: None,
                    retcode: Some(0),
                },
            },
        );

        prop.fail_gateway("gw0");
        assert!(prop.router().is_unreachable("gw0"));
        // node3 already reported a retcode, so it is not counted as timed out.
        assert!(!prop.timedout().contains(&"node3".to_string()));
        // every other node[0-9] host that never reported is.
        assert!(prop.timedout().contains(&"node4".to_string()));
        assert!(prop.router().next_hop("node5").is_err());
    }
}
