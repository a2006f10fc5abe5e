//! Gateway lifecycle: the controller sends `CFG` then one `CTL(shell)`
//! per subgroup; a gateway spawns its own Task, executes the command on
//! its subset, multiplexes output back as `CTL(res)` messages, and
//! emits `CTL(eof)` once its whole subtree is done. The controller side
//! demultiplexes those replies into its own MsgTrees exactly as if the
//! output had come from direct workers.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::TaskInfo;
use crate::error::Result;
use crate::msgtree::MsgTree;
use crate::nodeset::NodeSet;
use crate::task::Task;

use super::channel::{CfgInfo, ChannelState, CtlAction, Message, PropagationChannel};

/// Controller-side handle to one child gateway.
pub struct ControllerGateway {
    name: String,
    channel: PropagationChannel,
}

impl ControllerGateway {
    pub fn new(name: impl Into<String>, grooming_delay: Duration) -> Self {
        ControllerGateway { name: name.into(), channel: PropagationChannel::new(grooming_delay) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.channel.state() == ChannelState::Closed
    }

    /// Build the `CFG` then `CTL(shell)` pair the lifecycle sends on
    /// connect, for subgroup `targets` running `cmd`.
    pub fn start(&mut self, info: &TaskInfo, targets: &NodeSet, cmd: &str) -> Vec<Message> {
        let cfg = self.channel.send_cfg(CfgInfo {
            debug: Some(info.debug),
            fanout: Some(info.fanout),
            grooming_delay: Some(info.grooming_delay),
            connect_timeout: Some(info.connect_timeout),
            command_timeout: Some(info.command_timeout),
        });
        let shell = self.channel.send_ctl(targets.fold(), CtlAction::Shell { cmd: cmd.to_string() });
        vec![cfg, shell]
    }

    /// Feed one inbound message through the channel's transition table,
    /// folding any `CTL(res)` payload into the controller's own output
    /// trees. Returns the reply to send back (usually an `Ack`) and
    /// whether this subtree has now reached `eof`.
    pub fn demux(
        &mut self,
        msg: &Message,
        stdout: &mut MsgTree<String>,
        stderr: &mut MsgTree<String>,
        retcodes: &mut HashMap<String, i32>,
    ) -> (Option<Message>, bool) {
        if let Message::Ctl { action: CtlAction::Res { node, stream, line, retcode }, .. } = msg {
            if let (Some(stream), Some(line)) = (stream, line) {
                let key = format!("{node}:{stream}");
                if stream == "stdout" {
                    stdout.add(key, line);
                } else {
                    stderr.add(key, line);
                }
            }
            if let Some(rc) = retcode {
                retcodes.insert(node.clone(), *rc);
            }
        }
        let eof = matches!(msg, Message::Ctl { action: CtlAction::Eof, .. });
        (self.channel.receive(msg), eof)
    }
}

/// Gateway-side handle: owns the Task that actually runs commands on
/// this gateway's subset of the tree.
pub struct GatewaySide {
    channel: PropagationChannel,
    task: Task,
}

impl GatewaySide {
    pub fn new() -> Result<Self> {
        Ok(GatewaySide { channel: PropagationChannel::new(Duration::from_millis(250)), task: Task::new()? })
    }

    /// Handle one inbound message, returning every message to send
    /// back: the transition-table `Ack` first, then (once a `shell`
    /// command has finished running) one `CTL(res)` per produced output
    /// line, one retcode-only `CTL(res)` per node, and a final
    /// `CTL(eof)`.
    pub fn handle(&mut self, msg: &Message) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        if let Some(ack) = self.channel.receive(msg) {
            out.push(ack);
        }

        match msg {
            Message::Cfg { info, .. } => self.adopt_cfg(info)?,
            Message::Ctl { targets, action: CtlAction::Shell { cmd }, .. } => {
                out.extend(self.run_shell(targets, cmd)?);
            }
            _ => {}
        }
        Ok(out)
    }

    fn adopt_cfg(&mut self, info: &CfgInfo) -> Result<()> {
        if let Some(v) = info.fanout {
            self.task.set_info("fanout", &v.to_string())?;
        }
        if let Some(v) = info.grooming_delay {
            self.task.set_info("grooming_delay", &v.to_string())?;
        }
        if let Some(v) = info.connect_timeout {
            self.task.set_info("connect_timeout", &v.to_string())?;
        }
        if let Some(v) = info.command_timeout {
            self.task.set_info("command_timeout", &v.to_string())?;
        }
        if let Some(v) = info.debug {
            self.task.set_info("debug", if v { "1" } else { "0" })?;
        }
        Ok(())
    }

    fn run_shell(&mut self, targets: &str, cmd: &str) -> Result<Vec<Message>> {
        let nodeset = NodeSet::parse(targets)?;
        let nodes: Vec<String> = nodeset.iter().collect();
        let worker = self.task.shell(cmd, &nodes)?;
        self.task.run(None)?;

        let mut out = Vec::new();
        for node in &nodes {
            if let Some(buf) = self.task.node_buffer(node) {
                for line in buf.lines() {
                    let action = res_action(node, Some("stdout"), Some(line), None);
                    out.push(self.channel.send_ctl(node.clone(), action));
                }
            }
            let retcode = worker.borrow().retcodes.get(node).copied();
            let action = res_action(node, None, None, retcode);
            out.push(self.channel.send_ctl(node.clone(), action));
        }
        out.push(self.channel.send_ctl(String::new(), CtlAction::Eof));
        Ok(out)
    }
}

/// Build a `CTL(res)` payload for `node`. Emission always goes through
/// `PropagationChannel::send_ctl` so the message gets a real, tracked
/// msgid rather than being dropped straight on the wire.
fn res_action(node: &str, stream: Option<&str>, line: Option<&str>, retcode: Option<i32>) -> CtlAction {
    CtlAction::Res {
        node: node.to_string(),
        stream: stream.map(str::to_string),
        line: line.map(str::to_string),
        retcode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgtree::Mode;

    #[test]
    fn gateway_runs_shell_and_reports_eof() {
        let mut gw = GatewaySide::new().unwrap();
        let replies = gw.handle(&Message::Cfg { msgid: 1, info: CfgInfo::default() }).unwrap();
        assert!(matches!(replies[0], Message::Ack { .. }));

        let replies = gw
            .handle(&Message::Ctl {
                msgid: 2,
                targets: "n1".to_string(),
                action: CtlAction::Shell { cmd: "echo hi".to_string() },
            })
            .unwrap();
        assert!(matches!(replies[0], Message::Ack { .. }));
        assert!(replies.iter().any(|m| matches!(m, Message::Ctl { action: CtlAction::Eof, .. })));
        assert!(replies.iter().any(|m| matches!(
            m,
            Message::Ctl { action: CtlAction::Res { line: Some(l), .. }, .. } if l == "hi"
        )));
    }

    #[test]
    fn controller_demux_folds_res_into_msgtree() {
        let mut controller = ControllerGateway::new("gw0", Duration::from_millis(250));
        let mut stdout = MsgTree::new(Mode::Defer);
        let mut stderr = MsgTree::new(Mode::Defer);
        let mut retcodes = HashMap::new();

        let msg = Message::Ctl {
            msgid: 7,
            targets: "n1".to_string(),
            action: res_action("n1", Some("stdout"), Some("hi"), Some(0)),
        };
        let (reply, eof) = controller.demux(&msg, &mut stdout, &mut stderr, &mut retcodes);
        assert!(matches!(reply, Some(Message::Ack { ack: 7, .. })));
        assert!(!eof);
        assert_eq!(retcodes.get("n1"), Some(&0));
        assert_eq!(stdout.get(&"n1:stdout".to_string()), Some("hi".to_string()));
    }
}
