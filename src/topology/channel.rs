//! Gateway wire protocol: an ordered stream of XML messages wrapped in
//! a `<channel src="…" dst="…">…</channel>` envelope, plus the
//! acknowledgement/retransmission bookkeeping every message on it goes
//! through before the sender considers it durable.
//!
//! Modeled as an explicit state machine (`ChannelState` plus
//! `PropagationChannel::receive`'s transition table) rather than nested
//! callbacks, so the gateway side can reuse the exact same machine as
//! the controller side.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use xml::reader::{EventReader, XmlEvent as ReaderEvent};
use xml::writer::{EmitterConfig, XmlEvent as WriterEvent};

use crate::error::{Error, Result};

/// Safe `task.info` keys a `CFG` message may carry across to a gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CfgInfo {
    pub debug: Option<bool>,
    pub fanout: Option<usize>,
    pub grooming_delay: Option<f64>,
    pub connect_timeout: Option<f64>,
    pub command_timeout: Option<f64>,
}

/// `CTL` action payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CtlAction {
    Shell { cmd: String },
    Write { data: Vec<u8> },
    Eof,
    Res { node: String, stream: Option<String>, line: Option<String>, retcode: Option<i32> },
}

/// One message on a channel, after base64/JSON payloads have been
/// decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Cfg { msgid: u64, info: CfgInfo },
    Ctl { msgid: u64, targets: String, action: CtlAction },
    Ack { msgid: u64, ack: u64 },
    Err { msgid: u64, reason: String },
}

impl Message {
    pub fn msgid(&self) -> u64 {
        match self {
            Message::Cfg { msgid, .. }
            | Message::Ctl { msgid, .. }
            | Message::Ack { msgid, .. }
            | Message::Err { msgid, .. } => *msgid,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Message::Cfg { .. } => "cfg",
            Message::Ctl { .. } => "ctl",
            Message::Ack { .. } => "ack",
            Message::Err { .. } => "err",
        }
    }
}

/// Write one `<channel src dst>...</channel>` envelope containing
/// `messages`, in order.
pub fn encode_channel<W: Write>(out: W, src: &str, dst: &str, messages: &[Message]) -> Result<()> {
    let mut writer = EmitterConfig::new()
        .write_document_declaration(false)
        .perform_indent(false)
        .create_writer(out);

    writer
        .write(WriterEvent::start_element("channel").attr("src", src).attr("dst", dst))
        .map_err(|e| Error::Protocol(e.to_string()))?;

    for msg in messages {
        let msgid = msg.msgid().to_string();
        let tag = msg.tag();
        let mut elem = WriterEvent::start_element(tag).attr("msgid", msgid.as_str());
        let targets_str;
        let ack_str;
        let payload;
        match msg {
            Message::Cfg { info, .. } => {
                payload = Some(json_b64(info)?);
                elem = elem.attr("payload", payload.as_deref().unwrap());
            }
            Message::Ctl { targets, action, .. } => {
                targets_str = targets.clone();
                payload = Some(json_b64(action)?);
                elem = elem.attr("targets", targets_str.as_str()).attr("payload", payload.as_deref().unwrap());
            }
            Message::Ack { ack, .. } => {
                ack_str = ack.to_string();
                elem = elem.attr("ack", ack_str.as_str());
            }
            Message::Err { reason, .. } => {
                elem = elem.attr("reason", reason.as_str());
            }
        }
        writer.write(elem).map_err(|e| Error::Protocol(e.to_string()))?;
        writer.write(WriterEvent::end_element()).map_err(|e| Error::Protocol(e.to_string()))?;
    }

    writer.write(WriterEvent::end_element()).map_err(|e| Error::Protocol(e.to_string()))?;
    Ok(())
}

fn json_b64<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(|e| Error::Protocol(e.to_string()))?;
    Ok(BASE64.encode(bytes))
}

fn json_from_b64<T: for<'de> Deserialize<'de>>(encoded: &str) -> Result<T> {
    let bytes = BASE64.decode(encoded).map_err(|e| Error::Protocol(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Protocol(e.to_string()))
}

/// Parse one channel envelope's messages back out, in document order.
pub fn decode_channel<R: Read>(source: R) -> Result<(String, String, Vec<Message>)> {
    let parser = EventReader::new(source);
    let mut src = String::new();
    let mut dst = String::new();
    let mut out = Vec::new();
    let mut saw_channel = false;

    for event in parser {
        let event = event.map_err(|e| Error::Protocol(e.to_string()))?;
        if let ReaderEvent::StartElement { name, attributes, .. } = event {
            let attr = |key: &str| -> Option<String> {
                attributes.iter().find(|a| a.name.local_name == key).map(|a| a.value.clone())
            };
            match name.local_name.as_str() {
                "channel" => {
                    saw_channel = true;
                    src = attr("src").unwrap_or_default();
                    dst = attr("dst").unwrap_or_default();
                }
                "cfg" => {
                    let msgid: u64 = attr("msgid")
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| Error::Protocol("cfg: missing msgid".to_string()))?;
                    let payload = attr("payload").unwrap_or_default();
                    out.push(Message::Cfg { msgid, info: json_from_b64(&payload)? });
                }
                "ctl" => {
                    let msgid: u64 = attr("msgid")
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| Error::Protocol("ctl: missing msgid".to_string()))?;
                    let targets = attr("targets").unwrap_or_default();
                    let payload = attr("payload").unwrap_or_default();
                    out.push(Message::Ctl { msgid, targets, action: json_from_b64(&payload)? });
                }
                "ack" => {
                    let msgid: u64 = attr("msgid")
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| Error::Protocol("ack: missing msgid".to_string()))?;
                    let ack: u64 = attr("ack")
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| Error::Protocol("ack: missing ack".to_string()))?;
                    out.push(Message::Ack { msgid, ack });
                }
                "err" => {
                    let msgid: u64 = attr("msgid")
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| Error::Protocol("err: missing msgid".to_string()))?;
                    let reason = attr("reason").unwrap_or_default();
                    out.push(Message::Err { msgid, reason });
                }
                other => return Err(Error::Protocol(format!("unexpected element <{other}>"))),
            }
        }
    }

    if !saw_channel {
        return Err(Error::Protocol("missing <channel> envelope".to_string()));
    }
    Ok((src, dst, out))
}

/// Which phase of the handshake a channel is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    AwaitingCfg,
    Running,
    Closed,
}

/// Tracks the send side of a channel: assigns monotonic msgids, and
/// remembers when each non-ACK message was last sent so the caller can
/// retransmit once `grooming_delay * k` has elapsed without an ACK.
pub struct PropagationChannel {
    state: ChannelState,
    next_msgid: u64,
    pending: HashMap<u64, (Message, Instant)>,
    grooming_delay: Duration,
}

impl PropagationChannel {
    pub fn new(grooming_delay: Duration) -> Self {
        PropagationChannel {
            state: ChannelState::AwaitingCfg,
            next_msgid: 1,
            pending: HashMap::new(),
            grooming_delay,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    fn alloc_msgid(&mut self) -> u64 {
        let id = self.next_msgid;
        self.next_msgid += 1;
        id
    }

    /// Build a durable (ACK-tracked) message and remember it as pending.
    pub fn send_cfg(&mut self, info: CfgInfo) -> Message {
        let msgid = self.alloc_msgid();
        let msg = Message::Cfg { msgid, info };
        self.pending.insert(msgid, (msg.clone(), Instant::now()));
        msg
    }

    pub fn send_ctl(&mut self, targets: String, action: CtlAction) -> Message {
        let msgid = self.alloc_msgid();
        let msg = Message::Ctl { msgid, targets, action };
        self.pending.insert(msgid, (msg.clone(), Instant::now()));
        msg
    }

    /// Process an inbound message, returning any reply the transition
    /// table says to send back (an `ACK` for every non-ACK message, or
    /// nothing for an `ACK`/`ERR`).
    pub fn receive(&mut self, msg: &Message) -> Option<Message> {
        match msg {
            Message::Cfg { msgid, .. } => {
                if self.state == ChannelState::AwaitingCfg {
                    self.state = ChannelState::Running;
                }
                Some(Message::Ack { msgid: self.alloc_msgid(), ack: *msgid })
            }
            Message::Ctl { msgid, action, .. } => {
                if matches!(action, CtlAction::Eof) {
                    self.state = ChannelState::Closed;
                }
                Some(Message::Ack { msgid: self.alloc_msgid(), ack: *msgid })
            }
            Message::Ack { ack, .. } => {
                self.pending.remove(ack);
                None
            }
            Message::Err { .. } => {
                self.state = ChannelState::Closed;
                None
            }
        }
    }

    /// Every pending message whose ACK hasn't arrived within
    /// `grooming_delay * k`, due for retransmission.
    pub fn due_for_retransmit(&self, k: u32) -> Vec<Message> {
        let threshold = self.grooming_delay * k;
        let now = Instant::now();
        self.pending
            .values()
            .filter(|(_, sent_at)| now.duration_since(*sent_at) >= threshold)
            .map(|(msg, _)| msg.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_xml() {
        let messages = vec![
            Message::Cfg { msgid: 1, info: CfgInfo { fanout: Some(32), ..Default::default() } },
            Message::Ctl {
                msgid: 2,
                targets: "node[0-9]".to_string(),
                action: CtlAction::Shell { cmd: "uptime".to_string() },
            },
            Message::Ack { msgid: 3, ack: 2 },
        ];
        let mut buf = Vec::new();
        encode_channel(&mut buf, "controller", "gw0", &messages).unwrap();
        let (src, dst, decoded) = decode_channel(buf.as_slice()).unwrap();
        assert_eq!(src, "controller");
        assert_eq!(dst, "gw0");
        assert_eq!(decoded, messages);
    }

    #[test]
    fn cfg_then_eof_drives_state_to_closed() {
        let mut chan = PropagationChannel::new(Duration::from_millis(250));
        assert_eq!(chan.state(), ChannelState::AwaitingCfg);
        chan.receive(&Message::Cfg { msgid: 1, info: CfgInfo::default() });
        assert_eq!(chan.state(), ChannelState::Running);
        chan.receive(&Message::Ctl { msgid: 2, targets: "node1".to_string(), action: CtlAction::Eof });
        assert_eq!(chan.state(), ChannelState::Closed);
    }

    #[test]
    fn ack_clears_pending_message() {
        let mut chan = PropagationChannel::new(Duration::from_millis(1));
        let sent = chan.send_cfg(CfgInfo::default());
        assert_eq!(chan.due_for_retransmit(0).len(), 1);
        chan.receive(&Message::Ack { msgid: 99, ack: sent.msgid() });
        assert!(chan.due_for_retransmit(0).is_empty());
    }
}
