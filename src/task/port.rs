//! Inter-task mailbox ("port"): lets one thread post a message to
//! another thread's reactor, with delivery occurring inside the target
//! reactor's own event loop rather than on the sender's thread.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::{Error, Result};

/// The sending half, cloneable and `Send`able to other threads.
#[derive(Clone)]
pub struct PortSender<M> {
    tx: Sender<M>,
}

impl<M> PortSender<M> {
    /// Enqueue a message. Blocks the caller if the port is at
    /// `port_qlimit` capacity, unless the channel has since been closed.
    pub fn send(&self, msg: M) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::Worker("port receiver has been dropped".to_string()))
    }

    /// Non-blocking variant used by the owning reactor to drain its own
    /// inbox without stalling on a full downstream queue elsewhere.
    pub fn try_send(&self, msg: M) -> Result<()> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Worker("port at capacity".to_string())),
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::Worker("port receiver has been dropped".to_string()))
            }
        }
    }
}

/// The receiving half, held by the reactor that owns this port and
/// drained once per event-loop iteration.
pub struct PortReceiver<M> {
    rx: Receiver<M>,
}

impl<M> PortReceiver<M> {
    /// Drain everything currently queued without blocking — called from
    /// inside the owning `Task`'s run loop, never from another thread.
    pub fn drain(&self) -> Vec<M> {
        self.rx.try_iter().collect()
    }
}

/// Create a bounded port pair with the configured `port_qlimit`.
pub fn port<M>(qlimit: usize) -> (PortSender<M>, PortReceiver<M>) {
    let (tx, rx) = crossbeam_channel::bounded(qlimit.max(1));
    (PortSender { tx }, PortReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_arrive_in_order() {
        let (tx, rx) = port::<i32>(8);
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(rx.drain(), vec![1, 2]);
    }

    #[test]
    fn full_port_rejects_try_send() {
        let (tx, _rx) = port::<i32>(1);
        tx.try_send(1).unwrap();
        assert!(tx.try_send(2).is_err());
    }
}
