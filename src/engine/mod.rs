//! The event-driven reactor at the heart of a `Task`.
//!
//! Owns a `{fd: (client, stream)}` registration table, a set of
//! registered clients contributing to a reference count that keeps the
//! run loop alive, and a timer queue, and delegates the actual
//! register/unregister/poll syscalls to a swappable backend
//! (epoll/poll/select, see `backend.rs`).

mod backend;
pub mod client;
mod timer;

pub use backend::{select_backend, EngineBackend};
pub use client::{EngineClient, EventMask, ReadOutcome, StreamName};
pub use timer::TimerId;

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use timer::TimerQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(usize);

struct ClientEntry {
    client: Box<dyn EngineClient>,
    streams: FxHashMap<StreamName, RawFd>,
}

/// The reactor. One per `Task`; holds every registered client and timer
/// and drives `run()` until both are exhausted or a deadline fires.
pub struct Engine {
    backend: Box<dyn EngineBackend>,
    clients: Vec<Option<ClientEntry>>,
    free_slots: Vec<usize>,
    fd_index: FxHashMap<RawFd, (ClientId, StreamName)>,
    timers: TimerQueue,
    alive_clients: usize,
}

impl Engine {
    pub fn new(preferred: Option<&str>) -> Result<Self> {
        let backend = select_backend(preferred)?;
        debug!(backend = backend.identifier(), "engine selected");
        Ok(Engine {
            backend,
            clients: Vec::new(),
            free_slots: Vec::new(),
            fd_index: FxHashMap::default(),
            timers: TimerQueue::new(),
            alive_clients: 0,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.identifier()
    }

    /// Total reference count keeping `run()` from returning: live
    /// clients plus non-autoclose timers.
    pub fn refcount(&self) -> usize {
        self.alive_clients + self.timers.referenced_count()
    }

    pub fn add_client(&mut self, mut client: Box<dyn EngineClient>) -> Result<ClientId> {
        client.start()?;
        let fds = client.fds();
        let id = self.alloc_slot();
        let mut streams = FxHashMap::default();
        for (stream, fd) in fds {
            let events = client.desired_events(stream);
            self.backend.register(fd, events)?;
            self.fd_index.insert(fd, (id, stream));
            streams.insert(stream, fd);
        }
        self.clients[id.0] = Some(ClientEntry { client, streams });
        self.alive_clients += 1;
        Ok(id)
    }

    fn alloc_slot(&mut self) -> ClientId {
        if let Some(idx) = self.free_slots.pop() {
            ClientId(idx)
        } else {
            self.clients.push(None);
            ClientId(self.clients.len() - 1)
        }
    }

    pub fn add_timer(
        &mut self,
        delay: Duration,
        interval: Option<Duration>,
        autoclose: bool,
        handler: Box<dyn FnMut()>,
    ) -> TimerId {
        self.timers.add(delay, interval, autoclose, handler)
    }

    pub fn remove_timer(&mut self, id: TimerId) {
        self.timers.remove(id);
    }

    fn remove_client(&mut self, id: ClientId, abort: bool, timedout: bool) {
        let Some(entry) = self.clients[id.0].take() else { return };
        for &fd in entry.streams.values() {
            let _ = self.backend.unregister(fd);
            self.fd_index.remove(&fd);
        }
        let mut entry = entry;
        entry.client.close(abort, timedout);
        self.free_slots.push(id.0);
        self.alive_clients = self.alive_clients.saturating_sub(1);
    }

    fn drop_stream(&mut self, id: ClientId, stream: StreamName) {
        if let Some(Some(entry)) = self.clients.get_mut(id.0) {
            if let Some(fd) = entry.streams.remove(&stream) {
                let _ = self.backend.unregister(fd);
                self.fd_index.remove(&fd);
            }
        }
    }

    fn rearm(&mut self, id: ClientId) -> Result<()> {
        let Some(Some(entry)) = self.clients.get(id.0) else { return Ok(()) };
        let wants: Vec<(RawFd, EventMask)> = entry
            .streams
            .iter()
            .map(|(&stream, &fd)| (fd, entry.client.desired_events(stream)))
            .collect();
        for (fd, events) in wants {
            self.backend.modify(fd, events)?;
        }
        Ok(())
    }

    /// Abort every registered client immediately. `kill` asks each
    /// client to escalate (e.g. SIGKILL a child) before closing.
    pub fn abort(&mut self, kill: bool) {
        let ids: Vec<ClientId> = (0..self.clients.len())
            .filter(|&i| self.clients[i].is_some())
            .map(ClientId)
            .collect();
        for id in ids {
            if kill {
                if let Some(Some(entry)) = self.clients.get_mut(id.0) {
                    entry.client.request_kill();
                }
            }
            self.remove_client(id, true, false);
        }
    }

    /// Run the event loop until every client has finished and every
    /// non-autoclose timer has fired, or `overall_timeout` elapses
    /// first.
    pub fn run(&mut self, overall_timeout: Option<Duration>) -> Result<()> {
        self.run_with_idle(overall_timeout, |_| {})
    }

    /// Same as [`run`](Self::run), but calls `on_idle` once per loop
    /// iteration with a fresh `&mut Engine`, before the refcount is
    /// checked. This is how `Task` promotes newly-freed fanout slots
    /// mid-run — when a running client closes, a queued one is
    /// promoted — without the engine needing to know anything about
    /// fanout or workers.
    pub fn run_with_idle(
        &mut self,
        overall_timeout: Option<Duration>,
        mut on_idle: impl FnMut(&mut Engine),
    ) -> Result<()> {
        let deadline = overall_timeout.map(|d| Instant::now() + d);

        loop {
            on_idle(self);
            if self.refcount() == 0 {
                break;
            }

            let now = Instant::now();
            if let Some(dl) = deadline {
                if now >= dl {
                    return Err(Error::EngineTimeout(overall_timeout.unwrap()));
                }
            }

            // 1. compute the next wakeup: soonest of the overall
            // deadline and the soonest pending timer.
            let mut wait = deadline.map(|dl| dl.saturating_duration_since(now));
            if let Some(timer_delay) = self.timers.next_delay(now) {
                wait = Some(match wait {
                    Some(w) => w.min(timer_delay),
                    None => timer_delay,
                });
            }

            // 2. block on the backend.
            let ready = self.backend.poll(wait)?;

            // 3/4. dispatch each ready fd, then re-arm interest from the
            // client's current desired events.
            for (fd, events) in ready {
                let Some(&(id, stream)) = self.fd_index.get(&fd) else { continue };
                self.dispatch(id, stream, events)?;
            }

            // 5. fire due timers.
            self.timers.fire_due(Instant::now());
        }
        trace!("engine run loop drained: refcount reached 0");
        Ok(())
    }

    fn dispatch(&mut self, id: ClientId, stream: StreamName, events: EventMask) -> Result<()> {
        let mut eof = false;
        if let Some(Some(entry)) = self.clients.get_mut(id.0) {
            if events.contains(EventMask::READ) {
                match entry.client.handle_read(stream) {
                    Ok(ReadOutcome::Eof) => eof = true,
                    Ok(ReadOutcome::More) => {}
                    Err(e) => warn!(?stream, error = %e, "client read handler failed"),
                }
            }
            if events.contains(EventMask::WRITE) {
                if let Err(e) = entry.client.handle_write(stream) {
                    warn!(?stream, error = %e, "client write handler failed");
                }
            }
            if events.contains(EventMask::ERROR) {
                match entry.client.handle_error(stream) {
                    Ok(ReadOutcome::Eof) => eof = true,
                    Ok(ReadOutcome::More) => {}
                    Err(e) => warn!(?stream, error = %e, "client error handler failed"),
                }
            }
        }

        if eof {
            self.drop_stream(id, stream);
        } else {
            self.rearm(id)?;
        }

        let finished = matches!(&self.clients[id.0], Some(entry) if entry.client.is_finished());
        if finished {
            self.remove_client(id, false, false);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::LineBuffer;
    use std::os::fd::{AsRawFd, RawFd};

    /// A client wrapping one end of a pipe: writes a fixed payload once
    /// registered for WRITE, and is "finished" once its own read side
    /// sees EOF. Minimal enough to exercise register/dispatch/refcount
    /// without spawning a real child process.
    struct PipeClient {
        read_fd: std::os::unix::io::OwnedFd,
        write_fd: Option<std::os::unix::io::OwnedFd>,
        payload: &'static [u8],
        wrote: bool,
        buf: LineBuffer,
        lines: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
        done: bool,
    }

    impl EngineClient for PipeClient {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn fds(&self) -> Vec<(StreamName, RawFd)> {
            let mut v = vec![(StreamName::Stdout, self.read_fd.as_raw_fd())];
            if let Some(w) = &self.write_fd {
                v.push((StreamName::Stdin, w.as_raw_fd()));
            }
            v
        }

        fn desired_events(&self, stream: StreamName) -> EventMask {
            match stream {
                StreamName::Stdout => EventMask::READ,
                StreamName::Stdin if !self.wrote => EventMask::WRITE,
                _ => EventMask::empty(),
            }
        }

        fn handle_read(&mut self, _stream: StreamName) -> Result<ReadOutcome> {
            let mut raw = [0u8; 256];
            let n = nix::unistd::read(self.read_fd.as_raw_fd(), &mut raw).unwrap_or(0);
            if n == 0 {
                if let Some(last) = self.buf.flush() {
                    self.lines.lock().unwrap().push(last);
                }
                self.done = true;
                return Ok(ReadOutcome::Eof);
            }
            let text = String::from_utf8_lossy(&raw[..n]).into_owned();
            for line in self.buf.feed(&text) {
                self.lines.lock().unwrap().push(line);
            }
            Ok(ReadOutcome::More)
        }

        fn handle_write(&mut self, _stream: StreamName) -> Result<()> {
            if let Some(w) = self.write_fd.take() {
                let _ = nix::unistd::write(&w, self.payload);
            }
            self.wrote = true;
            Ok(())
        }

        fn handle_error(&mut self, _stream: StreamName) -> Result<ReadOutcome> {
            Ok(ReadOutcome::More)
        }

        fn is_finished(&self) -> bool {
            self.done
        }

        fn close(&mut self, _abort: bool, _timedout: bool) {}
    }

    #[test]
    fn refcount_drains_after_client_eof() {
        let (r1, w1) = nix::unistd::pipe().unwrap();
        let lines = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let client = PipeClient {
            read_fd: r1,
            write_fd: Some(w1),
            payload: b"hello\nworld\n",
            wrote: false,
            buf: LineBuffer::new(),
            lines: lines.clone(),
            done: false,
        };

        let mut engine = Engine::new(Some("poll")).unwrap();
        engine.add_client(Box::new(client)).unwrap();
        assert_eq!(engine.refcount(), 1);

        // Close the write end from our side too so the read side sees
        // EOF once the payload has been drained.
        engine.run(Some(Duration::from_secs(2))).unwrap();

        assert_eq!(engine.refcount(), 0);
        assert_eq!(*lines.lock().unwrap(), vec!["hello", "world"]);
    }

    #[test]
    fn timer_alone_keeps_loop_alive_until_it_fires() {
        let mut engine = Engine::new(Some("select")).unwrap();
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = fired.clone();
        engine.add_timer(Duration::from_millis(10), None, false, Box::new(move || {
            f.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert_eq!(engine.refcount(), 1);
        engine.run(Some(Duration::from_secs(2))).unwrap();
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(engine.refcount(), 0);
    }

    #[test]
    fn autoclose_timer_does_not_block_an_otherwise_empty_loop() {
        let mut engine = Engine::new(Some("poll")).unwrap();
        engine.add_timer(Duration::from_secs(60), None, true, Box::new(|| {}));
        assert_eq!(engine.refcount(), 0);
        engine.run(Some(Duration::from_millis(50))).unwrap();
    }
}
