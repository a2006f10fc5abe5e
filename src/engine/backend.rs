//! The three interchangeable polling primitives an engine can run on:
//! epoll, poll, and select, falling back in that order.

use std::os::unix::io::RawFd;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::engine::client::EventMask;
use crate::error::{Error, Result};

/// Object-safe capability every polling primitive implements. The Engine
/// holds exactly one of these behind a `Box<dyn EngineBackend>`, chosen
/// once at construction time.
pub trait EngineBackend {
    fn identifier(&self) -> &'static str;
    fn register(&mut self, fd: RawFd, events: EventMask) -> Result<()>;
    fn modify(&mut self, fd: RawFd, events: EventMask) -> Result<()>;
    fn unregister(&mut self, fd: RawFd) -> Result<()>;
    /// Block up to `timeout` (`None` = forever) and return every fd that
    /// became ready along with which of its requested events fired.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, EventMask)>>;
}

/// Try backends in preference order (`epoll`, `poll`, `select`, unless
/// the caller names one explicitly).
pub fn select_backend(preferred: Option<&str>) -> Result<Box<dyn EngineBackend>> {
    let order: &[&str] = match preferred {
        Some(name) => match name {
            "epoll" | "poll" | "select" => return try_one(name),
            other => return Err(Error::EngineNotSupported { tried: vec![leak(other)] }),
        },
        None => &["epoll", "poll", "select"],
    };
    let mut tried = Vec::new();
    for name in order {
        match try_one(name) {
            Ok(b) => return Ok(b),
            Err(_) => tried.push(*name),
        }
    }
    Err(Error::EngineNotSupported { tried })
}

fn leak(s: &str) -> &'static str {
    Box::leak(s.to_string().into_boxed_str())
}

fn try_one(name: &str) -> Result<Box<dyn EngineBackend>> {
    match name {
        "epoll" => epoll::EpollBackend::new().map(|b| Box::new(b) as Box<dyn EngineBackend>),
        "poll" => Ok(Box::new(poll::PollBackend::new())),
        "select" => Ok(Box::new(select::SelectBackend::new())),
        other => Err(Error::EngineNotSupported { tried: vec![leak(other)] }),
    }
}

fn mask_to_epoll(events: EventMask) -> nix::sys::epoll::EpollFlags {
    use nix::sys::epoll::EpollFlags;
    let mut flags = EpollFlags::empty();
    if events.contains(EventMask::READ) {
        flags |= EpollFlags::EPOLLIN;
    }
    if events.contains(EventMask::WRITE) {
        flags |= EpollFlags::EPOLLOUT;
    }
    if events.contains(EventMask::ERROR) {
        flags |= EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP;
    }
    flags
}

fn epoll_to_mask(flags: nix::sys::epoll::EpollFlags) -> EventMask {
    use nix::sys::epoll::EpollFlags;
    let mut m = EventMask::empty();
    if flags.contains(EpollFlags::EPOLLIN) {
        m |= EventMask::READ;
    }
    if flags.contains(EpollFlags::EPOLLOUT) {
        m |= EventMask::WRITE;
    }
    if flags.intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP) {
        m |= EventMask::ERROR;
    }
    m
}

mod epoll {
    use super::*;
    use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollTimeout};

    /// Grounded in `Engine/EPoll.py`: one `epoll_wait` per loop tick, a
    /// side table mapping fd -> requested flags (epoll's own API already
    /// tracks interest, but we keep a shadow copy so `modify` can be a
    /// pure function of the new mask rather than requiring the caller to
    /// remember the old one).
    pub struct EpollBackend {
        epoll: Epoll,
        interest: FxHashMap<RawFd, EventMask>,
    }

    impl EpollBackend {
        pub fn new() -> Result<Self> {
            let epoll = Epoll::new(EpollCreateFlags::empty())
                .map_err(|e| Error::EngineNotSupported { tried: vec![leak(&e.to_string())] })?;
            Ok(EpollBackend { epoll, interest: FxHashMap::default() })
        }
    }

    impl EngineBackend for EpollBackend {
        fn identifier(&self) -> &'static str {
            "epoll"
        }

        fn register(&mut self, fd: RawFd, events: EventMask) -> Result<()> {
            let mut ev = EpollEvent::new(mask_to_epoll(events), fd as u64);
            self.epoll
                .add(fd, ev.clone())
                .or_else(|_| self.epoll.modify(fd, &mut ev))
                .map_err(|e| Error::Protocol(format!("epoll_ctl(add) fd={fd}: {e}")))?;
            self.interest.insert(fd, events);
            Ok(())
        }

        fn modify(&mut self, fd: RawFd, events: EventMask) -> Result<()> {
            let mut ev = EpollEvent::new(mask_to_epoll(events), fd as u64);
            self.epoll
                .modify(fd, &mut ev)
                .map_err(|e| Error::Protocol(format!("epoll_ctl(mod) fd={fd}: {e}")))?;
            self.interest.insert(fd, events);
            Ok(())
        }

        fn unregister(&mut self, fd: RawFd) -> Result<()> {
            self.interest.remove(&fd);
            // Already-closed fds are routinely unregistered after a
            // stream EOF; the kernel may have dropped them already.
            let _ = self.epoll.delete(fd);
            Ok(())
        }

        fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, EventMask)>> {
            let mut events = vec![EpollEvent::empty(); self.interest.len().max(1)];
            let timeout = match timeout {
                Some(d) => EpollTimeout::try_from(d.as_millis() as isize)
                    .unwrap_or(EpollTimeout::NONE),
                None => EpollTimeout::NONE,
            };
            let n = self
                .epoll
                .wait(&mut events, timeout)
                .map_err(|e| Error::Protocol(format!("epoll_wait: {e}")))?;
            Ok(events[..n]
                .iter()
                .map(|e| (e.data() as RawFd, epoll_to_mask(e.events())))
                .collect())
        }
    }
}

mod poll {
    use super::*;
    use nix::poll::{PollFd, PollFlags, PollTimeout};
    use std::os::fd::BorrowedFd;

    fn mask_to_poll(events: EventMask) -> PollFlags {
        let mut f = PollFlags::empty();
        if events.contains(EventMask::READ) {
            f |= PollFlags::POLLIN;
        }
        if events.contains(EventMask::WRITE) {
            f |= PollFlags::POLLOUT;
        }
        if events.contains(EventMask::ERROR) {
            f |= PollFlags::POLLERR | PollFlags::POLLHUP;
        }
        f
    }

    fn poll_to_mask(f: PollFlags) -> EventMask {
        let mut m = EventMask::empty();
        if f.contains(PollFlags::POLLIN) {
            m |= EventMask::READ;
        }
        if f.contains(PollFlags::POLLOUT) {
            m |= EventMask::WRITE;
        }
        if f.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            m |= EventMask::ERROR;
        }
        m
    }

    /// Grounded in `Engine/Poll.py`: rebuilds the `pollfd` array from the
    /// interest table on every tick (Python does the same — it keeps a
    /// dict and calls `poll()` with a freshly built list each time).
    pub struct PollBackend {
        interest: FxHashMap<RawFd, EventMask>,
    }

    impl PollBackend {
        pub fn new() -> Self {
            PollBackend { interest: FxHashMap::default() }
        }
    }

    impl EngineBackend for PollBackend {
        fn identifier(&self) -> &'static str {
            "poll"
        }

        fn register(&mut self, fd: RawFd, events: EventMask) -> Result<()> {
            self.interest.insert(fd, events);
            Ok(())
        }

        fn modify(&mut self, fd: RawFd, events: EventMask) -> Result<()> {
            self.interest.insert(fd, events);
            Ok(())
        }

        fn unregister(&mut self, fd: RawFd) -> Result<()> {
            self.interest.remove(&fd);
            Ok(())
        }

        fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, EventMask)>> {
            // SAFETY: fds come from live clients owned by the Engine for
            // the duration of this call; none are closed concurrently.
            let borrowed: Vec<(RawFd, BorrowedFd)> = self
                .interest
                .keys()
                .map(|&fd| (fd, unsafe { BorrowedFd::borrow_raw(fd) }))
                .collect();
            let mut fds: Vec<PollFd> = borrowed
                .iter()
                .map(|(fd, bfd)| PollFd::new(*bfd, mask_to_poll(self.interest[fd])))
                .collect();

            let timeout = match timeout {
                Some(d) => PollTimeout::try_from(d.as_millis() as u16).unwrap_or(PollTimeout::MAX),
                None => PollTimeout::NONE,
            };
            nix::poll::poll(&mut fds, timeout)
                .map_err(|e| Error::Protocol(format!("poll(): {e}")))?;

            let mut ready = Vec::new();
            for (fd, pfd) in borrowed.iter().map(|(fd, _)| *fd).zip(fds.iter()) {
                if let Some(revents) = pfd.revents() {
                    if !revents.is_empty() {
                        ready.push((fd, poll_to_mask(revents)));
                    }
                }
            }
            Ok(ready)
        }
    }
}

mod select {
    use super::*;
    use nix::sys::select::{select, FdSet};
    use nix::sys::time::{TimeVal, TimeValLike};
    use std::os::fd::BorrowedFd;

    /// Grounded in `Engine/Select.py`, the fallback backend for
    /// platforms/situations without `poll`/`epoll`. Subject to
    /// `FD_SETSIZE`, same as the original.
    pub struct SelectBackend {
        interest: FxHashMap<RawFd, EventMask>,
    }

    impl SelectBackend {
        pub fn new() -> Self {
            SelectBackend { interest: FxHashMap::default() }
        }
    }

    impl EngineBackend for SelectBackend {
        fn identifier(&self) -> &'static str {
            "select"
        }

        fn register(&mut self, fd: RawFd, events: EventMask) -> Result<()> {
            self.interest.insert(fd, events);
            Ok(())
        }

        fn modify(&mut self, fd: RawFd, events: EventMask) -> Result<()> {
            self.interest.insert(fd, events);
            Ok(())
        }

        fn unregister(&mut self, fd: RawFd) -> Result<()> {
            self.interest.remove(&fd);
            Ok(())
        }

        fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, EventMask)>> {
            let mut rset = FdSet::new();
            let mut wset = FdSet::new();
            let mut eset = FdSet::new();
            // SAFETY: see PollBackend::poll.
            let borrowed: Vec<(RawFd, BorrowedFd)> = self
                .interest
                .keys()
                .map(|&fd| (fd, unsafe { BorrowedFd::borrow_raw(fd) }))
                .collect();
            for (fd, bfd) in &borrowed {
                let events = self.interest[fd];
                if events.contains(EventMask::READ) {
                    rset.insert(bfd);
                }
                if events.contains(EventMask::WRITE) {
                    wset.insert(bfd);
                }
                if events.contains(EventMask::ERROR) {
                    eset.insert(bfd);
                }
            }

            let mut tv = timeout.map(|d| TimeVal::milliseconds(d.as_millis() as i64));
            select(None, &mut rset, &mut wset, &mut eset, tv.as_mut())
                .map_err(|e| Error::Protocol(format!("select(): {e}")))?;

            let mut ready = Vec::new();
            for (fd, bfd) in &borrowed {
                let mut m = EventMask::empty();
                if rset.contains(bfd) {
                    m |= EventMask::READ;
                }
                if wset.contains(bfd) {
                    m |= EventMask::WRITE;
                }
                if eset.contains(bfd) {
                    m |= EventMask::ERROR;
                }
                if !m.is_empty() {
                    ready.push((*fd, m));
                }
            }
            Ok(ready)
        }
    }
}
