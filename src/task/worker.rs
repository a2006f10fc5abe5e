//! Worker categories and the `EngineClient` impl that backs a running
//! child process: start/close/handle_read lifecycle plus command-line
//! construction from `ssh_path`/`ssh_user`/`ssh_options` and per-target
//! placeholders.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::{Command, Stdio};

use crate::engine::client::{EngineClient, EventMask, LineBuffer, ReadOutcome, StreamName};
use crate::error::{Error, Result};

/// Which flavor of remote execution a `Worker` performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    LocalExec,
    DistantSsh,
    DistantRsh,
    Copy,
    Rcopy,
    Tree,
}

/// Substitute `%h` (host name) and `%n` (zero-based rank) in a command
/// template; any other `%x` is a worker error.
pub fn substitute_placeholders(template: &str, host: &str, rank: usize) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(host),
            Some('n') => out.push_str(&rank.to_string()),
            Some('%') => out.push('%'),
            Some(other) => {
                return Err(Error::Worker(format!("unknown placeholder %{other} in {template:?}")))
            }
            None => return Err(Error::Worker(format!("dangling %% at end of {template:?}"))),
        }
    }
    Ok(out)
}

/// Build the actual argv for a distant worker from its configured
/// `ssh_path`, `ssh_user`, `ssh_options`, and per-target host name.
pub fn build_distant_argv(
    kind: WorkerKind,
    ssh_path: &str,
    ssh_user: Option<&str>,
    ssh_options: &str,
    host: &str,
    rank: usize,
    remote_command: &str,
) -> Result<Vec<String>> {
    let cmd = substitute_placeholders(remote_command, host, rank)?;
    let mut argv = vec![ssh_path.to_string()];
    if !ssh_options.is_empty() {
        argv.extend(ssh_options.split_whitespace().map(str::to_string));
    }
    let target = match ssh_user {
        Some(user) => format!("{user}@{host}"),
        None => host.to_string(),
    };
    argv.push(target);
    if kind == WorkerKind::DistantRsh {
        argv[0] = "rsh".to_string();
    }
    argv.push(cmd);
    Ok(argv)
}

/// One child process's I/O surface: stdout/stderr read non-blocking,
/// stdin written until the queued payload (if any) is exhausted, then
/// closed. This is the `EngineClient` the `Engine` actually drives;
/// `Worker` (in `mod.rs`) is the user-facing handle that owns one of
/// these per target.
pub struct LocalExecClient {
    pub host: String,
    pub rank: usize,
    child: std::process::Child,
    stdout_fd: Option<OwnedFd>,
    stderr_fd: Option<OwnedFd>,
    stdin_fd: Option<OwnedFd>,
    stdin_payload: Option<Vec<u8>>,
    stdin_written: usize,
    stdout_buf: LineBuffer,
    stderr_buf: LineBuffer,
    pub capture_stderr_separately: bool,
    retcode: Option<i32>,
    timedout: bool,
    kill_requested: bool,
    reaped: bool,
    /// Invoked once per completed line, directly from `handle_read` —
    /// this is how `Task` delivers `ev_read` without the generic
    /// `Engine` needing to know anything about workers or handlers.
    on_line: Box<dyn FnMut(&str, StreamName, &str)>,
    /// Invoked from `close()` with the final retcode (`None` if the
    /// client timed out or was aborted) — delivers `ev_hup`/`ev_close`.
    on_close: Box<dyn FnMut(&str, Option<i32>, bool)>,
}

impl LocalExecClient {
    pub fn spawn(
        command: &str,
        host: &str,
        rank: usize,
        stdin_payload: Option<Vec<u8>>,
        capture_stderr_separately: bool,
        on_line: Box<dyn FnMut(&str, StreamName, &str)>,
        on_close: Box<dyn FnMut(&str, Option<i32>, bool)>,
    ) -> Result<Self> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn()?;

        let stdout_fd: OwnedFd = child.stdout.take().unwrap().into();
        let stderr_fd: OwnedFd = child.stderr.take().unwrap().into();
        let stdin_fd: OwnedFd = child.stdin.take().unwrap().into();

        for fd in [stdout_fd.as_raw_fd(), stderr_fd.as_raw_fd(), stdin_fd.as_raw_fd()] {
            set_nonblocking(fd)?;
        }

        Ok(LocalExecClient {
            host: host.to_string(),
            rank,
            child,
            stdout_fd: Some(stdout_fd),
            stderr_fd: Some(stderr_fd),
            stdin_fd: if stdin_payload.is_some() { Some(stdin_fd) } else { None },
            stdin_payload,
            stdin_written: 0,
            stdout_buf: LineBuffer::new(),
            stderr_buf: LineBuffer::new(),
            capture_stderr_separately,
            retcode: None,
            timedout: false,
            kill_requested: false,
            reaped: false,
            on_line,
            on_close,
        })
    }

    pub fn retcode(&self) -> Option<i32> {
        self.retcode
    }

    pub fn timed_out(&self) -> bool {
        self.timedout
    }

    fn reap(&mut self) {
        if self.reaped {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.reaped = true;
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    self.retcode = Some(match status.signal() {
                        Some(sig) => 128 + sig,
                        None => status.code().unwrap_or(-1),
                    });
                }
                #[cfg(not(unix))]
                {
                    self.retcode = status.code();
                }
            }
            Ok(None) => {}
            Err(_) => self.reaped = true,
        }
    }
}

impl EngineClient for LocalExecClient {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn fds(&self) -> Vec<(StreamName, RawFd)> {
        let mut v = Vec::new();
        if let Some(fd) = &self.stdout_fd {
            v.push((StreamName::Stdout, fd.as_raw_fd()));
        }
        if let Some(fd) = &self.stderr_fd {
            v.push((StreamName::Stderr, fd.as_raw_fd()));
        }
        if let Some(fd) = &self.stdin_fd {
            v.push((StreamName::Stdin, fd.as_raw_fd()));
        }
        v
    }

    fn desired_events(&self, stream: StreamName) -> EventMask {
        match stream {
            StreamName::Stdout | StreamName::Stderr => EventMask::READ,
            StreamName::Stdin => {
                let done = self
                    .stdin_payload
                    .as_ref()
                    .is_none_or(|p| self.stdin_written >= p.len());
                if done {
                    EventMask::empty()
                } else {
                    EventMask::WRITE
                }
            }
        }
    }

    fn handle_read(&mut self, stream: StreamName) -> Result<ReadOutcome> {
        let fd = match stream {
            StreamName::Stdout => self.stdout_fd.as_ref().map(AsRawFd::as_raw_fd),
            StreamName::Stderr => self.stderr_fd.as_ref().map(AsRawFd::as_raw_fd),
            StreamName::Stdin => None,
        };
        let Some(fd) = fd else { return Ok(ReadOutcome::Eof) };

        let mut raw = [0u8; 4096];
        match nix::unistd::read(fd, &mut raw) {
            Ok(0) => {
                let buf = match stream {
                    StreamName::Stdout => &mut self.stdout_buf,
                    _ => &mut self.stderr_buf,
                };
                if let Some(last) = buf.flush() {
                    (self.on_line)(&self.host, stream, &last);
                }
                match stream {
                    StreamName::Stdout => self.stdout_fd = None,
                    StreamName::Stderr => self.stderr_fd = None,
                    StreamName::Stdin => {}
                }
                self.reap();
                Ok(ReadOutcome::Eof)
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&raw[..n]).into_owned();
                let buf = match stream {
                    StreamName::Stdout => &mut self.stdout_buf,
                    _ => &mut self.stderr_buf,
                };
                let lines = buf.feed(&text);
                for line in &lines {
                    (self.on_line)(&self.host, stream, line);
                }
                Ok(ReadOutcome::More)
            }
            Err(nix::errno::Errno::EAGAIN) => Ok(ReadOutcome::More),
            Err(e) => Err(Error::Io(std::io::Error::from(e))),
        }
    }

    fn handle_write(&mut self, _stream: StreamName) -> Result<()> {
        let Some(payload) = &self.stdin_payload else {
            self.stdin_fd = None;
            return Ok(());
        };
        let Some(fd) = &self.stdin_fd else { return Ok(()) };
        match nix::unistd::write(fd, &payload[self.stdin_written..]) {
            Ok(n) => {
                self.stdin_written += n;
                if self.stdin_written >= payload.len() {
                    self.stdin_fd = None;
                }
                Ok(())
            }
            Err(nix::errno::Errno::EAGAIN) => Ok(()),
            Err(e) => Err(Error::Io(std::io::Error::from(e))),
        }
    }

    fn handle_error(&mut self, stream: StreamName) -> Result<ReadOutcome> {
        self.handle_read(stream)
    }

    fn is_finished(&self) -> bool {
        self.stdout_fd.is_none() && self.stderr_fd.is_none() && self.reaped
    }

    fn close(&mut self, abort: bool, timedout: bool) {
        self.timedout = timedout;
        if abort || self.kill_requested {
            let _ = self.child.kill();
        }
        if !self.reaped {
            if let Ok(status) = self.child.wait() {
                self.reaped = true;
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    self.retcode = Some(match status.signal() {
                        Some(sig) => 128 + sig,
                        None => status.code().unwrap_or(-1),
                    });
                }
                #[cfg(not(unix))]
                {
                    self.retcode = status.code();
                }
            }
        }
        let rc = if timedout { None } else { self.retcode };
        (self.on_close)(&self.host, rc, timedout);
    }

    fn request_kill(&mut self) {
        self.kill_requested = true;
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| Error::Io(std::io::Error::from(e)))?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| Error::Io(std::io::Error::from(e)))?;
    Ok(())
}

/// The `QUEUED` / `RUNNING` / `CLOSED` fanout states a single target's
/// client moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutState {
    Queued,
    Running,
    Closed,
}

/// One user-facing handle covering every target of a single
/// `Task::shell`/`copy`/`rcopy` call. `Task` drives the fanout queue and
/// registers/unregisters the per-target `LocalExecClient`s with the
/// `Engine` as slots free up.
pub struct Worker {
    pub kind: WorkerKind,
    pub command_template: String,
    pub targets: Vec<String>,
    pub states: HashMap<String, FanoutState>,
    pub retcodes: HashMap<String, i32>,
    pub timedout: Vec<String>,
    pub started: bool,
}

impl Worker {
    pub fn new(kind: WorkerKind, command_template: impl Into<String>, targets: Vec<String>) -> Self {
        let states = targets.iter().map(|t| (t.clone(), FanoutState::Queued)).collect();
        Worker {
            kind,
            command_template: command_template.into(),
            targets,
            states,
            retcodes: HashMap::new(),
            timedout: Vec::new(),
            started: false,
        }
    }

    pub fn queued(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|t| self.states.get(t.as_str()) == Some(&FanoutState::Queued))
            .map(String::as_str)
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.states.values().filter(|s| **s == FanoutState::Running).count()
    }

    pub fn all_closed(&self) -> bool {
        self.states.values().all(|s| *s == FanoutState::Closed)
    }

    pub fn max_retcode(&self) -> Option<i32> {
        self.retcodes.values().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_substitution() {
        assert_eq!(substitute_placeholders("echo %h-%n", "node3", 2).unwrap(), "echo node3-2");
        assert_eq!(substitute_placeholders("100%%done", "x", 0).unwrap(), "100%done");
        assert!(substitute_placeholders("%z", "x", 0).is_err());
    }

    #[test]
    fn distant_argv_includes_user_and_options() {
        let argv = build_distant_argv(
            WorkerKind::DistantSsh,
            "ssh",
            Some("root"),
            "-oBatchMode=yes",
            "node1",
            0,
            "uptime",
        )
        .unwrap();
        assert_eq!(argv, vec!["ssh", "-oBatchMode=yes", "root@node1", "uptime"]);
    }

    #[test]
    fn fanout_states_start_queued() {
        let w = Worker::new(
            WorkerKind::LocalExec,
            "true",
            vec!["a".to_string(), "b".to_string()],
        );
        assert_eq!(w.queued().len(), 2);
        assert!(!w.all_closed());
    }
}
