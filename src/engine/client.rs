//! EngineClient contract: the I/O endpoint a Worker registers with the
//! engine.
//!
//! `LineBuffer` implements the line-framing algorithm clients use to
//! turn raw reads into complete output lines: split on `\n`, trim a
//! trailing `\r`, keep a partial last line buffered across reads.
//! `StreamName` names the three streams a client's fds are tagged with.

use std::os::unix::io::RawFd;

use bitflags::bitflags;

use crate::error::Result;

bitflags! {
    /// Event flags a client is interested in for one of its streams.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u8 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const ERROR = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamName {
    Stdout,
    Stderr,
    Stdin,
}

/// Sentinel raised by `handle_read`/`handle_error` when a zero-byte read
/// means the peer is done with this stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    More,
    Eof,
}

/// One I/O endpoint owned by a Worker: a Client owns file descriptors
/// and an output-line framing buffer.
pub trait EngineClient {
    /// Open fds / spawn the underlying process.
    fn start(&mut self) -> Result<()>;

    /// Currently open `(stream, fd)` pairs. The Engine registers/
    /// unregisters exactly these.
    fn fds(&self) -> Vec<(StreamName, RawFd)>;

    /// The event mask this client currently wants for `stream`.
    fn desired_events(&self, stream: StreamName) -> EventMask;

    fn handle_read(&mut self, stream: StreamName) -> Result<ReadOutcome>;
    fn handle_write(&mut self, stream: StreamName) -> Result<()>;
    fn handle_error(&mut self, stream: StreamName) -> Result<ReadOutcome>;

    /// True once every stream is closed and (if this client wraps a
    /// child process) the child has been reaped. The Engine removes a
    /// client automatically once this turns true.
    fn is_finished(&self) -> bool;

    /// Release fds, reap the child, deliver the final retcode.
    /// `abort` means the engine is tearing this client down before
    /// natural completion; `timedout` means it hit its own or the
    /// task's timeout.
    fn close(&mut self, abort: bool, timedout: bool);

    /// Ask the client to escalate to a forced kill on the next `close`,
    /// used by `Task::abort(kill = true)`. Default: no-op (clients
    /// without a child process have nothing to kill).
    fn request_kill(&mut self) {}
}

/// Accumulates partial reads into complete lines, trimming `\n` and
/// `\r\n`. Port of `EngineClient._readlines()`.
#[derive(Default, Debug)]
pub struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes (assumed valid UTF-8 — remote command
    /// output in this library is always treated as text); returns the
    /// complete lines extracted, keeping any trailing partial line
    /// buffered.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let mut lines = Vec::new();
        loop {
            let Some(pos) = self.partial.find('\n') else { break };
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop(); // trailing '\n'
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// On final close, whatever partial line remains is delivered as-is
    /// rather than dropped.
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_lf_and_crlf() {
        let mut lb = LineBuffer::new();
        let lines = lb.feed("a\r\nb\nc");
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(lb.flush(), Some("c".to_string()));
    }

    #[test]
    fn partial_line_waits_for_more_data() {
        let mut lb = LineBuffer::new();
        assert!(lb.feed("partial").is_empty());
        let lines = lb.feed(" line\n");
        assert_eq!(lines, vec!["partial line"]);
    }
}
