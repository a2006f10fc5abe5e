//! Crate-wide error kinds.
//!
//! Each variant is a stable, typed contract callers pattern-match on
//! (CLI exit codes, gateway recovery), not just a diagnostic string.

use thiserror::Error;

/// Unified error type for the ClusterShell core.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed RangeSet, NodeSet, or topology literal.
    #[error("parse error: {0}")]
    Parse(String),

    /// No engine backend could be initialized.
    #[error("engine not supported: tried {tried:?}")]
    EngineNotSupported { tried: Vec<&'static str> },

    /// A task-level or user timeout elapsed.
    #[error("engine timeout after {0:?}")]
    EngineTimeout(std::time::Duration),

    /// A destination is no longer reachable through any live gateway.
    #[error("route-resolving error: {0} is not reachable")]
    RouteResolving(String),

    /// Topology invariants violated at load time.
    #[error("topology error: {0}")]
    Topology(String),

    /// Worker misuse: scheduling twice, read before run, unknown
    /// placeholder, missing command, etc.
    #[error("worker error: {0}")]
    Worker(String),

    /// Malformed or out-of-sequence gateway channel message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The external group resolver upcall is missing or failed.
    #[error("group-source error: {0}")]
    GroupSource(String),

    /// Configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Propagated I/O failure (spawn, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
