//! External group resolver: group references (`@src:name`) are resolved
//! by an external resolver supplied at construction.
//!
//! The core only defines the trait; `groups.conf`/`groups.d/*` parsing is
//! a CLI/config concern that lives in the `demos/` binaries instead.

use std::collections::HashMap;

/// Resolves a group reference (`@source:name`, or `@name` for the default
/// source) to the node-pattern text it expands to.
pub trait GroupResolver: Send + Sync {
    /// Returns `None` when the source or the group name is unknown; the
    /// caller turns that into `Error::GroupSource`.
    fn resolve(&self, source: Option<&str>, name: &str) -> Option<String>;
}

/// A resolver backed by a static in-memory map, used by tests and by
/// `demos/` binaries that load `groups.conf` ahead of time.
#[derive(Default, Clone)]
pub struct StaticGroupResolver {
    // (source, name) -> pattern
    groups: HashMap<(Option<String>, String), String>,
}

impl StaticGroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: Option<&str>, name: &str, pattern: &str) {
        self.groups
            .insert((source.map(str::to_owned), name.to_owned()), pattern.to_owned());
    }
}

impl GroupResolver for StaticGroupResolver {
    fn resolve(&self, source: Option<&str>, name: &str) -> Option<String> {
        self.groups
            .get(&(source.map(str::to_owned), name.to_owned()))
            .cloned()
    }
}

/// A resolver that never resolves anything — the default when no
/// external group source is configured, so `@group` references always
/// fail with `Error::GroupSource` rather than panicking on a missing
/// resolver.
#[derive(Default, Clone, Copy)]
pub struct NullGroupResolver;

impl GroupResolver for NullGroupResolver {
    fn resolve(&self, _source: Option<&str>, _name: &str) -> Option<String> {
        None
    }
}

pub(crate) fn valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}
