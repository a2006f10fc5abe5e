//! Layered configuration loading for `defaults.conf`.
//!
//! Typed settings struct deserialized from a layered source stack via
//! the `config` crate's builder: later sources override earlier ones,
//! in order system path, then user path, then `$XDG_CONFIG_HOME`.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Result;

/// `[task.default]` section of `defaults.conf` — library-wide knobs a
/// `Task` is constructed with, overridable via `Task::set_default`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskDefaults {
    pub stderr: bool,
    pub stdout_msgtree: bool,
    pub stderr_msgtree: bool,
    pub engine: String,
    pub port_qlimit: usize,
    pub auto_tree: bool,
    pub local_workername: String,
    pub distant_workername: String,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        TaskDefaults {
            stderr: false,
            stdout_msgtree: true,
            stderr_msgtree: true,
            engine: "auto".to_string(),
            port_qlimit: 100,
            auto_tree: false,
            local_workername: "exec".to_string(),
            distant_workername: "ssh".to_string(),
        }
    }
}

/// `[task.info]` section — tunables for a running task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskInfo {
    pub debug: bool,
    pub fanout: usize,
    pub grooming_delay: f64,
    pub connect_timeout: f64,
    pub command_timeout: f64,
}

impl Default for TaskInfo {
    fn default() -> Self {
        TaskInfo {
            debug: false,
            fanout: 64,
            grooming_delay: 0.25,
            connect_timeout: 10.0,
            command_timeout: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskSection {
    #[serde(rename = "default")]
    pub task_default: TaskDefaults,
    #[serde(rename = "info")]
    pub task_info: TaskInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub task: TaskSection,
}

/// Build the layered source list: system-wide, then per-user, then
/// `XDG_CONFIG_HOME`, each optional (missing files are skipped rather
/// than erroring).
fn layered_paths(file_stem: &str) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(format!("/etc/clustershell/{file_stem}"))];
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".local/etc/clustershell").join(file_stem));
    }
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("clustershell").join(file_stem));
    }
    paths
}

/// Load `defaults.conf`, merging any of the layered paths that exist,
/// later ones overriding earlier ones. Returns library defaults if none
/// exist.
pub fn load_defaults() -> Result<Settings> {
    load_layered("defaults.conf")
}

pub fn load_layered(file_stem: &str) -> Result<Settings> {
    let mut builder = config::Config::builder();
    for path in layered_paths(file_stem) {
        builder = builder.add_source(config::File::from(path).required(false));
    }
    let cfg = builder.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        // With no config files on disk (the test sandbox has none under
        // /etc/clustershell), loading must not fail.
        let settings = load_defaults().unwrap();
        assert_eq!(settings.task.task_info.fanout, 64);
        assert_eq!(settings.task.task_default.engine, "auto");
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defaults.toml");
        std::fs::write(&path, "[task.info]\nfanout = 12\n").unwrap();

        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .unwrap();
        let settings: Settings = cfg.try_deserialize().unwrap();
        assert_eq!(settings.task.task_info.fanout, 12);
        assert_eq!(settings.task.task_info.debug, false);
    }

    #[test]
    fn malformed_value_surfaces_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clush.toml");
        std::fs::write(&path, "[task.info]\nfanout = \"not-a-number\"\n").unwrap();

        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .unwrap();
        let result: std::result::Result<Settings, _> = cfg.try_deserialize();
        assert!(result.is_err());
    }
}
