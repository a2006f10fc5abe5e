//! Task — the user-facing handle that owns an `Engine`, a fanout of
//! `Worker`s, and the gathered output trees.
//!
//! One `Task` per reactor thread: `shell()`/`copy()`/`timer()` schedule
//! work, `run()`/`resume()` drive the engine, `iter_buffers()`/
//! `iter_errors()`/`node_buffer()`/`max_retcode()`/`num_timeout()`
//! expose gathered results, and `task_self()` is the thread-local
//! default instance.

pub mod port;
pub mod worker;

pub use worker::{FanoutState, Worker, WorkerKind};

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{TaskDefaults, TaskInfo};
use crate::engine::{Engine, StreamName, TimerId};
use crate::error::{Error, Result};
use crate::msgtree::{Mode, MsgTree};
use worker::LocalExecClient;

/// Callbacks delivered while a `Task` runs. Every method has a no-op
/// default so implementors only override what they need — this is also
/// how a legacy handler shape (fewer parameters) is tolerated: wrap it
/// in [`LegacyAdapter`] rather than requiring every caller to implement
/// the full five-callback surface.
pub trait EventHandler {
    fn ev_start(&mut self, _worker: &Worker) {}
    fn ev_pickup(&mut self, _worker: &Worker, _node: &str) {}
    fn ev_read(&mut self, _worker: &Worker, _node: &str, _stream: StreamName, _line: &str) {}
    fn ev_hup(&mut self, _worker: &Worker, _node: &str, _rc: Option<i32>) {}
    fn ev_timer(&mut self, _timer: TimerId) {}
    fn ev_close(&mut self, _worker: &Worker, _timedout: bool) {}
}

/// Adapts an older two-argument handler shape (`line(node, line)` /
/// `hup(node, rc)`, with no `Worker`/`stream` context) onto the full
/// [`EventHandler`] trait.
pub struct LegacyAdapter<F, G>
where
    F: FnMut(&str, &str),
    G: FnMut(&str, Option<i32>),
{
    pub on_line: F,
    pub on_hup: G,
}

impl<F, G> EventHandler for LegacyAdapter<F, G>
where
    F: FnMut(&str, &str),
    G: FnMut(&str, Option<i32>),
{
    fn ev_read(&mut self, _worker: &Worker, node: &str, _stream: StreamName, line: &str) {
        (self.on_line)(node, line);
    }
    fn ev_hup(&mut self, _worker: &Worker, node: &str, rc: Option<i32>) {
        (self.on_hup)(node, rc);
    }
}

/// State shared between `Task` and the `on_line`/`on_close` closures
/// handed to each `LocalExecClient`. Kept behind `Rc<RefCell<_>>` rather
/// than threaded through the `Engine`, since a `Task` lives entirely on
/// one thread and never needs `Send` clients.
struct Shared {
    handler: Option<Box<dyn EventHandler>>,
    stdout_tree: MsgTree<String>,
    stderr_tree: MsgTree<String>,
    retcodes: HashMap<String, i32>,
    timedout_keys: std::collections::HashSet<String>,
}

pub struct Task {
    engine: Engine,
    shared: Rc<RefCell<Shared>>,
    defaults: TaskDefaults,
    info: TaskInfo,
    workers: Vec<Rc<RefCell<Worker>>>,
}

impl Task {
    pub fn new() -> Result<Self> {
        Self::with_settings(TaskDefaults::default(), TaskInfo::default())
    }

    pub fn with_settings(defaults: TaskDefaults, info: TaskInfo) -> Result<Self> {
        let preferred = if defaults.engine == "auto" { None } else { Some(defaults.engine.as_str()) };
        Ok(Task {
            engine: Engine::new(preferred)?,
            shared: Rc::new(RefCell::new(Shared {
                handler: None,
                stdout_tree: MsgTree::new(Mode::Defer),
                stderr_tree: MsgTree::new(Mode::Defer),
                retcodes: HashMap::new(),
                timedout_keys: std::collections::HashSet::new(),
            })),
            defaults,
            info,
            workers: Vec::new(),
        })
    }

    pub fn set_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.shared.borrow_mut().handler = Some(handler);
    }

    pub fn set_default(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "engine" => self.defaults.engine = value.to_string(),
            "stderr" => self.defaults.stderr = parse_bool(value)?,
            "stdout_msgtree" => self.defaults.stdout_msgtree = parse_bool(value)?,
            "stderr_msgtree" => self.defaults.stderr_msgtree = parse_bool(value)?,
            "port_qlimit" => {
                self.defaults.port_qlimit =
                    value.parse().map_err(|_| Error::Worker(format!("bad port_qlimit {value:?}")))?
            }
            "auto_tree" => self.defaults.auto_tree = parse_bool(value)?,
            "local_workername" => self.defaults.local_workername = value.to_string(),
            "distant_workername" => self.defaults.distant_workername = value.to_string(),
            other => return Err(Error::Worker(format!("unknown task default {other:?}"))),
        }
        Ok(())
    }

    pub fn set_info(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "debug" => self.info.debug = parse_bool(value)?,
            "fanout" => {
                self.info.fanout =
                    value.parse().map_err(|_| Error::Worker(format!("bad fanout {value:?}")))?
            }
            "grooming_delay" => {
                self.info.grooming_delay = value
                    .parse()
                    .map_err(|_| Error::Worker(format!("bad grooming_delay {value:?}")))?
            }
            "connect_timeout" => {
                self.info.connect_timeout = value
                    .parse()
                    .map_err(|_| Error::Worker(format!("bad connect_timeout {value:?}")))?
            }
            "command_timeout" => {
                self.info.command_timeout = value
                    .parse()
                    .map_err(|_| Error::Worker(format!("bad command_timeout {value:?}")))?
            }
            other => return Err(Error::Worker(format!("unknown task info key {other:?}"))),
        }
        Ok(())
    }

    /// Schedule a shell command across `nodes`.
    pub fn shell(&mut self, command: &str, nodes: &[String]) -> Result<Rc<RefCell<Worker>>> {
        self.schedule(WorkerKind::LocalExec, command, nodes)
    }

    /// Push `src` out to `dst` on every target via `scp`, per-client
    /// command built from the `%h` placeholder (see `Worker::Copy`).
    pub fn copy(&mut self, src: &str, dst: &str, nodes: &[String]) -> Result<Rc<RefCell<Worker>>> {
        let template = format!("scp '{src}' '%h:{dst}'");
        self.schedule(WorkerKind::Copy, &template, nodes)
    }

    /// Pull `src` back from every target into `dst`, rewriting the local
    /// destination to `<dst>/<basename>.<host>` so same-named files
    /// pulled from different nodes don't collide.
    pub fn rcopy(&mut self, src: &str, dst: &str, nodes: &[String]) -> Result<Rc<RefCell<Worker>>> {
        let basename = src.rsplit('/').next().unwrap_or(src);
        let template = format!("scp '%h:{src}' '{dst}/{basename}.%h'");
        self.schedule(WorkerKind::Rcopy, &template, nodes)
    }

    fn schedule(
        &mut self,
        kind: WorkerKind,
        command: &str,
        nodes: &[String],
    ) -> Result<Rc<RefCell<Worker>>> {
        let worker = Rc::new(RefCell::new(Worker::new(kind, command, nodes.to_vec())));
        self.workers.push(worker.clone());
        if let Some(handler) = self.shared.borrow_mut().handler.as_mut() {
            handler.ev_start(&worker.borrow());
        }
        Self::promote_queued(
            &mut self.engine,
            &self.workers,
            self.info.fanout,
            self.defaults.stderr,
            &self.shared,
            &worker,
        )?;
        Ok(worker)
    }

    /// `timer(delay, handler, interval)` — schedules a one-shot or
    /// periodic timer that fires `ev_timer` from inside the run loop.
    pub fn timer(&mut self, delay: Duration, interval: Option<Duration>) -> TimerId {
        let shared = self.shared.clone();
        let slot: Rc<RefCell<Option<TimerId>>> = Rc::new(RefCell::new(None));
        let slot_for_closure = slot.clone();
        let id = self.engine.add_timer(delay, interval, false, Box::new(move || {
            let Some(id) = *slot_for_closure.borrow() else { return };
            if let Some(h) = shared.borrow_mut().handler.as_mut() {
                h.ev_timer(id);
            }
        }));
        *slot.borrow_mut() = Some(id);
        id
    }

    /// Promote as many `QUEUED` targets of `worker` as `fanout -
    /// currently-running` allows, spawning a `LocalExecClient` for each
    /// and registering it with the engine. Takes `engine`/`all_workers`/
    /// `fanout`/`stderr_default`/`shared` explicitly rather than
    /// `&mut self` so it can be invoked both before `run_with_idle`
    /// starts and from inside its `on_idle` closure, which only ever
    /// gets `&mut Engine`.
    fn promote_queued(
        engine: &mut Engine,
        all_workers: &[Rc<RefCell<Worker>>],
        fanout: usize,
        stderr_default: bool,
        shared: &Rc<RefCell<Shared>>,
        worker: &Rc<RefCell<Worker>>,
    ) -> Result<()> {
        let running_total: usize = all_workers.iter().map(|w| w.borrow().running_count()).sum();
        let slots = fanout.saturating_sub(running_total);
        if slots == 0 {
            return Ok(());
        }

        let targets: Vec<String> = {
            let w = worker.borrow();
            w.queued().iter().take(slots).map(|s| s.to_string()).collect()
        };

        for (rank, host) in targets.iter().enumerate() {
            let command = {
                let w = worker.borrow();
                worker::substitute_placeholders(&w.command_template, host, rank)?
            };

            let shared_for_line = shared.clone();
            let worker_for_line = worker.clone();
            let host_for_line = host.clone();
            let on_line = Box::new(move |_h: &str, stream: StreamName, line: &str| {
                let mut s = shared_for_line.borrow_mut();
                let key = format!("{}:{:?}", host_for_line, stream);
                if stream == StreamName::Stdout {
                    s.stdout_tree.add(key, line);
                } else {
                    s.stderr_tree.add(key, line);
                }
                if let Some(h) = s.handler.as_mut() {
                    h.ev_read(&worker_for_line.borrow(), &host_for_line, stream, line);
                }
            });

            let shared2 = shared.clone();
            let worker2 = worker.clone();
            let host2 = host.clone();
            let on_close = Box::new(move |_h: &str, rc: Option<i32>, timedout: bool| {
                let mut s = shared2.borrow_mut();
                {
                    let mut w = worker2.borrow_mut();
                    w.states.insert(host2.clone(), FanoutState::Closed);
                    if let Some(code) = rc {
                        w.retcodes.insert(host2.clone(), code);
                        s.retcodes.insert(host2.clone(), code);
                    }
                    if timedout {
                        w.timedout.push(host2.clone());
                        s.timedout_keys.insert(host2.clone());
                    }
                }
                if let Some(h) = s.handler.as_mut() {
                    h.ev_hup(&worker2.borrow(), &host2, rc);
                    h.ev_close(&worker2.borrow(), timedout);
                }
            });

            let client = LocalExecClient::spawn(&command, host, rank, None, stderr_default, on_line, on_close)?;
            engine.add_client(Box::new(client))?;
            worker.borrow_mut().states.insert(host.clone(), FanoutState::Running);

            if let Some(h) = shared.borrow_mut().handler.as_mut() {
                h.ev_pickup(&worker.borrow(), host);
            }
        }
        Ok(())
    }

    /// Re-promote queued targets across all workers once running slots
    /// free up. Called once before the run loop starts, and again from
    /// inside `run_with_idle`'s `on_idle` hook on every loop iteration
    /// so a worker whose fanout is smaller than its target count keeps
    /// draining as earlier clients close.
    fn drain_queues(
        engine: &mut Engine,
        workers: &[Rc<RefCell<Worker>>],
        fanout: usize,
        stderr_default: bool,
        shared: &Rc<RefCell<Shared>>,
    ) {
        for w in workers {
            if !w.borrow().queued().is_empty() {
                if let Err(e) = Self::promote_queued(engine, workers, fanout, stderr_default, shared, w) {
                    warn!(error = %e, "failed to promote queued targets");
                }
            }
        }
    }

    /// Block until every scheduled worker finishes or the task-level
    /// timeout elapses.
    pub fn run(&mut self, timeout: Option<Duration>) -> Result<()> {
        Self::drain_queues(&mut self.engine, &self.workers, self.info.fanout, self.defaults.stderr, &self.shared);

        let workers = self.workers.clone();
        let fanout = self.info.fanout;
        let stderr_default = self.defaults.stderr;
        let shared = self.shared.clone();
        let result = self.engine.run_with_idle(timeout, move |engine| {
            Self::drain_queues(engine, &workers, fanout, stderr_default, &shared);
        });
        match result {
            Ok(()) => {
                info!(backend = self.engine.backend_name(), "task run loop completed");
                Ok(())
            }
            Err(Error::EngineTimeout(d)) => {
                warn!(?d, "task timed out, aborting remaining clients");
                self.engine.abort(false);
                Err(Error::EngineTimeout(d))
            }
            Err(e) => Err(e),
        }
    }

    /// `resume()`: continue the run loop after an `ev_*` handler
    /// scheduled more work mid-run. Since `shell()` already promotes
    /// queued work immediately, this simply re-enters `run()` with no
    /// additional timeout.
    pub fn resume(&mut self) -> Result<()> {
        self.run(None)
    }

    pub fn abort(&mut self, kill: bool) {
        self.engine.abort(kill);
    }

    /// `iter_buffers()`: every distinct gathered stdout message and the
    /// node keys that produced it.
    pub fn iter_buffers(&self) -> Vec<(String, Vec<String>)> {
        self.shared
            .borrow()
            .stdout_tree
            .walk()
            .into_iter()
            .map(|(msg, keys)| (msg, keys.into_iter().map(|k| strip_stream_suffix(&k)).collect()))
            .collect()
    }

    pub fn iter_errors(&self) -> Vec<(String, Vec<String>)> {
        self.shared
            .borrow()
            .stderr_tree
            .walk()
            .into_iter()
            .map(|(msg, keys)| (msg, keys.into_iter().map(|k| strip_stream_suffix(&k)).collect()))
            .collect()
    }

    pub fn node_buffer(&self, node: &str) -> Option<String> {
        let key = format!("{node}:Stdout");
        self.shared.borrow().stdout_tree.get(&key)
    }

    pub fn max_retcode(&self) -> Option<i32> {
        self.shared.borrow().retcodes.values().copied().max()
    }

    pub fn num_timeout(&self) -> usize {
        self.shared.borrow().timedout_keys.len()
    }
}

fn strip_stream_suffix(key: &str) -> String {
    key.rsplit_once(':').map(|(host, _)| host.to_string()).unwrap_or_else(|| key.to_string())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Worker(format!("not a boolean: {other:?}"))),
    }
}

thread_local! {
    static TASK_SELF: RefCell<Option<Rc<RefCell<Task>>>> = const { RefCell::new(None) };
}

/// Thread-local default `Task`, lazily constructed on first use and
/// reused by every later call on the same thread.
pub fn task_self() -> Result<Rc<RefCell<Task>>> {
    TASK_SELF.with(|cell| {
        if let Some(task) = cell.borrow().as_ref() {
            return Ok(task.clone());
        }
        let task = Rc::new(RefCell::new(Task::new()?));
        *cell.borrow_mut() = Some(task.clone());
        Ok(task)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_runs_and_gathers_output() {
        let mut task = Task::new().unwrap();
        task.set_info("fanout", "4").unwrap();
        let worker = task
            .shell("echo hello", &["n1".to_string(), "n2".to_string()])
            .unwrap();
        task.run(Some(Duration::from_secs(5))).unwrap();

        let buffers = task.iter_buffers();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].0, "hello");
        let mut keys = buffers[0].1.clone();
        keys.sort();
        assert_eq!(keys, vec!["n1", "n2"]);
        assert!(worker.borrow().all_closed());
        assert_eq!(task.max_retcode(), Some(0));
    }

    #[test]
    fn rcopy_rewrites_destination_per_host() {
        let mut task = Task::new().unwrap();
        let worker = task.rcopy("/etc/my.conf", "/backup", &["node1".to_string()]).unwrap();
        let template = worker.borrow().command_template.clone();
        let cmd = worker::substitute_placeholders(&template, "node1", 0).unwrap();
        assert_eq!(cmd, "scp 'node1:/etc/my.conf' '/backup/my.conf.node1'");
    }

    #[test]
    fn copy_targets_remote_destination() {
        let mut task = Task::new().unwrap();
        let worker = task.copy("/etc/my.conf", "/etc/my.conf", &["node1".to_string()]).unwrap();
        let template = worker.borrow().command_template.clone();
        let cmd = worker::substitute_placeholders(&template, "node1", 0).unwrap();
        assert_eq!(cmd, "scp '/etc/my.conf' 'node1:/etc/my.conf'");
    }

    #[test]
    fn node_buffer_returns_per_node_output() {
        let mut task = Task::new().unwrap();
        task.shell("echo only-n1", &["n1".to_string()]).unwrap();
        task.run(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(task.node_buffer("n1").as_deref(), Some("only-n1"));
        assert_eq!(task.node_buffer("unknown"), None);
    }

    #[test]
    fn fanout_limits_concurrent_running_clients() {
        let mut task = Task::new().unwrap();
        task.set_info("fanout", "1").unwrap();
        let nodes: Vec<String> = (0..3).map(|i| format!("n{i}")).collect();
        task.shell("true", &nodes).unwrap();
        task.run(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(task.max_retcode(), Some(0));
        assert_eq!(task.num_timeout(), 0);
    }
}
