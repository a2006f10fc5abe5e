use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clustershell::config::{TaskDefaults, TaskInfo};
use clustershell::task::{EventHandler, Task, Worker};

struct PickupLog {
    order: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl EventHandler for PickupLog {
    fn ev_pickup(&mut self, _worker: &Worker, node: &str) {
        self.order.lock().unwrap().push((node.to_string(), Instant::now()));
    }
}

#[test]
fn fanout_one_serializes_two_clients() {
    let mut defaults = TaskDefaults::default();
    defaults.engine = "poll".to_string();
    let mut info = TaskInfo::default();
    info.fanout = 1;

    let mut task = Task::with_settings(defaults, info).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    task.set_handler(Box::new(PickupLog { order: order.clone() }));

    let start = Instant::now();
    task.shell("sleep 1; echo done", &["n1".to_string(), "n2".to_string()]).unwrap();
    task.run(Some(Duration::from_secs(10))).unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(2), "fanout=1 should serialize, took {elapsed:?}");

    let recorded = order.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    // second pickup happens strictly after the first client's sleep finishes.
    assert!(recorded[1].1.duration_since(recorded[0].1) >= Duration::from_millis(900));
}
