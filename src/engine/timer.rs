//! Timer min-heap driving an engine's scheduled and periodic timers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

pub(crate) struct TimerEntry {
    pub deadline: Instant,
    pub seq: u64,
    pub interval: Option<Duration>,
    /// Autoclose timers don't keep the event loop alive on their own:
    /// they're excluded from the reference count.
    pub autoclose: bool,
    pub id: TimerId,
    pub handler: Box<dyn FnMut()>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest deadline (and,
        // among ties, the earliest-inserted) on top, so reverse both.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    next_id: u64,
    autoclose_count: usize,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        delay: Duration,
        interval: Option<Duration>,
        autoclose: bool,
        handler: Box<dyn FnMut()>,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        if autoclose {
            self.autoclose_count += 1;
        }
        self.heap.push(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            interval,
            autoclose,
            id,
            handler,
        });
        id
    }

    pub fn remove(&mut self, id: TimerId) {
        let entries: Vec<_> = self.heap.drain().collect();
        for e in entries {
            if e.id == id {
                if e.autoclose {
                    self.autoclose_count = self.autoclose_count.saturating_sub(1);
                }
                continue;
            }
            self.heap.push(e);
        }
    }

    /// Non-autoclose timers keep the loop alive.
    pub fn referenced_count(&self) -> usize {
        self.heap.len() - self.autoclose_count
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Duration until the soonest deadline, or `None` if there are no
    /// pending timers.
    pub fn next_delay(&self, now: Instant) -> Option<Duration> {
        self.heap.peek().map(|e| e.deadline.saturating_duration_since(now))
    }

    /// Fire every timer whose deadline has passed, in deadline order,
    /// rescheduling periodic ones.
    pub fn fire_due(&mut self, now: Instant) {
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let mut entry = self.heap.pop().unwrap();
            (entry.handler)();
            match entry.interval {
                Some(interval) => {
                    entry.deadline = now + interval;
                    entry.seq = self.next_seq;
                    self.next_seq += 1;
                    self.heap.push(entry);
                }
                None => {
                    if entry.autoclose {
                        self.autoclose_count = self.autoclose_count.saturating_sub(1);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn fires_in_deadline_order() {
        let mut q = TimerQueue::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        q.add(Duration::from_millis(20), None, false, Box::new(move || o1.lock().unwrap().push(2)));
        q.add(Duration::from_millis(5), None, false, Box::new(move || o2.lock().unwrap().push(1)));
        std::thread::sleep(Duration::from_millis(30));
        q.fire_due(Instant::now());
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn autoclose_timers_excluded_from_refcount() {
        let mut q = TimerQueue::new();
        q.add(Duration::from_secs(10), None, true, Box::new(|| {}));
        assert_eq!(q.referenced_count(), 0);
        q.add(Duration::from_secs(10), None, false, Box::new(|| {}));
        assert_eq!(q.referenced_count(), 1);
    }

    #[test]
    fn periodic_timer_reschedules() {
        let mut q = TimerQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        q.add(
            Duration::from_millis(1),
            Some(Duration::from_millis(1)),
            false,
            Box::new(move || {
                c.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(10));
        q.fire_due(Instant::now());
        assert!(count.load(AtomicOrdering::SeqCst) >= 1);
        assert_eq!(q.referenced_count(), 1); // still scheduled
    }
}
