use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Notify;

use crate::dcc::supervisor::TimerState;
use crate::engine::event::FileInfo;
use crate::engine::packs;

/// Read-only copy of a job, emitted with `Done` and returned by the
/// `get`/`list` queries.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub nick: String,
    /// Pending pack numbers, ascending.
    pub queue: Vec<u32>,
    /// Pack in flight; 0 when idle.
    pub now: u32,
    /// Packs that exhausted their retry budget or were cancelled.
    pub failures: Vec<u32>,
    /// File names that completed.
    pub success: Vec<String>,
}

/// Bookkeeping for the transfer currently on the wire.
#[derive(Debug)]
pub(crate) struct ActiveTransfer {
    pub file: FileInfo,
    pub started: Instant,
}

/// One bot being serviced. Mutated only by the dispatcher.
#[derive(Debug)]
pub(crate) struct Job {
    /// Bot nick as first requested (display case preserved).
    pub nick: String,
    pub queue: Vec<u32>,
    pub now: u32,
    /// Attempt counter for `now`.
    pub retry: u32,
    pub failures: Vec<u32>,
    pub success: Vec<String>,
    /// Present only while a transfer task is running.
    pub cancel: Option<Arc<Notify>>,
    pub timer: TimerState,
    pub active: Option<ActiveTransfer>,
}

impl Job {
    fn new(nick: &str, queue: Vec<u32>) -> Self {
        Self {
            nick: nick.to_string(),
            queue,
            now: 0,
            retry: 0,
            failures: Vec::new(),
            success: Vec::new(),
            cancel: None,
            timer: TimerState::default(),
            active: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.now == 0
    }

    /// Merge more packs into the queue: union, ascending, deduplicated,
    /// never containing the in-flight pack.
    pub fn merge(&mut self, extra: Vec<u32>) {
        self.queue.extend(extra);
        self.queue = packs::normalize(std::mem::take(&mut self.queue));
        if self.now != 0 {
            let now = self.now;
            self.queue.retain(|&p| p != now);
        }
    }

    /// Pop the lowest pending pack into `now`, resetting the attempt
    /// counter.
    pub fn take_next(&mut self) -> Option<u32> {
        if self.queue.is_empty() {
            return None;
        }
        let pack = self.queue.remove(0);
        self.now = pack;
        self.retry = 0;
        Some(pack)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            nick: self.nick.clone(),
            queue: self.queue.clone(),
            now: self.now,
            failures: self.failures.clone(),
            success: self.success.clone(),
        }
    }
}

/// The active set of jobs, serviced in FIFO arrival order. Only the
/// head-of-line job ever has outstanding network activity.
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    jobs: HashMap<String, Job>,
    order: VecDeque<String>,
}

impl EngineState {
    /// Canonical map key for a bot nick.
    pub fn key(nick: &str) -> String {
        nick.to_lowercase()
    }

    /// Create or merge a job for `target`. Returns `true` when this is the
    /// only job and it is idle, i.e. the caller should trigger the request
    /// step now.
    pub fn enqueue(&mut self, target: &str, extra: Vec<u32>) -> bool {
        let key = Self::key(target);
        match self.jobs.get_mut(&key) {
            Some(job) => job.merge(extra),
            None => {
                self.jobs.insert(key.clone(), Job::new(target, packs::normalize(extra)));
                self.order.push_back(key.clone());
            }
        }
        self.jobs.len() == 1 && self.jobs[&key].is_idle()
    }

    pub fn job(&self, key: &str) -> Option<&Job> {
        self.jobs.get(key)
    }

    pub fn job_mut(&mut self, key: &str) -> Option<&mut Job> {
        self.jobs.get_mut(key)
    }

    /// Key of the head-of-line job.
    pub fn head_key(&self) -> Option<String> {
        self.order.front().cloned()
    }

    pub fn remove(&mut self, key: &str) -> Option<Job> {
        self.order.retain(|k| k != key);
        self.jobs.remove(key)
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        self.order
            .iter()
            .filter_map(|k| self.jobs.get(k))
            .map(Job::snapshot)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_creates_an_idle_job_and_triggers_when_sole() {
        let mut state = EngineState::default();
        assert!(state.enqueue("Bot", vec![5, 1]));
        let job = state.job("bot").unwrap();
        assert_eq!(job.nick, "Bot");
        assert_eq!(job.now, 0);
        assert_eq!(job.queue, vec![1, 5]);

        // A second bot never triggers immediately.
        assert!(!state.enqueue("Other", vec![3]));
        assert_eq!(state.head_key().as_deref(), Some("bot"));
    }

    #[test]
    fn merge_is_a_sorted_union_excluding_the_inflight_pack() {
        let mut state = EngineState::default();
        state.enqueue("bot", vec![2, 4]);
        let job = state.job_mut("bot").unwrap();
        assert_eq!(job.take_next(), Some(2));

        state.enqueue("BOT", vec![4, 2, 3]);
        let job = state.job("bot").unwrap();
        // Pack 2 is in flight; the queue must not re-acquire it.
        assert_eq!(job.now, 2);
        assert_eq!(job.queue, vec![3, 4]);
    }

    #[test]
    fn packs_are_served_strictly_ascending() {
        let mut state = EngineState::default();
        state.enqueue("bot", vec![9, 1, 4]);
        let job = state.job_mut("bot").unwrap();
        assert_eq!(job.take_next(), Some(1));
        job.now = 0;
        assert_eq!(job.take_next(), Some(4));
        job.now = 0;
        assert_eq!(job.take_next(), Some(9));
        assert_eq!(job.take_next(), None);
    }

    #[test]
    fn accounting_never_exceeds_distinct_requested() {
        let mut state = EngineState::default();
        state.enqueue("bot", vec![1, 2, 3]);
        state.enqueue("bot", vec![2, 3, 4]);
        let requested = 4usize;

        let job = state.job_mut("bot").unwrap();
        let check = |job: &Job| {
            let accounted = job.failures.len()
                + job.success.len()
                + job.queue.len()
                + usize::from(job.now != 0);
            assert!(accounted <= requested);
        };

        check(job);
        job.take_next();
        check(job);
        job.failures.push(job.now);
        job.now = 0;
        check(job);
        job.take_next();
        check(job);
        job.success.push("two.bin".into());
        job.now = 0;
        check(job);
    }

    #[test]
    fn remove_drops_job_from_order() {
        let mut state = EngineState::default();
        state.enqueue("a", vec![1]);
        state.enqueue("b", vec![2]);
        let job = state.remove("a").unwrap();
        assert_eq!(job.nick, "a");
        assert_eq!(state.head_key().as_deref(), Some("b"));
        assert_eq!(state.snapshots().len(), 1);
        assert!(!state.is_empty());
    }
}
