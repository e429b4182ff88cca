//! Deferred work on the audio clock.
//!
//! A min-heap of tasks keyed by clock time, then by insertion order, so tasks
//! due at the same instant run in the order they were queued. The engine
//! drains it from `tick`, which lets tests drive teardown with virtual time.

use crate::backend::NodeId;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Clone, Debug, PartialEq)]
pub enum Task {
    /// Stop and release a retired voice once its fade-out has finished.
    ReleaseVoice { serial: u64 },
    /// Release transient nodes (heartbeat beats) after their envelope.
    ReleaseNodes(SmallVec<[NodeId; 4]>),
    /// Schedule the next heartbeat cycle if the overlay is still armed.
    HeartbeatCycle { generation: u64 },
    /// Advance the melody of the voice with this serial.
    MelodyStep { serial: u64 },
}

#[derive(Debug)]
struct Entry {
    at: f64,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap and we want the earliest first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Entry>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: f64, task: Task) {
        self.seq += 1;
        self.heap.push(Entry {
            at,
            seq: self.seq,
            task,
        });
    }

    /// Pop the earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<(f64, Task)> {
        if self.heap.peek()?.at > now {
            return None;
        }
        self.heap.pop().map(|e| (e.at, e.task))
    }

    pub fn next_due(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn pending(&self, pred: impl Fn(&Task) -> bool) -> usize {
        self.heap.iter().filter(|e| pred(&e.task)).count()
    }
}
