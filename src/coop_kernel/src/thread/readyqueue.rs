//! Thread ready queues
//!
//! The ready queue decides which ready thread runs next. It's selected by
//! name when the kernel boots (see [`SchedulerKind`]).
use serde::Deserialize;
use std::{collections::VecDeque, fmt, str::FromStr};

use super::{Priority, ThreadId, MAX_PRIORITY};

/// Tracks the threads in the Ready state.
pub trait ThreadQueue: Send + fmt::Debug {
    /// Insert `thread` behind every queued thread that should run before it.
    fn push_back(&mut self, thread: ThreadId, priority: Priority);

    /// Remove and return the thread that should run next.
    fn pop_front(&mut self) -> Option<ThreadId>;

    /// Remove `thread` from the queue. Returns `false` if it wasn't queued.
    fn remove(&mut self, thread: ThreadId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs threads in the order they became ready. Priorities are ignored.
#[derive(Debug, Default)]
pub struct RoundRobinQueue {
    queue: VecDeque<ThreadId>,
}

impl ThreadQueue for RoundRobinQueue {
    fn push_back(&mut self, thread: ThreadId, _priority: Priority) {
        self.queue.push_back(thread);
    }

    fn pop_front(&mut self) -> Option<ThreadId> {
        self.queue.pop_front()
    }

    fn remove(&mut self, thread: ThreadId) -> bool {
        if let Some(i) = self.queue.iter().position(|&t| t == thread) {
            self.queue.remove(i);
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Always runs a thread with the highest priority. Threads with the same
/// priority run in the order they became ready.
#[derive(Debug)]
pub struct PriorityQueue {
    /// One FIFO per priority level, indexed by priority.
    levels: Vec<VecDeque<ThreadId>>,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self {
            levels: (0..=MAX_PRIORITY).map(|_| VecDeque::new()).collect(),
        }
    }
}

impl ThreadQueue for PriorityQueue {
    fn push_back(&mut self, thread: ThreadId, priority: Priority) {
        self.levels[usize::from(priority)].push_back(thread);
    }

    fn pop_front(&mut self) -> Option<ThreadId> {
        self.levels
            .iter_mut()
            .rev()
            .find_map(|level| level.pop_front())
    }

    fn remove(&mut self, thread: ThreadId) -> bool {
        for level in self.levels.iter_mut() {
            if let Some(i) = level.iter().position(|&t| t == thread) {
                level.remove(i);
                return true;
            }
        }
        false
    }

    fn len(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }
}

/// Selects the [`ThreadQueue`] implementation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum SchedulerKind {
    /// [`RoundRobinQueue`]
    #[default]
    RoundRobin,
    /// [`PriorityQueue`]
    Priority,
}

/// Error type for [`SchedulerKind::from_str`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown scheduler '{0}' (expected one of: round_robin, priority)")]
pub struct UnknownSchedulerError(pub String);

impl SchedulerKind {
    pub const ALL: [Self; 2] = [Self::RoundRobin, Self::Priority];

    pub fn name(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Priority => "priority",
        }
    }

    pub fn new_ready_queue(self) -> Box<dyn ThreadQueue> {
        match self {
            Self::RoundRobin => Box::<RoundRobinQueue>::default(),
            Self::Priority => Box::<PriorityQueue>::default(),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulerKind {
    type Err = UnknownSchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownSchedulerError(s.to_owned()))
    }
}

impl TryFrom<String> for SchedulerKind {
    type Error = UnknownSchedulerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
