//! Work units and the shared work queue.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::entry::{Entry, StartRoot};
use crate::ignore::IgnoreChain;

/// A directory waiting to be scanned.
#[derive(Debug, Clone)]
pub struct Directory {
    pub start: Arc<StartRoot>,
    /// Path relative to `start`, empty for the root itself.
    pub relpath: String,
    /// Ignore files applying to the directory's entries, excluding those
    /// found in the directory itself.
    pub ignore: IgnoreChain,
}

impl Directory {
    pub fn root(start: Arc<StartRoot>, ignore: IgnoreChain) -> Self {
        Self {
            start,
            relpath: String::new(),
            ignore,
        }
    }
}

/// A unit of work, consumed by exactly one worker.
#[derive(Debug)]
pub enum WorkUnit {
    Directories(Vec<Directory>),
    /// The remainder of a directory handed off to an idle worker.
    Entries {
        parent: Directory,
        entries: Vec<Entry>,
    },
    /// Argument vectors of commands to run.
    Exec(Vec<Vec<String>>),
}

/// Multi-producer, multi-consumer queue of [`WorkUnit`]s.
#[derive(Debug)]
pub struct WorkQueue {
    sender: Sender<WorkUnit>,
    receiver: Receiver<WorkUnit>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn submitter(&self) -> WorkSubmitter {
        WorkSubmitter {
            sender: self.sender.clone(),
        }
    }

    pub(crate) fn receiver(&self) -> WorkReceiver {
        WorkReceiver {
            receiver: self.receiver.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Handle for adding work, cloned into workers and sinks.
#[derive(Debug, Clone)]
pub struct WorkSubmitter {
    sender: Sender<WorkUnit>,
}

impl WorkSubmitter {
    /// Enqueues `unit`. Returns `false` once the queue is gone.
    pub fn submit(&self, unit: WorkUnit) -> bool {
        self.sender.send(unit).is_ok()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct WorkReceiver {
    receiver: Receiver<WorkUnit>,
}

impl WorkReceiver {
    /// Takes the next unit, `None` on timeout.
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Option<WorkUnit> {
        match self.receiver.recv_timeout(timeout) {
            Ok(unit) => Some(unit),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}
