//! Consumers of matched entries.
//!
//! Workers hand the matches of every directory to a [`Sink`] in one batch.
//! [`CollectSink`] moves them to the driver, which gathers them with a
//! [`Collector`]. [`ExecSink`] turns each match into a command that is run
//! by the walker workers.

use std::cmp::Reverse;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::attribute::{Attribute, Registry};
use crate::cache::NullCache;
use crate::entry::Entry;
use crate::exec::ExecTemplate;
use crate::types::SortKey;
use crate::walker::{WorkSubmitter, WorkUnit};

pub trait Sink: Send + Sync {
    fn accept(&self, entries: Vec<Entry>);
}

// ---------------------------------------------------------------------------
// Collecting
// ---------------------------------------------------------------------------

/// Forwards matches to a [`Collector`].
#[derive(Debug, Clone)]
pub struct CollectSink {
    sender: Sender<Vec<Entry>>,
}

/// Creates a connected sink and collector.
pub fn collect() -> (CollectSink, Collector) {
    let (sender, receiver) = unbounded();
    (
        CollectSink { sender },
        Collector {
            receiver,
            entries: Vec::new(),
        },
    )
}

impl Sink for CollectSink {
    fn accept(&self, entries: Vec<Entry>) {
        if self.sender.send(entries).is_err() {
            log::debug!("collector is gone, dropping results");
        }
    }
}

#[derive(Debug)]
pub struct Collector {
    receiver: Receiver<Vec<Entry>>,
    entries: Vec<Entry>,
}

impl Collector {
    /// Takes everything received so far without blocking. Returns the
    /// number of new entries.
    pub fn drain(&mut self) -> usize {
        let before = self.entries.len();
        for batch in self.receiver.try_iter() {
            self.entries.extend(batch);
        }
        self.entries.len() - before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains the channel one last time and returns all entries.
    pub fn finish(mut self) -> Vec<Entry> {
        self.drain();
        self.entries
    }
}

/// Sorts `entries` by the values of `attributes`, entries lacking a value
/// sort as the type's empty value.
pub fn sort_entries(
    entries: &mut [Entry],
    registry: &Registry,
    attributes: &[Attribute],
    reverse: bool,
) {
    let key = |entry: &Entry| {
        attributes
            .iter()
            .map(|attribute| match registry.value_of(entry, attribute, &NullCache) {
                Some(value) => attribute.ty().sort_key(&value),
                None => attribute.ty().sort_none(),
            })
            .collect::<Vec<SortKey>>()
    };
    // Both directions are stable: equal keys keep their incoming order.
    if reverse {
        entries.sort_by_cached_key(|entry| Reverse(key(entry)));
    } else {
        entries.sort_by_cached_key(key);
    }
}

// ---------------------------------------------------------------------------
// Immediate exec
// ---------------------------------------------------------------------------

/// Runs a command for every match. Commands are queued as work units so
/// they spread over the walker workers.
pub struct ExecSink {
    template: ExecTemplate,
    registry: Arc<Registry>,
    submitter: WorkSubmitter,
}

impl ExecSink {
    pub fn new(template: ExecTemplate, registry: Arc<Registry>, submitter: WorkSubmitter) -> Self {
        Self {
            template,
            registry,
            submitter,
        }
    }
}

impl Sink for ExecSink {
    fn accept(&self, entries: Vec<Entry>) {
        for entry in &entries {
            let Some(arguments) = self.template.render(entry, &self.registry, &NullCache) else {
                log::debug!("skipping command for {}, a placeholder has no value", entry.path());
                continue;
            };
            // One command per unit keeps the commands evenly spread.
            if !self.submitter.submit(WorkUnit::Exec(vec![arguments])) {
                log::warn!("work queue is closed, not running command for {}", entry.path());
                return;
            }
        }
    }
}
