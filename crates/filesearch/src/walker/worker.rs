//! The per-thread walk loop.
//!
//! A worker takes units from the queue until it finds the queue empty, then
//! arrives at the termination barrier. When every worker and the driver are
//! at the barrier at once, nothing is left to do and the worker exits.

use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStats, CacheStore, MetadataCache, PluginTable};
use crate::cancel::{FailureFlag, StopFlag};
use crate::entry::Entry;
use crate::error::{Result, SearchError};
use crate::filter::{Excluder, Matcher};
use crate::ignore::{IgnoreFile, IGNORE_FILES};
use crate::path::join;
use crate::processing::Sink;

use super::barrier::{BarrierWait, TerminationBarrier};
use super::queue::{Directory, WorkReceiver, WorkSubmitter, WorkUnit};

pub(crate) const QUEUE_TIMEOUT: Duration = Duration::from_millis(10);
pub(crate) const BARRIER_TIMEOUT: Duration = Duration::from_millis(10);

/// Share of idle workers above which a slow directory is split.
const IDLE_SHARE: f64 = 0.25;
/// Directories with no more remaining entries are never split.
const MIN_SPLIT: usize = 10;

/// State shared by all workers of a walk.
pub(crate) struct WalkShared {
    pub(crate) matcher: Matcher,
    pub(crate) excluder: Excluder,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) cache_tables: Vec<PluginTable>,
    pub(crate) barrier: Arc<TerminationBarrier>,
    pub(crate) stop: StopFlag,
    pub(crate) failure: FailureFlag,
    pub(crate) jobs: usize,
    /// Whether the queries use slow plugins, which makes splitting
    /// directories between workers worthwhile.
    pub(crate) balance: bool,
    pub(crate) follow_symlinks: bool,
    /// Whether ignore files found during the walk are read.
    pub(crate) read_ignore_files: bool,
}

/// Counters of one worker, summed up by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub directories: u64,
    pub entries: u64,
    pub matches: u64,
    pub splits: u64,
    pub commands: u64,
    pub cache: CacheStats,
}

impl std::ops::AddAssign for WalkStats {
    fn add_assign(&mut self, other: Self) {
        self.directories += other.directories;
        self.entries += other.entries;
        self.matches += other.matches;
        self.splits += other.splits;
        self.commands += other.commands;
        self.cache += other.cache;
    }
}

pub(crate) struct Worker {
    id: usize,
    shared: Arc<WalkShared>,
    receiver: WorkReceiver,
    submitter: WorkSubmitter,
    cache: Box<dyn MetadataCache>,
    stats: WalkStats,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        shared: Arc<WalkShared>,
        receiver: WorkReceiver,
        submitter: WorkSubmitter,
    ) -> Result<Self> {
        let cache = shared
            .cache
            .open(&shared.cache_tables)
            .map_err(|error| SearchError::Worker {
                id,
                reason: format!("unable to open cache: {error}"),
            })?;
        Ok(Self {
            id,
            shared,
            receiver,
            submitter,
            cache,
            stats: WalkStats::default(),
        })
    }

    /// Runs until the walk is complete or a stop was requested.
    pub(crate) fn run(mut self) -> Result<WalkStats> {
        log::debug!("worker {} starting", self.id);

        while !self.shared.stop.is_stopped() {
            let Some(unit) = self.receiver.recv_timeout(QUEUE_TIMEOUT) else {
                match self.shared.barrier.wait(BARRIER_TIMEOUT) {
                    BarrierWait::Arrived => break,
                    BarrierWait::TimedOut => {
                        self.shared.barrier.reset();
                        continue;
                    }
                }
            };

            match unit {
                WorkUnit::Directories(directories) => {
                    for directory in directories {
                        if self.shared.stop.is_stopped() {
                            break;
                        }
                        self.process_directory(&directory);
                    }
                }
                WorkUnit::Entries { parent, entries } => {
                    log::trace!(
                        "worker {} took over {} entries of {}",
                        self.id,
                        entries.len(),
                        parent.start.root()
                    );
                    self.process_entries(&parent, entries);
                }
                WorkUnit::Exec(commands) => {
                    for arguments in commands {
                        self.run_command(&arguments);
                    }
                }
            }
        }

        self.cache.close()?;
        self.stats.cache = self.cache.stats();
        log::debug!("worker {} finished: {:?}", self.id, self.stats);
        Ok(self.stats)
    }

    fn process_directory(&mut self, directory: &Directory) {
        self.stats.directories += 1;
        let entries = self.scan_directory(directory);
        if !entries.is_empty() {
            self.process_entries(directory, entries);
        }
    }

    /// Reads the entries of `directory`. Ignore files found in it apply to
    /// all of its entries.
    fn scan_directory(&self, directory: &Directory) -> Vec<Entry> {
        let path = join(directory.start.root(), &directory.relpath);
        let path = if path.is_empty() { ".".to_string() } else { path };

        let read = match fs::read_dir(&path) {
            Ok(read) => read,
            // Vanished and forbidden directories are skipped silently.
            Err(error)
                if matches!(
                    error.kind(),
                    ErrorKind::NotFound | ErrorKind::PermissionDenied
                ) =>
            {
                return Vec::new();
            }
            Err(error) => {
                log::warn!("{path}: {error}");
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        let mut ignore_names = Vec::new();
        for dirent in read {
            let dirent = match dirent {
                Ok(dirent) => dirent,
                Err(error) => {
                    log::warn!("{path}: {error}");
                    continue;
                }
            };
            let name = dirent.file_name().to_string_lossy().into_owned();
            let metadata = match self.stat(&dirent) {
                Ok(metadata) => metadata,
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => {
                    log::warn!("{}: {error}", join(&path, &name));
                    continue;
                }
            };
            if self.shared.read_ignore_files && IGNORE_FILES.contains(&name.as_str()) {
                ignore_names.push(name.clone());
            }
            found.push((join(&directory.relpath, &name), metadata));
        }

        let ignore = if ignore_names.is_empty() {
            directory.ignore.clone()
        } else {
            let dirname = join(directory.start.absroot(), &directory.relpath);
            directory.ignore.extended(load_ignore_files(Path::new(&dirname), &ignore_names))
        };

        found
            .into_iter()
            .map(|(relpath, metadata)| {
                Entry::new(directory.start.clone(), relpath, metadata, ignore.clone())
            })
            .collect()
    }

    fn stat(&self, dirent: &fs::DirEntry) -> std::io::Result<fs::Metadata> {
        if !self.shared.follow_symlinks {
            return dirent.metadata();
        }
        match fs::metadata(dirent.path()) {
            // A dangling link is reported as the link itself.
            Err(error) if error.kind() == ErrorKind::NotFound => dirent.metadata(),
            other => other,
        }
    }

    /// Filters `entries`, reports the matches and queues the subdirectories.
    /// With slow plugins in the query, part of a long directory is handed to
    /// idle workers.
    fn process_entries(&mut self, parent: &Directory, entries: Vec<Entry>) {
        let mut pending: VecDeque<Entry> = entries.into();
        let mut search = Vec::new();
        let mut matches = Vec::new();

        while let Some(entry) = pending.pop_front() {
            if self.shared.stop.is_stopped() {
                return;
            }
            self.stats.entries += 1;

            if self.shared.excluder.excludes(&entry, self.cache.as_ref()) {
                continue;
            }
            if entry.is_dir() {
                search.push(Directory {
                    start: entry.start().clone(),
                    relpath: entry.relpath().to_string(),
                    ignore: entry.ignore_chain().clone(),
                });
            }
            if self.shared.matcher.matches(&entry, self.cache.as_ref()) {
                matches.push(entry);
            }

            if !self.shared.balance {
                continue;
            }
            if let Some(remainder) = split_remainder(&mut pending, self.idle_share()) {
                log::trace!("worker {} hands off {} entries", self.id, remainder.len());
                self.stats.splits += 1;
                self.submitter.submit(WorkUnit::Entries {
                    parent: parent.clone(),
                    entries: remainder,
                });
            }
        }

        if !search.is_empty() {
            let size = chunk_size(search.len(), self.shared.jobs);
            let mut search = search.into_iter().peekable();
            while search.peek().is_some() {
                let chunk: Vec<Directory> = search.by_ref().take(size).collect();
                self.submitter.submit(WorkUnit::Directories(chunk));
            }
        }

        if !matches.is_empty() {
            self.stats.matches += matches.len() as u64;
            self.shared.sink.accept(matches);
        }
    }

    fn idle_share(&self) -> f64 {
        self.shared.barrier.n_waiting() as f64 / self.shared.jobs.max(1) as f64
    }

    fn run_command(&mut self, arguments: &[String]) {
        let Some((program, args)) = arguments.split_first() else {
            return;
        };
        self.stats.commands += 1;
        match Command::new(program).args(args).status() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                log::debug!("{program} exited with {status}");
                self.shared.failure.raise();
            }
            Err(error) => log::error!("{program}: {error}"),
        }
    }
}

/// Takes the back half of `pending` when enough workers are idle. The front
/// `len / 2 + 1` entries stay with the current worker.
fn split_remainder<T>(pending: &mut VecDeque<T>, idle_share: f64) -> Option<Vec<T>> {
    if pending.len() <= MIN_SPLIT || idle_share <= IDLE_SHARE {
        return None;
    }
    Some(pending.split_off(pending.len() / 2 + 1).into())
}

/// Directories are queued in chunks of 10 to 100, depending on the number
/// of workers.
pub(crate) fn chunk_size(directories: usize, jobs: usize) -> usize {
    (directories / jobs.max(1) + 1).clamp(10, 100)
}

fn load_ignore_files(dirname: &Path, names: &[String]) -> Vec<Arc<IgnoreFile>> {
    IGNORE_FILES
        .iter()
        .filter(|name| names.iter().any(|found| found == *name))
        .filter_map(|name| match IgnoreFile::load(dirname, name) {
            Ok(file) => {
                log::debug!("found ignore file {}", file.path().display());
                Some(Arc::new(file))
            }
            Err(error) => {
                log::warn!("{}: {error}", dirname.join(name).display());
                None
            }
        })
        .collect()
}
