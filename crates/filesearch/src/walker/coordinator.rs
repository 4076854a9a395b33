//! Walk driver - spawns the workers and detects the end of the walk.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::attribute::{Registry, Speed};
use crate::cache::CacheStore;
use crate::cancel::{FailureFlag, StopFlag};
use crate::error::{Result, SearchError};
use crate::filter::{Excluder, Matcher};
use crate::processing::Sink;

use super::barrier::{BarrierWait, TerminationBarrier};
use super::queue::{WorkQueue, WorkSubmitter, WorkUnit};
use super::worker::{WalkShared, WalkStats, Worker};

/// How often the driver checks that no worker died.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(10);

/// Walk settings that do not come from the queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    pub jobs: usize,
    pub follow_symlinks: bool,
    /// Read ignore files found during the walk.
    pub read_ignore_files: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get().max(1),
            follow_symlinks: false,
            read_ignore_files: false,
        }
    }
}

/// Result of a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkOutcome {
    /// All parties met at the barrier, every unit was processed.
    pub completed: bool,
    /// A worker failed or died, some units may not have been processed.
    pub incomplete: bool,
    /// At least one command exited unsuccessfully.
    pub subprocess_failed: bool,
    pub stats: WalkStats,
}

/// Drives a pool of workers over a shared queue.
///
/// The driver is one of the parties of the termination barrier, so the walk
/// can only finish while it polls [`Walker::is_done`]. Polling with a timeout
/// well above the workers' queue timeout lets their arrivals meet the
/// driver's.
pub struct Walker {
    queue: WorkQueue,
    shared: Arc<WalkShared>,
    handles: Vec<JoinHandle<Result<WalkStats>>>,
    completed: bool,
    incomplete: bool,
    next_liveness_check: Instant,
}

impl Walker {
    pub fn new(
        queue: WorkQueue,
        registry: &Registry,
        matcher: Matcher,
        excluder: Excluder,
        sink: Arc<dyn Sink>,
        cache: Arc<CacheStore>,
        options: WalkOptions,
    ) -> Self {
        let jobs = options.jobs.max(1);

        let mut plugins = matcher.tree().plugins();
        plugins.extend(excluder.tests().iter().map(|test| test.attribute().plugin()));
        let balance = matcher.tree().uses_slow_plugin(registry)
            || excluder
                .tests()
                .iter()
                .any(|test| registry.speed(test.attribute()) == Speed::Slow);

        let shared = WalkShared {
            matcher,
            excluder,
            sink,
            cache_tables: registry.cache_tables(plugins),
            cache,
            barrier: Arc::new(TerminationBarrier::new(jobs + 1)),
            stop: StopFlag::new(),
            failure: FailureFlag::default(),
            jobs,
            balance,
            follow_symlinks: options.follow_symlinks,
            read_ignore_files: options.read_ignore_files,
        };

        Self {
            queue,
            shared: Arc::new(shared),
            handles: Vec::new(),
            completed: false,
            incomplete: false,
            next_liveness_check: Instant::now() + LIVENESS_INTERVAL,
        }
    }

    pub fn submitter(&self) -> WorkSubmitter {
        self.queue.submitter()
    }

    pub fn submit(&self, units: impl IntoIterator<Item = WorkUnit>) {
        let submitter = self.queue.submitter();
        for unit in units {
            submitter.submit(unit);
        }
    }

    /// A handle that cancels the walk from anywhere.
    pub fn stop_flag(&self) -> StopFlag {
        self.shared.stop.clone()
    }

    /// Spawns the workers.
    pub fn run(&mut self) -> Result<()> {
        log::debug!("starting {} walker threads", self.shared.jobs);

        for id in 0..self.shared.jobs {
            let shared = self.shared.clone();
            let receiver = self.queue.receiver();
            let submitter = self.queue.submitter();

            let handle = thread::Builder::new()
                .name(format!("filesearch-walker-{id}"))
                .spawn(move || {
                    let _guard = StopOnPanic(shared.stop.clone());
                    let result = Worker::new(id, shared.clone(), receiver, submitter)
                        .and_then(Worker::run);
                    if let Err(error) = &result {
                        log::error!("walker thread {id} failed: {error}");
                        shared.stop.request_stop();
                    }
                    result
                })
                .map_err(|error| {
                    self.shared.stop.request_stop();
                    SearchError::Worker {
                        id,
                        reason: error.to_string(),
                    }
                })?;
            self.handles.push(handle);
        }
        Ok(())
    }

    /// Waits up to `timeout` at the termination barrier. Returns `true` once
    /// the walk is complete, stopped, or a worker died.
    pub fn is_done(&mut self, timeout: Duration) -> bool {
        if self.completed || self.shared.stop.is_stopped() {
            return true;
        }

        match self.shared.barrier.wait(timeout) {
            BarrierWait::Arrived => {
                self.completed = true;
                return true;
            }
            BarrierWait::TimedOut => self.shared.barrier.reset(),
        }

        if Instant::now() >= self.next_liveness_check {
            self.next_liveness_check = Instant::now() + LIVENESS_INTERVAL;
            if let Some(index) = self.handles.iter().position(JoinHandle::is_finished) {
                log::warn!("walker thread {index} terminated abnormally");
                self.incomplete = true;
                self.shared.stop.request_stop();
                return true;
            }
        }

        self.shared.stop.is_stopped()
    }

    /// Asks all workers to stop after their current directory.
    pub fn request_stop(&self) {
        self.shared.stop.request_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop.is_stopped()
    }

    /// Stops the workers if the walk is not complete yet and joins them.
    /// Workers flush and close their caches before they exit.
    pub fn shutdown(mut self) -> WalkOutcome {
        if !self.completed {
            self.shared.stop.request_stop();
        }

        let mut outcome = WalkOutcome {
            completed: self.completed,
            incomplete: self.incomplete,
            ..WalkOutcome::default()
        };
        for (id, handle) in self.handles.drain(..).enumerate() {
            match handle.join() {
                Ok(Ok(stats)) => outcome.stats += stats,
                Ok(Err(error)) => {
                    log::warn!("walker thread {id}: {error}");
                    outcome.incomplete = true;
                }
                Err(_) => {
                    log::warn!("walker thread {id} panicked");
                    outcome.incomplete = true;
                }
            }
        }
        outcome.subprocess_failed = self.shared.failure.is_raised();

        log::debug!(
            "walk finished: {} directories, {} entries, {} matches, cache {} hits / {} misses",
            outcome.stats.directories,
            outcome.stats.entries,
            outcome.stats.matches,
            outcome.stats.cache.hits,
            outcome.stats.cache.misses
        );
        outcome
    }
}

/// Stops the walk when a worker thread unwinds.
struct StopOnPanic(StopFlag);

impl Drop for StopOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::StartRoot;
    use crate::ignore::IgnoreChain;
    use crate::processing::{collect, Collector};
    use crate::query::ParseOptions;
    use crate::walker::Directory;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(100);

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), b"0123456789").unwrap();
        std::fs::create_dir_all(temp.path().join("b/d")).unwrap();
        std::fs::write(temp.path().join("b/c.txt"), b"").unwrap();
        std::fs::write(temp.path().join("b/d/e.log"), b"x").unwrap();
        temp
    }

    fn walker(query: &[&str], exclude: &[&str], jobs: usize) -> (Walker, Collector) {
        let registry = Arc::new(Registry::new());
        let tokens = |query: &[&str]| -> Vec<String> {
            query.iter().map(|token| token.to_string()).collect()
        };
        let options = ParseOptions::default();
        let matcher = Matcher::compile(&tokens(query), registry.clone(), &options).unwrap();
        let excluder = Excluder::compile(&tokens(exclude), registry.clone(), &options).unwrap();
        let (sink, collector) = collect();
        let walker = Walker::new(
            WorkQueue::new(),
            &registry,
            matcher,
            excluder,
            Arc::new(sink),
            Arc::new(CacheStore::new(None)),
            WalkOptions {
                jobs,
                ..WalkOptions::default()
            },
        );
        (walker, collector)
    }

    fn seed(walker: &Walker, temp: &TempDir) {
        let start = Arc::new(StartRoot::new(temp.path().to_str().unwrap(), false).unwrap());
        walker.submit([WorkUnit::Directories(vec![Directory::root(
            start,
            IgnoreChain::new(),
        )])]);
    }

    fn finish(mut walker: Walker, collector: Collector) -> (WalkOutcome, Vec<String>) {
        walker.run().unwrap();
        while !walker.is_done(POLL) {}
        let outcome = walker.shutdown();
        let mut found: Vec<String> = collector
            .finish()
            .iter()
            .map(|entry| entry.relpath().to_string())
            .collect();
        found.sort();
        (outcome, found)
    }

    #[test]
    fn walks_every_entry_once() {
        let temp = tree();
        for jobs in [1, 4] {
            let (walker, collector) = walker(&[], &[], jobs);
            seed(&walker, &temp);
            let (outcome, found) = finish(walker, collector);

            assert!(outcome.completed);
            assert!(!outcome.incomplete);
            assert_eq!(found, vec!["a.txt", "b", "b/c.txt", "b/d", "b/d/e.log"]);
            assert_eq!(outcome.stats.directories, 3);
            assert_eq!(outcome.stats.entries, 5);
        }
    }

    #[test]
    fn excluded_directories_are_not_entered() {
        let temp = tree();
        let (walker, collector) = walker(&["type=f"], &["name=d"], 2);
        seed(&walker, &temp);
        let (outcome, found) = finish(walker, collector);

        assert!(outcome.completed);
        assert_eq!(found, vec!["a.txt", "b/c.txt"]);
    }

    #[test]
    fn empty_queue_completes() {
        let (walker, collector) = walker(&[], &[], 3);
        let (outcome, found) = finish(walker, collector);
        assert!(outcome.completed);
        assert!(found.is_empty());
    }

    #[test]
    fn stop_ends_the_walk_early() {
        let temp = tree();
        let (mut walker, _collector) = walker(&[], &[], 2);
        walker.request_stop();
        seed(&walker, &temp);
        walker.run().unwrap();
        assert!(walker.is_done(POLL));

        let outcome = walker.shutdown();
        assert!(!outcome.completed);
        assert!(!outcome.incomplete);
    }

    #[test]
    fn failing_commands_are_reported() {
        let (mut walker, _collector) = walker(&[], &[], 2);
        walker.submit([
            WorkUnit::Exec(vec![vec!["true".to_string()]]),
            WorkUnit::Exec(vec![vec!["false".to_string()]]),
            WorkUnit::Exec(vec![vec!["/nonexistent/program".to_string()]]),
        ]);
        walker.run().unwrap();
        while !walker.is_done(POLL) {}

        let outcome = walker.shutdown();
        assert!(outcome.completed);
        assert!(outcome.subprocess_failed);
        assert_eq!(outcome.stats.commands, 3);
    }
}
