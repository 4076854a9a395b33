//! Search - the public entry point tying parser, walker and sinks together.
//!
//! A [`Search`] is configured once and run once. Results are either
//! collected (and optionally sorted) or turned into commands:
//!
//! - without exec, matches are returned in [`SearchResult::entries`];
//! - with exec and no sort, a command per match is run by the walker
//!   workers while the walk is still going;
//! - with exec and sort, or with exec-batch, matches are collected first and
//!   the commands are run by the driver after the walk.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::attribute::{Attribute, PluginId, Registry};
use crate::cache::{CacheStore, NullCache};
use crate::cancel::StopFlag;
use crate::config::SearchConfig;
use crate::entry::{absolute, Entry, StartRoot};
use crate::error::{Result, SearchError};
use crate::exec::ExecTemplate;
use crate::filter::{Excluder, Matcher};
use crate::ignore::IgnoreChain;
use crate::processing::{collect, sort_entries, ExecSink, Sink};
use crate::query::ParseOptions;
use crate::walker::{Directory, WalkOptions, WalkStats, WorkQueue, WorkUnit, Walker};

/// Poll interval of the driver at the termination barrier. Must stay well
/// above the workers' queue timeout so their arrivals meet the driver's.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
enum ExecMode {
    PerEntry(Vec<String>),
    Batch(Vec<String>),
}

/// A configured search over one or more roots.
#[derive(Debug)]
pub struct Search {
    query: Vec<String>,
    roots: Vec<String>,
    excludes: Vec<String>,
    config: SearchConfig,
    sort: Vec<String>,
    reverse: bool,
    exec: Option<ExecMode>,
    stop: StopFlag,
}

/// What a finished search produced.
#[derive(Debug, Default)]
pub struct SearchResult {
    /// Matching entries. Empty when the matches were turned into commands.
    pub entries: Vec<Entry>,
    pub stats: WalkStats,
    /// The search was cancelled before the walk was complete.
    pub stopped: bool,
    /// At least one command exited unsuccessfully.
    pub subprocess_failed: bool,
}

impl SearchResult {
    /// Turns a failed command into [`SearchError::Subprocess`].
    pub fn ensure_success(&self) -> Result<()> {
        if self.subprocess_failed {
            Err(SearchError::Subprocess)
        } else {
            Ok(())
        }
    }
}

impl Search {
    /// Creates a search for `query` below `roots`. An empty root list
    /// searches the current directory. `excludes` are tests that prune
    /// entries and their subtrees.
    pub fn new(
        query: Vec<String>,
        roots: Vec<String>,
        excludes: Vec<String>,
        config: SearchConfig,
    ) -> Self {
        let roots = if roots.is_empty() {
            vec![".".to_string()]
        } else {
            roots
        };
        Self {
            query,
            roots,
            excludes,
            config,
            sort: Vec::new(),
            reverse: false,
            exec: None,
            stop: StopFlag::new(),
        }
    }

    /// Sorts the results by the given attributes.
    pub fn with_sort(mut self, attributes: Vec<String>, reverse: bool) -> Self {
        self.sort = attributes;
        self.reverse = reverse;
        self
    }

    /// Runs `command` once for every match.
    pub fn with_exec(mut self, command: Vec<String>) -> Self {
        self.exec = Some(ExecMode::PerEntry(command));
        self
    }

    /// Runs `command` once with all matches as arguments.
    pub fn with_exec_batch(mut self, command: Vec<String>) -> Self {
        self.exec = Some(ExecMode::Batch(command));
        self
    }

    /// A handle that cancels a running search.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn run(&self) -> Result<SearchResult> {
        let started = Instant::now();
        self.config.validate()?;

        let registry = Arc::new(Registry::new());
        let roots = self.prepare_roots()?;

        let options = ParseOptions::from_config(&self.config, &roots);
        let matcher = Matcher::compile(
            &self.config.wrap_query(self.query.clone()),
            registry.clone(),
            &options,
        )
        .map_err(|error| usage("unable to parse tests", error))?;

        let mut exclude_tokens = self.excludes.clone();
        exclude_tokens.extend(self.config.implied_exclusions());
        let exclude_options = ParseOptions {
            warn_hide: false,
            ..options
        };
        let excluder = Excluder::compile(&exclude_tokens, registry.clone(), &exclude_options)
            .map_err(|error| usage("unable to parse excludes", error))?;

        log_tests(&matcher, &excluder);

        let sort = self
            .sort
            .iter()
            .map(|name| registry.resolve(name))
            .collect::<Result<Vec<Attribute>>>()?;
        let template = match &self.exec {
            Some(ExecMode::PerEntry(command)) => {
                Some(ExecTemplate::new(command, &registry)?.with_si(self.config.si))
            }
            Some(ExecMode::Batch(command)) => {
                Some(ExecTemplate::batch(command, &registry)?.with_si(self.config.si))
            }
            None => None,
        };
        let immediate_exec = matches!(self.exec, Some(ExecMode::PerEntry(_))) && sort.is_empty();

        let read_ignore_files = self.config.ignore
            || matcher.tree().uses_plugin(PluginId::Ignore)
            || excluder
                .tests()
                .iter()
                .any(|test| test.attribute().plugin() == PluginId::Ignore);

        let seeds = self.seed_directories(&roots)?;

        let queue = WorkQueue::new();
        let (collect_sink, mut collector) = collect();
        let sink: Arc<dyn Sink> = match &template {
            Some(template) if immediate_exec => Arc::new(ExecSink::new(
                template.clone(),
                registry.clone(),
                queue.submitter(),
            )),
            _ => Arc::new(collect_sink),
        };

        let mut walker = Walker::new(
            queue,
            &registry,
            matcher,
            excluder,
            sink,
            Arc::new(CacheStore::new(self.config.cache.clone())),
            WalkOptions {
                jobs: self.config.worker_count(),
                follow_symlinks: self.config.follow_symlinks,
                read_ignore_files,
            },
        );
        walker.submit([WorkUnit::Directories(seeds)]);
        walker.run()?;

        let mut stopped = false;
        loop {
            if self.stop.is_stopped() && !walker.is_stopped() {
                log::info!("search cancelled");
                walker.request_stop();
                stopped = true;
            }
            if walker.is_done(POLL_INTERVAL) {
                break;
            }
            collector.drain();
        }
        let outcome = walker.shutdown();
        if outcome.incomplete {
            return Err(SearchError::Incomplete);
        }
        stopped |= !outcome.completed;

        let mut entries = collector.finish();
        if !sort.is_empty() {
            sort_entries(&mut entries, &registry, &sort, self.reverse);
        }

        let mut result = SearchResult {
            stats: outcome.stats,
            stopped,
            subprocess_failed: outcome.subprocess_failed,
            ..SearchResult::default()
        };

        match (&template, &self.exec) {
            (Some(_), Some(ExecMode::PerEntry(_))) if immediate_exec => {}
            (Some(template), Some(ExecMode::PerEntry(_))) => {
                for entry in &entries {
                    if self.stop.is_stopped() {
                        break;
                    }
                    if let Some(arguments) = template.render(entry, &registry, &NullCache) {
                        result.stats.commands += 1;
                        result.subprocess_failed |= !run_command(&arguments);
                    }
                }
            }
            (Some(template), Some(ExecMode::Batch(_))) => {
                if !entries.is_empty() {
                    let arguments = template.render_batch(&entries, &registry, &NullCache);
                    result.stats.commands += 1;
                    result.subprocess_failed |= !run_command(&arguments);
                }
            }
            _ => result.entries = entries,
        }

        log::debug!(
            "search finished in {:?}: {} matches",
            started.elapsed(),
            result.stats.matches
        );
        Ok(result)
    }

    /// Applies `absolute_path` and rejects roots nested in other roots.
    fn prepare_roots(&self) -> Result<Vec<String>> {
        let mut roots = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            if self.config.absolute_path {
                roots.push(absolute(root)?);
            } else {
                roots.push(root.clone());
            }
        }

        let resolved = roots
            .iter()
            .map(|root| absolute(root))
            .collect::<Result<Vec<String>>>()?;
        for (index, directory) in resolved.iter().enumerate() {
            for (other, subdir) in resolved.iter().enumerate() {
                if index != other && Path::new(directory).starts_with(subdir) {
                    return Err(SearchError::Usage(format!(
                        "{} is a sub-directory of {}",
                        roots[index], roots[other]
                    )));
                }
            }
        }
        Ok(roots)
    }

    fn seed_directories(&self, roots: &[String]) -> Result<Vec<Directory>> {
        log::debug!("directories to search:");
        let mut seeds = Vec::with_capacity(roots.len());
        for root in roots {
            let start = Arc::new(StartRoot::new(root, self.config.follow_symlinks)?);
            let ignore = if self.config.ignore && !self.config.no_parent_ignore {
                IgnoreChain::from_parent_directories(Path::new(start.absroot()))
            } else {
                IgnoreChain::new()
            };
            log::debug!("    {} ({} parent ignore files)", start.absroot(), ignore.len());
            seeds.push(Directory::root(start, ignore));
        }
        Ok(seeds)
    }
}

fn usage(context: &str, error: SearchError) -> SearchError {
    match error {
        SearchError::QueryParse(message) => SearchError::Usage(format!("{context}: {message}")),
        other => other,
    }
}

fn log_tests(matcher: &Matcher, excluder: &Excluder) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    if !excluder.is_empty() {
        log::debug!("exclude sequence:");
        for test in excluder.tests() {
            log::debug!("  {test}");
        }
    }
    if !matcher.is_empty() {
        log::debug!("test sequence:");
        for line in matcher.tree().format() {
            log::debug!("  {line}");
        }
    }
}

/// Runs one command in the driver. Returns `false` when it could not be
/// started or exited unsuccessfully.
fn run_command(arguments: &[String]) -> bool {
    let Some((program, args)) = arguments.split_first() else {
        return true;
    };
    match Command::new(program).args(args).status() {
        Ok(status) if status.success() => true,
        Ok(status) => {
            log::debug!("{program} exited with {status}");
            false
        }
        Err(error) => {
            log::error!("{program}: {error}");
            false
        }
    }
}
