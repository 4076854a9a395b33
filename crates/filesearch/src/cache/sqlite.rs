//! SQLite backed [`MetadataCache`].
//!
//! Every worker opens its own connection. Writes are buffered and committed
//! in batches so concurrent processes block each other less often; a locked
//! database is retried until the commit succeeds.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{CacheStats, MetadataCache, PluginTable};
use crate::error::Result;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const COMMIT_INTERVAL: Duration = Duration::from_secs(30);
const COMMIT_ROWS: usize = 500;
const LOCKED_RETRY_DELAY: Duration = Duration::from_millis(500);

struct Row {
    path: String,
    tag: Vec<u8>,
    data: Vec<u8>,
}

struct State {
    conn: Connection,
    pending: FnvHashMap<String, Vec<Row>>,
    pending_rows: usize,
    last_commit: Instant,
    stats: CacheStats,
}

pub struct SqliteCache {
    path: PathBuf,
    state: Mutex<State>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        log::debug!("opened cache {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(State {
                conn,
                pending: FnvHashMap::default(),
                pending_rows: 0,
                last_commit: Instant::now(),
                stats: CacheStats::default(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pending_rows(&self) -> usize {
        self.state.lock().pending_rows
    }

    /// Deletes rows of files that no longer exist and compacts the database.
    /// Returns the number of deleted rows.
    pub fn clean(&self) -> Result<usize> {
        let mut state = self.state.lock();
        state.commit();

        let tables: Vec<String> = {
            let mut statement = state.conn.prepare(
                "select name from sqlite_master where type = 'table' and name like 'plugin\\_%' escape '\\'",
            )?;
            let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut deleted = 0;
        for table in tables {
            let paths: Vec<String> = {
                let mut statement = state.conn.prepare(&format!("select path from {table}"))?;
                let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            for path in paths.iter().filter(|path| !Path::new(path).exists()) {
                deleted += state
                    .conn
                    .execute(&format!("delete from {table} where path = ?1"), params![path])?;
            }
        }

        state.conn.execute_batch("vacuum")?;
        log::info!("removed {deleted} stale cache rows from {}", self.path.display());
        Ok(deleted)
    }
}

impl State {
    /// Writes all pending rows. A locked database is retried; any other
    /// error drops the rows of the affected table.
    fn commit(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (table, rows) in pending {
            loop {
                match insert_rows(&mut self.conn, &table, &rows) {
                    Ok(()) => break,
                    Err(error) if is_locked(&error) => {
                        log::warn!("cache database is locked, retrying ...");
                        thread::sleep(LOCKED_RETRY_DELAY);
                    }
                    Err(error) => {
                        log::warn!("dropping {} cache rows for {table}: {error}", rows.len());
                        break;
                    }
                }
            }
        }
        self.pending_rows = 0;
        self.last_commit = Instant::now();
    }
}

fn insert_rows(conn: &mut Connection, table: &str, rows: &[Row]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    {
        let mut statement =
            tx.prepare_cached(&format!("insert or replace into {table} values (?1, ?2, ?3)"))?;
        for row in rows {
            statement.execute(params![row.path, row.tag, row.data])?;
        }
    }
    tx.commit()
}

fn is_locked(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

impl MetadataCache for SqliteCache {
    fn register(&self, table: &PluginTable) -> Result<()> {
        let state = self.state.lock();

        let existing: Vec<String> = {
            let mut statement = state
                .conn
                .prepare("select name from sqlite_master where type = 'table' and name like ?1")?;
            let rows = statement
                .query_map(params![format!("{}%", table.prefix())], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        if !existing.iter().any(|name| name == table.name()) {
            state.conn.execute_batch(&format!(
                "create table if not exists {name} \
                 (path text not null primary key, tag blob not null, data blob not null);
                 create index if not exists {name}_idx on {name} (path, tag);",
                name = table.name()
            ))?;
        }

        for stale in existing.iter().filter(|name| table.is_stale(name)) {
            log::debug!("removing old cache table {stale}");
            state.conn.execute_batch(&format!("drop table if exists {stale}"))?;
        }
        Ok(())
    }

    fn get(&self, table: &PluginTable, path: &str, tag: &[u8]) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let found = state
            .conn
            .query_row(
                &format!("select data from {} where path = ?1 and tag = ?2", table.name()),
                params![path, tag],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional();

        match found {
            Ok(Some(data)) => {
                state.stats.hits += 1;
                Some(data)
            }
            Ok(None) => {
                state.stats.misses += 1;
                None
            }
            Err(error) => {
                log::warn!("cache lookup for {path} failed: {error}");
                state.stats.misses += 1;
                None
            }
        }
    }

    fn set(&self, table: &PluginTable, path: &str, tag: Vec<u8>, payload: Vec<u8>) {
        let mut state = self.state.lock();
        state
            .pending
            .entry(table.name().to_string())
            .or_default()
            .push(Row {
                path: path.to_string(),
                tag,
                data: payload,
            });
        state.pending_rows += 1;

        if state.pending_rows >= COMMIT_ROWS || state.last_commit.elapsed() >= COMMIT_INTERVAL {
            log::debug!(
                "commit cache with {} entries after {:.1} seconds",
                state.pending_rows,
                state.last_commit.elapsed().as_secs_f64()
            );
            state.commit();
        }
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.pending_rows > 0 {
            state.commit();
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let pending = self.pending_rows();
        if pending > 0 {
            log::debug!("closing cache with {pending} pending entries");
        }
        self.flush()
    }

    fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::encode_tag;
    use tempfile::TempDir;

    fn open(temp: &TempDir) -> SqliteCache {
        SqliteCache::open(&temp.path().join("cache.db")).unwrap()
    }

    #[test]
    fn hit_requires_matching_tag() {
        let temp = TempDir::new().unwrap();
        let cache = open(&temp);
        let table = PluginTable::new("sha256", 1);
        cache.register(&table).unwrap();

        cache.set(&table, "/a", encode_tag(100).unwrap(), b"digest".to_vec());
        cache.flush().unwrap();

        assert_eq!(
            cache.get(&table, "/a", &encode_tag(100).unwrap()),
            Some(b"digest".to_vec())
        );
        assert_eq!(cache.get(&table, "/a", &encode_tag(101).unwrap()), None);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn writes_are_buffered_until_flush() {
        let temp = TempDir::new().unwrap();
        let cache = open(&temp);
        let table = PluginTable::new("sha256", 1);
        cache.register(&table).unwrap();

        cache.set(&table, "/a", encode_tag(1).unwrap(), vec![1]);
        assert_eq!(cache.pending_rows(), 1);

        let other = open(&temp);
        assert_eq!(other.get(&table, "/a", &encode_tag(1).unwrap()), None);

        cache.close().unwrap();
        assert_eq!(cache.pending_rows(), 0);
        assert_eq!(other.get(&table, "/a", &encode_tag(1).unwrap()), Some(vec![1]));
    }

    #[test]
    fn batches_commit_at_row_limit() {
        let temp = TempDir::new().unwrap();
        let cache = open(&temp);
        let table = PluginTable::new("grep", 1);
        cache.register(&table).unwrap();

        for index in 0..COMMIT_ROWS {
            cache.set(&table, &format!("/f{index}"), encode_tag(0).unwrap(), vec![0]);
        }
        assert_eq!(cache.pending_rows(), 0);
    }

    #[test]
    fn registering_new_schema_drops_old_table() {
        let temp = TempDir::new().unwrap();
        let cache = open(&temp);
        let old = PluginTable::new("sha256", 1);
        cache.register(&old).unwrap();
        cache.set(&old, "/a", encode_tag(1).unwrap(), vec![1]);
        cache.flush().unwrap();

        let new = PluginTable::new("sha256", 2);
        cache.register(&new).unwrap();

        let state = cache.state.lock();
        let count: i64 = state
            .conn
            .query_row(
                "select count(*) from sqlite_master where type = 'table' and name = 'plugin_sha256_1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn clean_removes_missing_paths() {
        let temp = TempDir::new().unwrap();
        let existing = temp.path().join("kept");
        std::fs::write(&existing, b"x").unwrap();

        let cache = open(&temp);
        let table = PluginTable::new("sha256", 1);
        cache.register(&table).unwrap();
        let kept = existing.to_str().unwrap();
        cache.set(&table, kept, encode_tag(1).unwrap(), vec![1]);
        cache.set(&table, "/nonexistent/gone", encode_tag(1).unwrap(), vec![2]);
        cache.flush().unwrap();

        assert_eq!(cache.clean().unwrap(), 1);
        assert_eq!(cache.get(&table, kept, &encode_tag(1).unwrap()), Some(vec![1]));
    }
}
