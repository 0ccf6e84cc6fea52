//! SQLite index file for one repository at one commit.
//!
//! Every index holds a single `meta` row naming the commit it reflects and
//! one `symbols` row per [`SymbolRecord`], with lowercased copies of `name`
//! and `path` for case-insensitive indexed lookups.

mod insert;

use crate::context::Context;
use crate::error::SymbolsError;
use crate::query::{compile_search, SearchArgs};
use crate::symbol::SymbolRecord;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, ToSql};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

/// On-disk layout version, stored in `PRAGMA user_version` and in cache keys.
pub const SCHEMA_VERSION: i32 = 1;

/// Paths per `DELETE ... IN (...)` statement, below SQLite's parameter limit.
pub const PATH_DELETE_BATCH: usize = 1000;

/// VM instructions between cancellation checks while a query runs.
const PROGRESS_OPS: i32 = 1000;

/// Column list matching [`symbol_from_row`].
const SYMBOL_SELECT: &str = "name, path, line, character, kind, language, \
     parent, parent_kind, signature, file_limited";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub symbols: Vec<SymbolRecord>,
    /// More rows matched than were returned
    pub limit_hit: bool,
}

pub struct IndexStore {
    conn: Connection,
    path: PathBuf,
}

impl IndexStore {
    /// Open `path` for writing, creating the file if needed.
    ///
    /// Build connections skip journaling durability: the file is private to
    /// its builder until the cache fsyncs and publishes it.
    pub fn create(path: &Path) -> crate::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = MEMORY;
            PRAGMA synchronous = OFF;
            PRAGMA cache_size = -64000;
            ",
        )?;
        register_regexp(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open a published index for querying.
    pub fn open_read_only(path: &Path) -> crate::Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        register_regexp(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close, surfacing errors a plain drop would swallow.
    pub fn close(self) -> crate::Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }

    pub fn schema_version(&self) -> crate::Result<i32> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    /// The commit this index reflects; `None` when the metadata row is absent.
    pub fn read_commit(&self) -> crate::Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT revision FROM meta WHERE id = 0", [], |row| row.get(0))
            .optional()?)
    }

    /// Run `f` in a transaction, committing on `Ok` and rolling back on `Err`.
    pub fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(&StoreTx<'_>) -> crate::Result<T>,
    ) -> crate::Result<T> {
        let tx = StoreTx {
            tx: self.conn.transaction()?,
            path: &self.path,
        };
        let value = f(&tx)?;
        tx.tx.commit()?;
        Ok(value)
    }

    /// Symbols matching `args`, at most `args.effective_limit()` of them.
    ///
    /// The statement is interrupted once `ctx` ends.
    pub fn search(&self, ctx: &Context, args: &SearchArgs) -> crate::Result<SearchResults> {
        ctx.check()?;
        let condition = compile_search(args)?;
        let (where_sql, values) = condition.to_sql();
        let limit = args.effective_limit();
        let fetch = (limit + 1) as i64;

        let sql = format!("SELECT {SYMBOL_SELECT} FROM symbols WHERE {where_sql} LIMIT ?");
        let mut bind: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        bind.push(&fetch);

        let watched = AssertUnwindSafe(ctx.clone());
        self.conn
            .progress_handler(PROGRESS_OPS, Some(move || watched.is_done()));
        let result = self.query_symbols(&sql, &bind);
        self.conn.progress_handler(0, None::<fn() -> bool>);

        let mut symbols = result.map_err(|e| interrupted_or(ctx, e))?;
        let limit_hit = symbols.len() > limit;
        symbols.truncate(limit);
        Ok(SearchResults { symbols, limit_hit })
    }

    fn query_symbols(&self, sql: &str, bind: &[&dyn ToSql]) -> rusqlite::Result<Vec<SymbolRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(bind, symbol_from_row)?;
        rows.collect()
    }
}

/// Write access to an index within one transaction.
pub struct StoreTx<'a> {
    tx: rusqlite::Transaction<'a>,
    path: &'a Path,
}

impl StoreTx<'_> {
    pub fn create_schema(&self) -> crate::Result<()> {
        self.tx.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS meta (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                revision TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS symbols (
                name TEXT NOT NULL,
                name_lower TEXT NOT NULL,
                path TEXT NOT NULL,
                path_lower TEXT NOT NULL,
                line INTEGER NOT NULL,
                character INTEGER NOT NULL,
                kind TEXT NOT NULL,
                language TEXT NOT NULL,
                parent TEXT NOT NULL,
                parent_kind TEXT NOT NULL,
                signature TEXT NOT NULL,
                file_limited INTEGER NOT NULL
            );

            PRAGMA user_version = {SCHEMA_VERSION};
            "
        ))?;
        Ok(())
    }

    /// Secondary indexes, created after the bulk insert of a fresh build.
    pub fn create_indexes(&self) -> crate::Result<()> {
        self.tx.execute_batch(
            "
            CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
            CREATE INDEX IF NOT EXISTS idx_symbols_path ON symbols(path);
            CREATE INDEX IF NOT EXISTS idx_symbols_name_lower ON symbols(name_lower);
            CREATE INDEX IF NOT EXISTS idx_symbols_path_lower ON symbols(path_lower);
            ",
        )?;
        Ok(())
    }

    /// Insert the metadata row. Fails if one already exists.
    pub fn insert_commit(&self, commit: &str) -> crate::Result<()> {
        self.tx
            .execute("INSERT INTO meta (id, revision) VALUES (0, ?)", params![commit])?;
        Ok(())
    }

    /// Overwrite the metadata row. Fails with `MissingCommit` if there is none.
    pub fn update_commit(&self, commit: &str) -> crate::Result<()> {
        let changed = self
            .tx
            .execute("UPDATE meta SET revision = ? WHERE id = 0", params![commit])?;
        if changed == 0 {
            return Err(SymbolsError::MissingCommit(self.path.to_path_buf()));
        }
        Ok(())
    }

    pub fn read_commit(&self) -> crate::Result<Option<String>> {
        Ok(self
            .tx
            .query_row("SELECT revision FROM meta WHERE id = 0", [], |row| row.get(0))
            .optional()?)
    }

    /// Remove every symbol whose path is in `paths`. Returns rows deleted.
    pub fn delete_paths(&self, paths: &[String]) -> crate::Result<usize> {
        let mut deleted = 0;
        for batch in path_batches(paths) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!("DELETE FROM symbols WHERE path IN ({placeholders})");
            deleted += self.tx.execute(&sql, params_from_iter(batch))?;
        }
        Ok(deleted)
    }

    pub fn count_symbols(&self) -> crate::Result<usize> {
        let count: i64 = self
            .tx
            .query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Split `paths` into statement-sized batches.
pub fn path_batches(paths: &[String]) -> std::slice::Chunks<'_, String> {
    paths.chunks(PATH_DELETE_BATCH)
}

fn symbol_from_row(row: &rusqlite::Row) -> rusqlite::Result<SymbolRecord> {
    Ok(SymbolRecord {
        name: row.get(0)?,
        path: row.get(1)?,
        line: row.get(2)?,
        character: row.get(3)?,
        kind: row.get(4)?,
        language: row.get(5)?,
        parent: row.get(6)?,
        parent_kind: row.get(7)?,
        signature: row.get(8)?,
        file_limited: row.get(9)?,
    })
}

/// Map an interrupted statement to the context error that caused it.
fn interrupted_or(ctx: &Context, err: rusqlite::Error) -> SymbolsError {
    if err.sqlite_error_code() == Some(rusqlite::ErrorCode::OperationInterrupted) {
        if let Some(done) = ctx.err() {
            return done;
        }
    }
    err.into()
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `X REGEXP Y` support. SQLite calls it as `regexp(Y, X)`; the compiled
/// pattern is cached per statement.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let re: std::sync::Arc<regex::Regex> = ctx
                .get_or_create_aux(0, |vr| -> Result<_, BoxError> {
                    Ok(regex::Regex::new(vr.as_str()?)?)
                })?;
            let text = ctx
                .get_raw(1)
                .as_str()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            Ok(re.is_match(text))
        },
    )
}
