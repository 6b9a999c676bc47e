use rusqlite::{Batch, Connection, Statement};
use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};
use tracing::{debug, error, trace};

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use crate::rows::{Row, RowCursor};

static GLOBAL: OnceLock<SqliteConnector> = OnceLock::new();

/// Runs one SQL statement per call, each on a fresh connection that is closed
/// before the call returns.
#[derive(Debug)]
pub struct SqliteConnector {
    config: ConnectorConfig,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl SqliteConnector {
    /// Create a new connector for the given config. Nothing is opened until the first call.
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    /// The process-wide connector, built from [`ConnectorConfig::default`] on first use.
    pub fn global() -> &'static SqliteConnector {
        GLOBAL.get_or_init(|| SqliteConnector::new(ConnectorConfig::default()))
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Connections opened by this connector that have not been handed back to [`close`](Self::close).
    pub fn open_connections(&self) -> usize {
        let closed = self.closed.load(Ordering::Acquire);
        self.opened.load(Ordering::Acquire).saturating_sub(closed)
    }

    /// Run a statement that does not return rows (DDL, INSERT, UPDATE, DELETE).
    ///
    /// Returns the number of rows changed. A statement that produces rows, or
    /// text holding more than one statement, is rejected before anything runs.
    pub fn execute_statement(&self, sql: &str) -> Result<usize> {
        let conn = self.open()?;
        let outcome = run_statement(&conn, sql);
        self.finish(conn, sql, outcome)
    }

    /// Run a row-returning statement and collect its rows.
    ///
    /// All rows are read before the connection closes, so the cursor stays
    /// usable for as long as the caller holds it.
    pub fn execute_query(&self, sql: &str) -> Result<RowCursor> {
        let conn = self.open()?;
        let mut rows = Vec::new();
        let outcome = visit_rows(&conn, sql, |row| {
            rows.push(row);
            ControlFlow::Continue(())
        });
        let columns = self.finish(conn, sql, outcome)?;
        Ok(RowCursor::new(columns, rows))
    }

    /// Stream the rows of a query into `visit` without collecting them.
    ///
    /// The connection stays open while `visit` runs and is closed once it
    /// returns `ControlFlow::Break` or the rows run out. Returns how many
    /// rows were visited.
    pub fn query_each<F>(&self, sql: &str, mut visit: F) -> Result<usize>
    where
        F: FnMut(Row) -> ControlFlow<()>,
    {
        let conn = self.open()?;
        let mut visited = 0;
        let outcome = visit_rows(&conn, sql, |row| {
            visited += 1;
            visit(row)
        });
        self.finish(conn, sql, outcome)?;
        Ok(visited)
    }

    /// Open a new connection to the configured database.
    ///
    /// Every connection returned here must be given back to [`close`](Self::close).
    pub fn open(&self) -> Result<Connection> {
        let path = self.config.db_path();
        let conn = Connection::open_with_flags(&path, self.config.open_flags())
            .and_then(|conn| {
                conn.busy_timeout(self.config.busy_timeout())?;
                Ok(conn)
            })
            .map_err(|source| {
                error!(path = %path.display(), error = %source, "failed to open sqlite database");
                ConnectorError::Open {
                    path: path.display().to_string(),
                    source,
                }
            })?;

        self.opened.fetch_add(1, Ordering::AcqRel);
        trace!(path = %path.display(), "opened sqlite connection");
        Ok(conn)
    }

    /// Close a connection. The handle is released whether or not SQLite reports
    /// a problem while closing it.
    pub fn close(&self, conn: Connection) -> Result<()> {
        let result = conn.close();
        self.closed.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(()) => {
                trace!(path = %self.config.url.filename(), "closed sqlite connection");
                Ok(())
            }
            Err((_conn, source)) => {
                error!(path = %self.config.url.filename(), error = %source, "failed to close sqlite connection");
                Err(ConnectorError::Close {
                    path: self.config.url.filename().to_string(),
                    source,
                })
            }
        }
    }

    fn finish<T>(&self, conn: Connection, sql: &str, outcome: Result<T>) -> Result<T> {
        let closed = self.close(conn);
        settle(sql, outcome, closed)
    }
}

// The statement's failure wins over a close failure; `close` has already logged the latter.
fn settle<T>(sql: &str, outcome: Result<T>, closed: Result<()>) -> Result<T> {
    match outcome {
        Ok(value) => {
            closed?;
            debug!(sql, "statement executed");
            Ok(value)
        }
        Err(err) => {
            error!(sql, error = %err, "statement rejected");
            Err(err)
        }
    }
}

fn rejected(sql: &str) -> impl Fn(rusqlite::Error) -> ConnectorError + '_ {
    move |source| ConnectorError::Execute {
        sql: sql.to_string(),
        source,
    }
}

// Prepares the one statement in `sql`. Blank text and trailing statements are
// rejected; only preparing, never stepping, happens here.
fn prepare_single<'conn>(conn: &'conn Connection, sql: &str) -> Result<Statement<'conn>> {
    let mut batch = Batch::new(conn, sql);
    let stmt = batch
        .next()
        .map_err(rejected(sql))?
        .ok_or(ConnectorError::EmptyStatement)?;

    match batch.next() {
        Ok(None) => Ok(stmt),
        Ok(Some(_)) | Err(_) => Err(ConnectorError::MultipleStatements {
            sql: sql.to_string(),
        }),
    }
}

fn run_statement(conn: &Connection, sql: &str) -> Result<usize> {
    let mut stmt = prepare_single(conn, sql)?;
    if stmt.column_count() > 0 {
        return Err(ConnectorError::ReturnsRows {
            sql: sql.to_string(),
        });
    }
    stmt.execute([]).map_err(rejected(sql))
}

// Runs `sql` on `conn`, handing each row to `visit`. Returns the statement's column names.
fn visit_rows<F>(conn: &Connection, sql: &str, mut visit: F) -> Result<Arc<[String]>>
where
    F: FnMut(Row) -> ControlFlow<()>,
{
    let reject = rejected(sql);

    let mut stmt = prepare_single(conn, sql)?;
    if stmt.column_count() == 0 {
        return Err(ConnectorError::NotAQuery {
            sql: sql.to_string(),
        });
    }

    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = stmt.query([]).map_err(&reject)?;
    while let Some(row) = rows.next().map_err(&reject)? {
        let row = Row::from_sqlite(&columns, row).map_err(&reject)?;
        if visit(row).is_break() {
            break;
        }
    }

    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn connector_is_shareable_across_threads() {
        assert_send_sync::<SqliteConnector>();
    }

    #[test]
    fn global_is_identity_stable() {
        let first = SqliteConnector::global();
        let second = SqliteConnector::global();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.config(), &ConnectorConfig::default());
    }

    #[test]
    fn memory_database_does_not_outlive_its_call() {
        let connector = SqliteConnector::new(ConnectorConfig::in_memory());
        connector
            .execute_statement("CREATE TABLE t (id INTEGER);")
            .unwrap();

        // a fresh connection sees a fresh in-memory database
        let err = connector.execute_query("SELECT * FROM t;").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execute);
        assert_eq!(connector.open_connections(), 0);
    }

    #[test]
    fn non_query_statements_are_rejected_by_execute_query() {
        let connector = SqliteConnector::new(ConnectorConfig::in_memory());
        let err = connector
            .execute_query("CREATE TABLE t (id INTEGER);")
            .unwrap_err();
        assert!(matches!(err, ConnectorError::NotAQuery { .. }));
    }

    #[test]
    fn queries_are_rejected_by_execute_statement() {
        let connector = SqliteConnector::new(ConnectorConfig::in_memory());
        let err = connector.execute_statement("SELECT 1;").unwrap_err();
        assert!(matches!(err, ConnectorError::ReturnsRows { .. }));
        assert_eq!(err.kind(), ErrorKind::Execute);
        assert_eq!(err.sql(), Some("SELECT 1;"));
    }

    #[test]
    fn blank_text_is_an_empty_statement() {
        let connector = SqliteConnector::new(ConnectorConfig::in_memory());
        for blank in ["", "   \n\t", "-- nothing here\n"] {
            let err = connector.execute_statement(blank).unwrap_err();
            assert!(matches!(err, ConnectorError::EmptyStatement), "{blank:?}: {err}");
            let err = connector.execute_query(blank).unwrap_err();
            assert!(matches!(err, ConnectorError::EmptyStatement), "{blank:?}: {err}");
        }
        assert_eq!(connector.open_connections(), 0);
    }

    #[test]
    fn trailing_statements_are_refused() {
        let connector = SqliteConnector::new(ConnectorConfig::in_memory());
        let err = connector
            .execute_statement("CREATE TABLE a (x); CREATE TABLE b (y);")
            .unwrap_err();
        assert!(matches!(err, ConnectorError::MultipleStatements { .. }));

        let err = connector.execute_query("SELECT 1; SELECT 2;").unwrap_err();
        assert!(matches!(err, ConnectorError::MultipleStatements { .. }));

        // a trailing comment is not a statement
        assert_eq!(connector.execute_statement("CREATE TABLE a (x); -- done").unwrap(), 0);
    }

    fn close_failure() -> ConnectorError {
        ConnectorError::Close {
            path: "test.sqlite".to_string(),
            source: rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                Some("unable to close due to unfinalized statements".to_string()),
            ),
        }
    }

    #[test]
    fn statement_failure_wins_over_close_failure() {
        let statement_failure = ConnectorError::NotAQuery {
            sql: "DELETE FROM t;".to_string(),
        };
        let err = settle::<usize>("DELETE FROM t;", Err(statement_failure), Err(close_failure())).unwrap_err();
        assert!(matches!(err, ConnectorError::NotAQuery { .. }));
    }

    #[test]
    fn close_failure_surfaces_after_a_successful_statement() {
        let err = settle("DELETE FROM t;", Ok(3usize), Err(close_failure())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Close);
        assert!(err.to_string().contains("test.sqlite"), "{err}");

        assert_eq!(settle("DELETE FROM t;", Ok(3usize), Ok(())).unwrap(), 3);
    }

    #[test]
    fn finish_closes_the_connection_when_the_statement_failed() {
        let connector = SqliteConnector::new(ConnectorConfig::in_memory());
        let conn = connector.open().unwrap();
        let outcome: Result<usize> = Err(ConnectorError::EmptyStatement);

        let err = connector.finish(conn, "", outcome).unwrap_err();
        assert!(matches!(err, ConnectorError::EmptyStatement));
        assert_eq!(connector.open_connections(), 0);
    }

    #[test]
    fn open_and_close_are_counted() {
        let connector = SqliteConnector::new(ConnectorConfig::in_memory());
        let conn = connector.open().unwrap();
        assert_eq!(connector.open_connections(), 1);
        connector.close(conn).unwrap();
        assert_eq!(connector.open_connections(), 0);
    }

    #[test]
    fn query_each_stops_on_break() {
        let connector = SqliteConnector::new(ConnectorConfig::in_memory());
        let mut seen = Vec::new();
        let visited = connector
            .query_each(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 100) SELECT x FROM n;",
                |row| {
                    seen.push(row.get(0).and_then(|v| v.as_i64()).unwrap_or_default());
                    if seen.len() == 3 {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                },
            )
            .unwrap();

        assert_eq!(visited, 3);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(connector.open_connections(), 0);
    }
}
