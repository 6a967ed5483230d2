//! SQL query engine over git repositories.

use std::sync::Arc;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, Params, Row};
use serde_json::{Map, Value};

use crate::config::Options;
use crate::error::{RepoqlError, Result};
use crate::sql::{functions, module};
use crate::tables::{CommitsTable, FilesTable, StatsTable, Table, TableContext};

/// An in-memory SQLite connection with every git table registered as a
/// virtual table.
///
/// Tables read the repository lazily while a statement steps; nothing is
/// copied into SQLite ahead of time.
///
/// # Example
///
/// ```no_run
/// use repoql::{Engine, Options};
///
/// let engine = Engine::new(Options::default().with_default_repository("."))?;
/// let result = engine.execute("SELECT path FROM files WHERE executable = 1")?;
/// println!("{} executables", result.row_count());
/// # Ok::<(), repoql::RepoqlError>(())
/// ```
pub struct Engine {
    conn: Connection,
    context: Arc<TableContext>,
    interrupt: Arc<InterruptHandle>,
}

impl Engine {
    pub fn new(options: Options) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let context = Arc::new(TableContext::new(options));

        let tables: [Arc<dyn Table>; 3] = [
            Arc::new(FilesTable::new(context.clone())),
            Arc::new(CommitsTable::new(context.clone())),
            Arc::new(StatsTable::new(context.clone())),
        ];
        for table in tables {
            tracing::trace!(table = table.name(), "registering virtual table");
            module::register(&conn, table, context.clone())?;
        }
        functions::register(&conn)?;

        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn,
            context,
            interrupt,
        })
    }

    /// The underlying connection, for callers that want typed reads.
    /// Statements prepared here see the same tables and cancellation.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn context(&self) -> &Arc<TableContext> {
        &self.context
    }

    /// A handle that can stop the running query from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            context: self.context.clone(),
            interrupt: self.interrupt.clone(),
        }
    }

    /// Executes a SQL query and returns the results.
    ///
    /// Any error raised while stepping (an unknown repository, a bad
    /// revision, cancellation) fails the whole query.
    pub fn execute(&self, query: &str) -> Result<QueryResult> {
        self.execute_with(query, [])
    }

    /// Like [`execute`](Self::execute), with bound parameters.
    pub fn execute_with<P: Params>(&self, query: &str, params: P) -> Result<QueryResult> {
        self.context.reset_cancellation();
        self.context.clear_failure();
        tracing::debug!(query, "executing query");

        let run = || -> rusqlite::Result<QueryResult> {
            let mut stmt = self.conn.prepare(query)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

            let mut rows = Vec::new();
            let mut cursor = stmt.query(params)?;
            while let Some(row) = cursor.next()? {
                rows.push(row_to_values(row, columns.len())?);
            }
            Ok(QueryResult { columns, rows })
        };

        run().map_err(|e| self.classify(e))
    }

    /// Maps a SQLite error back to what caused it.
    ///
    /// Cancellation surfaces as an interrupt or a module error; both become
    /// [`RepoqlError::Cancelled`]. A table error reaches SQLite as text only,
    /// so the typed error its table recorded is returned in its place.
    pub(crate) fn classify(&self, err: rusqlite::Error) -> RepoqlError {
        if self.context.cancellation().is_cancelled() {
            return RepoqlError::Cancelled;
        }
        let message = match &err {
            rusqlite::Error::SqliteFailure(_, Some(message)) => Some(message.as_str()),
            rusqlite::Error::ModuleError(message) => Some(message.as_str()),
            _ => None,
        };
        match message.and_then(|m| self.context.take_failure(m)) {
            Some(typed) => typed,
            None => RepoqlError::Sql(err),
        }
    }
}

/// Stops the query currently running on an [`Engine`].
///
/// Cancelling fires the query's token, which aborts repository resolution
/// and row production, and interrupts SQLite itself. The next
/// [`Engine::execute`] starts with a fresh token.
#[derive(Clone)]
pub struct CancelHandle {
    context: Arc<TableContext>,
    interrupt: Arc<InterruptHandle>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        tracing::debug!("cancelling query");
        self.context.cancel();
        self.interrupt.interrupt();
    }
}

fn row_to_values(row: &Row, col_count: usize) -> rusqlite::Result<Vec<Value>> {
    (0..col_count)
        .map(|i| {
            Ok(match row.get_ref(i)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(n) => Value::Number(n.into()),
                ValueRef::Real(f) => serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(f.to_string())),
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    Value::String(String::from_utf8_lossy(bytes).into_owned())
                }
            })
        })
        .collect()
}

/// The result of a SQL query execution.
#[derive(Debug)]
pub struct QueryResult {
    /// Column names from the query.
    pub columns: Vec<String>,
    /// Row data as JSON values.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Returns true if the result contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Converts the result to a JSON array of objects.
    ///
    /// Each row becomes a JSON object with column names as keys.
    pub fn to_json_array(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                for (i, col) in self.columns.iter().enumerate() {
                    obj.insert(col.clone(), row.get(i).cloned().unwrap_or(Value::Null));
                }
                Value::Object(obj)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(Options::default()).unwrap()
    }

    #[test]
    fn test_scalar_values_convert_to_json() {
        let result = engine()
            .execute("SELECT 1 AS n, 2.5 AS f, 'x' AS s, NULL AS z, x'6869' AS b")
            .unwrap();
        assert_eq!(result.columns, vec!["n", "f", "s", "z", "b"]);
        assert_eq!(
            result.rows[0],
            vec![
                Value::from(1),
                Value::from(2.5),
                Value::from("x"),
                Value::Null,
                Value::from("hi")
            ]
        );
    }

    #[test]
    fn test_to_json_array_keys_by_column() {
        let result = engine().execute("SELECT 'a' AS first, 2 AS second").unwrap();
        let json = result.to_json_array();
        assert_eq!(json.len(), 1);
        assert_eq!(json[0]["first"], "a");
        assert_eq!(json[0]["second"], 2);
    }

    #[test]
    fn test_tables_are_registered() {
        let engine = engine();
        for table in ["files", "commits", "stats"] {
            let sql = format!("SELECT * FROM {table} WHERE 0");
            assert!(engine.connection().prepare(&sql).is_ok(), "{table} should be declared");
        }
    }

    #[test]
    fn test_hidden_columns_excluded_from_star() {
        let engine = engine();
        let stmt = engine
            .connection()
            .prepare("SELECT * FROM files WHERE 0")
            .unwrap();
        let names: Vec<&str> = stmt.column_names();
        assert_eq!(names, vec!["path", "executable", "contents"]);
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = engine().execute("SELEC 1").unwrap_err();
        assert!(matches!(err, RepoqlError::Sql(_)));
    }

    #[test]
    fn test_non_text_table_argument_is_typed() {
        let err = engine()
            .execute("SELECT path FROM files(x'00')")
            .unwrap_err();
        assert!(
            matches!(
                &err,
                RepoqlError::UnsupportedConstraint { table: "files", column, .. } if column == "repository"
            ),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_cancel_handle_resets_on_next_query() {
        let engine = engine();
        engine.cancel_handle().cancel();
        assert!(engine.context().cancellation().is_cancelled());
        let result = engine.execute("SELECT 1").unwrap();
        assert_eq!(result.row_count(), 1);
    }
}
