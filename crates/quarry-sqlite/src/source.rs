//! SQLite data source.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use quarry_core::catalog::{ColumnDef, TableDef};
use quarry_core::{BoxError, Catalog, DataSource, QueryPlan};
use quarry_proto::Row;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::{debug, trace};

use crate::error::Error;
use crate::sql::{compile_count, compile_query, from_sql_value, quote_ident, to_sql_value, CompiledQuery};

/// Connection settings.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file; `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// How long to wait on a locked database.
    pub busy_timeout: Duration,
    /// Prepared statements kept per connection.
    pub statement_cache: usize,
    /// Open read-only. The file must already exist.
    pub read_only: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
            statement_cache: 64,
            read_only: false,
        }
    }
}

impl SqliteConfig {
    /// Configuration for an in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration for a database file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the prepared statement cache capacity.
    pub fn with_statement_cache(mut self, capacity: usize) -> Self {
        self.statement_cache = capacity;
        self
    }

    /// Open read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Runs plans on a single SQLite connection.
///
/// Calls are serialized on the connection; a collection shared between
/// threads only ever issues one statement at a time here.
pub struct SqliteSource {
    conn: Mutex<Connection>,
}

impl SqliteSource {
    /// Open a database.
    pub fn open(config: SqliteConfig) -> Result<Self, Error> {
        let conn = match &config.path {
            Some(path) if config.read_only => {
                Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?
            }
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(config.busy_timeout)?;
        conn.set_prepared_statement_cache_capacity(config.statement_cache);
        debug!(path = ?config.path, read_only = config.read_only, "opened sqlite source");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, Error> {
        Self::open(SqliteConfig::in_memory())
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run one or more statements, typically schema setup.
    pub fn execute_batch(&self, sql: &str) -> Result<(), Error> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Create a table whose columns carry no declared type.
    ///
    /// Untyped columns store values exactly as bound and compare them
    /// without affinity conversions.
    pub fn create_table(&self, table: &str, columns: &[&str]) -> Result<(), Error> {
        if columns.is_empty() {
            return Err(Error::InvalidRow {
                table: table.to_string(),
                reason: "a table needs at least one column".to_string(),
            });
        }
        let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            columns.join(", ")
        );
        self.execute_batch(&sql)
    }

    /// Insert one row.
    pub fn insert(&self, table: &str, row: Row) -> Result<(), Error> {
        self.insert_many(table, [row]).map(|_| ())
    }

    /// Insert rows in one transaction. Columns absent from a row are NULL.
    pub fn insert_many(&self, table: &str, rows: impl IntoIterator<Item = Row>) -> Result<usize, Error> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut count = 0;
        for row in rows {
            if row.is_empty() {
                return Err(Error::InvalidRow {
                    table: table.to_string(),
                    reason: "row has no columns".to_string(),
                });
            }
            let names: Vec<String> = row.names().map(quote_ident).collect();
            let placeholders = vec!["?"; names.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                names.join(", "),
                placeholders
            );
            let values: Vec<_> = row.iter().map(|(_, v)| to_sql_value(v)).collect();
            tx.prepare_cached(&sql)?.execute(params_from_iter(values.iter()))?;
            count += 1;
        }
        tx.commit()?;
        trace!(table, rows = count, "inserted rows");
        Ok(count)
    }

    /// Number of rows in a table.
    pub fn table_len(&self, table: &str) -> Result<u64, Error> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self.conn.lock().query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Read the schema into a catalog.
    ///
    /// A table gets an identity when its primary key is a single column.
    pub fn read_catalog(&self) -> Result<Catalog, Error> {
        let conn = self.conn.lock();
        let mut names_stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = names_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut catalog = Catalog::new();
        for name in names {
            let mut def = TableDef::new(name.clone());
            let mut keys = Vec::new();
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&name)))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let column: String = row.get("name")?;
                let not_null: i64 = row.get("notnull")?;
                let pk: i64 = row.get("pk")?;
                if pk > 0 {
                    keys.push(column.clone());
                }
                def.add_column(if not_null != 0 {
                    ColumnDef::new(column)
                } else {
                    ColumnDef::nullable(column)
                });
            }
            if let [key] = keys.as_slice() {
                def = def.with_identity(key.clone());
            }
            catalog.register(def);
        }
        Ok(catalog)
    }

    fn fetch(&self, compiled: &CompiledQuery) -> Result<Vec<Row>, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&compiled.sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(params_from_iter(compiled.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                record.set(name.clone(), from_sql_value(row.get_ref(i)?));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn fetch_count(&self, compiled: &CompiledQuery) -> Result<u64, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&compiled.sql)?;
        let count: i64 = stmt.query_row(params_from_iter(compiled.params.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl std::fmt::Debug for SqliteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSource").finish_non_exhaustive()
    }
}

impl DataSource for SqliteSource {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn run_query(&self, plan: &QueryPlan) -> Result<Vec<Row>, BoxError> {
        let compiled = compile_query(plan)?;
        debug!(sql = %compiled.sql, params = compiled.params.len(), "running sqlite query");
        let rows = self.fetch(&compiled)?;
        trace!(rows = rows.len(), "sqlite query returned");
        Ok(rows)
    }

    fn run_count(&self, plan: &QueryPlan) -> Result<u64, BoxError> {
        let compiled = compile_count(plan)?;
        debug!(sql = %compiled.sql, params = compiled.params.len(), "running sqlite count");
        Ok(self.fetch_count(&compiled)?)
    }

    fn catalog(&self) -> Result<Option<Catalog>, BoxError> {
        Ok(Some(self.read_catalog()?))
    }
}
