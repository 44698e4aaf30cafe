//! Multi-row insert batching.
//!
//! A [`BulkInserter`] buffers positional rows for one target table and
//! hands back an [`InsertBatch`] whenever the buffer fills. The batch
//! renders a single parameterized `INSERT ... VALUES (...), (...) ON
//! CONFLICT DO NOTHING` statement, so re-running an import against the
//! same version id is idempotent. All batches of one import execute
//! inside the same enclosing transaction.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Postgres, Transaction};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// A value in the store's native type system. Rows are passed to the
/// inserter as positional tuples of these, decoupling the insert path
/// from the source-record field types.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    NullableText(Option<String>),
    Int(i32),
    NullableInt(Option<i32>),
    BigInt(i64),
    NullableBigInt(Option<i64>),
    SmallInt(i16),
    Double(f64),
    NullableDouble(Option<f64>),
    Bool(bool),
    NullableBool(Option<bool>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    NullableTimestamp(Option<DateTime<Utc>>),
}

impl SqlValue {
    fn bind_to<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::NullableText(v) => query.bind(v),
            SqlValue::Int(v) => query.bind(v),
            SqlValue::NullableInt(v) => query.bind(v),
            SqlValue::BigInt(v) => query.bind(v),
            SqlValue::NullableBigInt(v) => query.bind(v),
            SqlValue::SmallInt(v) => query.bind(v),
            SqlValue::Double(v) => query.bind(v),
            SqlValue::NullableDouble(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::NullableBool(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::Timestamp(v) => query.bind(v),
            SqlValue::NullableTimestamp(v) => query.bind(v),
        }
    }
}

/// Buffers rows for one (table, column order) pair.
pub struct BulkInserter {
    table: &'static str,
    columns: &'static [&'static str],
    batch_size: usize,
    rows: Vec<Vec<SqlValue>>,
    total_rows: u64,
}

impl BulkInserter {
    pub fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self::with_batch_size(table, columns, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(
        table: &'static str,
        columns: &'static [&'static str],
        batch_size: usize,
    ) -> Self {
        debug_assert!(batch_size > 0);
        Self {
            table,
            columns,
            batch_size,
            rows: Vec::with_capacity(batch_size),
            total_rows: 0,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Rows pushed over the inserter's lifetime, drained or not.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Append one row. Returns a full batch once `batch_size` rows have
    /// accumulated; the caller executes it against its transaction.
    pub fn push(&mut self, row: Vec<SqlValue>) -> Option<InsertBatch> {
        debug_assert_eq!(row.len(), self.columns.len(), "{}: column arity", self.table);
        self.rows.push(row);
        self.total_rows += 1;
        if self.rows.len() >= self.batch_size {
            self.drain()
        } else {
            None
        }
    }

    /// Take whatever is buffered, if anything.
    pub fn drain(&mut self) -> Option<InsertBatch> {
        if self.rows.is_empty() {
            return None;
        }
        Some(InsertBatch {
            table: self.table,
            columns: self.columns,
            rows: std::mem::take(&mut self.rows),
        })
    }
}

/// One renderable, executable chunk of rows.
#[derive(Debug, PartialEq)]
pub struct InsertBatch {
    table: &'static str,
    columns: &'static [&'static str],
    rows: Vec<Vec<SqlValue>>,
}

impl InsertBatch {
    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render the multi-row insert statement with positional placeholders.
    pub fn sql(&self) -> String {
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.table,
            self.columns.join(", ")
        );
        let width = self.columns.len();
        for row_idx in 0..self.rows.len() {
            if row_idx > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for col_idx in 0..width {
                if col_idx > 0 {
                    sql.push_str(", ");
                }
                sql.push('$');
                sql.push_str(&(row_idx * width + col_idx + 1).to_string());
            }
            sql.push(')');
        }
        sql.push_str(" ON CONFLICT DO NOTHING");
        sql
    }

    /// Execute within the caller's transaction; returns rows inserted.
    pub async fn execute(self, tx: &mut Transaction<'_, Postgres>) -> Result<u64, sqlx::Error> {
        let sql = self.sql();
        let mut query = sqlx::query(&sql);
        for row in self.rows {
            for value in row {
                query = value.bind_to(query);
            }
        }
        let done = query.execute(&mut **tx).await?;
        Ok(done.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[&str] = &["stop_id", "source_id", "version_id"];

    fn row(id: &str) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(id.to_string()),
            SqlValue::Int(2),
            SqlValue::BigInt(7),
        ]
    }

    #[test]
    fn batch_sql_numbers_placeholders_row_major() {
        let mut inserter = BulkInserter::new("gtfs.stops", COLUMNS);
        inserter.push(row("a"));
        inserter.push(row("b"));
        let batch = inserter.drain().unwrap();
        assert_eq!(
            batch.sql(),
            "INSERT INTO gtfs.stops (stop_id, source_id, version_id) \
             VALUES ($1, $2, $3), ($4, $5, $6) ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn push_returns_batch_exactly_at_capacity() {
        let mut inserter = BulkInserter::with_batch_size("gtfs.stops", COLUMNS, 3);
        assert!(inserter.push(row("a")).is_none());
        assert!(inserter.push(row("b")).is_none());
        let batch = inserter.push(row("c")).expect("third push fills the batch");
        assert_eq!(batch.len(), 3);
        // Buffer restarts empty after an auto-drain.
        assert!(inserter.push(row("d")).is_none());
        assert_eq!(inserter.drain().unwrap().len(), 1);
    }

    #[test]
    fn drain_on_empty_inserter_is_none() {
        let mut inserter = BulkInserter::new("gtfs.stops", COLUMNS);
        assert!(inserter.drain().is_none());
        inserter.push(row("a"));
        assert!(inserter.drain().is_some());
        assert!(inserter.drain().is_none());
    }

    #[test]
    fn total_rows_survives_draining() {
        let mut inserter = BulkInserter::with_batch_size("gtfs.stops", COLUMNS, 2);
        inserter.push(row("a"));
        inserter.push(row("b"));
        inserter.push(row("c"));
        inserter.drain();
        assert_eq!(inserter.total_rows(), 3);
    }

    #[test]
    fn single_row_sql() {
        let mut inserter = BulkInserter::new("gtfs_rt.alerts", &["alert_id", "cause"]);
        inserter.push(vec![SqlValue::BigInt(1), SqlValue::NullableInt(None)]);
        let batch = inserter.drain().unwrap();
        assert_eq!(
            batch.sql(),
            "INSERT INTO gtfs_rt.alerts (alert_id, cause) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        );
    }
}
