//! SQLite record source

use super::{CellValue, Record, Table};
use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, TypeInfo, ValueRef};
use std::str::FromStr;

/// Record source backed by a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    /// Connect to a database URL or file path, creating the file if missing
    pub async fn connect(database: &str) -> Result<Self> {
        let options = if database.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(database)?
        } else {
            SqliteConnectOptions::new().filename(database)
        }
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Names of user tables, sorted
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tables)
    }

    /// Read every row of a table.
    ///
    /// The name must be one of [`list_tables`](Self::list_tables); anything
    /// else is rejected before it reaches SQL.
    pub async fn read_table(&self, name: &str) -> Result<Table> {
        let tables = self.list_tables().await?;
        if !tables.iter().any(|t| t == name) {
            return Err(Error::UnknownTable {
                table: name.to_string(),
            });
        }

        let columns = sqlx::query_scalar::<_, String>(
            "SELECT name FROM pragma_table_info(?1) ORDER BY cid",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let sql = format!("SELECT * FROM {}", quote_identifier(name));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let rows = rows
            .iter()
            .map(|row| record_from_row(row, &columns))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(table = name, rows = rows.len(), "read table");

        Ok(Table {
            name: name.to_string(),
            columns,
            rows,
        })
    }

    /// Create and populate the demo `customers` table if it does not exist
    pub async fn seed_demo(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY,
                first_name TEXT,
                last_name TEXT,
                email TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO customers VALUES
                (1, 'Alice', 'Smith', 'alice@example.com'),
                (2, 'Bob', 'Jones', 'bob@example.com')
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Underlying pool, for callers that manage their own schema
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn record_from_row(row: &SqliteRow, columns: &[String]) -> Result<Record> {
    let mut record = Record::new();
    for (idx, column) in columns.iter().enumerate() {
        record = record.with(column.clone(), cell_at(row, idx)?);
    }
    Ok(record)
}

fn cell_at(row: &SqliteRow, idx: usize) -> Result<CellValue> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(CellValue::Null);
    }

    let type_name = raw.type_info().name().to_ascii_uppercase();
    let cell = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => CellValue::Integer(row.try_get(idx)?),
        "REAL" => CellValue::Real(row.try_get(idx)?),
        "BLOB" => CellValue::Blob(row.try_get(idx)?),
        _ => CellValue::Text(row.try_get(idx)?),
    };
    Ok(cell)
}
