//! SQLite schema synchronization
//!
//! Brings the live schema in line with a batch of [`TableSchema`]s:
//! missing tables are created, missing columns are added to existing tables,
//! and declared indexes are created if absent. Nothing is ever dropped.

use crate::database::schema::{ColumnDef, ColumnType, IndexDef, TableSchema};
use crate::database::sqlite::pool::SqlitePool;
use anyhow::{anyhow, Result};
use rusqlite::Connection;
use tracing::info;

/// Quote an identifier for use in SQL
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Text => "TEXT",
        ColumnType::Blob => "BLOB",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Timestamp => "TIMESTAMP",
    }
}

fn column_sql(column: &ColumnDef, inline_primary_key: bool) -> String {
    let mut sql = format!("{} {}", quote(&column.name), sql_type(column.column_type));
    if inline_primary_key && column.primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

/// `CREATE TABLE` statement for a table
///
/// A single primary key column is declared inline; composite keys become a
/// table constraint.
pub fn create_table_sql(table: &TableSchema) -> String {
    let primary_key = table.primary_key();
    let inline = primary_key.len() == 1;

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_sql(c, inline))
        .collect();

    if primary_key.len() > 1 {
        let cols: Vec<String> = primary_key.iter().map(|c| quote(c)).collect();
        parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&table.name),
        parts.join(", ")
    )
}

/// `ALTER TABLE ... ADD COLUMN` statement, if SQLite can add this column
pub fn add_column_sql(table: &str, column: &ColumnDef) -> Result<String> {
    if column.primary_key || column.unique {
        return Err(anyhow!(
            "Cannot add PRIMARY KEY or UNIQUE column '{}' to existing table '{}'",
            column.name,
            table
        ));
    }
    let null_default = column
        .default
        .as_deref()
        .map_or(true, |d| d.trim().eq_ignore_ascii_case("null"));
    if column.not_null && null_default {
        return Err(anyhow!(
            "Cannot add NOT NULL column '{}' without a default to existing table '{}'",
            column.name,
            table
        ));
    }

    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote(table),
        column_sql(column, false)
    ))
}

/// `CREATE INDEX` statement for an index on `table`
pub fn create_index_sql(table: &str, index: &IndexDef) -> String {
    let cols: Vec<String> = index.columns.iter().map(|c| quote(c)).collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(table),
        cols.join(", ")
    )
}

impl SqlitePool {
    /// Synchronize a batch of tables on one pooled connection
    pub fn sync_tables(&self, tables: &[TableSchema]) -> Result<()> {
        for table in tables {
            table.validate()?;
        }

        let conn = self.get()?;
        for table in tables {
            self.sync_table(&conn, table)?;
        }
        Ok(())
    }

    fn sync_table(&self, conn: &Connection, table: &TableSchema) -> Result<()> {
        let existing = self.columns_on(conn, &table.name)?;

        if existing.is_empty() {
            let sql = create_table_sql(table);
            self.run(conn, &sql)
                .map_err(|e| anyhow!("Failed to create {} table: {}", table.name, e))?;
            info!("Created table {}", table.name);
        } else {
            for column in &table.columns {
                if existing.iter().any(|c| c.eq_ignore_ascii_case(&column.name)) {
                    continue;
                }
                let sql = add_column_sql(&table.name, column)?;
                self.run(conn, &sql).map_err(|e| {
                    anyhow!(
                        "Failed to add column {} to {} table: {}",
                        column.name,
                        table.name,
                        e
                    )
                })?;
                info!("Added column {} to table {}", column.name, table.name);
            }
        }

        for index in &table.indexes {
            let sql = create_index_sql(&table.name, index);
            self.run(conn, &sql)
                .map_err(|e| anyhow!("Failed to create {} index: {}", index.name, e))?;
        }

        Ok(())
    }

    fn run(&self, conn: &Connection, sql: &str) -> rusqlite::Result<usize> {
        self.traced(sql, |n| Some(*n), || conn.execute(sql, []))
    }
}
