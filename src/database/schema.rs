//! Table definitions
//!
//! A [`TableSchema`] describes one table: its name, ordered columns and
//! indexes. The table name is the identity the manager uses to remember which
//! tables were already synchronized, so two schemas with the same name are the
//! same table as far as migration tracking goes.

use anyhow::{anyhow, Result};
use std::collections::HashSet;

/// Column storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Timestamp,
}

/// A single column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    /// Raw SQL literal used as the column default
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            not_null: false,
            unique: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, sql: impl Into<String>) -> Self {
        self.default = Some(sql.into());
        self
    }
}

/// A secondary index over one or more columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Types that describe the table they are stored in
pub trait Model {
    fn table_schema() -> TableSchema;
}

/// Definition of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Schema of a [`Model`] type
    pub fn of<M: Model>() -> Self {
        M::table_schema()
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up a column by name (case-insensitive, like SQL identifiers)
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Names of the primary key columns, in declaration order
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Check the definition is usable before any DDL runs
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("Table name must not be empty"));
        }
        if self.columns.is_empty() {
            return Err(anyhow!("Table '{}' has no columns", self.name));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(anyhow!("Table '{}' has a column without a name", self.name));
            }
            if !seen.insert(column.name.to_lowercase()) {
                return Err(anyhow!(
                    "Table '{}' declares column '{}' more than once",
                    self.name,
                    column.name
                ));
            }
        }

        for index in &self.indexes {
            if index.name.trim().is_empty() {
                return Err(anyhow!("Table '{}' has an index without a name", self.name));
            }
            if index.columns.is_empty() {
                return Err(anyhow!("Index '{}' has no columns", index.name));
            }
            if let Some(missing) = index.columns.iter().find(|c| self.column(c).is_none()) {
                return Err(anyhow!(
                    "Index '{}' references unknown column '{}' on table '{}'",
                    index.name,
                    missing,
                    self.name
                ));
            }
        }

        Ok(())
    }
}
