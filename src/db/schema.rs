//! Datastore schema types.

use serde::{Deserialize, Serialize};

/// Tables and relationships of a datastore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table with the given name, ignoring case.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Table names, in schema order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Renders the schema for inclusion in a prompt.
    ///
    /// One block per table with `PK`, `NOT NULL`, `DEFAULT` and `FK ->`
    /// annotations, then the relationship list.
    pub fn format_for_llm(&self) -> String {
        let mut out = String::from("Database Schema:\n\n");

        for table in &self.tables {
            out.push_str(&format!("Table: {}\n", table.name));
            for column in &table.columns {
                out.push_str(&self.format_column(table, column));
            }
            out.push('\n');
        }

        if !self.foreign_keys.is_empty() {
            out.push_str("Foreign Keys:\n");
            for fk in &self.foreign_keys {
                out.push_str(&format!(
                    "  - {}.{} -> {}.{}\n",
                    fk.from_table,
                    fk.from_columns.join(", "),
                    fk.to_table,
                    fk.to_columns.join(", ")
                ));
            }
        }

        out
    }

    fn format_column(&self, table: &Table, column: &Column) -> String {
        let mut annotations: Vec<String> = Vec::new();
        if table.primary_key.contains(&column.name) {
            annotations.push("PK".to_string());
        }
        if !column.is_nullable {
            annotations.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            annotations.push(format!("DEFAULT {default}"));
        }
        for fk in self
            .foreign_keys
            .iter()
            .filter(|fk| fk.from_table == table.name && fk.from_columns.contains(&column.name))
        {
            let target = fk.to_columns.first().map(String::as_str).unwrap_or("");
            annotations.push(format!("FK -> {}.{}", fk.to_table, target));
        }

        if annotations.is_empty() {
            format!("  - {}: {}\n", column.name, column.data_type)
        } else {
            format!(
                "  - {}: {} ({})\n",
                column.name,
                column.data_type,
                annotations.join(", ")
            )
        }
    }
}

/// A datastore table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// Column names that form the primary key.
    pub primary_key: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Adds a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key columns.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// A table column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Declared type, e.g. `integer`, `varchar(255)`.
    pub data_type: String,
    pub is_nullable: bool,
    /// Default value expression, if any.
    pub default: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default: None,
        }
    }

    pub fn nullable(self, nullable: bool) -> Self {
        Self {
            is_nullable: nullable,
            ..self
        }
    }

    pub fn with_default(self, default: impl Into<String>) -> Self {
        Self {
            default: Some(default.into()),
            ..self
        }
    }
}

/// A foreign key relationship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_columns: Vec<String>,
    pub to_table: String,
    pub to_columns: Vec<String>,
}

impl ForeignKey {
    pub fn new(
        from_table: impl Into<String>,
        from_columns: Vec<String>,
        to_table: impl Into<String>,
        to_columns: Vec<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_columns,
            to_table: to_table.into(),
            to_columns,
        }
    }
}
