//! Read-only snapshot of the live database schema.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub target_table: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            columns: columns
                .iter()
                .map(|c| ColumnInfo {
                    name: c.to_string(),
                    description: None,
                })
                .collect(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// One row of the data dictionary: human descriptions for a table/column pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub table_description: Option<String>,
    #[serde(default)]
    pub column_description: Option<String>,
}

/// Table name → ordered columns, with optional descriptions and foreign keys.
///
/// Tables keep the order in which they were introspected; lookups are
/// case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    tables: Vec<TableSchema>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        let name = strip_quotes(name);
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Merge data-dictionary descriptions into the snapshot. Entries naming
    /// unknown tables or columns are ignored.
    pub fn apply_dictionary(&mut self, entries: &[DictionaryEntry]) {
        for entry in entries {
            let Some(table) = self
                .tables
                .iter_mut()
                .find(|t| t.name.eq_ignore_ascii_case(&entry.table))
            else {
                continue;
            };

            if table.description.is_none() {
                if let Some(desc) = entry.table_description.as_ref().filter(|d| !d.is_empty()) {
                    table.description = Some(desc.clone());
                }
            }

            if let Some(column) = table
                .columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(&entry.column))
            {
                if let Some(desc) = entry.column_description.as_ref().filter(|d| !d.is_empty()) {
                    column.description = Some(desc.clone());
                }
            }
        }
    }
}

/// Strip the identifier quoting used by SQLite/MySQL (backticks, double quotes).
pub fn strip_quotes(identifier: &str) -> &str {
    identifier.trim().trim_matches(|c| c == '`' || c == '"')
}
