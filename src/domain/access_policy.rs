//! Role → table → columns access policy and the per-request scope derived from it.

use super::error::{AppError, Result};
use super::schema::{strip_quotes, SchemaCatalog};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

/// Access a role has to one table. A missing entry means no access at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableAccess {
    All,
    Columns(Vec<String>),
}

impl TableAccess {
    pub fn is_all(&self) -> bool {
        matches!(self, TableAccess::All)
    }

    /// Explicit columns; empty for `All`.
    pub fn columns(&self) -> &[String] {
        match self {
            TableAccess::All => &[],
            TableAccess::Columns(cols) => cols,
        }
    }

    pub fn allows_column(&self, column: &str) -> bool {
        match self {
            TableAccess::All => true,
            TableAccess::Columns(cols) => {
                let column = strip_quotes(column);
                cols.iter().any(|c| c.eq_ignore_ascii_case(column))
            }
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, TableAccess::Columns(cols) if cols.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAccess {
    Text(String),
    List(Vec<String>),
}

impl<'de> Deserialize<'de> for TableAccess {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawAccess::deserialize(deserializer)?;
        Ok(match raw {
            RawAccess::Text(text) if text.trim().eq_ignore_ascii_case("ALL") => TableAccess::All,
            RawAccess::Text(text) => TableAccess::Columns(
                text.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
            ),
            RawAccess::List(cols) => TableAccess::Columns(
                cols.into_iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
            ),
        })
    }
}

impl Serialize for TableAccess {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TableAccess::All => serializer.serialize_str("ALL"),
            TableAccess::Columns(cols) => cols.serialize(serializer),
        }
    }
}

/// Role name → table name → access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleAccessPolicy {
    roles: BTreeMap<String, BTreeMap<String, TableAccess>>,
}

impl RoleAccessPolicy {
    pub fn new(roles: BTreeMap<String, BTreeMap<String, TableAccess>>) -> Self {
        let mut policy = Self { roles };
        policy.drop_empty_entries();
        policy
    }

    /// Parse the JSON policy format. Empty column lists are treated as "no access".
    pub fn from_json(json: &str) -> Result<Self> {
        let mut policy: RoleAccessPolicy = serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid role access policy: {}", e)))?;
        policy.drop_empty_entries();
        Ok(policy)
    }

    fn drop_empty_entries(&mut self) {
        for tables in self.roles.values_mut() {
            tables.retain(|_, access| !access.is_empty());
        }
    }

    pub fn roles(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    fn role_entry(&self, role: &str) -> Option<&BTreeMap<String, TableAccess>> {
        let role = role.trim();
        self.roles
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(role))
            .map(|(_, tables)| tables)
    }

    /// Every table (and explicit column) referenced by the policy must exist in the catalog.
    pub fn validate_against(&self, catalog: &SchemaCatalog) -> Result<()> {
        for (role, tables) in &self.roles {
            for (table, access) in tables {
                let schema = catalog.table(table).ok_or_else(|| {
                    AppError::ConfigError(format!(
                        "Role '{}' references table '{}' which is not in the schema",
                        role, table
                    ))
                })?;
                for column in access.columns() {
                    if schema.column(column).is_none() {
                        return Err(AppError::ConfigError(format!(
                            "Role '{}' references column '{}.{}' which is not in the schema",
                            role, table, column
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve the scope a role may query, in catalog table order.
    pub fn scope_for(&self, role: &str, catalog: &SchemaCatalog) -> Result<AccessScope> {
        let entries = self
            .role_entry(role)
            .ok_or_else(|| AppError::ConfigError(format!("Unknown role '{}'", role)))?;

        let mut scoped = Vec::new();
        for table in catalog.tables() {
            if let Some((_, access)) = entries
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&table.name))
            {
                scoped.push((table.name.clone(), access.clone()));
            }
        }

        Ok(AccessScope::new(role, scoped))
    }
}

/// The allowed tables and columns for one caller, derived from the policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessScope {
    role: String,
    tables: Vec<String>,
    access: HashMap<String, TableAccess>,
}

impl AccessScope {
    pub fn new(role: &str, entries: Vec<(String, TableAccess)>) -> Self {
        let mut tables = Vec::with_capacity(entries.len());
        let mut access = HashMap::with_capacity(entries.len());
        for (table, table_access) in entries {
            access.insert(table.to_lowercase(), table_access);
            tables.push(table);
        }
        Self {
            role: role.to_string(),
            tables,
            access,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn first_table(&self) -> Option<&str> {
        self.tables.first().map(|t| t.as_str())
    }

    /// Exact, case-insensitive resolution of a (possibly quoted) table name.
    pub fn resolve_table(&self, name: &str) -> Option<&str> {
        let name = strip_quotes(name);
        self.tables
            .iter()
            .find(|t| t.eq_ignore_ascii_case(name))
            .map(|t| t.as_str())
    }

    pub fn access(&self, table: &str) -> Option<&TableAccess> {
        self.access.get(&strip_quotes(table).to_lowercase())
    }

    /// Columns the role can see: the explicit list, or every catalog column for `All`.
    pub fn visible_columns(&self, table: &str, catalog: &SchemaCatalog) -> Vec<String> {
        match self.access(table) {
            Some(TableAccess::All) => catalog
                .table(table)
                .map(|t| t.column_names())
                .unwrap_or_default(),
            Some(TableAccess::Columns(cols)) => cols.clone(),
            None => Vec::new(),
        }
    }
}
