use serde::{Deserialize, Serialize};

/// Tabular result returned by an engine. Rows follow the order of `columns`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render one row as `table: t | col: value | ...` for the row corpus.
    pub fn row_text(&self, table: &str, index: usize) -> Option<String> {
        let row = self.rows.get(index)?;
        let cells: Vec<String> = self
            .columns
            .iter()
            .zip(row.iter())
            .map(|(col, value)| format!("{}: {}", col, display_value(value)))
            .collect();
        Some(format!("table: {} | {}", table, cells.join(" | ")))
    }
}

pub fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_text() {
        let result = QueryResult::new(
            vec!["cust_id".to_string(), "cust_name".to_string(), "phone".to_string()],
            vec![vec![json!(1), json!("Asha"), serde_json::Value::Null]],
        );
        assert_eq!(
            result.row_text("cust_mast", 0).unwrap(),
            "table: cust_mast | cust_id: 1 | cust_name: Asha | phone: NULL"
        );
        assert!(result.row_text("cust_mast", 1).is_none());
    }
}
