use crate::domain::query_result::QueryResult;

pub const NO_DATA_RESPONSE: &str = "I couldn't find any data matching your query.";

/// Natural-language summary of an executed statement. Only counts are
/// reported; values are never restated.
pub struct ResponseBuilder;

impl ResponseBuilder {
    pub fn summarize(result: &QueryResult) -> String {
        if result.is_empty() {
            return NO_DATA_RESPONSE.to_string();
        }
        format!(
            "I found {} record(s) with {} field(s) based on your query.",
            result.row_count(),
            result.column_count()
        )
    }
}
