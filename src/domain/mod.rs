pub mod access_policy;
pub mod candidate;
pub mod error;
pub mod llm_config;
pub mod query_result;
pub mod schema;
pub mod session;
