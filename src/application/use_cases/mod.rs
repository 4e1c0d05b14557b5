pub mod access_filter;
pub mod candidate_generator;
pub mod context_retriever;
pub mod embedding_service;
pub mod identifier_matcher;
pub mod prompt_builder;
pub mod query_pipeline;
pub mod response_builder;
pub mod schema_validator;
pub mod sql_extractor;
pub mod sql_sanitizer;
