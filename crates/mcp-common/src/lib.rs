pub mod embedding;
pub mod error;
pub mod http;
pub mod mcp_api;
pub mod redis;
pub mod rerank;
pub mod vectordb;
