pub mod cache;
pub mod engine;
pub mod entity;
pub mod error;
pub mod matcher;
pub mod parser;
pub mod rewriter;
pub mod table;
