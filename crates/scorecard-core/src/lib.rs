pub mod aggregate;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod errors;
pub mod model;
pub mod providers;
pub mod registry;
pub mod report;
pub mod storage;
pub mod strategy_api;
