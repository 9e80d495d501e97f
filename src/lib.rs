pub mod app;
pub mod auth;
pub mod config;
pub mod errors;
pub mod graph;
pub mod rules;
pub mod storage;
pub mod sync;
pub mod types;
