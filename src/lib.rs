pub mod ai_provider;
pub mod app;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod data_sync;
pub mod error;
pub mod export;
pub mod logging;
pub mod reviewer;
pub mod session;
pub mod similarity;
pub mod workflow;
