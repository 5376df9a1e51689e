pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod rate_gate;
