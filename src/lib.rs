pub mod analyzer;
pub mod benchmark;
pub mod candle_utils;
pub mod commands;
pub mod config;
pub mod data_gate;
pub mod equity_curve;
pub mod error;
pub mod forward_returns;
pub mod models;
pub mod orchestrator;
pub mod run_status;
pub mod scorer;
pub mod statistics;
pub mod store;
pub mod summary;
pub mod weight_optimizer;
