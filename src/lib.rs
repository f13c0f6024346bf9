//! loctrail - per-file lines-of-code timelines from Subversion history
//!
//! Library entry point. The binary in `main.rs` is a thin wrapper around
//! [`cli::run`].

pub mod cache;
pub mod cli;
pub mod config;
pub mod events;
pub mod fetch;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod repository;
