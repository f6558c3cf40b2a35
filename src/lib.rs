// This file makes the crate a library and declares modules for use
// by the binary (main.rs) and integration tests.

pub mod alarms;
pub mod config;
pub mod models;
pub mod parser;
pub mod store;
pub mod sync;
