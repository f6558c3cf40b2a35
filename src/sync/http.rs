// src/sync/http.rs

// This module handles HTTP client creation for downloading the schedule

use anyhow::{Context, Result};

use super::types::SyncConfig;

// Helper to create a client (called once per sync manager)
pub fn create_http_client(config: &SyncConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .https_only(config.https_only);
    if let Some(timeout) = config.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(timeout) = config.request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("Failed to build HTTP client")
}
