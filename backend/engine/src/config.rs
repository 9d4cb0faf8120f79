//! Application configuration loaded from environment variables.

use crate::errors::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Shared secret for client checkout confirmations (HMAC over
    /// `orderId|paymentId`)
    pub checkout_secret: String,
    /// Distinct shared secret for gateway webhook payloads (HMAC over the
    /// raw request body)
    pub webhook_secret: String,
    /// Invoice number prefix used when a user has not configured one
    pub invoice_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./collab_engine.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid API_PORT".to_string()))?,
            checkout_secret: env_var("CHECKOUT_SECRET").map_err(|_| {
                EngineError::Config("CHECKOUT_SECRET environment variable is required".to_string())
            })?,
            webhook_secret: env_var("WEBHOOK_SECRET").map_err(|_| {
                EngineError::Config("WEBHOOK_SECRET environment variable is required".to_string())
            })?,
            invoice_prefix: env_var("INVOICE_PREFIX").unwrap_or_else(|_| "INV".to_string()),
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| EngineError::Config(format!("Missing env var: {key}")))
}
