//! Configuration for the tempo server
//!
//! Handles data directory configuration with the following precedence:
//! 1. TEMPO_DATA_DIR environment variable
//! 2. ~/.config/tempo/data (production default)
//! 3. ./data (fallback for development)

use std::path::PathBuf;

const DEFAULT_CONFIG_DIR: &str = ".config/tempo/data";
const DEV_DATA_DIR: &str = "./data";
const DEV_TOKEN_SECRET: &str = "tempo-dev-secret";

/// Get the data directory for persistence.
///
/// Priority:
/// 1. TEMPO_DATA_DIR env variable if set
/// 2. $HOME/.config/tempo/data if HOME is set
/// 3. ./data as fallback
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TEMPO_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(DEFAULT_CONFIG_DIR);
    }

    PathBuf::from(DEV_DATA_DIR)
}

/// Get the secret used to sign identity credentials.
///
/// Falls back to a development secret with a warning; production deployments
/// must set TEMPO_TOKEN_SECRET.
pub fn get_token_secret() -> String {
    match std::env::var("TEMPO_TOKEN_SECRET") {
        Ok(secret) if !secret.is_empty() => secret,
        _ => {
            tracing::warn!("TEMPO_TOKEN_SECRET not set, using development secret");
            DEV_TOKEN_SECRET.to_string()
        }
    }
}
