use std::env;
use std::net::SocketAddr;

use crate::error::AppError;
use crate::services::RecordStoreOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Firestore,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub record_store: RecordStoreOptions,
}

impl AppConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn new_from_env() -> Result<Self, AppError> {
        let backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "sqlite" => BackendKind::Sqlite,
            "firestore" => BackendKind::Firestore,
            other => {
                return Err(AppError::Config(format!("unknown STORE_BACKEND {}", other)));
            }
        };

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://classrecord.db?mode=rwc".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("BIND_ADDR: {}", e)))?;

        let seed_examples = match env::var("SEED_EXAMPLES") {
            Ok(value) => parse_flag(&value)
                .ok_or_else(|| AppError::Config(format!("SEED_EXAMPLES: {}", value)))?,
            Err(_) => false,
        };

        let max_write_attempts = match env::var("MAX_WRITE_ATTEMPTS") {
            Ok(value) => value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| AppError::Config(format!("MAX_WRITE_ATTEMPTS: {}", value)))?,
            Err(_) => RecordStoreOptions::default().max_write_attempts,
        };

        Ok(Self {
            backend,
            database_url,
            bind_addr,
            record_store: RecordStoreOptions {
                seed_examples,
                max_write_attempts,
            },
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag(" YES "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
