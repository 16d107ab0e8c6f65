//! Configuration management for Chunkvault Server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::upload::DEFAULT_CHUNK_SIZE;

/// Default upper bound on one chunk request body: the default chunk size plus headroom
pub const DEFAULT_MAX_CHUNK_BYTES: usize = DEFAULT_CHUNK_SIZE + 64 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix for artifact locators; empty yields host-relative paths
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root for `chunks/` and `artifacts/`
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: SessionBackend,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Request body limit for chunk uploads
    pub max_chunk_bytes: usize,
}

/// Invalid configuration value
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                public_url: String::new(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("./data"),
            },
            database: DatabaseConfig {
                backend: SessionBackend::Sqlite,
                url: "sqlite:./chunkvault.db".to_string(),
            },
            upload: UploadConfig {
                max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let backend = match env::var("SESSION_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => SessionBackend::Sqlite,
            "memory" => SessionBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "SESSION_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
                public_url: env::var("PUBLIC_URL").unwrap_or(defaults.server.public_url),
            },
            storage: StorageConfig {
                data_dir: env::var("DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.data_dir),
            },
            database: DatabaseConfig {
                backend,
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            upload: UploadConfig {
                max_chunk_bytes: parse_var("MAX_CHUNK_BYTES", defaults.upload.max_chunk_bytes)?,
            },
        };

        if config.upload.max_chunk_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_CHUNK_BYTES",
                value: "0".to_string(),
            });
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.backend, SessionBackend::Sqlite);
        assert!(config.upload.max_chunk_bytes > DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_parse_var_falls_back_when_unset() {
        let value: u16 = parse_var("CHUNKVAULT_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
