use clap::Parser;
use ipnet::IpNet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8080";
const DEFAULT_DELETION_WORKERS: usize = 4;
const DEFAULT_DELETION_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no storage selected: set FILE_STORAGE_PATH, DATABASE_DSN or MEMORY_STORAGE")]
    BackendNotSelected,
    #[error("FILE_STORAGE_PATH and DATABASE_DSN are mutually exclusive")]
    ConflictingBackends,
    #[error("invalid {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("failed to read config file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

/// Command-line flags; every flag can also come from the environment
#[derive(Debug, Default, Parser)]
#[command(name = "snip", about = "URL shortening service", long_about = None)]
pub struct Cli {
    /// Address the HTTP server binds to
    #[arg(short = 'a', long, env = "SERVER_ADDRESS")]
    pub server_address: Option<String>,

    /// Public base URL short links are built from
    #[arg(short = 'b', long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Creation log of the in-memory store
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<PathBuf>,

    /// PostgreSQL connection string
    #[arg(short = 'd', long, env = "DATABASE_DSN", hide_env_values = true)]
    pub database_dsn: Option<String>,

    /// Keep links in memory only, without persistence
    #[arg(long, env = "MEMORY_STORAGE")]
    pub memory: bool,

    /// CIDR allowed to read internal stats
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// Secret signing user cookies
    #[arg(long, env = "AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    #[arg(long, env = "DELETION_WORKERS")]
    pub deletion_workers: Option<usize>,

    #[arg(long, env = "DELETION_QUEUE_CAPACITY")]
    pub deletion_queue_capacity: Option<usize>,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: Option<u32>,

    /// JSON file with defaults for any of the above
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config_file: Option<PathBuf>,
}

/// Lowest-priority settings read from `--config`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server_address: Option<String>,
    base_url: Option<String>,
    file_storage_path: Option<PathBuf>,
    database_dsn: Option<String>,
    memory: Option<bool>,
    trusted_subnet: Option<String>,
    auth_secret: Option<String>,
    deletion_workers: Option<usize>,
    deletion_queue_capacity: Option<usize>,
    database_max_connections: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory { file_path: Option<PathBuf> },
    Postgres { dsn: String, max_connections: u32 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub base_url: String,
    pub storage: StorageBackend,
    pub trusted_subnet: Option<IpNet>,
    /// `None` means a random per-process secret
    pub auth_secret: Option<String>,
    pub deletion_workers: usize,
    pub deletion_queue_capacity: usize,
}

impl Config {
    /// Parse flags and environment (including `.env`) into a validated config
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config_file {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };

        let server_address = non_empty(cli.server_address)
            .or(file.server_address)
            .unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.to_string());

        let base_url = non_empty(cli.base_url)
            .or(file.base_url)
            .unwrap_or_else(|| format!("http://{server_address}"))
            .trim_end_matches('/')
            .to_string();

        let file_path = cli
            .file_storage_path
            .filter(|p| !p.as_os_str().is_empty())
            .or(file.file_storage_path);
        let dsn = non_empty(cli.database_dsn).or(file.database_dsn);
        let memory = cli.memory || file.memory.unwrap_or(false);
        let max_connections = cli
            .database_max_connections
            .or(file.database_max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let storage = match (file_path, dsn) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingBackends),
            (Some(path), None) => StorageBackend::Memory {
                file_path: Some(path),
            },
            (None, Some(dsn)) if !memory => StorageBackend::Postgres {
                dsn,
                max_connections,
            },
            (None, Some(_)) => return Err(ConfigError::ConflictingBackends),
            (None, None) if memory => StorageBackend::Memory { file_path: None },
            (None, None) => return Err(ConfigError::BackendNotSelected),
        };

        let trusted_subnet = non_empty(cli.trusted_subnet)
            .or(file.trusted_subnet)
            .map(|cidr| {
                cidr.parse::<IpNet>()
                    .map_err(|e| ConfigError::InvalidValue {
                        field: "trusted subnet",
                        message: format!("'{cidr}': {e}"),
                    })
            })
            .transpose()?;

        let deletion_workers = cli
            .deletion_workers
            .or(file.deletion_workers)
            .unwrap_or(DEFAULT_DELETION_WORKERS);
        if deletion_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "deletion workers",
                message: "must be at least 1".to_string(),
            });
        }

        let deletion_queue_capacity = cli
            .deletion_queue_capacity
            .or(file.deletion_queue_capacity)
            .unwrap_or(DEFAULT_DELETION_QUEUE_CAPACITY);
        if deletion_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "deletion queue capacity",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Config {
            server_address,
            base_url,
            storage,
            trusted_subnet,
            auth_secret: non_empty(cli.auth_secret).or(file.auth_secret),
            deletion_workers,
            deletion_queue_capacity,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::Unreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_path_selects_memory_backend() {
        let config = Config::from_cli(Cli {
            file_storage_path: Some(PathBuf::from("/tmp/urls.json")),
            ..Cli::default()
        })
        .unwrap();

        assert_eq!(
            config.storage,
            StorageBackend::Memory {
                file_path: Some(PathBuf::from("/tmp/urls.json"))
            }
        );
        assert_eq!(config.server_address, DEFAULT_SERVER_ADDRESS);
        assert_eq!(config.base_url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_dsn_selects_postgres_backend() {
        let config = Config::from_cli(Cli {
            database_dsn: Some("postgres://localhost/snip".into()),
            ..Cli::default()
        })
        .unwrap();

        assert!(matches!(
            config.storage,
            StorageBackend::Postgres { ref dsn, max_connections: DEFAULT_MAX_CONNECTIONS }
                if dsn == "postgres://localhost/snip"
        ));
    }

    #[test]
    fn test_both_backends_is_an_error() {
        let err = Config::from_cli(Cli {
            file_storage_path: Some(PathBuf::from("/tmp/urls.json")),
            database_dsn: Some("postgres://localhost/snip".into()),
            ..Cli::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingBackends));
    }

    #[test]
    fn test_no_backend_is_an_error() {
        let err = Config::from_cli(Cli::default()).unwrap_err();
        assert!(matches!(err, ConfigError::BackendNotSelected));

        let config = Config::from_cli(Cli {
            memory: true,
            ..Cli::default()
        })
        .unwrap();
        assert_eq!(config.storage, StorageBackend::Memory { file_path: None });
    }

    #[test]
    fn test_invalid_trusted_subnet_is_rejected() {
        let err = Config::from_cli(Cli {
            memory: true,
            trusted_subnet: Some("not-a-cidr".into()),
            ..Cli::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"server_address": "0.0.0.0:9000", "base_url": "https://sn.ip/", "memory": true, "trusted_subnet": "10.0.0.0/8"}"#,
        )
        .unwrap();

        let config = Config::from_cli(Cli {
            server_address: Some("127.0.0.1:7000".into()),
            config_file: Some(file.path().to_path_buf()),
            ..Cli::default()
        })
        .unwrap();

        assert_eq!(config.server_address, "127.0.0.1:7000");
        assert_eq!(config.base_url, "https://sn.ip");
        assert_eq!(config.storage, StorageBackend::Memory { file_path: None });
        assert_eq!(
            config.trusted_subnet,
            Some("10.0.0.0/8".parse::<IpNet>().unwrap())
        );
    }
}
