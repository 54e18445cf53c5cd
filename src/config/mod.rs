use std::path::PathBuf;

use crate::transfer::client_copy::ClientCopyConfig;
use crate::transfer::retry::RetryConfig;
use crate::types::StoragePath;

pub mod args;

#[derive(Debug, Clone)]
pub struct Config {
    pub command: CommandConfig,
    pub worker_size: u16,
    pub bandwidth_limit: Option<String>,
    pub staging_dir: PathBuf,
    pub retry_config: RetryConfig,
    pub tracing_config: Option<TracingConfig>,
    pub max_keys: i32,
}

#[derive(Debug, Clone)]
pub enum CommandConfig {
    Sync(SyncConfig),
    ClientCopy(ClientCopyConfig),
}

impl Config {
    pub fn sync_config(&self) -> &SyncConfig {
        match &self.command {
            CommandConfig::Sync(sync_config) => sync_config,
            CommandConfig::ClientCopy(_) => panic!("not a sync configuration."),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: StoragePath,
    pub destination: StoragePath,
    pub size_only: bool,
    pub hash_only: bool,
    pub delete: bool,
    pub max_delete: i64,
    pub exit_on_error: bool,
}

/// Per-side S3 client settings. The profile and endpoint override whatever
/// the environment would otherwise supply for that side.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub profile: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
}
