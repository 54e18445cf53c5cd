use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};

use crate::config::args::value_parser::{bandwidth, endpoint_url, storage_path};
use crate::config::{CommandConfig, Config, SyncConfig, TracingConfig};
use crate::transfer::client_copy::ClientCopyConfig;
use crate::transfer::retry::RetryConfig;

pub mod value_parser;

const DEFAULT_WORKER_SIZE: u16 = 256;
const DEFAULT_MAX_KEYS: i32 = 1000;

const SAME_SOURCE_AND_DESTINATION: &str = "source and destination must be different\n";
const CLIENT_COPY_REQUIRED: &str =
    "cp requires --client-copy; server-side copy is not supported\n";
const MAX_DELETE_WITHOUT_DELETE: &str = "--max-delete requires --delete\n";

#[derive(Parser, Clone, Debug)]
#[command(
    name = "s3mirror",
    about = "High-throughput synchronization and copy for S3-compatible object stores"
)]
pub struct CLIArgs {
    #[command(subcommand)]
    pub command: CLICommand,

    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_WORKER_SIZE,
        help = "Number of concurrent transfer workers"
    )]
    pub numworkers: u16,

    #[arg(
        long,
        global = true,
        value_parser = bandwidth::check_bandwidth_limit,
        help = "Bandwidth ceiling, e.g. 50MB/s, 1.5GB/s or 100Mbps"
    )]
    pub bandwidth_limit: Option<String>,

    #[arg(
        long,
        global = true,
        env = "S3MIRROR_STAGING_DIR",
        help = "Staging directory for client-side copies [default: system temp directory]"
    )]
    pub staging_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Output traces as JSON")]
    pub json_tracing: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum CLICommand {
    /// Synchronize all objects under SOURCE with DESTINATION
    Sync {
        #[arg(long, help = "Compare object sizes only")]
        size_only: bool,

        #[arg(
            long,
            conflicts_with = "size_only",
            help = "Compare object hashes (ETag/MD5) and sizes"
        )]
        hash_only: bool,

        #[arg(long, help = "Delete destination objects missing from the source")]
        delete: bool,

        #[arg(
            long,
            default_value_t = -1,
            help = "Don't delete more than NUM files (negative = unlimited)"
        )]
        max_delete: i64,

        #[arg(long, help = "Stop the whole sync on the first per-object error")]
        exit_on_error: bool,

        #[arg(help = "s3://<BUCKET_NAME>[/prefix] or local path", value_parser = storage_path::check_storage_path)]
        source: String,

        #[arg(help = "s3://<BUCKET_NAME>[/prefix] or local path", value_parser = storage_path::check_storage_path)]
        destination: String,
    },
    /// Copy a single object between remote stores via a local staging area
    Cp {
        #[arg(long, help = "Download then upload through a local staging file")]
        client_copy: bool,

        #[arg(long, help = "Skip the staging disk space check")]
        client_copy_skip_disk_check: bool,

        #[arg(long, help = "AWS profile used for the source side")]
        source_region_profile: Option<String>,

        #[arg(long, help = "AWS profile used for the destination side")]
        destination_region_profile: Option<String>,

        #[arg(long, value_parser = endpoint_url::check_endpoint_url, help = "Endpoint URL for the source side")]
        source_region_endpoint_url: Option<String>,

        #[arg(long, value_parser = endpoint_url::check_endpoint_url, help = "Endpoint URL for the destination side")]
        destination_region_endpoint_url: Option<String>,

        #[arg(help = "s3://<BUCKET_NAME>/key", value_parser = storage_path::check_storage_path)]
        source: String,

        #[arg(help = "s3://<BUCKET_NAME>/key", value_parser = storage_path::check_storage_path)]
        destination: String,
    },
}

pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        let command = match &args.command {
            CLICommand::Sync {
                size_only,
                hash_only,
                delete,
                max_delete,
                exit_on_error,
                source,
                destination,
            } => {
                if source == destination {
                    return Err(SAME_SOURCE_AND_DESTINATION.to_string());
                }
                if 0 <= *max_delete && !*delete {
                    return Err(MAX_DELETE_WITHOUT_DELETE.to_string());
                }

                CommandConfig::Sync(SyncConfig {
                    source: storage_path::parse_storage_path(source),
                    destination: storage_path::parse_storage_path(destination),
                    size_only: *size_only,
                    hash_only: *hash_only,
                    delete: *delete,
                    max_delete: *max_delete,
                    exit_on_error: *exit_on_error,
                })
            }
            CLICommand::Cp {
                client_copy,
                client_copy_skip_disk_check,
                source_region_profile,
                destination_region_profile,
                source_region_endpoint_url,
                destination_region_endpoint_url,
                source,
                destination,
            } => {
                if !client_copy {
                    return Err(CLIENT_COPY_REQUIRED.to_string());
                }

                CommandConfig::ClientCopy(ClientCopyConfig {
                    source_url: source.clone(),
                    destination_url: destination.clone(),
                    bandwidth_limit: args.bandwidth_limit.clone(),
                    source_profile: source_region_profile.clone(),
                    destination_profile: destination_region_profile.clone(),
                    source_endpoint_url: source_region_endpoint_url.clone(),
                    destination_endpoint_url: destination_region_endpoint_url.clone(),
                    skip_disk_check: *client_copy_skip_disk_check,
                })
            }
        };

        let tracing_config = build_tracing_config(&args);

        Ok(Config {
            command,
            worker_size: args.numworkers,
            bandwidth_limit: args.bandwidth_limit,
            staging_dir: args.staging_dir.unwrap_or_else(std::env::temp_dir),
            retry_config: RetryConfig::default(),
            tracing_config,
            max_keys: DEFAULT_MAX_KEYS,
        })
    }
}

fn build_tracing_config(args: &CLIArgs) -> Option<TracingConfig> {
    args.verbosity.log_level().map(|tracing_level| TracingConfig {
        tracing_level,
        json_tracing: args.json_tracing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoragePath;

    #[test]
    fn parse_sync_defaults() {
        init_dummy_tracing_subscriber();

        let args = parse_from_args(vec![
            "s3mirror",
            "sync",
            "s3://source-bucket/dir1/",
            "s3://target-bucket/dir1/",
        ])
        .unwrap();
        let config = Config::try_from(args).unwrap();

        assert_eq!(config.worker_size, 256);
        assert_eq!(config.max_keys, 1000);
        assert!(config.bandwidth_limit.is_none());

        let sync_config = config.sync_config();
        assert!(!sync_config.size_only);
        assert!(!sync_config.hash_only);
        assert!(!sync_config.delete);
        assert_eq!(sync_config.max_delete, -1);
        assert!(!sync_config.exit_on_error);
        assert_eq!(
            sync_config.source,
            StoragePath::S3 {
                bucket: "source-bucket".to_string(),
                prefix: "dir1/".to_string()
            }
        );
    }

    #[test]
    fn parse_sync_flags() {
        init_dummy_tracing_subscriber();

        let args = parse_from_args(vec![
            "s3mirror",
            "--numworkers",
            "16",
            "--bandwidth-limit",
            "50MB/s",
            "sync",
            "--hash-only",
            "--delete",
            "--max-delete",
            "10",
            "--exit-on-error",
            "./test_data/source/",
            "s3://target-bucket/",
        ])
        .unwrap();
        let config = Config::try_from(args).unwrap();

        assert_eq!(config.worker_size, 16);
        assert_eq!(config.bandwidth_limit.as_deref(), Some("50MB/s"));

        let sync_config = config.sync_config();
        assert!(sync_config.hash_only);
        assert!(sync_config.delete);
        assert_eq!(sync_config.max_delete, 10);
        assert!(sync_config.exit_on_error);
    }

    #[test]
    fn parse_sync_rejects_conflicting_strategies() {
        init_dummy_tracing_subscriber();

        assert!(
            parse_from_args(vec![
                "s3mirror",
                "sync",
                "--size-only",
                "--hash-only",
                "s3://source-bucket/",
                "s3://target-bucket/",
            ])
            .is_err()
        );
    }

    #[test]
    fn parse_sync_rejects_same_source_and_destination() {
        init_dummy_tracing_subscriber();

        let args = parse_from_args(vec![
            "s3mirror",
            "sync",
            "s3://bucket/dir1/",
            "s3://bucket/dir1/",
        ])
        .unwrap();

        assert_eq!(
            Config::try_from(args).unwrap_err(),
            SAME_SOURCE_AND_DESTINATION
        );
    }

    #[test]
    fn parse_sync_rejects_max_delete_without_delete() {
        init_dummy_tracing_subscriber();

        let args = parse_from_args(vec![
            "s3mirror",
            "sync",
            "--max-delete",
            "5",
            "s3://source-bucket/",
            "s3://target-bucket/",
        ])
        .unwrap();

        assert_eq!(
            Config::try_from(args).unwrap_err(),
            MAX_DELETE_WITHOUT_DELETE
        );
    }

    #[test]
    fn parse_sync_rejects_invalid_bandwidth() {
        init_dummy_tracing_subscriber();

        assert!(
            parse_from_args(vec![
                "s3mirror",
                "--bandwidth-limit",
                "100",
                "sync",
                "s3://source-bucket/",
                "s3://target-bucket/",
            ])
            .is_err()
        );
    }

    #[test]
    fn parse_cp_client_copy() {
        init_dummy_tracing_subscriber();

        let args = parse_from_args(vec![
            "s3mirror",
            "cp",
            "--client-copy",
            "--client-copy-skip-disk-check",
            "--source-region-profile",
            "profile-a",
            "--destination-region-profile",
            "profile-b",
            "--source-region-endpoint-url",
            "https://s3.eu-central-1.amazonaws.com",
            "--destination-region-endpoint-url",
            "https://s3.us-west-2.amazonaws.com",
            "s3://source-bucket/data1",
            "s3://target-bucket/data1",
        ])
        .unwrap();
        let config = Config::try_from(args).unwrap();

        let CommandConfig::ClientCopy(client_copy_config) = &config.command else {
            panic!("expected a client copy configuration.")
        };
        assert!(client_copy_config.skip_disk_check);
        assert_eq!(
            client_copy_config.source_profile.as_deref(),
            Some("profile-a")
        );
        assert_eq!(
            client_copy_config.destination_endpoint_url.as_deref(),
            Some("https://s3.us-west-2.amazonaws.com")
        );
    }

    #[test]
    fn parse_cp_requires_client_copy_flag() {
        init_dummy_tracing_subscriber();

        let args = parse_from_args(vec![
            "s3mirror",
            "cp",
            "s3://source-bucket/data1",
            "s3://target-bucket/data1",
        ])
        .unwrap();

        assert_eq!(Config::try_from(args).unwrap_err(), CLIENT_COPY_REQUIRED);
    }

    #[test]
    fn parse_cp_rejects_invalid_endpoint_url() {
        init_dummy_tracing_subscriber();

        assert!(
            parse_from_args(vec![
                "s3mirror",
                "cp",
                "--client-copy",
                "--source-region-endpoint-url",
                "not a url",
                "s3://source-bucket/data1",
                "s3://target-bucket/data1",
            ])
            .is_err()
        );
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
