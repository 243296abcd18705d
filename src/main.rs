/*!
 * Stowage CLI - Command Line Interface
 */

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use stowage::{
    logging, BucketName, ByteRange, DeleteOutcome, LogLevel, ObjectKey, ObjectSource, ObjectStore,
    PutOptions, StoreConfig, StoreError,
};
use tokio_util::sync::CancellationToken;

const EXIT_SUCCESS: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOT_FOUND: i32 = 3;
const EXIT_PARTIAL: i32 = 4;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(version, about = "Transfer objects to and from S3-compatible storage", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Endpoint host or URL (overrides config and STOWAGE_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Region (overrides config and STOWAGE_REGION)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Log level
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Put {
        bucket: String,
        key: String,
        file: PathBuf,

        /// Content-Type (guessed from the key when omitted)
        #[arg(long)]
        content_type: Option<String>,

        /// User metadata as NAME=VALUE, repeatable
        #[arg(long = "meta", value_name = "NAME=VALUE")]
        metadata: Vec<String>,

        /// Part size in bytes
        #[arg(long)]
        part_size: Option<u64>,

        /// Parts uploaded in parallel
        #[arg(long)]
        parallel: Option<usize>,
    },

    /// Download an object to a file, or to stdout when no file is given
    Get {
        bucket: String,
        key: String,
        file: Option<PathBuf>,

        /// Continue a partial download
        #[arg(long)]
        resume: bool,

        /// First byte to read (stdout only)
        #[arg(long)]
        offset: Option<u64>,

        /// Number of bytes to read (stdout only)
        #[arg(long)]
        length: Option<u64>,
    },

    /// Show object metadata
    Stat {
        bucket: String,
        key: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a presigned URL
    Presign {
        bucket: String,
        key: String,

        /// Presign an upload instead of a download
        #[arg(long)]
        put: bool,

        /// Validity in seconds (1 to 604800)
        #[arg(long, default_value_t = 3600)]
        expires: u64,
    },

    /// Delete one or more objects
    Rm {
        bucket: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Server-side copy
    Cp {
        /// Source as BUCKET/KEY
        source: String,
        /// Destination as BUCKET/KEY
        destination: String,
    },

    /// Concatenate objects server-side into one
    Compose {
        /// Destination as BUCKET/KEY
        destination: String,
        /// Sources as BUCKET/KEY, in order
        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// List objects
    Ls {
        bucket: String,
        #[arg(default_value = "")]
        prefix: String,

        /// List every key under the prefix instead of grouping at '/'
        #[arg(short = 'r', long)]
        recursive: bool,
    },

    /// Abort multipart uploads left behind by interrupted transfers
    Cleanup {
        bucket: String,
        #[arg(default_value = "")]
        prefix: String,

        /// Only list them
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<StoreError>() {
        Some(
            StoreError::InvalidName { .. }
            | StoreError::InvalidExpiry { .. }
            | StoreError::InvalidConfig(_)
            | StoreError::InvalidArgument(_),
        ) => EXIT_USAGE,
        Some(e) if e.is_not_found() => EXIT_NOT_FOUND,
        Some(StoreError::SourceNotFound { .. }) => EXIT_NOT_FOUND,
        _ => EXIT_FATAL,
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => StoreConfig::default(),
    };
    config.apply_env()?;
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(region) = &cli.region {
        config.region = region.clone();
    }
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    if let Commands::Put {
        part_size,
        parallel,
        ..
    } = &cli.command
    {
        if let Some(size) = part_size {
            config.transfer.part_size = *size;
        }
        if let Some(parallel) = parallel {
            config.transfer.parallel_parts = *parallel;
        }
    }

    if let Err(e) = logging::init_logging(&config, cli.verbose) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    runtime.block_on(async {
        let store = ObjectStore::connect(config).await?;
        handle_command(&store, cli.command).await
    })
}

async fn handle_command(store: &ObjectStore, command: Commands) -> Result<i32> {
    match command {
        Commands::Put {
            bucket,
            key,
            file,
            content_type,
            metadata,
            ..
        } => {
            let (bucket, key) = (BucketName::parse(bucket)?, ObjectKey::new(key)?);
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let options = PutOptions {
                content_type,
                user_metadata: parse_metadata(&metadata)?,
                cancel: Some(cancel),
                ..Default::default()
            };
            let result = store.put_path(&bucket, &key, &file, options).await?;
            println!(
                "{}/{}  {} bytes  etag {}{}",
                result.bucket,
                result.key,
                result.size,
                result.etag,
                if result.parts > 0 {
                    format!("  ({} parts)", result.parts)
                } else {
                    String::new()
                }
            );
        }

        Commands::Get {
            bucket,
            key,
            file,
            resume,
            offset,
            length,
        } => {
            let (bucket, key) = (BucketName::parse(bucket)?, ObjectKey::new(key)?);
            match file {
                Some(path) => {
                    if offset.is_some() || length.is_some() {
                        bail!("--offset and --length apply to stdout downloads only");
                    }
                    let size = store.download_to_path(&bucket, &key, &path, resume).await?;
                    println!("{} bytes -> {}", size, path.display());
                }
                None => {
                    let range = match (offset, length) {
                        (None, None) => None,
                        (offset, Some(length)) => Some(ByteRange::new(offset.unwrap_or(0), length)?),
                        (Some(offset), None) => Some(ByteRange::from_offset(offset)),
                    };
                    let body = store.get(&bucket, &key, range).await?;
                    let mut reader = body.into_reader();
                    let mut stdout = tokio::io::stdout();
                    tokio::io::copy(&mut reader, &mut stdout)
                        .await
                        .context("Failed to write object to stdout")?;
                }
            }
        }

        Commands::Stat { bucket, key, json } => {
            let (bucket, key) = (BucketName::parse(bucket)?, ObjectKey::new(key)?);
            let stat = store.stat(&bucket, &key).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stat)?);
            } else {
                println!("Object:        {}/{}", stat.bucket, stat.key);
                println!("Size:          {}", stat.size);
                println!("Content-Type:  {}", stat.content_type.as_deref().unwrap_or("-"));
                println!("ETag:          {}", stat.etag.as_deref().unwrap_or("-"));
                if let Some(modified) = stat.last_modified {
                    println!("Last-Modified: {}", modified.to_rfc3339());
                }
                if let Some(version) = &stat.version_id {
                    println!("Version:       {}", version);
                }
                let mut metadata: Vec<_> = stat.user_metadata.iter().collect();
                metadata.sort();
                for (name, value) in metadata {
                    println!("Meta:          {}={}", name, value);
                }
            }
        }

        Commands::Presign {
            bucket,
            key,
            put,
            expires,
        } => {
            let (bucket, key) = (BucketName::parse(bucket)?, ObjectKey::new(key)?);
            let expiry = Duration::from_secs(expires);
            let url = if put {
                store.presign_put(&bucket, &key, expiry)?
            } else {
                store.presign_get(&bucket, &key, expiry)?
            };
            println!("{}", url);
        }

        Commands::Rm { bucket, keys } => {
            let bucket = BucketName::parse(bucket)?;
            let keys = keys
                .into_iter()
                .map(ObjectKey::new)
                .collect::<Result<Vec<_>, _>>()?;
            let outcomes = store.delete_many(&bucket, &keys).await?;

            let mut failed = 0;
            for outcome in &outcomes {
                match outcome {
                    DeleteOutcome::Deleted { key } => println!("deleted  {}", key),
                    DeleteOutcome::Failed { key, code, message } => {
                        failed += 1;
                        eprintln!("failed   {}  {}: {}", key, code, message);
                    }
                }
            }
            if failed > 0 {
                return Ok(EXIT_PARTIAL);
            }
        }

        Commands::Cp {
            source,
            destination,
        } => {
            let source = parse_source(&source)?;
            let (bucket, key) = parse_location(&destination)?;
            let result = store.copy(&bucket, &key, &source).await?;
            println!("{}/{}  {} bytes", result.bucket, result.key, result.size);
        }

        Commands::Compose {
            destination,
            sources,
        } => {
            let (bucket, key) = parse_location(&destination)?;
            let sources = sources
                .iter()
                .map(|s| parse_source(s))
                .collect::<Result<Vec<_>>>()?;
            let result = store.compose(&bucket, &key, &sources).await?;
            println!(
                "{}/{}  {} bytes from {} sources",
                result.bucket,
                result.key,
                result.size,
                sources.len()
            );
        }

        Commands::Ls {
            bucket,
            prefix,
            recursive,
        } => {
            let bucket = BucketName::parse(bucket)?;
            for entry in store.list_objects(&bucket, &prefix, recursive).await? {
                if entry.is_prefix {
                    println!("{:>12}  {:<25}  {}", "DIR", "", entry.key);
                } else {
                    let modified = entry
                        .last_modified
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default();
                    println!("{:>12}  {:<25}  {}", entry.size, modified, entry.key);
                }
            }
        }

        Commands::Cleanup {
            bucket,
            prefix,
            dry_run,
        } => {
            let bucket = BucketName::parse(bucket)?;
            if dry_run {
                for upload in store.list_incomplete_uploads(&bucket, &prefix).await? {
                    let initiated = upload
                        .initiated
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{}  {}  {}", initiated, upload.key, upload.upload_id);
                }
            } else {
                let aborted = store.abort_incomplete_uploads(&bucket, &prefix).await?;
                println!("Aborted {} incomplete upload(s)", aborted);
            }
        }
    }

    Ok(EXIT_SUCCESS)
}

fn parse_metadata(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
            _ => bail!("metadata must be NAME=VALUE, got {:?}", pair),
        })
        .collect()
}

/// `BUCKET/KEY`
fn parse_location(location: &str) -> Result<(BucketName, ObjectKey)> {
    match location.split_once('/') {
        Some((bucket, key)) if !key.is_empty() => {
            Ok((BucketName::parse(bucket)?, ObjectKey::new(key)?))
        }
        _ => bail!("expected BUCKET/KEY, got {:?}", location),
    }
}

fn parse_source(location: &str) -> Result<ObjectSource> {
    let (bucket, key) = parse_location(location)?;
    Ok(ObjectSource::new(bucket, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        let (bucket, key) = parse_location("photos/2024/a.jpg").unwrap();
        assert_eq!(bucket.as_str(), "photos");
        assert_eq!(key.as_str(), "2024/a.jpg");

        assert!(parse_location("photos").is_err());
        assert!(parse_location("photos/").is_err());
        assert!(parse_location("Photos/a.jpg").is_err());
    }

    #[test]
    fn test_parse_metadata() {
        let parsed = parse_metadata(&["owner=alice".to_string(), "empty=".to_string()]).unwrap();
        assert_eq!(parsed.get("owner").map(String::as_str), Some("alice"));
        assert_eq!(parsed.get("empty").map(String::as_str), Some(""));
        assert!(parse_metadata(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let not_found = anyhow::Error::new(StoreError::NotFound {
            bucket: "b".to_string(),
            key: "k".to_string(),
        });
        assert_eq!(exit_code(&not_found), EXIT_NOT_FOUND);

        let usage = anyhow::Error::new(StoreError::InvalidExpiry { seconds: 0 });
        assert_eq!(exit_code(&usage), EXIT_USAGE);

        assert_eq!(exit_code(&anyhow::anyhow!("boom")), EXIT_FATAL);
    }

    #[test]
    fn test_cli_parses_put() {
        let cli = Cli::try_parse_from([
            "stowage",
            "put",
            "photos",
            "a.jpg",
            "/tmp/a.jpg",
            "--meta",
            "owner=alice",
            "--part-size",
            "8388608",
        ])
        .unwrap();
        match cli.command {
            Commands::Put {
                metadata,
                part_size,
                ..
            } => {
                assert_eq!(metadata, vec!["owner=alice".to_string()]);
                assert_eq!(part_size, Some(8_388_608));
            }
            _ => panic!("expected put"),
        }
    }
}
