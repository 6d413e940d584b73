use std::path::PathBuf;

use clap::Parser;
use courier_broker::BackendKind;
use courier_models::SendableError;
use log::LevelFilter;

#[derive(Debug, Clone)]
pub struct Config {
    pub runtime_config: Option<PathBuf>,
    pub backend: BackendKind,
    pub shutdown_timeout_seconds: u64,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
    pub testing: bool,
    pub messages: u64,
    pub publish_interval_ms: u64,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// JSON runtime config declaring topics and subscriptions.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "in-memory")]
    backend: String,

    #[arg(long, default_value_t = 30)]
    shutdown_timeout_seconds: u64,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    testing: bool,

    #[arg(long, default_value_t = 10)]
    messages: u64,

    #[arg(long, default_value_t = 500)]
    publish_interval_ms: u64,
}

pub fn parse_config() -> Result<Config, SendableError> {
    let args = CliArgs::try_parse()?;
    let backend = args.backend.parse::<BackendKind>()?;
    let log_level = args.log_level.parse::<LevelFilter>().map_err(|_| -> SendableError {
        format!("invalid log level '{}'", args.log_level).into()
    })?;

    Ok(Config {
        runtime_config: args.config,
        backend,
        shutdown_timeout_seconds: args.shutdown_timeout_seconds,
        log_level,
        log_file: args.log_file,
        testing: args.testing,
        messages: args.messages,
        publish_interval_ms: args.publish_interval_ms,
    })
}
