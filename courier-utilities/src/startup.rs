use std::path::Path;

use log::{LevelFilter, info};
use courier_models::SendableError;

use crate::logger::{self, print_env};

/// Installs the logger and panic hook, then announces the process.
pub fn startup(
    name: &str,
    level: LevelFilter,
    log_file: Option<&Path>,
) -> Result<(), SendableError> {
    logger::setup_logger(level, log_file)?;
    log_panics::init();

    info!("--- {} ---", name);
    print_env()?;

    Ok(())
}
