//! Renewal, storage and logging block KDL parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use crate::renewal::RenewalConfig;
use crate::runtime::{LoggingConfig, StorageConfig};

use super::helpers::{get_bool_entry, get_string_entry, get_u64_entry};

/// Parse the `renewal` configuration block
pub fn parse_renewal_config(node: &::kdl::KdlNode) -> Result<RenewalConfig> {
    trace!("Parsing renewal configuration block");
    let defaults = RenewalConfig::default();

    let window_days = match get_u64_entry(node, "window-days")? {
        Some(v) => u32::try_from(v)
            .map_err(|_| anyhow::anyhow!("renewal window-days is out of range: {}", v))?,
        None => defaults.window_days,
    };

    let config = RenewalConfig {
        interval_hours: get_u64_entry(node, "interval-hours")?.unwrap_or(defaults.interval_hours),
        window_days,
        workers: get_u64_entry(node, "workers")?
            .map(|v| v as usize)
            .unwrap_or(defaults.workers),
        run_on_start: get_bool_entry(node, "run-on-start").unwrap_or(defaults.run_on_start),
    };

    trace!(
        interval_hours = config.interval_hours,
        window_days = config.window_days,
        workers = config.workers,
        "Parsed renewal configuration"
    );

    Ok(config)
}

/// Parse the `storage` configuration block
pub fn parse_storage_config(node: &::kdl::KdlNode) -> Result<StorageConfig> {
    Ok(StorageConfig {
        path: get_string_entry(node, "path")
            .map(PathBuf::from)
            .unwrap_or_else(|| StorageConfig::default().path),
    })
}

/// Parse the `logging` configuration block
pub fn parse_logging_config(node: &::kdl::KdlNode) -> Result<LoggingConfig> {
    let defaults = LoggingConfig::default();
    Ok(LoggingConfig {
        level: get_string_entry(node, "level").unwrap_or(defaults.level),
        format: get_string_entry(node, "format").unwrap_or(defaults.format),
    })
}
