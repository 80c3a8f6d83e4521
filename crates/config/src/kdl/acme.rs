//! ACME block KDL parsing.

use anyhow::Result;
use tracing::trace;

use crate::acme::{AcmeConfig, AcmeDirectory, KeyType};

use super::helpers::{get_string_entry, get_u64_entry};

/// Parse the `acme` configuration block
pub fn parse_acme_config(node: &::kdl::KdlNode) -> Result<AcmeConfig> {
    trace!("Parsing acme configuration block");
    let defaults = AcmeConfig::default();

    let directory = match get_string_entry(node, "directory") {
        Some(s) => s.parse::<AcmeDirectory>().map_err(anyhow::Error::msg)?,
        None => defaults.directory,
    };

    let key_type = match get_string_entry(node, "key-type") {
        Some(s) => s.parse::<KeyType>().map_err(anyhow::Error::msg)?,
        None => defaults.key_type,
    };

    let request_retries = match get_u64_entry(node, "request-retries")? {
        Some(v) => u32::try_from(v)
            .map_err(|_| anyhow::anyhow!("acme request-retries is out of range: {}", v))?,
        None => defaults.request_retries,
    };

    let config = AcmeConfig {
        email: get_string_entry(node, "email"),
        directory,
        key_type,
        request_timeout_secs: get_u64_entry(node, "request-timeout-secs")?
            .unwrap_or(defaults.request_timeout_secs),
        request_retries,
        validation_timeout_secs: get_u64_entry(node, "validation-timeout-secs")?
            .unwrap_or(defaults.validation_timeout_secs),
        poll_initial_interval_ms: get_u64_entry(node, "poll-initial-interval-ms")?
            .unwrap_or(defaults.poll_initial_interval_ms),
        poll_max_interval_ms: get_u64_entry(node, "poll-max-interval-ms")?
            .unwrap_or(defaults.poll_max_interval_ms),
        finalize_timeout_secs: get_u64_entry(node, "finalize-timeout-secs")?
            .unwrap_or(defaults.finalize_timeout_secs),
    };

    trace!(
        directory = %config.directory,
        key_type = %config.key_type,
        "Parsed acme configuration"
    );

    Ok(config)
}
