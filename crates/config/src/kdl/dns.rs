//! DNS provider block KDL parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use crate::dns::{DnsProviderConfig, DnsProviderType, PropagationCheckConfig};

use super::helpers::{get_bool_entry, get_child, get_string_entry, get_string_list, get_u64_entry};

/// Parse the `dns-provider` configuration block
pub fn parse_dns_provider_config(node: &::kdl::KdlNode) -> Result<DnsProviderConfig> {
    trace!("Parsing dns-provider configuration block");
    let defaults = DnsProviderConfig::default();

    let provider = match get_string_entry(node, "type") {
        Some(s) => s.parse::<DnsProviderType>().map_err(anyhow::Error::msg)?,
        None => defaults.provider,
    };

    let provision_retries = match get_u64_entry(node, "provision-retries")? {
        Some(v) => u32::try_from(v)
            .map_err(|_| anyhow::anyhow!("dns-provider provision-retries is out of range: {}", v))?,
        None => defaults.provision_retries,
    };

    let propagation = match get_child(node, "propagation") {
        Some(child) => parse_propagation_config(child)?,
        None => defaults.propagation,
    };

    let config = DnsProviderConfig {
        provider,
        zone_id: get_string_entry(node, "zone-id"),
        url: get_string_entry(node, "url"),
        auth_header: get_string_entry(node, "auth-header"),
        credentials_file: get_string_entry(node, "credentials-file").map(PathBuf::from),
        credentials_env: get_string_entry(node, "credentials-env"),
        api_timeout_secs: get_u64_entry(node, "api-timeout-secs")?
            .unwrap_or(defaults.api_timeout_secs),
        provision_retries,
        propagation,
    };

    trace!(
        provider = %config.provider,
        propagation = config.propagation.enabled,
        "Parsed dns-provider configuration"
    );

    Ok(config)
}

fn parse_propagation_config(node: &::kdl::KdlNode) -> Result<PropagationCheckConfig> {
    let defaults = PropagationCheckConfig::default();

    Ok(PropagationCheckConfig {
        enabled: get_bool_entry(node, "enabled").unwrap_or(defaults.enabled),
        initial_delay_secs: get_u64_entry(node, "initial-delay-secs")?
            .unwrap_or(defaults.initial_delay_secs),
        check_interval_secs: get_u64_entry(node, "check-interval-secs")?
            .unwrap_or(defaults.check_interval_secs),
        timeout_secs: get_u64_entry(node, "timeout-secs")?.unwrap_or(defaults.timeout_secs),
        nameservers: get_string_list(node, "nameservers").unwrap_or(defaults.nameservers),
    })
}
