//! DNS propagation checking for DNS-01 challenges
//!
//! Confirms that a TXT record is visible on public resolvers before the
//! authority is told to validate it.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use certkeeper_config::PropagationCheckConfig;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::provider::DnsProviderError;

/// Resolved propagation settings
#[derive(Debug, Clone)]
pub struct PropagationConfig {
    /// Delay before the first lookup
    pub initial_delay: Duration,
    /// Interval between lookups
    pub check_interval: Duration,
    /// Maximum time to wait
    pub timeout: Duration,
    /// Nameservers to query (empty = system configuration)
    pub nameservers: Vec<IpAddr>,
}

impl TryFrom<&PropagationCheckConfig> for PropagationConfig {
    type Error = DnsProviderError;

    fn try_from(config: &PropagationCheckConfig) -> Result<Self, Self::Error> {
        let nameservers = config
            .nameservers
            .iter()
            .map(|ns| {
                ns.parse::<IpAddr>().map_err(|_| {
                    DnsProviderError::Configuration(format!("invalid nameserver address '{}'", ns))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            check_interval: Duration::from_secs(config.check_interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            nameservers,
        })
    }
}

/// DNS propagation checker
pub struct PropagationChecker {
    config: PropagationConfig,
    resolver: TokioAsyncResolver,
}

impl std::fmt::Debug for PropagationChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationChecker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PropagationChecker {
    pub fn with_config(config: PropagationConfig) -> Result<Self, DnsProviderError> {
        let resolver = Self::create_resolver(&config)?;
        Ok(Self { config, resolver })
    }

    fn create_resolver(config: &PropagationConfig) -> Result<TokioAsyncResolver, DnsProviderError> {
        if config.nameservers.is_empty() {
            return TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
                DnsProviderError::Configuration(format!("failed to read system resolver config: {}", e))
            });
        }

        let mut resolver_config = ResolverConfig::new();
        for ip in &config.nameservers {
            resolver_config.add_name_server(NameServerConfig::new(
                SocketAddr::new(*ip, 53),
                Protocol::Udp,
            ));
        }

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 3;
        // Stale answers would hide a freshly created record
        opts.cache_size = 0;

        Ok(TokioAsyncResolver::tokio(resolver_config, opts))
    }

    /// Wait until `record_name` carries `expected_value`
    pub async fn wait_for_propagation(
        &self,
        record_name: &str,
        expected_value: &str,
    ) -> Result<(), DnsProviderError> {
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        debug!(
            record = %record_name,
            timeout_secs = self.config.timeout.as_secs(),
            "Waiting for DNS propagation"
        );

        tokio::time::sleep(self.config.initial_delay).await;

        loop {
            match self.check_record(record_name, expected_value).await {
                Ok(true) => {
                    debug!(
                        record = %record_name,
                        elapsed_secs = start.elapsed().as_secs(),
                        "DNS propagation confirmed"
                    );
                    return Ok(());
                }
                Ok(false) => trace!(record = %record_name, "Record not yet propagated"),
                Err(e) => warn!(record = %record_name, error = %e, "DNS lookup error"),
            }

            if Instant::now() >= deadline {
                return Err(DnsProviderError::PropagationTimeout {
                    record_name: record_name.to_string(),
                    elapsed_secs: self.config.timeout.as_secs(),
                });
            }

            tokio::time::sleep(self.config.check_interval).await;
        }
    }

    /// Check once whether a TXT record has the expected value
    pub async fn check_record(
        &self,
        record_name: &str,
        expected_value: &str,
    ) -> Result<bool, DnsProviderError> {
        match self.resolver.txt_lookup(record_name).await {
            Ok(records) => {
                let found = records.iter().any(|record| {
                    let value: String = record
                        .txt_data()
                        .iter()
                        .map(|data| String::from_utf8_lossy(data))
                        .collect();
                    trace!(record = %record_name, found_value = %value, "Checking TXT record");
                    value == expected_value
                });
                Ok(found)
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(false),
                _ => Err(DnsProviderError::ApiRequest(format!(
                    "DNS lookup failed for '{}': {}",
                    record_name, e
                ))),
            },
        }
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }
}
