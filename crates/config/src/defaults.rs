//! Default embedded configuration for certkeeper
//!
//! Used when no configuration file is provided. It targets the development
//! authority and the in-memory DNS provider, so the binary can issue,
//! validate and export certificates without any external service.

use std::path::PathBuf;

use crate::{AcmeConfig, AcmeDirectory, Config, DnsProviderConfig, LoggingConfig, RenewalConfig, StorageConfig};

/// Embedded default configuration in KDL format
pub const DEFAULT_CONFIG_KDL: &str = r#"
// certkeeper default configuration
// Development authority and in-memory DNS. For production, point the
// directory at letsencrypt and configure a real dns-provider.

acme {
    directory "development"
    key-type "rsa2048"
    request-timeout-secs 30
    request-retries 3
    validation-timeout-secs 120
    poll-initial-interval-ms 1000
    poll-max-interval-ms 10000
    finalize-timeout-secs 120
}

renewal {
    interval-hours 24
    window-days 30
    workers 4
    run-on-start #true
}

dns-provider {
    type "memory"
    api-timeout-secs 30
    provision-retries 3

    propagation {
        enabled #false
    }
}

storage {
    path "certkeeper-data"
}

logging {
    level "info"
    format "pretty"
}
"#;

/// Programmatic equivalent of [`DEFAULT_CONFIG_KDL`]
pub fn create_default_config() -> Config {
    Config {
        acme: AcmeConfig {
            directory: AcmeDirectory::Development,
            ..AcmeConfig::default()
        },
        renewal: RenewalConfig::default(),
        dns_provider: DnsProviderConfig::default(),
        storage: StorageConfig {
            path: PathBuf::from("certkeeper-data"),
        },
        logging: LoggingConfig::default(),
    }
}
