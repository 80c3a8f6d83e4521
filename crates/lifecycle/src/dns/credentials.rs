//! Credential loading for DNS provider APIs
//!
//! Credentials come from a file or an environment variable and may be a
//! bare token or a small JSON object.

use std::fs;
use std::path::Path;

use certkeeper_config::DnsProviderConfig;
use serde::Deserialize;
use tracing::{debug, warn};

use super::provider::DnsProviderError;

/// API credentials for a DNS provider
#[derive(Clone)]
pub enum Credentials {
    /// Single API token
    Token(String),
    /// API key and secret pair
    KeySecret { key: String, secret: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Credentials::Token([REDACTED])"),
            Self::KeySecret { .. } => f.write_str("Credentials::KeySecret([REDACTED])"),
        }
    }
}

impl Credentials {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Token(t) => Some(t),
            Self::KeySecret { .. } => None,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::KeySecret { key, .. } => Some(key),
            Self::Token(_) => None,
        }
    }

    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::KeySecret { secret, .. } => Some(secret),
            Self::Token(_) => None,
        }
    }

    /// The token, or the key for key/secret pairs
    pub fn as_bearer_token(&self) -> &str {
        match self {
            Self::Token(t) => t,
            Self::KeySecret { key, .. } => key,
        }
    }
}

/// Load the credentials named by a provider config, file taking precedence
pub fn load_credentials(config: &DnsProviderConfig) -> Result<Option<Credentials>, DnsProviderError> {
    if let Some(path) = &config.credentials_file {
        return load_from_file(path).map(Some);
    }
    if let Some(var) = &config.credentials_env {
        return load_from_env(var).map(Some);
    }
    Ok(None)
}

/// Load credentials from a file
///
/// Files readable by group or others are accepted with a warning.
pub fn load_from_file(path: &Path) -> Result<Credentials, DnsProviderError> {
    let read_err = |e: std::io::Error| {
        DnsProviderError::Credentials(format!(
            "failed to read credentials file '{}': {}",
            path.display(),
            e
        ))
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = fs::metadata(path).map_err(read_err)?.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{:o}", mode),
                "Credentials file is readable by group or others (expected 0600 or 0400)"
            );
        }
    }

    let content = fs::read_to_string(path).map_err(read_err)?;
    let trimmed = content.trim();

    if trimmed.starts_with('{') {
        return parse_json(trimmed);
    }
    if trimmed.is_empty() {
        return Err(DnsProviderError::Credentials(format!(
            "credentials file '{}' is empty",
            path.display()
        )));
    }

    debug!(path = %path.display(), "Loaded credentials as plain text token");
    Ok(Credentials::Token(trimmed.to_string()))
}

/// Load credentials from an environment variable
pub fn load_from_env(var_name: &str) -> Result<Credentials, DnsProviderError> {
    let value = std::env::var(var_name).map_err(|_| {
        DnsProviderError::Credentials(format!("environment variable '{}' not set", var_name))
    })?;

    let trimmed = value.trim();
    if trimmed.starts_with('{') {
        return parse_json(trimmed);
    }
    if trimmed.is_empty() {
        return Err(DnsProviderError::Credentials(format!(
            "environment variable '{}' is empty",
            var_name
        )));
    }
    Ok(Credentials::Token(trimmed.to_string()))
}

fn parse_json(json: &str) -> Result<Credentials, DnsProviderError> {
    #[derive(Deserialize)]
    struct Raw {
        token: Option<String>,
        api_token: Option<String>,
        api_key: Option<String>,
        api_secret: Option<String>,
    }

    let raw: Raw = serde_json::from_str(json)
        .map_err(|e| DnsProviderError::Credentials(format!("invalid JSON credentials: {}", e)))?;

    match raw {
        Raw {
            api_key: Some(key),
            api_secret: Some(secret),
            ..
        } => {
            debug!("Loaded credentials as JSON key+secret");
            Ok(Credentials::KeySecret { key, secret })
        }
        Raw { token: Some(token), .. } | Raw { api_token: Some(token), .. } => {
            debug!("Loaded credentials as JSON token");
            Ok(Credentials::Token(token))
        }
        Raw { api_key: Some(key), .. } => Ok(Credentials::Token(key)),
        _ => Err(DnsProviderError::Credentials(
            "expected {\"token\": \"...\"} or {\"api_key\": \"...\", \"api_secret\": \"...\"}"
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_load_json_token() {
        let file = file_with(r#"{"token": "test-token-123"}"#);
        let creds = load_from_file(file.path()).unwrap();
        assert_eq!(creds.token(), Some("test-token-123"));
    }

    #[test]
    fn test_load_json_api_token() {
        let file = file_with(r#"{"api_token": "api-token-456"}"#);
        let creds = load_from_file(file.path()).unwrap();
        assert_eq!(creds.token(), Some("api-token-456"));
    }

    #[test]
    fn test_load_json_key_secret() {
        let file = file_with(r#"{"api_key": "key123", "api_secret": "secret456"}"#);
        let creds = load_from_file(file.path()).unwrap();
        assert_eq!(creds.key(), Some("key123"));
        assert_eq!(creds.secret(), Some("secret456"));
        assert_eq!(creds.as_bearer_token(), "key123");
    }

    #[test]
    fn test_load_plain_text_trimmed() {
        let file = file_with("  plain-text-token  \n");
        let creds = load_from_file(file.path()).unwrap();
        assert_eq!(creds.token(), Some("plain-text-token"));
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = file_with("   \n");
        assert!(matches!(
            load_from_file(file.path()),
            Err(DnsProviderError::Credentials(_))
        ));
    }

    #[test]
    fn test_unrecognized_json_rejected() {
        let file = file_with(r#"{"password": "hunter2"}"#);
        assert!(load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        assert!(load_from_file(Path::new("/nonexistent/certkeeper/creds.json")).is_err());
    }

    #[test]
    fn test_load_from_env() {
        std::env::set_var("CERTKEEPER_TEST_DNS_TOKEN", "env-token");
        let creds = load_from_env("CERTKEEPER_TEST_DNS_TOKEN").unwrap();
        assert_eq!(creds.token(), Some("env-token"));

        assert!(load_from_env("CERTKEEPER_TEST_DNS_TOKEN_UNSET").is_err());
    }

    #[test]
    fn test_load_credentials_prefers_file() {
        let file = file_with("from-file");
        let config = DnsProviderConfig {
            credentials_file: Some(file.path().to_path_buf()),
            credentials_env: Some("CERTKEEPER_TEST_NEVER_SET".to_string()),
            ..Default::default()
        };
        let creds = load_credentials(&config).unwrap().unwrap();
        assert_eq!(creds.token(), Some("from-file"));

        assert!(load_credentials(&DnsProviderConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_debug_redacts() {
        let creds = Credentials::Token("super-secret".to_string());
        assert!(!format!("{:?}", creds).contains("super-secret"));
    }
}
