//! certkeeper - Main entry point
//!
//! Issues, renews, revokes, validates and exports TLS certificates, and runs
//! the renewal scheduler as a daemon.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use certkeeper_common::{init_tracing, DomainId, LogFormat};
use certkeeper_config::Config;
use certkeeper_lifecycle::{inspect, App, ExportFormat, RenewOptions, Renewal, RevocationReason};

/// certkeeper - TLS certificate lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "certkeeper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTKEEPER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test,

    /// Issue a new certificate
    Issue {
        /// Primary domain
        domain: String,
        /// Additional subject alternative names
        #[arg(long = "san")]
        sans: Vec<String>,
        /// Also cover *.<domain>
        #[arg(long)]
        wildcard: bool,
        /// Exclude from scheduled renewal
        #[arg(long)]
        no_auto_renew: bool,
        /// Owning domain identifier
        #[arg(long, default_value = "")]
        domain_id: String,
    },

    /// Renew a certificate (no-op outside the renewal window unless forced)
    Renew {
        /// Certificate ID or primary domain
        certificate: String,
        #[arg(long)]
        force: bool,
    },

    /// Revoke a certificate
    Revoke {
        /// Certificate ID or primary domain
        certificate: String,
        /// RFC 5280 reason (keyCompromise, superseded, ...)
        #[arg(long, default_value = "unspecified")]
        reason: String,
    },

    /// Check a certificate's material, expiry and identity
    Validate {
        /// Certificate ID or primary domain
        certificate: String,
    },

    /// Summarize the health of every managed certificate
    Health {
        #[arg(long)]
        json: bool,
        /// Print Prometheus metrics after the summary
        #[arg(long)]
        metrics: bool,
    },

    /// Export a certificate
    Export {
        /// Certificate ID or primary domain
        certificate: String,
        /// pem or pkcs12
        #[arg(long, default_value = "pem")]
        format: String,
        /// PKCS#12 passphrase
        #[arg(long, env = "CERTKEEPER_EXPORT_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
        /// Output file (stdout for PEM when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the renewal scheduler until interrupted
    Run,

    /// List managed certificates
    List {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let format = config
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or_default();
    init_tracing(level, format);

    if let Commands::Test = cli.command {
        return test_config(&config, cli.config.as_deref());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(execute(cli.command, config))
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => Config::default_embedded().context("Failed to load embedded configuration")?,
    };
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

/// Report on a configuration that already loaded and validated
fn test_config(config: &Config, path: Option<&std::path::Path>) -> Result<()> {
    info!("Configuration test successful:");
    info!("  - directory: {}", config.acme.directory);
    info!("  - dns provider: {}", config.dns_provider.provider);
    info!("  - renewal window: {} day(s)", config.renewal.window_days);
    info!("  - storage: {}", config.storage.path.display());

    if config.acme.directory.is_development() {
        warn!("Development authority issues certificates that are not publicly trusted");
    }

    println!(
        "certkeeper: configuration file {} test is successful",
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "(embedded)".to_string())
    );
    Ok(())
}

async fn execute(command: Commands, config: Config) -> Result<()> {
    let app = App::from_config(config)?;
    let cancel = shutdown_token();

    match command {
        // Handled before the runtime starts
        Commands::Test => {}

        Commands::Issue {
            domain,
            sans,
            wildcard,
            no_auto_renew,
            domain_id,
        } => {
            let record = app
                .issue(
                    DomainId::new(domain_id),
                    &domain,
                    &sans,
                    wildcard,
                    !no_auto_renew,
                    &cancel,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Renew { certificate, force } => {
            let record = app.find(&certificate)?;
            let options = RenewOptions {
                force,
                ..Default::default()
            };
            match app.renew(record, options, &cancel).await? {
                Renewal::Renewed(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?)
                }
                Renewal::NotDue(record) => println!(
                    "{}: not due for renewal ({} day(s) left), use --force to renew now",
                    record.primary_domain(),
                    record
                        .days_until_expiry(chrono::Utc::now())
                        .unwrap_or_default()
                ),
            }
        }

        Commands::Revoke {
            certificate,
            reason,
        } => {
            let reason: RevocationReason = reason.parse().map_err(anyhow::Error::msg)?;
            let mut record = app.find(&certificate)?;
            if !app.revoke(&mut record, reason).await? {
                bail!("Failed to revoke certificate {}", record.id());
            }
            println!("{}: revoked ({})", record.primary_domain(), reason);
        }

        Commands::Validate { certificate } => {
            let record = app.find(&certificate)?;
            match app
                .manager()
                .validator()
                .check(&record, chrono::Utc::now())
            {
                Ok(details) => {
                    println!("{}", serde_json::to_string_pretty(&details)?);
                    println!("{}: valid", record.primary_domain());
                }
                Err(e) => {
                    if record.has_material() {
                        if let Ok(details) = inspect(record.certificate_pem()) {
                            println!("{}", serde_json::to_string_pretty(&details)?);
                        }
                    }
                    bail!("{}: invalid: {}", record.primary_domain(), e);
                }
            }
        }

        Commands::Health { json, metrics } => {
            let records = app.list()?;
            let summary = app.manager().check_health(&records);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "total {}  valid {}  expiring soon {}  expired {}  failed {}",
                    summary.total,
                    summary.valid,
                    summary.expiring_soon,
                    summary.expired,
                    summary.failed
                );
                for cert in &summary.certificates {
                    println!(
                        "  {:<40} {:<8} {:>6}  {}",
                        cert.domain,
                        cert.status,
                        cert.days_until_expiry
                            .map(|d| format!("{}d", d))
                            .unwrap_or_else(|| "-".to_string()),
                        if cert.needs_renewal { "renew" } else { "" }
                    );
                }
            }
            if metrics {
                print!("{}", app.manager().metrics().export_prometheus()?);
            }
        }

        Commands::Export {
            certificate,
            format,
            passphrase,
            output,
        } => {
            let format: ExportFormat = format.parse()?;
            let record = app.find(&certificate)?;
            let bytes = app
                .manager()
                .export(&record, format, passphrase.as_deref())?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(path = %path.display(), format = %format, "Exported certificate");
                }
                None if format == ExportFormat::Pem => {
                    print!("{}", String::from_utf8_lossy(&bytes));
                }
                None => bail!("PKCS#12 output is binary, use --output"),
            }
        }

        Commands::Run => {
            app.scheduler().run(cancel).await;
        }

        Commands::List { json } => {
            let records = app.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!(
                        "{}  {:<40} {:<8} {}",
                        record.id(),
                        record.primary_domain(),
                        record.status(),
                        record
                            .expires_at()
                            .map(|e| e.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }
    }

    Ok(())
}

/// Cancelled on Ctrl-C or SIGTERM
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown requested, cancelling in-flight work");
        trigger.cancel();
    });

    token
}
