use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use bark::audit::{verify_audit_log_file, AuditTrail};
use bark::config::BarkConfig;
use bark::crypto::FileKeyStore;
use bark::directive::{Directive, DirectiveAuthority, DirectiveContent, LoggingHandler};
use bark::error::BarkError;
use bark::value::{format_timestamp, parse_timestamp};

#[derive(Parser)]
#[command(name = "bark")]
#[command(about = "Directive authorization and audit trail")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); BARK__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Key ceremony operations
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Create and sign a directive
    Create {
        /// JSON file holding the content as {"type": ..., "data": ...}
        #[arg(long)]
        content: PathBuf,

        /// Dimension tag (repeatable)
        #[arg(short, long = "dimension", required = true)]
        dimensions: Vec<String>,

        /// Seconds until expiration (defaults to the configured maximum)
        #[arg(long, allow_hyphen_values = true, conflicts_with = "no_expiration")]
        ttl: Option<i64>,

        /// Create a directive that never expires
        #[arg(long)]
        no_expiration: bool,
    },

    /// Execute a stored directive by id, or a directive read from a file
    Execute {
        id: Option<Uuid>,

        #[arg(long, conflicts_with = "id")]
        file: Option<PathBuf>,
    },

    /// Revoke a stored directive
    Revoke { id: Uuid },

    /// Import a signed directive from a JSON file
    Ingest { file: PathBuf },

    /// List active directives
    List {
        /// Evaluate activity at this RFC 3339 instant instead of now
        #[arg(long)]
        as_of: Option<String>,
    },

    /// Audit trail operations
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate and store the operator key pair if none exists
    Bootstrap,

    /// Print the operator public key
    Show,
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Show recent entries, newest first
    Query {
        #[arg(long)]
        since: Option<String>,

        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },

    /// Generate a JSON report for a closed interval
    Report {
        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify entry signatures in an audit log file
    Verify {
        /// Log file to verify (defaults to the active log)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    parse_timestamp(raw).map_err(|e| format!("Invalid timestamp {}: {}", raw, e).into())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Ok(serde_json::from_slice(&raw)?)
}

fn print_directive(directive: &Directive) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(directive)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bark=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = BarkConfig::load(cli.config.as_deref())?;
    info!("Configuration loaded");

    let keys = Arc::new(FileKeyStore::open(&config.keystore.path, &config.keystore.service)?);
    let audit = AuditTrail::open(&config.operator_id, &config.audit)?;
    let authority =
        DirectiveAuthority::from_config(&config, keys, audit.clone(), Arc::new(LoggingHandler))?;

    let outcome = run(cli.command, &config, &authority, &audit).await;
    audit.close().await?;
    outcome
}

async fn run(
    command: Commands,
    config: &BarkConfig,
    authority: &DirectiveAuthority,
    audit: &AuditTrail,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Keys { command } => match command {
            KeyCommands::Bootstrap => {
                let public_key = authority.bootstrap_keys().await?;
                println!("{}", hex::encode(public_key));
            }
            KeyCommands::Show => {
                println!("{}", hex::encode(authority.public_key()?));
            }
        },

        Commands::Create {
            content,
            dimensions,
            ttl,
            no_expiration,
        } => {
            let content: DirectiveContent = read_json(&content)?;
            let ttl = match (no_expiration, ttl) {
                (true, _) => None,
                (false, Some(secs)) => {
                    Some(Duration::try_seconds(secs).ok_or(BarkError::ExpirationOutOfRange(secs))?)
                }
                (false, None) => Some(authority.policy().max_expiration),
            };
            let directive = authority.create(content, dimensions, ttl).await?;
            print_directive(&directive)?;
        }

        Commands::Execute { id, file } => {
            let directive = match (id, file) {
                (Some(id), _) => authority.get(id).await.ok_or(BarkError::NotFound(id))?,
                (None, Some(file)) => read_json(&file)?,
                (None, None) => return Err("Provide a directive id or --file".into()),
            };
            authority.execute(&directive).await?;
            println!("Executed {}", directive.summary());
        }

        Commands::Revoke { id } => {
            let revoked = authority.revoke(id).await?;
            print_directive(&revoked)?;
        }

        Commands::Ingest { file } => {
            let directive: Directive = read_json(&file)?;
            let summary = directive.summary();
            authority.ingest(directive).await?;
            println!("Ingested {}", summary);
        }

        Commands::List { as_of } => {
            let as_of = as_of.as_deref().map(parse_instant).transpose()?;
            let active = authority.list_active(as_of).await;
            println!("{}", serde_json::to_string_pretty(&active)?);
        }

        Commands::Audit { command } => match command {
            AuditCommands::Query { since, limit } => {
                let since = since.as_deref().map(parse_instant).transpose()?;
                for entry in audit.query(since, limit).await? {
                    println!("{}", serde_json::to_string(&entry)?);
                }
            }
            AuditCommands::Report { start, end, output } => {
                let report = audit.report(parse_instant(&start)?, parse_instant(&end)?).await?;
                let json = report.to_json_pretty()?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, json)?;
                        info!(
                            "Wrote report of {} entries to {} at {}",
                            report.total_entries,
                            path.display(),
                            format_timestamp(&report.generated_at)
                        );
                    }
                    None => println!("{}", String::from_utf8_lossy(&json)),
                }
            }
            AuditCommands::Verify { path } => {
                let path = path.unwrap_or_else(|| config.audit.log_path.clone());
                let result = verify_audit_log_file(&path, &authority.public_key()?)?;
                println!(
                    "{} entries: {} signed, {} unsigned, {} invalid",
                    result.entry_count,
                    result.signed,
                    result.unsigned,
                    result.invalid_lines.len()
                );
                if !result.is_valid() {
                    return Err(format!("Invalid signatures at lines {:?}", result.invalid_lines).into());
                }
            }
        },
    }

    Ok(())
}
