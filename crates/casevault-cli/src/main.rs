//! Casevault CLI - data protection and compliance tooling

use anyhow::{anyhow, Context};
use casevault_core::audit::AuditTrail;
use casevault_core::compliance::{ComplianceOrchestrator, ExportPolicy};
use casevault_core::config::Config;
use casevault_core::consent::{ConsentStore, ConsentType};
use casevault_core::crypto::{FieldCipher, KeyManager, MasterKey, MASTER_KEY_ENV};
use casevault_core::records::RecordStore;
use casevault_core::storage::Database;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "casevault")]
#[command(author, version, about = "Data protection and compliance tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Master key management
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Audit trail inspection
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Export all personal data held for a user
    Export {
        /// User ID
        user_id: Uuid,
        /// Write the JSON document to this file instead of stdout
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },

    /// Erase all personal data held for a user
    Erase {
        /// User ID
        user_id: Uuid,
        /// Confirmation text; must be exactly "DELETE ALL MY DATA"
        #[arg(long)]
        confirm: String,
        /// Reason recorded with the erasure audit entry
        #[arg(long, default_value = "data subject request")]
        reason: String,
    },

    /// Consent management
    Consent {
        #[command(subcommand)]
        action: ConsentAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Generate a new master key and print it base64-encoded
    Generate,
}

#[derive(Subcommand)]
enum AuditAction {
    /// Verify the hash chain
    Verify {
        /// Start from this sequence number instead of the beginning
        #[arg(long)]
        from_seq: Option<i64>,
    },
    /// Show the most recent entries
    Recent {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum ConsentAction {
    /// Record a consent grant
    Grant {
        user_id: Uuid,
        /// Consent type (data_processing, data_portability, data_erasure_request)
        consent_type: String,
    },
    /// Withdraw a consent
    Revoke {
        user_id: Uuid,
        consent_type: String,
    },
    /// List a user's consent records
    List { user_id: Uuid },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Print the configuration file path
    Path,
}

struct Services {
    trail: AuditTrail,
    consents: ConsentStore,
    compliance: ComplianceOrchestrator,
    _db: Database,
}

async fn open_services() -> anyhow::Result<Services> {
    let config = Config::load()?;
    let db = Database::open_default().await.context("Failed to open database")?;
    let trail = AuditTrail::new(db.pool().clone());

    let cipher = if config.security.encryption_enabled {
        FieldCipher::new(KeyManager::from_env()?)
    } else {
        FieldCipher::disabled()
    };

    let records = RecordStore::new(db.pool().clone(), cipher, trail.clone());
    let consents = ConsentStore::new(db.pool().clone(), trail.clone());
    let policy = if config.compliance.export_requires_consent {
        ExportPolicy::RequireConsent(ConsentType::DataProcessing)
    } else {
        ExportPolicy::Unconditional
    };
    let compliance = ComplianceOrchestrator::new(
        db.pool().clone(),
        records,
        consents.clone(),
        trail.clone(),
    )
    .with_export_policy(policy);

    Ok(Services {
        trail,
        consents,
        compliance,
        _db: db,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("casevault=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Key { action } => cmd_key(action, cli.quiet),

        Commands::Audit { action } => {
            let services = open_services().await?;
            cmd_audit(&services.trail, action, cli.quiet).await
        }

        Commands::Export { user_id, output } => {
            let services = open_services().await?;
            cmd_export(&services.compliance, user_id, output.as_deref(), cli.quiet).await
        }

        Commands::Erase {
            user_id,
            confirm,
            reason,
        } => {
            let services = open_services().await?;
            cmd_erase(&services.compliance, user_id, &confirm, &reason, cli.quiet).await
        }

        Commands::Consent { action } => {
            let services = open_services().await?;
            cmd_consent(&services.consents, action, cli.quiet).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(cli.quiet).await,
    }
}

fn cmd_key(action: KeyAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        KeyAction::Generate => {
            let key = MasterKey::generate();
            println!("{}", key.to_base64());
            if !quiet {
                eprintln!();
                eprintln!("Store this key in the {} environment variable.", MASTER_KEY_ENV);
                eprintln!("Data encrypted under it is unrecoverable if the key is lost.");
            }
        }
    }
    Ok(())
}

async fn cmd_audit(trail: &AuditTrail, action: AuditAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        AuditAction::Verify { from_seq } => {
            let verification = trail.verify_chain(from_seq).await?;
            if verification.valid {
                if !quiet {
                    println!(
                        "Chain OK ({} entries verified)",
                        verification.entries_checked
                    );
                }
                Ok(())
            } else {
                let entry_id = verification
                    .broken_at
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Err(anyhow!(
                    "Audit chain integrity violation at entry {} (after {} entries)",
                    entry_id,
                    verification.entries_checked
                ))
            }
        }
        AuditAction::Recent { limit } => {
            for entry in trail.recent(limit).await? {
                let outcome = if entry.success { "ok" } else { "FAILED" };
                println!(
                    "{}  seq={:<6} {:<20} {:<8} {}/{} [{}]",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.seq,
                    entry.event_type,
                    entry.action,
                    entry.resource_type,
                    entry.resource_id,
                    outcome
                );
            }
            Ok(())
        }
    }
}

async fn cmd_export(
    compliance: &ComplianceOrchestrator,
    user_id: Uuid,
    output: Option<&std::path::Path>,
    quiet: bool,
) -> anyhow::Result<()> {
    let export = compliance.export_user_data(user_id).await?;
    let json = serde_json::to_string_pretty(&export)?;

    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write export to {}", path.display()))?;
            if !quiet {
                println!("Export written to {}", path.display());
            }
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn cmd_erase(
    compliance: &ComplianceOrchestrator,
    user_id: Uuid,
    confirm: &str,
    reason: &str,
    quiet: bool,
) -> anyhow::Result<()> {
    let report = compliance.delete_user_data(user_id, confirm, reason).await?;
    tracing::info!(user_id = %report.user_id, total = report.total_deleted(), "Erasure completed");
    if !quiet {
        println!("Erased user {}:", report.user_id);
        for (table, count) in &report.deleted_counts {
            println!("  {:<16} {} rows", table, count);
        }
        println!(
            "Preserved: {} audit entries, {} consent records",
            report.preserved_audit_entries, report.preserved_consents
        );
    }
    Ok(())
}

async fn cmd_consent(
    consents: &ConsentStore,
    action: ConsentAction,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        ConsentAction::Grant {
            user_id,
            consent_type,
        } => {
            let consent_type = parse_consent_type(&consent_type)?;
            consents.grant(user_id, consent_type).await?;
            if !quiet {
                println!("Granted {} for {}", consent_type, user_id);
            }
        }
        ConsentAction::Revoke {
            user_id,
            consent_type,
        } => {
            let consent_type = parse_consent_type(&consent_type)?;
            consents.revoke(user_id, consent_type).await?;
            if !quiet {
                println!("Revoked {} for {}", consent_type, user_id);
            }
        }
        ConsentAction::List { user_id } => {
            for record in consents.list_for_user(user_id).await? {
                let state = if record.granted {
                    format!("granted {}", record.granted_at.format("%Y-%m-%d"))
                } else {
                    match record.revoked_at {
                        Some(at) => format!("revoked {}", at.format("%Y-%m-%d")),
                        None => "revoked".to_string(),
                    }
                };
                println!("{:<24} {}", record.consent_type, state);
            }
        }
    }
    Ok(())
}

fn parse_consent_type(s: &str) -> anyhow::Result<ConsentType> {
    ConsentType::parse(s).ok_or_else(|| {
        anyhow!(
            "Unknown consent type: {}. Valid types: data_processing, data_portability, data_erasure_request",
            s
        )
    })
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Casevault Health Check");
        println!("======================");
        println!();
    }

    let mut all_ok = true;

    // Check configuration
    let encryption_enabled = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            config.security.encryption_enabled
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
            true
        }
    };

    // Check master key
    if encryption_enabled {
        match KeyManager::from_env() {
            Ok(_) => {
                if !quiet {
                    println!("[OK] Master Key: Configured");
                }
            }
            Err(e) => {
                all_ok = false;
                if !quiet {
                    println!("[!!] Master Key: {}", e);
                    println!("     Set the {} environment variable", MASTER_KEY_ENV);
                }
            }
        }
    } else if !quiet {
        println!("[!!] Master Key: Encryption disabled in configuration");
    }

    // Check database and audit chain
    match Database::open_default().await {
        Ok(db) => {
            match db.health_check().await {
                Ok(()) => {
                    if !quiet {
                        println!("[OK] Database: {}", db.path().display());
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: Unhealthy - {}", e);
                    }
                }
            }

            let trail = AuditTrail::new(db.pool().clone());
            match trail.verify_chain(None).await {
                Ok(v) if v.valid => {
                    if !quiet {
                        println!("[OK] Audit Chain: Valid ({} entries)", v.entries_checked);
                    }
                }
                Ok(v) => {
                    all_ok = false;
                    if !quiet {
                        let entry_id = v
                            .broken_at
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        println!("[!!] Audit Chain: BROKEN at entry {}", entry_id);
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Audit Chain: Error - {}", e);
                    }
                }
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Error - {}", e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            println!("Some checks failed.");
        }
    }

    if all_ok {
        Ok(())
    } else {
        Err(anyhow!("health check failed"))
    }
}
