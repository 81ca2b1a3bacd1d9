// audit.rs - Audit subcommands: verify, tail.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use pt_audit::{AuditError, AuditLog};
use pt_router::HostConfig;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the audit log hash chain integrity.
    Verify {
        #[command(flatten)]
        source: LogSource,
    },
    /// Show recent audit events.
    Tail {
        #[command(flatten)]
        source: LogSource,
        /// Number of events to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
}

#[derive(Args)]
pub struct LogSource {
    /// Plugin whose log to read (.pt/audit/<plugin>.audit.jsonl).
    #[arg(long, required_unless_present = "log")]
    plugin: Option<String>,
    /// Explicit path to an audit log.
    #[arg(long, conflicts_with = "plugin")]
    log: Option<PathBuf>,
}

impl LogSource {
    fn path(&self, config: &HostConfig) -> anyhow::Result<PathBuf> {
        match (&self.log, &self.plugin) {
            (Some(log), _) => Ok(log.clone()),
            (None, Some(plugin)) => config
                .sandbox_config()
                .audit_path(plugin)
                .ok_or_else(|| anyhow::anyhow!("No audit directory configured")),
            (None, None) => anyhow::bail!("Pass --plugin or --log"),
        }
    }
}

pub fn execute(cmd: &AuditCommands, config: &HostConfig) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Verify { source } => {
            let path = source.path(config)?;
            if !path.is_file() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            match AuditLog::verify_chain(&path) {
                Ok(count) => {
                    println!("Audit log verified: {} event(s), hash chain intact.", count);
                }
                Err(AuditError::IntegrityViolation {
                    line,
                    expected,
                    actual,
                }) => {
                    println!("INTEGRITY VIOLATION at line {}:", line);
                    println!("  Expected previous_hash: {}", expected);
                    println!("  Actual previous_hash:   {}", actual);
                    println!();
                    println!("The audit log may have been tampered with.");
                    anyhow::bail!("Audit log integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        AuditCommands::Tail { source, n } => {
            let path = source.path(config)?;
            if !path.is_file() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            let events = AuditLog::read_all(&path)?;
            let start = events.len().saturating_sub(*n);
            let recent = &events[start..];
            if recent.is_empty() {
                println!("No audit events.");
                return Ok(());
            }

            println!(
                "{:<20} {:<20} {:<20} {:<22} TARGET",
                "TIMESTAMP", "PLUGIN", "ACTION", "PERMISSION"
            );
            println!("{}", "-".repeat(100));
            for event in recent {
                println!(
                    "{:<20} {:<20} {:<20} {:<22} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.plugin_id,
                    format!("{:?}", event.action),
                    event.permission.as_deref().unwrap_or("-"),
                    event.target.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}
