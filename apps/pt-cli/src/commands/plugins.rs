// plugins.rs - Plugin subcommands: list, show, check.

use clap::Subcommand;
use pt_audit::MemoryAuditSink;
use pt_manifest::Permission;
use pt_policy::PermissionManager;
use pt_router::HostConfig;

#[derive(Subcommand)]
pub enum PluginCommands {
    /// List every plugin directory found by discovery.
    List {
        /// Only show plugins whose manifest was rejected.
        #[arg(long)]
        rejected: bool,
    },
    /// Show one plugin's manifest summary and boundaries.
    Show { id: String },
    /// Explain whether a plugin may perform an action.
    Check {
        id: String,
        /// Action description, matched against forbidden actions.
        action: String,
        /// Permission the action needs (e.g. "filesystem.read").
        permission: String,
    },
}

pub fn execute(cmd: &PluginCommands, config: &HostConfig) -> anyhow::Result<()> {
    let index = super::discover(config)?;

    match cmd {
        PluginCommands::List { rejected } => {
            if index.is_empty() {
                println!("No plugins found under {}", config.plugins_dir.display());
                return Ok(());
            }

            println!(
                "{:<24} {:<10} {:<20} {:<9} WARNINGS",
                "ID", "VERSION", "POLICY", "STATUS"
            );
            println!("{}", "-".repeat(80));
            for plugin in index.plugins() {
                if *rejected && plugin.is_valid() {
                    continue;
                }
                let (version, policy) = match plugin.manifest.as_deref() {
                    Some(m) => (m.plugin.version.clone(), m.governing_policy().to_string()),
                    None => ("-".to_string(), "-".to_string()),
                };
                println!(
                    "{:<24} {:<10} {:<20} {:<9} {}",
                    plugin.id,
                    version,
                    policy,
                    if plugin.is_valid() { "valid" } else { "rejected" },
                    plugin.validation.warnings.len(),
                );
            }
        }

        PluginCommands::Show { id } => {
            let plugin = index
                .get(id)
                .ok_or_else(|| anyhow::anyhow!("No plugin '{}' under {}", id, config.plugins_dir.display()))?;

            println!("Plugin:   {} ({})", plugin.name(), plugin.id);
            println!("Manifest: {}", plugin.manifest_path.display());

            let Some(manifest) = plugin.manifest.as_deref() else {
                println!("Status:   rejected");
                for issue in &plugin.validation.errors {
                    println!("  error: {}", issue);
                }
                return Ok(());
            };

            println!("Version:  {}", manifest.plugin.version);
            if !manifest.policy.sacred_promise.is_empty() {
                println!("Promise:  {}", manifest.policy.sacred_promise);
            }
            println!();
            println!("Intents:");
            for intent in &manifest.capabilities.intents {
                println!("  \"{}\" -> {}", intent.pattern, intent.handler);
            }
            for warning in &plugin.validation.warnings {
                println!("  warning: {}", warning);
            }
            println!();

            let permissions = PermissionManager::new(manifest, Box::new(MemoryAuditSink::new()));
            print!("{}", permissions.boundaries_summary());
        }

        PluginCommands::Check {
            id,
            action,
            permission,
        } => {
            let manifest = index
                .manifest(id)
                .ok_or_else(|| anyhow::anyhow!("No valid plugin '{}'", id))?;
            let permission: Permission = permission.parse()?;

            let permissions = PermissionManager::new(manifest, Box::new(MemoryAuditSink::new()));
            let trace = permissions.evaluate_with_trace(action, permission);
            for step in &trace.steps {
                println!("  {:<20} {}", step.check, step.outcome);
            }
            println!();
            println!(
                "{}: {}",
                if trace.decision.allowed { "ALLOWED" } else { "DENIED" },
                trace.decision.reason
            );
            if permissions.needs_consent_for(permission, action) {
                println!("The user will be asked before this runs.");
            }
        }
    }

    Ok(())
}
