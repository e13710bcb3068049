use anyhow::{bail, Context as _, Result};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use gpo_entry::load_gpos;
use policies::{Context, Manager, ManagerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "policyctl", version, about = "Apply and inspect group policies")]
struct Cli {
    /// Configuration file (YAML or JSON)
    #[arg(long, global = true, value_name = "FILE", env = "GPOLICY_CONFIG")]
    config: Option<PathBuf>,

    /// Abort the operation after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the policy last applied to a user, or to this machine
    Dump {
        /// User name; defaults to this machine
        target: Option<String>,
        /// Show which GPO each setting comes from
        #[arg(long)]
        rules: bool,
        /// Show settings shadowed by higher precedence GPOs
        #[arg(long)]
        overridden: bool,
    },
    /// Apply a GPO list, highest precedence first
    Apply {
        /// User name, or the hostname with --machine
        target: String,
        /// GPO list file
        #[arg(long, value_name = "FILE")]
        gpos: PathBuf,
        #[arg(long)]
        machine: bool,
    },
    /// Print when policy was last applied
    LastUpdate {
        target: Option<String>,
        #[arg(long)]
        machine: bool,
    },
    /// Print the subscription entitlement
    Status {
        /// Query the subscription service instead of using the last known state
        #[arg(long)]
        refresh: bool,
    },
    /// Print version and exit
    Version,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_path = cli.config;
    let manager = || -> Result<Manager> {
        let config = ManagerConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
        Ok(Manager::from_config(config))
    };
    let ctx = match cli.timeout {
        Some(secs) => Context::with_timeout(Duration::from_secs(secs)),
        None => Context::background(),
    };

    match cli.cmd {
        Commands::Dump {
            target,
            rules,
            overridden,
        } => {
            let manager = manager()?;
            let target = match target {
                Some(t) => t,
                None => manager.hostname()?,
            };
            if !overridden {
                manager.refresh_status(&ctx)?;
            }
            let dump = manager
                .dump_policies(&ctx, &target, rules, overridden)
                .with_context(|| format!("Failed to dump policies of {}", target))?;
            print!("{}", dump);
        }
        Commands::Apply {
            target,
            gpos,
            machine,
        } => {
            let gpos = load_gpos(&gpos).with_context(|| format!("Failed to load {}", gpos.display()))?;
            manager()?
                .apply_policy(&ctx, &target, machine, &gpos)
                .with_context(|| format!("Failed to apply policy to {}", target))?;
            tracing::info!("Applied {} GPO(s) to {}", gpos.len(), target);
        }
        Commands::LastUpdate { target, machine } => {
            let target = match (target, machine) {
                (Some(t), _) => t,
                (None, true) => String::new(),
                (None, false) => bail!("a target is required unless --machine is given"),
            };
            let updated = manager()?.last_update_for(&ctx, &target, machine)?;
            println!("{}", updated.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        Commands::Status { refresh } => {
            let manager = manager()?;
            let entitled = if refresh {
                manager.refresh_status(&ctx)?
            } else {
                manager.status()
            };
            println!("{}", if entitled { "enabled" } else { "disabled" });
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
