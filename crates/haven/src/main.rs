//! `haven` - operator CLI for the haven presence engine.
//!
//! Works against the local SQLite store: family lifecycle, manual status
//! updates, and a long-running escalation monitor.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use haven::cli::{Cli, Command, ConfigCommand, FamilyCommand, MonitorCommand, StatusCommand};
use haven::store::FAMILIES;
use haven::{
    init_logging, Clock, Config, DocumentStore, EscalationEngine, Family, PresenceSynchronizer,
    SafetyStatus, SqliteStore, SystemClock,
};

#[derive(Debug)]
struct Runtime {
    config: Config,
    store: Arc<SqliteStore>,
    clock: Arc<dyn Clock>,
}

impl Runtime {
    fn open(config: Config) -> Result<Self> {
        let path = config.database_path();
        let store = SqliteStore::open(&path)
            .with_context(|| format!("opening store at {}", path.display()))?;
        Ok(Self {
            config,
            store: Arc::new(store),
            clock: Arc::new(SystemClock),
        })
    }

    fn engine(&self) -> EscalationEngine {
        EscalationEngine::new(
            Arc::clone(&self.store) as Arc<dyn DocumentStore>,
            Arc::clone(&self.clock),
            self.config.escalation.clone(),
        )
    }

    fn session(&self, user: &str) -> PresenceSynchronizer {
        PresenceSynchronizer::new(
            Arc::clone(&self.store) as Arc<dyn DocumentStore>,
            self.engine(),
            Arc::clone(&self.clock),
            user,
        )
    }

    async fn family(&self, code: &str) -> Result<Family> {
        let Some(document) = self.store.get_document(FAMILIES, code).await? else {
            bail!("family {code} does not exist");
        };
        Ok(Family::from_document(code, &document)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        Command::Family(family_cmd) => handle_family(&Runtime::open(config)?, family_cmd).await,
        Command::Status(status_cmd) => handle_status(&Runtime::open(config)?, status_cmd).await,
        Command::Monitor(monitor_cmd) => handle_monitor(&Runtime::open(config)?, &monitor_cmd).await,
    }
}

async fn handle_family(runtime: &Runtime, cmd: FamilyCommand) -> Result<()> {
    match cmd {
        FamilyCommand::Create { user, name } => {
            let session = runtime.session(&user);
            let family = session.create_family(name).await?;
            println!("{}", family.code);
        }
        FamilyCommand::Join { code, user } => {
            let session = runtime.session(&user);
            let family = session.join_family(&code).await?;
            println!("{user} is a member of {} ({} members)", family.code, family.members.len());
        }
        FamilyCommand::Leave { code, user } => {
            let session = runtime.session(&user);
            session.attach(&code).await?;
            let family = session.leave_family().await?;
            session.shutdown();
            if family.is_archived {
                println!("{user} left {code}; the family is now archived");
            } else {
                println!("{user} left {code}");
            }
        }
        FamilyCommand::Show { code, json } => {
            let family = runtime.family(&code).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&family)?);
            } else {
                print_family(&family);
            }
        }
    }
    Ok(())
}

fn print_family(family: &Family) {
    println!("Family {}", family.code);
    println!("============");
    if let Some(name) = &family.name {
        println!("Name:      {name}");
    }
    println!("Archived:  {}", family.is_archived);
    println!("Members:   {}", family.members.len());
    println!();
    for member in &family.members {
        let admin = if member.is_admin { " (admin)" } else { "" };
        println!("  {}{admin}", member.user_id);
        println!("    Status:       {}", member.status);
        println!("    Last update:  {}", member.last_update.to_rfc3339());
        if let Some(reason) = &member.auto_update_reason {
            println!("    Auto reason:  {reason}");
        }
    }
}

async fn handle_status(runtime: &Runtime, cmd: StatusCommand) -> Result<()> {
    match cmd {
        StatusCommand::Set { code, user, status } => {
            let session = runtime.session(&user);
            session.attach(&code).await?;
            let result = session.update_user_status(SafetyStatus::parse(&status)).await;
            session.shutdown();

            let member = result?;
            println!("{user}: {} at {}", member.status, member.last_update.to_rfc3339());
        }
    }
    Ok(())
}

async fn handle_monitor(runtime: &Runtime, cmd: &MonitorCommand) -> Result<()> {
    if cmd.poll_secs == 0 {
        bail!("--poll-secs must be at least 1");
    }
    let family = runtime.family(&cmd.code).await?;
    if family.is_archived {
        bail!("family {} is archived", cmd.code);
    }

    let engine = runtime.engine();
    engine.initialize_monitoring(&family.code, &family.members).await?;
    info!(
        family = %family.code,
        members = family.members.len(),
        timers = engine.armed_timers(&family.code).len(),
        "Monitoring started"
    );

    let mut poll = tokio::time::interval(Duration::from_secs(cmd.poll_secs));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            _ = poll.tick() => {
                // Status writes from other `haven` processes only reach this
                // process's watchers through a re-read.
                if let Err(e) = runtime.store.refresh_watched() {
                    warn!(error = %e, "Failed to refresh watched documents");
                }
            }
        }
    }

    engine.shutdown();
    info!(family = %family.code, "Monitoring stopped");
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                let escalation = &config.escalation;
                let location = &config.location;
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Escalation]");
                println!(
                    "  Not yet responded after: {}s",
                    escalation.not_yet_responded_after_secs
                );
                println!("  Unknown after:           {}s", escalation.unknown_after_secs);
                println!("  Location fresh for:      {}s", escalation.location_fresh_secs);
                println!(
                    "  Defer when located:      {}",
                    escalation.defer_unknown_when_located
                );
                println!();
                println!("[Location]");
                println!("  Permission timeout:      {}ms", location.permission_timeout_ms);
                println!(
                    "  Current fix timeout:     {}ms",
                    location.current_location_timeout_ms
                );
                println!("  Max fix age:             {}ms", location.max_location_age_ms);
                println!("  Background task:         {}", location.background_task_id);
                println!("  Default mode:            {}", location.default_mode);
                println!();
                println!("[Store]");
                println!("  Database path:           {}", config.database_path().display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
