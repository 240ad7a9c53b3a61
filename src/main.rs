use chatguard::config::Config;
use chatguard::gateway::NullGateway;
use chatguard::moderation::{Disposition, ModerationService};
use chatguard::punishment::PunishmentKind;
use clap::{Arg, Command};
use log::LevelFilter;
use std::collections::HashMap;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    let matches = Command::new("chatguard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time chat moderation decision engine")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("chatguard.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .help("Print stored moderation totals and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        if let Err(e) = Config::default().to_file(path) {
            eprintln!("Failed to write configuration: {e}");
            process::exit(1);
        }
        println!("Default configuration written to {path}");
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = if std::path::Path::new(config_path).exists() {
        match Config::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading configuration: {e}");
                process::exit(1);
            }
        }
    } else {
        log::warn!("{config_path} not found, using built-in defaults");
        Config::default()
    };

    if matches.get_flag("test-config") {
        match config.validate() {
            Ok(()) => {
                println!("Configuration is valid.");
                println!("  escalation tiers: {}", config.punishments.escalation.len());
                println!("  enabled categories: {}", config.categories.enabled.join(", "));
            }
            Err(e) => {
                println!("Configuration is invalid: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if matches.get_flag("stats") {
        match chatguard::store::Database::open(&config.database.path)
            .and_then(|db| db.global_counts())
        {
            Ok(counts) => {
                println!("Violations:     {}", counts.total_violations);
                println!("Unique players: {}", counts.unique_players);
                println!("Mutes:          {}", counts.total_mutes);
                println!("Kicks:          {}", counts.total_kicks);
                println!("Bans:           {}", counts.total_bans);
            }
            Err(e) => {
                eprintln!("Failed to read statistics: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = run_demo(config).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Interactive loop: each stdin line of the form `name: message` runs one
/// pipeline pass for a synthetic player. `name appeals <mute|ban> reason`
/// files an appeal so the whole workflow can be exercised from a terminal.
async fn run_demo(config: Config) -> anyhow::Result<()> {
    let gateway = Arc::new(NullGateway);
    let service = ModerationService::new(config, gateway)?;
    let _tasks = service.start_background_tasks();

    println!("chatguard demo - type 'name: message', ctrl-d to exit");
    let mut players: HashMap<String, Uuid> = HashMap::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let line = match line {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (name, message) = match line.split_once(':') {
            Some((name, message)) => (name.trim().to_string(), message.trim().to_string()),
            None => {
                println!("expected 'name: message'");
                continue;
            }
        };
        let player = *players
            .entry(name.clone())
            .or_insert_with(Uuid::new_v4);

        if let Some(rest) = message.strip_prefix("appeals ") {
            handle_demo_appeal(&service, player, &name, rest);
            continue;
        }

        match service.process_chat(player, &name, &message).await {
            Disposition::Deliver => println!("  [deliver] <{name}> {message}"),
            Disposition::DeliverRewritten(text) => {
                println!("  [rewritten] <{name}> {text}")
            }
            Disposition::Suppress { reason } => println!("  [blocked: {reason}]"),
        }
    }

    println!("\n{:#?}", service.stats());
    Ok(())
}

fn handle_demo_appeal(service: &ModerationService, player: Uuid, name: &str, input: &str) {
    let mut parts = input.splitn(2, ' ');
    let kind = match parts.next().unwrap_or_default() {
        "mute" => PunishmentKind::Mute,
        "ban" => PunishmentKind::Ban,
        other => {
            println!("  cannot appeal {other:?}, use mute or ban");
            return;
        }
    };
    let reason = parts.next().unwrap_or("no reason given");
    match service.appeals().create(player, name, kind, reason) {
        Ok(id) => println!("  appeal #{id} filed"),
        Err(e) => println!("  appeal rejected: {e}"),
    }
}
