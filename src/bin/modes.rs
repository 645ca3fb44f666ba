//! Subject Mode CLI
//!
//! Lists destination subject modes and switches read-only subjects back to
//! READWRITE, e.g. after an interrupted migration.
//!
//! Usage:
//!   schema-modes list
//!   schema-modes fix orders-value
//!   schema-modes fix-all --yes

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use schema_registry_migrator::{HttpRegistryClient, MigratorConfig, Mode, RegistryClient, RegistrySnapshot};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-modes")]
#[command(about = "Inspect and repair subject modes on the destination registry")]
struct Cli {
    /// Configuration file layered over migrator.toml and MIGRATOR_* variables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Registry URL (defaults to the configured destination)
    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every subject with its mode
    List,

    /// Switch one subject to READWRITE
    Fix {
        subject: String,
    },

    /// Switch every subject that is not READWRITE
    FixAll {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref().and_then(|p| p.to_str());
    let config = MigratorConfig::load_from(config_path).context("loading configuration")?;

    let mut endpoint = config.destination;
    if let Some(url) = cli.url {
        endpoint.url = url;
    }
    if cli.username.is_some() || cli.password.is_some() {
        endpoint.username = cli.username;
        endpoint.password = cli.password;
    }
    endpoint.validate()?;
    let client = HttpRegistryClient::new(&endpoint)?;

    match cli.command {
        Commands::List => {
            let snapshot = RegistrySnapshot::fetch_with_config(&client)?;
            println!("📋 {} subjects on {}\n", snapshot.subjects().len(), client.describe());
            for subject in snapshot.subjects() {
                let mode = subject.mode.unwrap_or(Mode::ReadWrite);
                let marker = if mode.accepts_new_versions() { "  " } else { "⚠️ " };
                let compatibility = subject
                    .compatibility
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                println!(
                    "{} {:<60} {:<18} {:<24} {} versions",
                    marker,
                    subject.name,
                    mode.as_str(),
                    compatibility,
                    subject.versions.len()
                );
            }
            Ok(())
        }

        Commands::Fix { subject } => {
            let mode = client.get_mode(&subject)?;
            if mode == Mode::ReadWrite {
                println!("✅ {} is already READWRITE", subject);
                return Ok(());
            }
            client.set_mode(&subject, Mode::ReadWrite)?;
            println!("✅ {}: {} -> READWRITE", subject, mode);
            Ok(())
        }

        Commands::FixAll { yes } => {
            let stuck: Vec<(String, Mode)> = RegistrySnapshot::fetch_with_config(&client)?
                .subjects()
                .iter()
                .filter_map(|s| s.mode.map(|mode| (s.name.clone(), mode)))
                .filter(|(_, mode)| *mode != Mode::ReadWrite)
                .collect();
            if stuck.is_empty() {
                println!("✅ Every subject is READWRITE");
                return Ok(());
            }

            println!("Subjects not in READWRITE mode:");
            for (subject, mode) in &stuck {
                println!("   {} ({})", subject, mode);
            }
            if !yes && !confirm(&format!("Switch {} subjects to READWRITE?", stuck.len()))? {
                println!("Aborted");
                return Ok(());
            }

            let mut failed = 0;
            for (subject, mode) in &stuck {
                match client.set_mode(subject, Mode::ReadWrite) {
                    Ok(()) => println!("✅ {}: {} -> READWRITE", subject, mode),
                    Err(e) => {
                        eprintln!("❌ {}: {}", subject, e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} subjects could not be switched", failed, stuck.len());
            }
            Ok(())
        }
    }
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
