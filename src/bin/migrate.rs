//! Schema Registry Migration CLI
//!
//! Compares two schema registries and migrates subjects from the source to
//! the destination.
//!
//! Usage:
//!   schema-migrate compare
//!   schema-migrate run --enable --execute --preserve-ids --auto-compatibility
//!   schema-migrate --config prod.toml --format json run --enable
//!   schema-migrate config

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use schema_registry_migrator::{
    Cleanup, HttpRegistryClient, MigrationSettings, Migrator, MigratorConfig, Mode,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-migrate")]
#[command(about = "Migrate schemas between two Confluent-compatible schema registries")]
struct Cli {
    /// Configuration file layered over migrator.toml and MIGRATOR_* variables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the registries and list ID collisions, without writing
    Compare,

    /// Run a migration (a dry run unless --execute is given)
    Run {
        /// Enable migration (otherwise only the comparison runs)
        #[arg(long)]
        enable: bool,
        /// Write to the destination instead of a dry run
        #[arg(long)]
        execute: bool,
        /// Keep source schema ids on empty destination subjects
        #[arg(long)]
        preserve_ids: bool,
        /// Retry incompatible versions with compatibility NONE
        #[arg(long)]
        auto_compatibility: bool,
        /// Delete every destination subject first
        #[arg(long, conflicts_with = "cleanup_subject")]
        cleanup: bool,
        /// Delete this destination subject first (repeatable)
        #[arg(long)]
        cleanup_subject: Vec<String>,
        /// Hard-delete during cleanup
        #[arg(long)]
        permanent: bool,
        /// Put the destination registry in IMPORT mode while migrating
        #[arg(long)]
        global_import: bool,
        /// Global destination mode once migration finishes
        #[arg(long)]
        mode_after: Option<Mode>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Also write it to this file
        #[arg(short, long)]
        save: Option<PathBuf>,
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

    match cli.command {
        Commands::Config { save } => {
            print!("{}", config.to_toml()?);
            if let Some(path) = save {
                let path = path.to_string_lossy();
                config.save(&path)?;
                eprintln!("✅ Saved configuration to {}", path);
            }
            Ok(())
        }

        Commands::Compare => {
            config.validate()?;
            let source = HttpRegistryClient::new(&config.source)?;
            let destination = HttpRegistryClient::new(&config.destination)?;
            let migrator = Migrator::new(&source, &destination, MigrationSettings::default());
            let report = migrator.run()?;
            print_report(&cli.format, &report)
        }

        Commands::Run {
            enable,
            execute,
            preserve_ids,
            auto_compatibility,
            cleanup,
            cleanup_subject,
            permanent,
            global_import,
            mode_after,
        } => {
            config.validate()?;
            let mut settings = config.settings();
            settings.enabled |= enable;
            settings.dry_run &= !execute;
            settings.preserve_ids |= preserve_ids;
            settings.auto_compatibility |= auto_compatibility;
            settings.permanent_delete |= permanent;
            settings.global_import_mode |= global_import;
            if cleanup {
                settings.cleanup = Cleanup::All;
            } else if !cleanup_subject.is_empty() {
                settings.cleanup = Cleanup::Subjects(cleanup_subject);
            }
            if mode_after.is_some() {
                settings.mode_after_migration = mode_after;
            }

            let source = HttpRegistryClient::new(&config.source)?;
            let destination = HttpRegistryClient::new(&config.destination)?;
            let report = Migrator::new(&source, &destination, settings).run()?;
            print_report(&cli.format, &report)
        }
    }
}

fn print_report(format: &str, report: &schema_registry_migrator::MigrationReport) -> anyhow::Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(report)?),
        _ => print!("{}", report),
    }

    if report.cancelled {
        eprintln!("\n⚠️  Migration was cancelled");
    } else if report.has_problems() {
        eprintln!("\n⚠️  Migration finished with problems - review the report");
    } else if report.migration_enabled && !report.dry_run {
        eprintln!("\n✅ Migration complete");
    }
    Ok(())
}
