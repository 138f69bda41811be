//! CLI entry point for graft.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use graft_core::{ExclusionPolicy, GraftConfig, TypeName};
use graft_cli::{check_model, reconcile, ReconcileRequest};

#[derive(Parser)]
#[command(name = "graft")]
#[command(about = "Reconcile detached aggregate graphs against a stored graph")]
struct Cli {
    /// Config file prefix (default: graft).
    #[arg(short, long, default_value = "graft", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile an incoming payload against a seeded store.
    Reconcile {
        /// Model file (JSON).
        #[arg(long)]
        model: PathBuf,

        /// Seed file: type name to array of root payloads.
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Incoming payload for the root type.
        #[arg(long)]
        incoming: PathBuf,

        /// Root type of the aggregate.
        #[arg(long)]
        root: String,

        /// Relation path to load on the stored root (repeatable, dotted).
        #[arg(long = "include")]
        includes: Vec<String>,

        /// Write the staged changes to the store.
        #[arg(long)]
        commit: bool,

        /// Override the configured exclusion policy: relation-path, parent-type.
        #[arg(long)]
        exclusion: Option<String>,
    },
    /// Validate a model file.
    CheckModel {
        #[arg(long)]
        model: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut config = GraftConfig::load(&cli.config)?;

    let report = match cli.command {
        Command::Reconcile {
            model,
            seed,
            incoming,
            root,
            includes,
            commit,
            exclusion,
        } => {
            if let Some(exclusion) = exclusion.as_deref() {
                config.reconcile.exclusion = parse_exclusion(exclusion)?;
            }
            let request = ReconcileRequest {
                model,
                seed,
                incoming,
                root: TypeName::from(root),
                includes,
                commit,
            };
            serde_json::to_value(reconcile(&config, &request)?)?
        }
        Command::CheckModel { model } => serde_json::to_value(check_model(&model)?)?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_exclusion(s: &str) -> anyhow::Result<ExclusionPolicy> {
    match s.to_lowercase().replace('_', "-").as_str() {
        "relation-path" => Ok(ExclusionPolicy::RelationPath),
        "parent-type" => Ok(ExclusionPolicy::ParentType),
        _ => anyhow::bail!("Invalid exclusion policy: {s}. Choose: relation-path, parent-type"),
    }
}
