//! Schema Registry CLI
//!
//! Runs registry operations against the snapshot file named in the
//! configuration and prints the results as JSON.
//!
//! Usage:
//!   schema-registry register orders-value order.avsc
//!   schema-registry get orders-value latest
//!   schema-registry config --subject orders-value --set BACKWARD

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use schema_registry::api::{
    CompatibilityCheckResponse, ConfigResponse, ConfigUpdate, ErrorResponse, RegisterSchemaResponse,
    SchemaResponse, SubjectVersionRef, SubjectVersionResponse,
};
use schema_registry::{
    CompatibilityMode, RegistryConfig, SchemaError, SchemaFormat, SchemaRegistry, VersionSelector,
};

#[derive(Parser)]
#[command(name = "schema-registry")]
#[command(about = "Register schemas under subjects and enforce compatibility between versions")]
struct Cli {
    /// Configuration file (defaults to registry.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    /// Snapshot file, overriding the configured one
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported schema formats
    Types,

    /// List subjects
    Subjects {
        /// Include subjects whose versions are all soft-deleted
        #[arg(long)]
        deleted: bool,
    },

    /// List the versions of a subject
    Versions {
        subject: String,
        #[arg(long)]
        deleted: bool,
    },

    /// Show one version of a subject
    Get {
        subject: String,
        /// Version number or "latest"
        #[arg(default_value = "latest")]
        version: String,
        /// Also return soft-deleted versions
        #[arg(long)]
        deleted: bool,
    },

    /// Show a schema by global id
    Schema {
        id: u32,
    },

    /// Subjects and versions that reference a schema id
    Refs {
        id: u32,
    },

    /// Register a schema file under a subject
    Register {
        subject: String,
        file: PathBuf,
        /// Schema format (AVRO or JSON)
        #[arg(short, long, default_value = "AVRO")]
        format: SchemaFormat,
    },

    /// Find the version of a subject holding a schema file's content
    Lookup {
        subject: String,
        file: PathBuf,
        #[arg(short, long, default_value = "AVRO")]
        format: SchemaFormat,
        #[arg(long)]
        deleted: bool,
    },

    /// Test a schema file against a subject without registering it
    Check {
        subject: String,
        file: PathBuf,
        /// Version to compare against
        #[arg(short, long, default_value = "latest")]
        version: String,
        #[arg(short, long, default_value = "AVRO")]
        format: SchemaFormat,
        /// Report why the schema is incompatible
        #[arg(long)]
        verbose: bool,
    },

    /// Delete a subject or one of its versions
    Delete {
        subject: String,
        /// Version number or "latest"; the whole subject when omitted
        #[arg(short, long)]
        version: Option<String>,
        /// Erase entries that were already soft-deleted
        #[arg(long)]
        permanent: bool,
    },

    /// Read or change a compatibility mode
    Config {
        /// Subject to configure; the global mode when omitted
        #[arg(long)]
        subject: Option<String>,
        /// New mode, e.g. BACKWARD or FULL_TRANSITIVE
        #[arg(long)]
        set: Option<CompatibilityMode>,
        /// Remove the subject's override
        #[arg(long, requires = "subject", conflicts_with = "set")]
        unset: bool,
    },
}

impl Commands {
    fn mutates(&self) -> bool {
        matches!(
            self,
            Commands::Register { .. }
                | Commands::Delete { .. }
                | Commands::Config { set: Some(_), .. }
                | Commands::Config { unset: true, .. }
        )
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<SchemaError>() {
            Some(err) => {
                let body = ErrorResponse::from(err);
                eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_else(|_| err.to_string()));
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = RegistryConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    let snapshot = cli.snapshot.clone().unwrap_or_else(|| settings.snapshot_path());
    let registry = SchemaRegistry::open(&snapshot, settings)?;

    let mutates = cli.command.mutates();
    execute(&registry, cli.command)?;

    if mutates {
        registry.save(&snapshot)?;
    }
    Ok(())
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_schema(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read schema file {}", path.display()))
}

fn execute(registry: &SchemaRegistry, command: Commands) -> Result<()> {
    match command {
        Commands::Types => print(&registry.supported_formats()),

        Commands::Subjects { deleted } => print(&registry.list_subjects(deleted)),

        Commands::Versions { subject, deleted } => print(&registry.list_versions(&subject, deleted)?),

        Commands::Get { subject, version, deleted } => {
            let selector: VersionSelector = version.parse()?;
            let found = if deleted {
                registry.get_version_including_deleted(&subject, selector)?
            } else {
                registry.get_version(&subject, selector)?
            };
            print(&SubjectVersionResponse::from(found))
        }

        Commands::Schema { id } => print(&SchemaResponse::from(registry.get_schema(id)?.as_ref())),

        Commands::Refs { id } => {
            let refs: Vec<SubjectVersionRef> = registry
                .versions_for_id(id)?
                .into_iter()
                .map(|(subject, version)| SubjectVersionRef { subject, version })
                .collect();
            print(&refs)
        }

        Commands::Register { subject, file, format } => {
            let raw = read_schema(&file)?;
            let registration = registry.register(&subject, format, &raw)?;
            print(&RegisterSchemaResponse::from(registration))
        }

        Commands::Lookup { subject, file, format, deleted } => {
            let raw = read_schema(&file)?;
            let found = registry.lookup_schema(&subject, format, &raw, deleted)?;
            print(&SubjectVersionResponse::from(found))
        }

        Commands::Check { subject, version, file, format, verbose } => {
            let selector: VersionSelector = version.parse()?;
            let raw = read_schema(&file)?;
            let result = registry.check_compatibility(&subject, selector, format, &raw)?;
            print(&CompatibilityCheckResponse::from_result(result, verbose))
        }

        Commands::Delete { subject, version, permanent } => match version {
            Some(version) => {
                let selector: VersionSelector = version.parse()?;
                let deleted = if permanent {
                    registry.delete_version_permanent(&subject, selector)?
                } else {
                    registry.delete_version(&subject, selector)?
                };
                print(&deleted)
            }
            None => {
                let deleted = if permanent {
                    registry.delete_subject_permanent(&subject)?
                } else {
                    registry.delete_subject(&subject)?
                };
                print(&deleted)
            }
        },

        Commands::Config { subject, set, unset } => match (subject, set) {
            (None, None) => print(&ConfigResponse {
                compatibility_level: registry.get_global_config(),
            }),
            (None, Some(mode)) => print(&ConfigUpdate {
                compatibility: registry.set_global_config(mode),
            }),
            (Some(subject), None) if unset => print(&ConfigUpdate {
                compatibility: registry.delete_subject_config(&subject)?,
            }),
            (Some(subject), None) => print(&ConfigResponse {
                compatibility_level: registry.get_subject_config(&subject, true)?,
            }),
            (Some(subject), Some(mode)) => print(&ConfigUpdate {
                compatibility: registry.set_subject_config(&subject, mode),
            }),
        },
    }
}
