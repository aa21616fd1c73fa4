//! # d2d harness CLI (`d2d`)
//!
//! The `d2d` binary drives deploy-to-develop matching: it creates projects
//! from development and deployment inputs, ingests them into SQLite, runs
//! matching pipelines and reports the resulting relations.
//!
//! ## Usage
//!
//! ```bash
//! d2d --config ./config/d2d.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `d2d init` | Create the SQLite database and run schema migrations |
//! | `d2d project create <name> --input <path>...` | Register a project and copy its inputs |
//! | `d2d project list` | List projects |
//! | `d2d ingest <project>` | Extract inputs and record resources |
//! | `d2d run <project>` | Run a matching pipeline |
//! | `d2d pipelines` | List pipelines, steps and groups |
//! | `d2d relations <project>` | Print relations |
//! | `d2d resources <project>` | Print resources |
//! | `d2d export <project>` | Export results as JSON |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use d2d_harness::progress::ProgressMode;
use d2d_harness::{codebase, config, export, migrate, project, query, run_cmd};

/// d2d harness: relate deployed artifacts to their development sources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/d2d.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "d2d",
    about = "Deploy-to-develop matching: relate deployed artifacts to their development sources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/d2d.toml")]
    config: PathBuf,

    /// Log at debug level. `RUST_LOG` takes precedence when set.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress output on stderr: `human`, `json` or `off`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Create and list projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Extract a project's inputs into `from/` and `to/` and record every
    /// file and directory.
    ///
    /// Inputs whose name starts with `from` form the development codebase,
    /// those starting with `to` the deployment codebase.
    Ingest {
        project: String,
    },

    /// Run a matching pipeline on an ingested project.
    Run {
        project: String,

        /// Pipeline name (see `d2d pipelines`).
        #[arg(long, default_value = run_cmd::DEFAULT_PIPELINE)]
        pipeline: String,

        /// Enable optional steps tagged with this group (repeatable),
        /// e.g. `java`, `javascript`, `purldb`.
        #[arg(long = "group")]
        groups: Vec<String>,

        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List registered pipelines with their steps and groups.
    Pipelines,

    /// Print relations between development and deployment resources.
    Relations {
        project: String,

        /// Only relations of this map type (`sha1`, `path`, `java_to_class`, ...).
        #[arg(long)]
        map_type: Option<String>,

        /// Only relations where either path matches this glob.
        #[arg(long)]
        path: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Print resources with their status.
    Resources {
        project: String,

        /// Only resources with this status; `none` for unmatched ones.
        #[arg(long)]
        status: Option<String>,

        /// `from` or `to`.
        #[arg(long)]
        side: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Export resources, relations and packages as JSON.
    Export {
        project: String,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Register a project and copy its inputs into the work directory.
    Create {
        name: String,

        /// Input file or directory (repeatable). Names must start with
        /// `from` or `to`.
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
    },
    /// List projects.
    List,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Pipelines = cli.command {
        return run_cmd::run_list_pipelines();
    }

    let cfg = config::load_config(&cli.config)?;
    let reporter = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Project { action } => match action {
            ProjectAction::Create { name, inputs } => {
                project::run_project_create(&cfg, &name, &inputs).await?;
            }
            ProjectAction::List => {
                project::run_project_list(&cfg).await?;
            }
        },
        Commands::Ingest { project } => {
            codebase::run_ingest(&cfg, &project, reporter.as_ref()).await?;
        }
        Commands::Run {
            project,
            pipeline,
            groups,
            json,
        } => {
            run_cmd::run_run(&cfg, &project, &pipeline, &groups, json, reporter.as_ref()).await?;
        }
        Commands::Pipelines => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Relations {
            project,
            map_type,
            path,
            json,
        } => {
            query::run_relations(&cfg, &project, map_type.as_deref(), path.as_deref(), json)
                .await?;
        }
        Commands::Resources {
            project,
            status,
            side,
            json,
        } => {
            query::run_resources(&cfg, &project, status.as_deref(), side.as_deref(), json).await?;
        }
        Commands::Export { project, output } => {
            export::run_export(&cfg, &project, output.as_deref()).await?;
        }
    }

    Ok(())
}
