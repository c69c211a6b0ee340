use casetrack::models::LandmarkState;
use casetrack::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "casetrack")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Case lifecycle tracking for legal matters", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project root containing casetrack/ (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a new case
    Init {
        /// Case ID (letters, digits, '.', '_' or '-')
        case_id: String,

        /// Client display name
        #[arg(short, long)]
        client: Option<String>,

        /// Date of incident (YYYY-MM-DD)
        #[arg(long)]
        incident_date: Option<String>,

        /// Starting phase (defaults to the first phase)
        #[arg(long)]
        phase: Option<String>,
    },

    /// Show status of a case, correcting and auto-verifying as needed
    Status {
        /// Case ID (omit with --all)
        #[arg(required_unless_present = "all")]
        case_id: Option<String>,

        /// Summarise every case
        #[arg(long, conflicts_with = "case_id")]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move a case to another phase
    Advance {
        /// Case ID
        case_id: String,

        /// Target phase ID
        phase: String,

        /// Override unresolved hard blockers
        #[arg(short, long)]
        force: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Update a landmark's status, sub-steps or notes
    Landmark {
        /// Case ID
        case_id: String,

        /// Landmark ID
        landmark: String,

        /// New status: not_started, in_progress, complete, not_applicable
        #[arg(short, long)]
        status: Option<LandmarkState>,

        /// Sub-step to set, as NAME=true|false (repeatable)
        #[arg(long = "step")]
        steps: Vec<String>,

        /// Note appended to the landmark
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Run auto-verification for a case's current phase
    Verify {
        /// Case ID
        case_id: String,
    },

    /// List all cases
    List,

    /// Show configured phases and landmarks
    Phases,

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_tracing() {
    // CASETRACK_LOG wins over RUST_LOG; stderr keeps stdout clean for --json
    let filter = std::env::var("CASETRACK_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", format!("Error: failed to create tokio runtime: {}", e).red());
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_async(cli)) {
        eprintln!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
}

async fn run_async(cli: Cli) -> Result<()> {
    let root = casetrack::cli::project_root(cli.root.as_deref())?;

    match cli.command {
        Commands::Init {
            case_id,
            client,
            incident_date,
            phase,
        } => {
            casetrack::cli::init::run(&root, &case_id, client, incident_date, phase).await?;
        }

        Commands::Status { case_id, all, json } => match case_id {
            Some(case_id) if !all => casetrack::cli::status::run(&root, &case_id, json).await?,
            _ => casetrack::cli::status::run_all(&root, json).await?,
        },

        Commands::Advance {
            case_id,
            phase,
            force,
            json,
        } => {
            casetrack::cli::advance::run(&root, &case_id, &phase, force, json).await?;
        }

        Commands::Landmark {
            case_id,
            landmark,
            status,
            steps,
            note,
        } => {
            casetrack::cli::landmark::run(&root, &case_id, &landmark, status, &steps, note).await?;
        }

        Commands::Verify { case_id } => {
            println!("{}", format!("🔍 Verifying landmarks: {}", case_id).cyan());
            casetrack::cli::verify::run(&root, &case_id).await?;
        }

        Commands::List => {
            casetrack::cli::list::run(&root)?;
        }

        Commands::Phases => {
            casetrack::cli::phases::run(&root)?;
        }

        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "casetrack", &mut io::stdout());
        }
    }

    Ok(())
}
