use clai_workflow::analyzer::Analyzer;
use clai_workflow::cancel::CancelToken;
use clai_workflow::display::{detect_mode, Display, DisplayMode};
use clai_workflow::driver::{DriverOptions, WorkflowDriver};
use clai_workflow::mask::SecretMasker;
use clai_workflow::review::{NonInteractiveReview, ReviewHandler, TerminalReview};
use clai_workflow::runner::RunStatus;
use clai_workflow::schema::{parse_workflow_file, WorkflowDef};
use clai_workflow::transport::AnalysisTransport;
use clai_workflow::validate::validate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const EXIT_PASSED: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_USER_ERROR: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "clai", version, about = "Local AI-assisted workflow runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file
    Run {
        /// The path to the workflow file
        file: PathBuf,
        /// Directory for JSONL run logs and per-step output files
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Working directory for steps (defaults to the current directory)
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Force plain, line-oriented progress output
        #[arg(long)]
        plain: bool,
        /// Never prompt; required reviews reject automatically
        #[arg(long)]
        non_interactive: bool,
        /// Socket path of the analysis daemon
        #[arg(long)]
        daemon_socket: Option<PathBuf>,
        /// Skip writing per-step stdout/stderr files
        #[arg(long)]
        no_step_files: bool,
    },
    /// Parse and validate a workflow file without running it
    Validate {
        /// The path to the workflow file
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            file,
            log_dir,
            workdir,
            plain,
            non_interactive,
            daemon_socket,
            no_step_files,
        } => cmd_run(file, log_dir, workdir, plain, non_interactive, daemon_socket, no_step_files),
        Commands::Validate { file } => cmd_validate(file),
    };
    ExitCode::from(code)
}

fn load_workflow(file: &PathBuf) -> Result<WorkflowDef, u8> {
    let workflow = match parse_workflow_file(file) {
        Ok(workflow) => workflow,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return Err(EXIT_USER_ERROR);
        }
    };

    let errors = validate(&workflow);
    if !errors.is_empty() {
        eprintln!("{} workflow failed validation:", "error:".red().bold());
        for error in &errors {
            eprintln!("  {}", error);
        }
        return Err(EXIT_USER_ERROR);
    }

    Ok(workflow)
}

fn cmd_validate(file: PathBuf) -> u8 {
    match load_workflow(&file) {
        Ok(workflow) => {
            println!("{} workflow '{}' is valid", "✔".green(), workflow.name);
            EXIT_PASSED
        }
        Err(code) => code,
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    file: PathBuf,
    log_dir: Option<PathBuf>,
    workdir: Option<PathBuf>,
    plain: bool,
    non_interactive: bool,
    daemon_socket: Option<PathBuf>,
    no_step_files: bool,
) -> u8 {
    let workflow = match load_workflow(&file) {
        Ok(workflow) => workflow,
        Err(code) => return code,
    };

    let workdir = workdir
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut options = DriverOptions::new(workdir);
    options.log_dir = log_dir.clone();
    options.write_step_files = !no_step_files;

    let masker = Arc::new(SecretMasker::from_secrets(&workflow.secrets));
    let mut transport = AnalysisTransport::new(Analyzer::new(masker));
    if let Some(socket) = daemon_socket {
        transport = transport.with_daemon_socket(socket);
    }

    let mut review: Box<dyn ReviewHandler> = if non_interactive {
        Box::new(NonInteractiveReview)
    } else {
        Box::new(TerminalReview::stdio())
    };

    let mode = if plain { DisplayMode::Plain } else { detect_mode() };
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let display_thread = std::thread::spawn(move || Display::new(mode).consume(events_rx));

    let cancel = CancelToken::new();
    let outcome = WorkflowDriver::new(&workflow, options)
        .with_transport(&transport)
        .with_review(review.as_mut())
        .with_events(&events_tx)
        .execute(&cancel);

    drop(events_tx);
    let _ = display_thread.join();

    match outcome {
        Ok(result) => {
            if let Some(log_dir) = &log_dir {
                for run in &result.runs {
                    println!("run log: {}", log_dir.join(format!("{}.jsonl", run.run_id)).display());
                }
            }
            match result.status {
                RunStatus::Passed => EXIT_PASSED,
                RunStatus::Failed => EXIT_FAILED,
                RunStatus::Cancelled => EXIT_CANCELLED,
            }
        }
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            EXIT_USER_ERROR
        }
    }
}
