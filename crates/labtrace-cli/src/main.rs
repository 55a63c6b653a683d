//! Labtrace CLI
//!
//! Reconstructs the provenance trace for one completed plan, optionally
//! validates it, writes the provenance document, and dumps the upload
//! layout to a local directory.
//!
//! A validation failure is reported on stderr but does not change the
//! process exit code; downstream pipeline scripts depend on that.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use labtrace_build::{check_trace, profile_for, BuildOptions, ChallengeProblem, TraceFactory};
use labtrace_export::{trace_document, FileFetcher, FsDumpStore, UploadManager};
use labtrace_lims::SnapshotClient;

#[derive(Parser)]
#[command(name = "labtrace")]
#[command(
    version,
    about = "Reconstruct a provenance trace for a laboratory workflow execution"
)]
struct Cli {
    /// The ID of the plan to trace
    #[arg(short, long)]
    plan_id: String,

    /// Experiment identifier recorded in the trace (defaults to the plan ID)
    #[arg(short, long)]
    experiment_id: Option<String>,

    /// Challenge-problem tag: yg, nc, or ps
    #[arg(short, long)]
    challenge_problem: Option<String>,

    /// Lab name recorded on the plan
    #[arg(long, default_value = "UW_BIOFAB")]
    lab: String,

    /// LIMS record snapshot (JSON) to run against
    #[arg(short, long)]
    snapshot: PathBuf,

    /// File for dumping the provenance document
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Check provenance capture and report gaps
    #[arg(short, long)]
    validate: bool,

    /// Entity IDs treated as legitimate workflow inputs during validation
    #[arg(long, value_delimiter = ',')]
    stop_list: Vec<String>,

    /// Directory to dump the upload layout into
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Dump only provenance documents, not file bodies
    #[arg(long)]
    prov_only: bool,

    /// Skip the heuristic repair rules and the patch pass
    #[arg(long)]
    no_fix: bool,

    /// Increase log verbosity (--verbose for info, --verbose --verbose for debug)
    #[arg(long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The snapshot carries records only; bodies stay with the LIMS.
struct NoUploadBodies;

impl FileFetcher for NoUploadBodies {
    fn fetch(&self, _upload_id: &str) -> Option<Vec<u8>> {
        None
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let challenge_problem = match cli.challenge_problem.as_deref() {
        Some(tag) => match ChallengeProblem::parse(tag) {
            Some(problem) => Some(problem),
            None => bail!("unknown challenge problem tag `{tag}` (expected yg, nc, or ps)"),
        },
        None => None,
    };

    let client = SnapshotClient::from_json_file(&cli.snapshot)
        .with_context(|| format!("loading snapshot {}", cli.snapshot.display()))?;

    let experiment_id = cli
        .experiment_id
        .clone()
        .unwrap_or_else(|| cli.plan_id.clone());
    let mut factory = TraceFactory::new(&client);
    let mut profile = profile_for(cli.lab.clone(), challenge_problem);
    let options = BuildOptions {
        apply_fixes: !cli.no_fix,
    };
    let mut trace = factory
        .build(&cli.plan_id, &experiment_id, Some(&mut profile), &options)
        .with_context(|| format!("building trace for plan {}", cli.plan_id))?;

    eprintln!(
        "{} plan {}: {} operations, {} jobs, {} entities, {} files",
        "traced".green().bold(),
        cli.plan_id.bold(),
        trace.operations().count(),
        trace.jobs().count(),
        trace.entities().count(),
        trace.files().count(),
    );

    if cli.validate {
        // reported, but deliberately not reflected in the exit code
        if check_trace(&mut trace, cli.stop_list.clone()) {
            eprintln!("{}", "provenance check passed".green());
        } else {
            eprintln!("{}", "provenance check failed; see log for details".red());
        }
    }

    if let Some(output) = &cli.output {
        let document = trace_document(&trace);
        fs::write(output, serde_json::to_string_pretty(&document)?)
            .with_context(|| format!("writing {}", output.display()))?;
        eprintln!("{} {}", "wrote".green().bold(), output.display());
    }

    if let Some(dump) = &cli.dump {
        let manager = UploadManager::create_from(
            &trace,
            "uploads",
            &cli.lab.to_lowercase(),
            Utc::now().date_naive(),
        );
        let mut store = FsDumpStore::new(dump);
        manager
            .upload(&mut store, &NoUploadBodies, cli.prov_only)
            .with_context(|| format!("dumping upload layout to {}", dump.display()))?;
        eprintln!(
            "{} {} under {}",
            "dumped".green().bold(),
            manager.basepath(),
            dump.display()
        );
    }

    Ok(())
}
