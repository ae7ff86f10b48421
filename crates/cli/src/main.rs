mod kb;
mod tools;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vaio_core::{MetadataStore, Stage, VaioConfig};
use vaio_llm::LlmClient;
use vaio_pipeline::{
    Approver, AutoApprove, DeferApproval, Narrator, Orchestrator, RunReport, RunStatus,
};
use vaio_rag::{Embedder, EmbeddingClient};

use crate::kb::KbCommand;
use crate::tools::{find_program, CommandNarrator, ProcessTools, PromptApprover};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "vaio", version = VERSION, about = "Resumable video asset pipeline")]
struct Cli {
    /// TOML settings file (defaults to ./vaio.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Approve every checkpoint without asking.
    #[arg(short = 'y', long, global = true, conflicts_with = "no_input")]
    yes: bool,
    /// Never prompt; stop at checkpoints instead.
    #[arg(long = "no-input", global = true)]
    no_input: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every remaining stage, resuming from the recorded one.
    #[command(alias = "continue")]
    Run {
        video: PathBuf,
        #[arg(long = "template-file")]
        template_file: Option<PathBuf>,
    },
    /// Extract the soundtrack.
    Audio { video: PathBuf },
    /// Transcribe the soundtrack into source-language captions.
    Transcribe { video: PathBuf },
    /// Review the generated captions.
    Verify { video: PathBuf },
    /// Draft and confirm the title and description.
    Desc {
        video: PathBuf,
        #[arg(long = "template-file")]
        template_file: Option<PathBuf>,
    },
    /// Translate the title and description.
    Translate { video: PathBuf },
    /// Translate the captions.
    Captions { video: PathBuf },
    /// Narrate every caption language.
    Tts { video: PathBuf },
    /// Print the asset's metadata record.
    Status { video: PathBuf },
    /// Confirm the pending checkpoint without a prompt.
    Approve { video: PathBuf },
    /// Move the asset back to an earlier stage.
    Reset {
        video: PathBuf,
        #[arg(long)]
        stage: Stage,
    },
    /// Remove the lock left by a run that did not exit cleanly.
    Unlock { video: PathBuf },
    /// Knowledge base management.
    Kb {
        #[command(subcommand)]
        command: KbCommand,
    },
    /// Report which external tools and backends are usable.
    Check,
}

#[derive(Debug, Clone, Copy)]
enum Approval {
    Prompt,
    Auto,
    Defer,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg = VaioConfig::from_env(cli.config.as_deref())?;
    let approval = if cli.yes {
        Approval::Auto
    } else if cli.no_input {
        Approval::Defer
    } else {
        Approval::Prompt
    };

    let step = |video: &Path, stage: Stage, template: Option<PathBuf>| -> Result<ExitCode> {
        let report = orchestrator(&cfg, approval, template)?.run_stage(video, stage)?;
        Ok(finish(&report))
    };

    match cli.command {
        Commands::Run {
            video,
            template_file,
        } => {
            let report = orchestrator(&cfg, approval, template_file)?.resume(&video)?;
            Ok(finish(&report))
        }
        Commands::Audio { video } => step(&video, Stage::AudioDone, None),
        Commands::Transcribe { video } => step(&video, Stage::CaptionsDone, None),
        Commands::Verify { video } => step(&video, Stage::CaptionsVerified, None),
        Commands::Desc {
            video,
            template_file,
        } => step(&video, Stage::DescriptionDone, template_file),
        Commands::Translate { video } => step(&video, Stage::Translated, None),
        Commands::Captions { video } => step(&video, Stage::CaptionsTranslated, None),
        Commands::Tts { video } => step(&video, Stage::TtsDone, None),
        Commands::Status { video } => {
            let meta = MetadataStore::for_asset(&video).load();
            println!("{}", serde_json::to_string_pretty(&meta)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Approve { video } => {
            let checkpoint = vaio_pipeline::approve(&cfg, &video)?;
            println!("approved {checkpoint} for {}", video.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reset { video, stage } => {
            let meta = vaio_pipeline::reset(&video, stage)?;
            println!("{} reset to {}", video.display(), meta.stage);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Unlock { video } => {
            if MetadataStore::for_asset(&video).force_unlock()? {
                println!("released lock on {}", video.display());
            } else {
                println!("{} was not locked", video.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Kb { command } => {
            kb::run(&cfg, command)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => Ok(check(&cfg)),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn orchestrator(cfg: &VaioConfig, approval: Approval, template: Option<PathBuf>) -> Result<Orchestrator> {
    let approver: Arc<dyn Approver> = match approval {
        Approval::Prompt => Arc::new(PromptApprover),
        Approval::Auto => Arc::new(AutoApprove),
        Approval::Defer => Arc::new(DeferApproval),
    };
    let orchestrator = Orchestrator::from_config(
        cfg.clone(),
        Arc::new(ProcessTools::new(cfg)),
        Arc::new(CommandNarrator::new(cfg)),
        approver,
    )?;
    Ok(orchestrator.with_template(template))
}

fn finish(report: &RunReport) -> ExitCode {
    match &report.status {
        RunStatus::Complete => info!(asset = %report.asset.display(), "all stages complete"),
        RunStatus::Stepped => info!(asset = %report.asset.display(), stage = %report.stage, "stage complete"),
        RunStatus::AlreadyDone => info!(asset = %report.asset.display(), stage = %report.stage, "nothing to do"),
        RunStatus::AwaitingApproval(checkpoint) => info!(
            asset = %report.asset.display(),
            checkpoint = %checkpoint,
            "waiting for approval; run `vaio approve` or resume interactively"
        ),
        RunStatus::Aborted(reason) => error!(asset = %report.asset.display(), reason = %reason, "aborted"),
    }
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(error = %err, "failed to render run report"),
    }
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn check(cfg: &VaioConfig) -> ExitCode {
    let mut critical_missing = false;
    let mut report = |name: &str, critical: bool, outcome: std::result::Result<String, String>| {
        match outcome {
            Ok(detail) => println!("ok       {name:<12} {detail}"),
            Err(detail) => {
                let label = if critical { "MISSING" } else { "warning" };
                println!("{label:<8} {name:<12} {detail}");
                critical_missing |= critical;
            }
        }
    };

    for program in ["ffmpeg", "whisper"] {
        let found = find_program(program)
            .map(|p| p.display().to_string())
            .ok_or_else(|| "not found on PATH".to_string());
        report(program, true, found);
    }
    let narration = CommandNarrator::new(cfg)
        .ensure_available()
        .map(|_| cfg.tts_command.clone().unwrap_or_default())
        .map_err(|e| e.to_string());
    report("narration", false, narration);
    let generation = LlmClient::from_config(cfg)
        .map(|c| format!("{}:{}", c.provider().as_str(), c.model()))
        .map_err(|e| format!("{e:#}"));
    report("generation", true, generation);
    let embedding = EmbeddingClient::from_config(cfg)
        .map(|c| c.id())
        .map_err(|e| format!("{e:#}"));
    report("embedding", false, embedding);

    if critical_missing {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
