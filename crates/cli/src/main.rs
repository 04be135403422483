use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use events::{MissionEvent, MissionEventPayload};
use mission_core::{LogLevel, MissionDefinition, MissionRun, MissionStatus, StepStatus};
use orchestrator::capabilities::{register_defaults, InMemoryErrorSource, SeverityCounts};
use orchestrator::{Approval, EngineConfig, MissionEngine, RunOptions};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_FILE: &str = "mission.toml";

#[derive(Parser)]
#[command(name = "mission")]
#[command(about = "Run declarative multi-phase missions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration (defaults to ./mission.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tracing filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "mission_cli=info,orchestrator=warn,events=warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a mission definition (.json or .toml)
    Run(RunArgs),
    /// Check a mission definition without running it
    Validate { definition: PathBuf },
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    definition: PathBuf,

    /// Refuse to start if a step references an unknown capability
    #[arg(long)]
    strict: bool,

    /// Critical entries reported to guardian.analyze-errors
    #[arg(long, default_value_t = 0)]
    critical: u32,

    /// Error entries reported to guardian.analyze-errors
    #[arg(long, default_value_t = 0)]
    errors: u32,

    /// Warning entries reported to guardian.analyze-errors
    #[arg(long, default_value_t = 0)]
    warnings: u32,

    /// Approve every step that waits for a human
    #[arg(long)]
    auto_approve: bool,

    /// Print events and the final run as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct CliConfig {
    engine: EngineConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run(args) => run(args, config).await,
        Commands::Validate { definition } => validate(&definition, config).await,
    }
}

async fn run(args: RunArgs, config: CliConfig) -> Result<()> {
    let definition = load_definition(&args.definition).await?;
    let run = execute(definition, &args, config.engine).await?;

    if args.json {
        println!("{}", serde_json::to_string(&run)?);
    } else {
        print_summary(&run);
    }

    match run.status {
        MissionStatus::Failed => bail!("Mission {} failed", run.id),
        MissionStatus::WaitingHuman if !args.json => {
            println!("Mission is waiting for approval. Re-run with --auto-approve to continue.");
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn validate(path: &Path, config: CliConfig) -> Result<()> {
    let definition = load_definition(path).await?;
    definition.validate()?;

    let engine = MissionEngine::standalone(config.engine);
    register_defaults(&engine, Arc::new(InMemoryErrorSource::default()));

    let missing = engine.missing_capabilities(&definition);
    if !missing.is_empty() {
        let keys: Vec<String> = missing.iter().map(ToString::to_string).collect();
        bail!("Unknown capabilities: {}", keys.join(", "));
    }

    println!(
        "{} {} ({} phases, {} steps)",
        "valid".green(),
        definition.objective,
        definition.phases.len(),
        definition.total_steps()
    );
    Ok(())
}

/// Run `definition` on a fresh engine with the built-in capabilities.
async fn execute(
    definition: MissionDefinition,
    args: &RunArgs,
    mut engine_config: EngineConfig,
) -> Result<MissionRun> {
    if args.strict {
        engine_config = engine_config.with_strict_capabilities(true);
    }

    let engine = MissionEngine::standalone(engine_config);
    let errors = InMemoryErrorSource::new(SeverityCounts::new(
        args.critical,
        args.errors,
        args.warnings,
    ));
    register_defaults(&engine, Arc::new(errors));

    let printer = if args.json {
        engine.subscribe(|event| match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
        })
    } else {
        engine.subscribe(|event| {
            if let Some(line) = render_event(event) {
                println!("{line}");
            }
        })
    };

    let mission_id = engine
        .run_mission(definition, RunOptions::default())
        .await?;

    let mut status = engine.store().mission_status(mission_id);
    while args.auto_approve && status == Some(MissionStatus::WaitingHuman) {
        let run = engine
            .get_mission(mission_id)
            .context("Mission disappeared from the store")?;
        let Some(step) = run.steps().find(|s| s.status == StepStatus::WaitingHuman) else {
            break;
        };
        tracing::info!(step = %step.definition.display_title(), "Auto-approving step");
        let approval = Approval::approve().with_note("auto-approved");
        status = Some(engine.resume_mission(mission_id, step.id, approval).await?);
    }

    printer.unsubscribe();

    engine
        .get_mission(mission_id)
        .context("Mission disappeared from the store")
}

async fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = std::env::current_dir()?.join(CONFIG_FILE);
            if !default.exists() {
                return Ok(CliConfig::default());
            }
            default
        }
    };

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
}

async fn load_definition(path: &Path) -> Result<MissionDefinition> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read mission definition {}", path.display()))?;

    let definition = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Invalid mission definition {}", path.display()))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Invalid mission definition {}", path.display()))?,
    };
    Ok(definition)
}

fn render_event(event: &MissionEvent) -> Option<String> {
    match &event.payload {
        MissionEventPayload::Created { mission } => Some(format!(
            "{} {}",
            "mission".bold(),
            mission.definition.objective
        )),
        MissionEventPayload::StatusChanged { status } => {
            Some(format!("{} {}", "status".bold(), paint_status(*status)))
        }
        MissionEventPayload::ProgressChanged { progress } => {
            Some(format!("{} {}%", "progress".bold(), progress))
        }
        MissionEventPayload::Log { entry } => {
            let label = entry.level.as_str();
            let level = match entry.level {
                LogLevel::Debug => label.dimmed(),
                LogLevel::Info => label.cyan(),
                LogLevel::Warn => label.yellow(),
                LogLevel::Error => label.red(),
            };
            Some(format!("  [{}] {}", level, entry.message))
        }
        MissionEventPayload::StepStatusChanged { .. } => None,
    }
}

fn paint_status(status: MissionStatus) -> colored::ColoredString {
    match status {
        MissionStatus::Completed => status.as_str().green(),
        MissionStatus::Failed | MissionStatus::Cancelled => status.as_str().red(),
        MissionStatus::WaitingHuman | MissionStatus::Blocked | MissionStatus::Paused => {
            status.as_str().yellow()
        }
        MissionStatus::Pending | MissionStatus::Running => status.as_str().normal(),
    }
}

fn step_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "○",
        StepStatus::Running => "◐",
        StepStatus::WaitingHuman => "◑",
        StepStatus::Completed => "●",
        StepStatus::Failed => "✗",
        StepStatus::Skipped => "-",
    }
}

fn print_summary(run: &MissionRun) {
    println!();
    println!("Mission: {}", run.definition.objective);
    println!("Id:      {}", run.id);
    println!("Status:  {} ({}%)", paint_status(run.status), run.progress);
    println!();

    for phase in &run.phases {
        println!("{} [{}]", phase.name(), phase.status);
        for step in &phase.steps {
            println!(
                "  {} [{}] {}",
                step_icon(step.status),
                step.status,
                step.definition.display_title()
            );
            if let Some(error) = &step.error {
                println!("      {}", error.red());
            }
        }
    }

    println!();
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const WEEKLY_REVIEW: &str = r#"
objective = "Weekly error review"

[[phases]]
name = "Plan"

[[phases.steps]]
agentId = "kai"
action = "draft-plan"

[[phases]]
name = "Analyze"

[[phases.steps]]
agentId = "guardian"
action = "analyze-errors"
title = "Analyze errors"
"#;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn args(critical: u32, auto_approve: bool) -> RunArgs {
        RunArgs {
            critical,
            auto_approve,
            json: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "mission",
            "run",
            "review.toml",
            "--critical",
            "2",
            "--auto-approve",
            "--config",
            "engine.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("engine.toml")));
        assert!(cli.log_level.starts_with("mission_cli=info"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.definition, PathBuf::from("review.toml"));
                assert_eq!(args.critical, 2);
                assert!(args.auto_approve);
                assert!(!args.strict);
            }
            Commands::Validate { .. } => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn test_load_toml_definition() {
        let file = write_temp(".toml", WEEKLY_REVIEW);
        let definition = load_definition(file.path()).await.unwrap();

        assert_eq!(definition.objective, "Weekly error review");
        assert_eq!(definition.phases.len(), 2);
        assert_eq!(definition.phases[1].steps[0].capability_key(), "guardian.analyze-errors");
    }

    #[tokio::test]
    async fn test_load_json_definition() {
        let file = write_temp(
            ".json",
            r#"{"objective": "Ship", "phases": [{"name": "Go", "steps": [{"agentId": "human", "action": "approve"}]}]}"#,
        );
        let definition = load_definition(file.path()).await.unwrap();
        assert_eq!(definition.total_steps(), 1);
    }

    #[tokio::test]
    async fn test_invalid_definition_names_the_file() {
        let file = write_temp(".json", "{not json");
        let err = load_definition(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid mission definition"));
    }

    #[tokio::test]
    async fn test_load_config_engine_table() {
        let file = write_temp(
            ".toml",
            "[engine]\nstrict_capabilities = true\nevent_channel_capacity = 64\n",
        );
        let config = load_config(Some(file.path())).await.unwrap();

        assert!(config.engine.strict_capabilities);
        assert!(!config.engine.honor_step_approval);
        assert_eq!(config.engine.event_channel_capacity, 64);
    }

    #[tokio::test]
    async fn test_execute_clean_run() {
        let definition: MissionDefinition = toml::from_str(WEEKLY_REVIEW).unwrap();
        let run = execute(definition, &args(0, false), EngineConfig::default())
            .await
            .unwrap();

        assert_eq!(run.status, MissionStatus::Completed);
        assert_eq!(run.progress, 100);
    }

    #[tokio::test]
    async fn test_execute_waits_without_auto_approve() {
        let definition: MissionDefinition = toml::from_str(WEEKLY_REVIEW).unwrap();
        let run = execute(definition, &args(1, false), EngineConfig::default())
            .await
            .unwrap();

        assert_eq!(run.status, MissionStatus::WaitingHuman);
        assert_eq!(run.progress, 50);
    }

    #[tokio::test]
    async fn test_execute_auto_approves() {
        let definition: MissionDefinition = toml::from_str(WEEKLY_REVIEW).unwrap();
        let run = execute(definition, &args(1, true), EngineConfig::default())
            .await
            .unwrap();

        assert_eq!(run.status, MissionStatus::Completed);
        assert!(run
            .logs
            .iter()
            .any(|entry| entry.message == "Step approved: Analyze errors (auto-approved)"));
    }

    #[tokio::test]
    async fn test_strict_flag_rejects_unknown_capability() {
        let definition = MissionDefinition::new("x").with_phase(
            mission_core::PhaseDefinition::new("p")
                .with_step(mission_core::StepDefinition::new("kai", "unknown")),
        );
        let mut args = args(0, false);
        args.strict = true;

        let err = execute(definition, &args, EngineConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("kai.unknown"));
    }

    #[test]
    fn test_render_log_event() {
        let mission_id = uuid::Uuid::new_v4();
        let event = MissionEvent::new(
            mission_id,
            MissionEventPayload::Log {
                entry: mission_core::LogEntry::info(mission_id, "Starting phase: Plan"),
            },
        );
        assert!(render_event(&event).unwrap().contains("Starting phase: Plan"));

        let event = MissionEvent::new(
            mission_id,
            MissionEventPayload::ProgressChanged { progress: 50 },
        );
        assert!(render_event(&event).unwrap().ends_with("50%"));
    }
}
