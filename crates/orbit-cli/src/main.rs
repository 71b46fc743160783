use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use orbit_core::config::{CliOverrides, EngineConfig};
use orbit_core::executor::{AgentSpec, Extractor};
use orbit_core::presets::{self, ModelSelection, Preset};
use orbit_core::session::SessionStatus;
use orbit_core::Orchestrator;

#[derive(Parser)]
#[command(name = "orbit", about = "Autonomous multi-agent coding orchestrator")]
struct Cli {
    /// Project directory to operate on (must be a git repository)
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fresh orchestration session toward a goal
    Start {
        /// What the agents should accomplish
        goal: String,
        /// Maximum number of Planner/Worker/Judge cycles
        #[arg(long)]
        max_cycles: Option<u32>,
        /// Maximum number of concurrent workers per cycle
        #[arg(long)]
        max_workers: Option<u32>,
        /// Named model/reasoning preset ("fast", "default", "max")
        #[arg(long)]
        preset: Option<String>,
        /// Override the state directory name (default ".orbit")
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Resume an existing session from its persisted state directory
    Resume {
        #[arg(long)]
        state_dir: Option<String>,
    },
}

/// Resolve `config.preset` against the embedded preset library, falling
/// back to the compiled-in default preset if the name is unknown (e.g. a
/// stale on-disk config file naming a preset this build no longer ships).
fn resolve_preset(config: &EngineConfig) -> Preset {
    presets::preset(&config.preset)
        .or_else(|| presets::preset(presets::DEFAULT_PRESET))
        .expect("the default preset is always present in the embedded library")
}

fn model_args(selection: Option<&ModelSelection>, model_flag: &str, reasoning_flag: &str) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(selection) = selection {
        args.push(model_flag.to_string());
        args.push(selection.model.clone());
        args.push(reasoning_flag.to_string());
        args.push(selection.reasoning.clone());
    }
    args
}

/// The agent kinds this build knows how to invoke, and how to read their
/// output. Binaries are resolved through `EngineConfig::binary_for` so an
/// operator can point `claude`/`codex`/`gemini` at different executables.
/// Each spec's args carry the non-interactive/auto-approve/structured-output
/// flags that subprocess contract requires, plus the model/reasoning
/// selection from `config.preset`.
fn agent_specs(config: &EngineConfig) -> Vec<AgentSpec> {
    let preset = resolve_preset(config);

    let mut claude_args = vec![
        "--print".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--dangerously-skip-permissions".to_string(),
    ];
    claude_args.extend(model_args(preset.models.get("claude"), "--model", "--reasoning-effort"));

    let mut codex_args = vec![
        "exec".to_string(),
        "--json".to_string(),
        "--dangerously-bypass-approvals-and-sandbox".to_string(),
    ];
    codex_args.extend(model_args(preset.models.get("codex"), "--model", "--config model_reasoning_effort"));

    let mut gemini_args = vec![
        "--output-format".to_string(),
        "json".to_string(),
        "--yolo".to_string(),
    ];
    gemini_args.extend(model_args(preset.models.get("gemini"), "--model", "--reasoning-effort"));

    vec![
        AgentSpec::new("claude", config.binary_for("claude", "claude"), Extractor::SingleEnvelope)
            .with_args(claude_args),
        AgentSpec::new("codex", config.binary_for("codex", "codex"), Extractor::ItemStream).with_args(codex_args),
        AgentSpec::new("gemini", config.binary_for("gemini", "gemini"), Extractor::MessageStream)
            .with_args(gemini_args),
    ]
}

fn exit_code_for(status: SessionStatus) -> i32 {
    match status {
        SessionStatus::Completed => 0,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            goal,
            max_cycles,
            max_workers,
            preset,
            state_dir,
        } => {
            let config = EngineConfig::resolve(&CliOverrides {
                max_cycles,
                max_workers,
                preset,
                state_dir,
            });
            let specs = agent_specs(&config);
            let orchestrator = Orchestrator::new(cli.project, config, specs)
                .context("failed to initialize orchestrator")?;
            let result = orchestrator.start(&goal).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            std::process::exit(exit_code_for(result.status));
        }
        Commands::Resume { state_dir } => {
            let config = EngineConfig::resolve(&CliOverrides {
                state_dir,
                ..Default::default()
            });
            let specs = agent_specs(&config);
            let orchestrator = Orchestrator::new(cli.project, config, specs)
                .context("failed to initialize orchestrator")?;
            let result = orchestrator.resume().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            std::process::exit(exit_code_for(result.status));
        }
    }
}
