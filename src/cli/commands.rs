//! CLI command definitions for mobile-judge.
//!
//! `evaluate` judges every trajectory under a directory and appends the
//! results to the ledger; `summarize` aggregates an existing ledger per
//! instruction.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::config::EvalConfig;
use crate::error::LlmError;
use crate::evaluator::TrajectoryEvaluator;
use crate::ledger::{summarize_by_base_id, write_summary, BaseIdSummary, LabelTally, Ledger, NullLabelPolicy};
use crate::llm::{ChatCompletionsClient, LlmProvider, RetryingProvider, DEFAULT_API_BASE};

/// Default trajectories directory.
const DEFAULT_TRAJECTORIES_DIR: &str = "./dataset/AITA/train/map";

/// Vision-LLM judge for recorded mobile-agent trajectories.
#[derive(Parser)]
#[command(name = "mobile-judge")]
#[command(about = "Judge mobile-agent trajectories with a vision LLM")]
#[command(version)]
#[command(
    long_about = "mobile-judge replays recorded mobile-agent trajectories through a vision-capable judge model.\n\nEach trajectory gets a success/failure verdict backed by per-screenshot evidence; results are appended to a resumable JSONL ledger.\n\nExample usage:\n  mobile-judge evaluate --trajectories-dir ./dataset/AITA/train/map --score-threshold 3"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Judge every trajectory not yet in the ledger.
    ///
    /// Trajectories already recorded in the ledger for the selected dataset,
    /// category, app and score threshold are skipped, so an interrupted run can
    /// simply be started again.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),

    /// Summarize a ledger per instruction id.
    Summarize(SummarizeArgs),
}

/// Options that select the ledger.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct LedgerArgs {
    /// Dataset split (e.g. train, test).
    #[arg(long)]
    pub dataset_type: Option<String>,

    /// App category.
    #[arg(long)]
    pub category: Option<String>,

    /// App name.
    #[arg(long)]
    pub app_name: Option<String>,

    /// Ledger filename prefix.
    #[arg(long)]
    pub ledger_prefix: Option<String>,

    /// Minimum screenshot score kept as verdict evidence (0-5).
    #[arg(long)]
    pub score_threshold: Option<u8>,

    /// How undetermined verdicts enter the success rate.
    #[arg(long, value_enum)]
    pub null_policy: Option<NullLabelPolicy>,
}

impl LedgerArgs {
    fn apply(&self, config: &mut EvalConfig) {
        if let Some(ref value) = self.dataset_type {
            config.dataset_type = value.clone();
        }
        if let Some(ref value) = self.category {
            config.category = value.clone();
        }
        if let Some(ref value) = self.app_name {
            config.app_name = value.clone();
        }
        if let Some(ref value) = self.ledger_prefix {
            config.ledger_prefix = value.clone();
        }
        if let Some(value) = self.score_threshold {
            config.score_threshold = value;
        }
        if let Some(value) = self.null_policy {
            config.null_label_policy = value;
        }
    }
}

/// Arguments for the evaluate command.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Directory holding one subdirectory per trajectory.
    #[arg(short = 't', long, default_value = DEFAULT_TRAJECTORIES_DIR)]
    pub trajectories_dir: PathBuf,

    /// Directory for the ledger. Defaults to the trajectories directory.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub ledger: LedgerArgs,

    /// Judge model.
    #[arg(short, long)]
    pub model: Option<String>,

    /// API key for the model endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint.
    #[arg(long, env = "OPENAI_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Max tokens per completion.
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Per-call timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Attempts per model call, the first included.
    #[arg(long)]
    pub retry_attempts: Option<u32>,

    /// Trajectories judged concurrently.
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Screenshot scoring calls in flight per trajectory (0 = all).
    #[arg(long)]
    pub scoring_concurrency: Option<usize>,

    /// Attach the steps' declared images to every prompt as reference images.
    #[arg(long)]
    pub attach_step_images: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl EvaluateArgs {
    /// Environment configuration overridden by the flags given.
    pub fn to_config(&self) -> anyhow::Result<EvalConfig> {
        let mut config = EvalConfig::from_env()?;
        self.ledger.apply(&mut config);

        if let Some(ref model) = self.model {
            config.model.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            config.model.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.model.max_tokens = max_tokens;
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry_max_attempts = attempts;
        }
        if let Some(n) = self.concurrency {
            config.max_concurrent_trajectories = n;
        }
        if let Some(n) = self.scoring_concurrency {
            config.max_concurrent_scoring = n;
        }
        if self.attach_step_images {
            config.attach_step_images = true;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Arguments for the summarize command.
#[derive(Parser, Debug)]
pub struct SummarizeArgs {
    /// Trajectories directory the ledger was written for.
    #[arg(short = 't', long, default_value = DEFAULT_TRAJECTORIES_DIR)]
    pub trajectories_dir: PathBuf,

    /// Directory holding the ledger. Defaults to the trajectories directory.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub ledger: LedgerArgs,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Evaluate(args) => run_evaluate_command(args).await,
        Commands::Summarize(args) => run_summarize_command(args).await,
    }
}

async fn run_evaluate_command(args: EvaluateArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.trajectories_dir.clone());

    let api_key = args
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or(LlmError::MissingApiKey)?;
    let client = ChatCompletionsClient::new(
        args.api_base.as_str(),
        Some(api_key),
        config.model.model.clone(),
        config.request_timeout,
    )?;
    let provider: Arc<dyn LlmProvider> = Arc::new(
        RetryingProvider::new(Arc::new(client), config.retry_policy())
            .with_call_timeout(config.request_timeout),
    );

    info!(
        trajectories_dir = %args.trajectories_dir.display(),
        model = %config.model.model,
        api_base = %args.api_base,
        score_threshold = config.score_threshold,
        "Starting evaluation"
    );

    let evaluator = TrajectoryEvaluator::new(&args.trajectories_dir, &output_dir, provider, config);
    let report = evaluator.run().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SummaryOutput {
    ledger_path: PathBuf,
    summary_path: PathBuf,
    instructions: Vec<BaseIdSummary>,
    labels: LabelTally,
    null_label_policy: NullLabelPolicy,
    success_rate: Option<f64>,
}

async fn run_summarize_command(args: SummarizeArgs) -> anyhow::Result<()> {
    let mut config = EvalConfig::from_env()?;
    args.ledger.apply(&mut config);
    config.validate()?;

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.trajectories_dir.clone());
    let ledger = Ledger::new(config.ledger_path(&output_dir));
    if !ledger.path().exists() {
        anyhow::bail!("No ledger found at {}", ledger.path().display());
    }

    let entries = ledger.entries().await?;
    let instructions = summarize_by_base_id(&entries);
    let summary_path = output_dir.join(config.summary_file_name());
    write_summary(&summary_path, &instructions).await?;

    let labels = LabelTally::from_labels(entries.iter().map(|e| e.predicted_label));
    let success_rate = labels.success_rate(config.null_label_policy);

    info!(
        entries = entries.len(),
        instructions = instructions.len(),
        summary = %summary_path.display(),
        "Ledger summarized"
    );

    if args.json {
        let output = SummaryOutput {
            ledger_path: ledger.path().to_path_buf(),
            summary_path,
            instructions,
            labels,
            null_label_policy: config.null_label_policy,
            success_rate,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for summary in &instructions {
            println!("{summary}");
        }
        println!();
        println!(
            "Episodes: {} (success {}, failure {}, undetermined {})",
            labels.total, labels.succeeded, labels.failed, labels.null
        );
        match success_rate {
            Some(rate) => println!(
                "Success rate: {:.2}% (null labels: {})",
                rate * 100.0,
                config.null_label_policy
            ),
            None => println!("Success rate: n/a"),
        }
        println!("Summary written to {}", summary_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_evaluate_args() {
        let cli = Cli::try_parse_from([
            "mobile-judge",
            "evaluate",
            "--trajectories-dir",
            "./data/map",
            "--score-threshold",
            "4",
            "--null-policy",
            "exclude",
            "-j",
            "2",
            "--api-key",
            "sk-test",
        ])
        .expect("parse");

        match cli.command {
            Commands::Evaluate(args) => {
                assert_eq!(args.trajectories_dir, PathBuf::from("./data/map"));
                assert_eq!(args.ledger.score_threshold, Some(4));
                assert_eq!(args.ledger.null_policy, Some(NullLabelPolicy::Exclude));
                assert_eq!(args.concurrency, Some(2));
                assert_eq!(args.api_key.as_deref(), Some("sk-test"));
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn test_ledger_args_override_config() {
        let args = LedgerArgs {
            category: Some("general".to_string()),
            score_threshold: Some(5),
            ..LedgerArgs::default()
        };
        let mut config = EvalConfig::default();
        args.apply(&mut config);
        assert_eq!(config.category, "general");
        assert_eq!(config.score_threshold, 5);
        assert_eq!(config.dataset_type, "train");
    }

    #[test]
    fn test_parse_summarize_args() {
        let cli = Cli::try_parse_from(["mobile-judge", "summarize", "--app-name", "naver_map", "--json"])
            .expect("parse");
        match cli.command {
            Commands::Summarize(args) => {
                assert_eq!(args.ledger.app_name.as_deref(), Some("naver_map"));
                assert!(args.json);
            }
            _ => panic!("expected summarize"),
        }
    }
}
