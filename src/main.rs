//! Evaluates a trained distributional DQN and reports VaR / CVaR of its
//! episode returns.

use anyhow::{Context, Result};
use clap::Parser;
use cvareval::risk::report::RiskReport;
use cvareval::rollout::evaluator::EvaluatorConfig;
use cvareval::session::{EvalSession, SessionOptions, DEFAULT_SEED};
use cvareval::telemetry;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// Run an already learned DQN model
#[derive(Parser)]
#[command(name = "cvareval")]
#[command(version)]
struct Args {
    /// Name of the environment
    #[arg(long)]
    env: String,
    /// Load the model from this directory, args.json is read from its parent
    #[arg(long)]
    model_dir: PathBuf,
    /// Number of episodes to compute statistics over
    #[arg(long, default_value_t = 1000)]
    nb_episodes: usize,
    /// Risk level of the report, 0 uses the training level
    #[arg(long, default_value_t = 0.0)]
    cvar_alpha: f64,
    /// Use stochastic actions according to the model's eps value (default)
    #[arg(long, overrides_with = "no_stochastic")]
    stochastic: bool,
    #[arg(long, overrides_with = "stochastic")]
    no_stochastic: bool,
    /// Evaluate a dueling model
    #[arg(long, overrides_with = "no_dueling")]
    dueling: bool,
    #[arg(long, overrides_with = "dueling")]
    no_dueling: bool,
    /// Histogram bins, defaults to the model's atom count
    #[arg(long)]
    nb_bins: Option<usize>,
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
    /// Write a JSON line per episode to this file
    #[arg(long)]
    trace: Option<PathBuf>,
    /// Write the final report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
    /// Print a text histogram with VaR and CVaR markers
    #[arg(long)]
    chart: bool,
}

#[derive(Serialize)]
struct EvaluationReport<'a> {
    env: &'a str,
    stochastic: bool,
    seed: u64,
    truncated: usize,
    #[serde(flatten)]
    risk: &'a RiskReport,
}

fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init()?;

    let stochastic = args.stochastic || !args.no_stochastic;
    let options = SessionOptions {
        env: args.env.clone(),
        model_dir: args.model_dir.clone(),
        dueling: args.dueling && !args.no_dueling,
        seed: args.seed,
    };
    let mut session = EvalSession::open(&options)
        .with_context(|| format!("cannot load model from {}", args.model_dir.display()))?;

    let alpha = session.training().eval_alpha(args.cvar_alpha)?;
    let bins = session.training().eval_bins(args.nb_bins)?;

    let mut config = EvaluatorConfig::new();
    config.set_episodes(args.nb_episodes);
    config.set_stochastic(stochastic);
    if let Some(path) = &args.trace {
        config.set_trace_path(path);
    }
    let run = session.evaluate(&config).context("evaluation failed")?;

    let report = RiskReport::from_samples(run.returns(), alpha, bins)
        .context("cannot summarize episode returns")?;
    if report.summary.exhausted {
        warn!(
            alpha = alpha.get(),
            "histogram mass did not reach the risk level, CVaR is normalized by the observed mass"
        );
    }
    if run.truncated() > 0 {
        warn!(
            truncated = run.truncated(),
            "some episodes hit the environment step limit"
        );
    }

    if args.chart {
        print!("{}", report.render_chart(60));
    }
    println!("{}", report.summary_line());

    if let Some(path) = &args.report {
        let full = EvaluationReport {
            env: session.env_name(),
            stochastic,
            seed: args.seed,
            truncated: run.truncated(),
            risk: &report,
        };
        fs::write(path, serde_json::to_string_pretty(&full)?)
            .with_context(|| format!("cannot write report to {}", path.display()))?;
    }
    Ok(())
}
