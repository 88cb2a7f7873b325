//! edsad-sim - streaming anomaly detection driver
//!
//! Usage:
//!   edsad-sim simulate --points 500 --strategy forecast
//!   edsad-sim detect-csv --path data.csv --column nat_demand --strategy isolation
//!   edsad-sim detect-csv --path data.csv --column nat_demand --whole-series
//!   edsad-sim watch --pacing-ms 100 --points 300

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use edsad_core::live::DEFAULT_TICK;
use edsad_core::{
    BatchReport, CancellationToken, DetectionEngine, DetectorConfig, EntryStatus, IsolationConfig,
    LiveSession, StrategyKind, Verdict, detect_batch, detect_whole_series,
};
use edsad_sim::{CsvSource, Evaluation, GeneratorConfig, SyntheticSource, evaluate_report};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edsad-sim")]
#[command(about = "Streaming anomaly detection over synthetic or CSV series")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Batch run over a synthetic seasonal stream
    Simulate {
        #[command(flatten)]
        detector: DetectorArgs,

        #[command(flatten)]
        generator: GeneratorArgs,

        /// Number of points to generate
        #[arg(short, long, default_value = "500")]
        points: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Batch run over one column of a CSV file
    DetectCsv {
        #[command(flatten)]
        detector: DetectorArgs,

        /// CSV file with a header row
        #[arg(long)]
        path: PathBuf,

        /// Column holding the values
        #[arg(short, long, default_value = "nat_demand")]
        column: String,

        /// Optional timestamp column
        #[arg(long)]
        timestamp_column: Option<String>,

        /// One isolation fit over the whole column, every row scored
        /// (contamination 0.01 unless --contamination is given)
        #[arg(long)]
        whole_series: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Live run: paced generator, records printed on every tick
    Watch {
        #[command(flatten)]
        detector: DetectorArgs,

        #[command(flatten)]
        generator: GeneratorArgs,

        /// Stop after this many points (runs until interrupted otherwise)
        #[arg(short, long)]
        points: Option<u64>,

        /// Delay between generated points in milliseconds
        #[arg(long, default_value = "100")]
        pacing_ms: u64,

        /// Consumer redraw interval in milliseconds
        #[arg(long, default_value_t = DEFAULT_TICK.as_millis() as u64)]
        tick_ms: u64,
    },
}

#[derive(Args)]
struct DetectorArgs {
    /// TOML detector configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    strategy: Option<Strategy>,

    /// Trailing window size W
    #[arg(short, long)]
    window: Option<usize>,

    /// Refit every K scored points
    #[arg(long)]
    cadence: Option<usize>,

    /// Forecast residual threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Isolation contamination in (0, 0.5]
    #[arg(long)]
    contamination: Option<f64>,
}

#[derive(Args)]
struct GeneratorArgs {
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Probability of a random anomaly per point
    #[arg(long)]
    anomaly_probability: Option<f64>,

    /// Use the seasonal + daily profile (amplitude 10/5, noise 2)
    #[arg(long)]
    daily: bool,

    /// Fixed injection as INDEX:OFFSET (repeatable)
    #[arg(long = "inject", value_parser = parse_injection)]
    injections: Vec<(u64, f64)>,
}

#[derive(Args)]
struct OutputArgs {
    #[arg(short, long, default_value = "table")]
    format: OutputFormat,

    /// List every point in table output, not just flagged and undetermined ones
    #[arg(long)]
    all: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Strategy {
    Forecast,
    Isolation,
}

impl From<Strategy> for StrategyKind {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Forecast => StrategyKind::Forecast,
            Strategy::Isolation => StrategyKind::Isolation,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            detector,
            generator,
            points,
            output,
        } => run_simulate(&detector, &generator, points, &output),
        Commands::DetectCsv {
            detector,
            path,
            column,
            timestamp_column,
            whole_series,
            output,
        } => run_detect_csv(
            &detector,
            path,
            &column,
            timestamp_column.as_deref(),
            whole_series,
            &output,
        ),
        Commands::Watch {
            detector,
            generator,
            points,
            pacing_ms,
            tick_ms,
        } => run_watch(&detector, &generator, points, pacing_ms, tick_ms),
    }
}

fn run_simulate(
    detector: &DetectorArgs,
    generator: &GeneratorArgs,
    points: u64,
    output: &OutputArgs,
) -> Result<()> {
    let config = detector.resolve()?;
    let mut source = SyntheticSource::new(generator.build().with_limit(points))
        .context("invalid generator settings")?;

    let report = detect_batch(&config, &mut source).context("detection run failed")?;
    let eval = evaluate_report(&report, source.ground_truth());
    info!(
        precision = eval.precision,
        recall = eval.recall,
        f1 = eval.f1,
        injected = source.ground_truth().len(),
        "Evaluation against ground truth"
    );

    match output.format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "report": report, "evaluation": eval });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => {
            print_report(&report, output.all);
            print_evaluation(&eval);
        }
    }
    Ok(())
}

fn run_detect_csv(
    detector: &DetectorArgs,
    path: PathBuf,
    column: &str,
    timestamp_column: Option<&str>,
    whole_series: bool,
    output: &OutputArgs,
) -> Result<()> {
    let mut source = CsvSource::from_path(&path, column, timestamp_column)
        .with_context(|| format!("failed to load {}", path.display()))?;

    let report = if whole_series {
        let config = detector.whole_series();
        detect_whole_series(&config, &mut source).context("whole-series run failed")?
    } else {
        let config = detector.resolve()?;
        detect_batch(&config, &mut source).context("detection run failed")?
    };
    match output.format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Table => print_report(&report, output.all),
    }
    Ok(())
}

fn run_watch(
    detector: &DetectorArgs,
    generator: &GeneratorArgs,
    points: Option<u64>,
    pacing_ms: u64,
    tick_ms: u64,
) -> Result<()> {
    let config = detector.resolve()?;
    let mut gen_config = generator.build();
    gen_config.limit = points;
    gen_config.pacing_ms = Some(pacing_ms);

    let source = SyntheticSource::new(gen_config.clone()).context("invalid generator settings")?;
    let engine = DetectionEngine::from_config(&config).context("invalid detector configuration")?;

    eprintln!(
        "Watching {} stream (window {}, cadence {}), pacing {}ms",
        config.strategy.name(),
        config.engine().window_size,
        config.engine().refit_cadence,
        pacing_ms
    );

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone())?;

    let session = LiveSession::start_with_cancel(engine, source, gen_config.pacing(), cancel);
    let summary = session.for_each_tick(Duration::from_millis(tick_ms.max(1)), |batch| {
        for record in batch {
            match &record.verdict {
                Verdict::Normal => {}
                Verdict::Anomaly => println!(
                    "{:>8}  {:>12.4}  ANOMALY       {}",
                    record.index,
                    record.value,
                    fmt_opt(record.residual_or_score)
                ),
                Verdict::Undetermined { reason } => {
                    println!("{:>8}  {:>12.4}  UNDETERMINED  {}", record.index, record.value, reason)
                }
            }
        }
    })?;

    eprintln!(
        "{} {} points: {} anomalies, {} normal, {} undetermined",
        if summary.cancelled { "Interrupted after" } else { "Observed" },
        summary.observed,
        summary.tally.anomalies,
        summary.tally.normals,
        summary.tally.undetermined
    );
    Ok(())
}

/// Cancel `token` on Ctrl-C. The engine stops at the next point boundary and
/// the session still returns its summary.
fn cancel_on_interrupt(token: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start signal runtime")?;
    thread::spawn(move || {
        runtime.block_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, stopping at the next point");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
    });
    Ok(())
}

impl DetectorArgs {
    fn whole_series(&self) -> IsolationConfig {
        let mut config = IsolationConfig::whole_series();
        if let Some(contamination) = self.contamination {
            config.contamination = contamination;
        }
        config
    }

    fn resolve(&self) -> Result<DetectorConfig> {
        let mut config = match &self.config {
            Some(path) => DetectorConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => DetectorConfig::default(),
        };
        if let Some(strategy) = self.strategy {
            config.strategy = strategy.into();
        }
        if let Some(window) = self.window {
            config.window_size = Some(window);
        }
        if let Some(cadence) = self.cadence {
            config.refit_cadence = Some(cadence);
        }
        if let Some(threshold) = self.threshold {
            config.forecast.threshold = threshold;
        }
        if let Some(contamination) = self.contamination {
            config.isolation.contamination = contamination;
        }
        config.validate().context("invalid detector configuration")?;
        Ok(config)
    }
}

impl GeneratorArgs {
    fn build(&self) -> GeneratorConfig {
        let mut config = if self.daily {
            GeneratorConfig::seasonal_daily()
        } else {
            GeneratorConfig::default()
        };
        config.seed = self.seed;
        if let Some(p) = self.anomaly_probability {
            config.anomaly_probability = p;
        }
        for &(index, offset) in &self.injections {
            config = config.inject(index, offset);
        }
        config
    }
}

fn parse_injection(raw: &str) -> Result<(u64, f64), String> {
    let (index, offset) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected INDEX:OFFSET, got '{raw}'"))?;
    let index = index
        .trim()
        .parse()
        .map_err(|e| format!("bad index '{index}': {e}"))?;
    let offset = offset
        .trim()
        .parse()
        .map_err(|e| format!("bad offset '{offset}': {e}"))?;
    Ok((index, offset))
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

fn print_report(report: &BatchReport, all: bool) {
    println!(
        "run {}  strategy={}  window={}  cadence={}",
        report.run_id, report.strategy, report.engine.window_size, report.engine.refit_cadence
    );
    println!(
        "{:>8}  {:>12}  {:<13} {:>12}  {:>12}",
        "index", "value", "status", "resid/score", "predicted"
    );
    for entry in &report.entries {
        let show = all || matches!(entry.status, EntryStatus::Anomaly | EntryStatus::Undetermined { .. });
        if !show {
            continue;
        }
        println!(
            "{:>8}  {:>12.4}  {:<13} {:>12}  {:>12}",
            entry.index,
            entry.value,
            entry.status.label(),
            fmt_opt(entry.residual_or_score),
            fmt_opt(entry.predicted)
        );
        if let EntryStatus::Undetermined { reason } = &entry.status {
            println!("{:>8}  {}", "", reason);
        }
    }
    let s = &report.summary;
    println!(
        "points={}  warmup={}  anomalies={}  normal={}  undetermined={}  fits={}  fit_failures={}",
        report.entries.len(),
        s.warmup,
        s.tally.anomalies,
        s.tally.normals,
        s.tally.undetermined,
        s.fits,
        s.fit_failures
    );
}

fn print_evaluation(eval: &Evaluation) {
    println!(
        "tp={}  fp={}  fn={}  tn={}  undetermined={}  precision={:.3}  recall={:.3}  f1={:.3}",
        eval.true_positives,
        eval.false_positives,
        eval.false_negatives,
        eval.true_negatives,
        eval.undetermined,
        eval.precision,
        eval.recall,
        eval.f1
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_injection() {
        assert_eq!(parse_injection("120:5").unwrap(), (120, 5.0));
        assert_eq!(parse_injection(" 7 : -2.5 ").unwrap(), (7, -2.5));
        assert!(parse_injection("120").is_err());
        assert!(parse_injection("x:1").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "edsad-sim",
            "simulate",
            "--strategy",
            "isolation",
            "--window",
            "60",
            "--contamination",
            "0.01",
        ])
        .unwrap();
        let Commands::Simulate { detector, .. } = cli.command else {
            panic!("expected simulate");
        };
        let config = detector.resolve().unwrap();
        assert_eq!(config.strategy, StrategyKind::Isolation);
        assert_eq!(config.engine().window_size, 60);
        assert_eq!(config.engine().refit_cadence, 10);
        assert_eq!(config.isolation.contamination, 0.01);
    }

    #[test]
    fn test_whole_series_flag_defaults_contamination() {
        let cli = Cli::try_parse_from([
            "edsad-sim",
            "detect-csv",
            "--path",
            "demand.csv",
            "--whole-series",
        ])
        .unwrap();
        let Commands::DetectCsv {
            detector,
            whole_series,
            ..
        } = cli.command
        else {
            panic!("expected detect-csv");
        };
        assert!(whole_series);
        assert_eq!(detector.whole_series().contamination, 0.01);
    }
}
