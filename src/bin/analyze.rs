use ab_lift::data::{read_csv, write_csv};
use ab_lift::utils::{init_logger, Config};
use ab_lift::AnalysisPipeline;
use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Validate randomization and estimate lift for an ad experiment
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Experiment CSV (user_id, test, converted, tot_impr, mode_impr_day, mode_impr_hour)
    #[arg(short, long)]
    input: PathBuf,

    /// TOML configuration; falls back to CONFIG_FILE, then built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the cleaned dataset
    #[arg(long)]
    cleaned_output: Option<PathBuf>,

    /// Where to write the JSON report
    #[arg(long, default_value = "analysis_report.json")]
    report_output: PathBuf,

    /// Overrides logging.level from the config
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    let args = Args::parse();

    let (config, fallback) = match &args.config {
        Some(path) => (Config::from_file(path)?, None),
        None => match Config::load() {
            Ok(config) => (config, None),
            Err(err) => (Config::default(), Some(err)),
        },
    };

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let json = args.json_logs || config.logging.output == "json";
    let log_file = (!config.logging.file_path.is_empty()).then(|| Path::new(&config.logging.file_path));
    init_logger(level, json, log_file)?;

    if let Some(err) = fallback {
        warn!("Using default configuration: {:#}", err);
    }

    info!(input = %args.input.display(), "Reading experiment data");
    let rows = read_csv(&args.input)
        .with_context(|| format!("Failed to read experiment data from {}", args.input.display()))?;

    let run = AnalysisPipeline::new(&config)
        .run(rows)
        .context("Analysis aborted")?;

    if let Some(path) = &args.cleaned_output {
        write_csv(path, &run.cleaned)
            .with_context(|| format!("Failed to write cleaned dataset to {}", path.display()))?;
        info!(path = %path.display(), records = run.cleaned.len(), "Cleaned dataset written");
    }

    run.report.print_summary();

    // Save report to JSON
    let json = run.report.to_json()?;
    std::fs::write(&args.report_output, json)
        .with_context(|| format!("Failed to write report to {}", args.report_output.display()))?;
    println!("Report saved to: {}", args.report_output.display());

    Ok(())
}
