use ab_lift::data::{write_csv, Dataset, Group, ImpressionDay, ImpressionHour, Snapshot, UserRecord};
use anyhow::{bail, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

/// Generate a synthetic ad experiment for trying out the analysis
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output CSV path
    #[arg(short, long, default_value = "synthetic_experiment.csv")]
    output: PathBuf,

    /// Number of users
    #[arg(short, long, default_value = "100000")]
    users: usize,

    /// Share of users assigned to treatment
    #[arg(long, default_value = "0.96")]
    treatment_share: f64,

    /// Control conversion rate
    #[arg(long, default_value = "0.018")]
    baseline_rate: f64,

    /// Relative lift applied to the treatment rate (0.4 = +40%)
    #[arg(long, default_value = "0.4")]
    lift: f64,

    /// Mean total impressions per user
    #[arg(long, default_value = "25")]
    mean_impressions: f64,

    /// Share of users with pathological impression counts
    #[arg(long, default_value = "0.002")]
    outlier_share: f64,

    /// RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if !(args.treatment_share > 0.0 && args.treatment_share < 1.0) {
        bail!("--treatment-share must be in (0, 1)");
    }
    let treatment_rate = args.baseline_rate * (1.0 + args.lift);
    if !(0.0..=1.0).contains(&args.baseline_rate) || !(0.0..=1.0).contains(&treatment_rate) {
        bail!("conversion rates must stay within [0, 1], treatment rate would be {}", treatment_rate);
    }

    println!("╔════════════════════════════════════════════════╗");
    println!("║         SYNTHETIC EXPERIMENT GENERATOR         ║");
    println!("╚════════════════════════════════════════════════╝");
    println!();
    println!("Users: {}", args.users);
    println!("Treatment share: {}", args.treatment_share);
    println!("Conversion rates: {:.4} control, {:.4} treatment", args.baseline_rate, treatment_rate);
    println!();

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let records = generate_synthetic_users(&mut rng, &args, treatment_rate)?;
    let dataset = Dataset::from_records(Snapshot::Raw, records);

    write_csv(&args.output, &dataset)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("Experiment saved to: {}", args.output.display());

    Ok(())
}

/// Users with exponential impression counts, a sprinkling of unexposed and
/// heavy users, and conversion probability depending only on the arm
fn generate_synthetic_users(
    rng: &mut StdRng,
    args: &Args,
    treatment_rate: f64,
) -> anyhow::Result<Vec<UserRecord>> {
    let mut records = Vec::with_capacity(args.users);

    for i in 0..args.users {
        let group = if rng.gen_bool(args.treatment_share) {
            Group::Treatment
        } else {
            Group::Control
        };
        let rate = match group {
            Group::Control => args.baseline_rate,
            Group::Treatment => treatment_rate,
        };

        let impressions = if rng.gen_bool(args.outlier_share.clamp(0.0, 1.0)) {
            rng.gen_range(1_000..3_000)
        } else {
            let u: f64 = rng.gen();
            (-args.mean_impressions * (1.0 - u).ln()).floor() as u32
        };

        let day = ImpressionDay::new(rng.gen_range(1..=7)).context("day out of range")?;
        let hour = ImpressionHour::new(rng.gen_range(0..24)).context("hour out of range")?;

        records.push(UserRecord::new(
            format!("{}", 900_000 + i),
            group,
            rng.gen_bool(rate),
            impressions,
            day,
            hour,
        ));
    }

    Ok(records)
}
