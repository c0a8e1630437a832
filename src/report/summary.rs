use super::{AnalysisReport, Outcome};
use crate::data::Snapshot;
use crate::estimation::LiftSummary;
use std::fmt::Write;

const WIDTH: usize = 56;

struct Boxed {
    out: String,
}

impl Boxed {
    fn new(title: &str) -> Self {
        let mut boxed = Self { out: String::new() };
        boxed.rule('╔', '╗');
        boxed.text(&format!("{:^w$}", title, w = WIDTH - 2));
        boxed
    }

    fn rule(&mut self, left: char, right: char) {
        let _ = writeln!(self.out, "{}{}{}", left, "═".repeat(WIDTH), right);
    }

    fn section(&mut self, title: &str) {
        self.rule('╠', '╣');
        self.text(title);
    }

    fn text(&mut self, text: &str) {
        let _ = writeln!(self.out, "║ {:<w$} ║", text, w = WIDTH - 2);
    }

    fn row(&mut self, label: &str, value: impl std::fmt::Display) {
        self.text(&format!("{}: {}", label, value));
    }

    fn finish(mut self) -> String {
        self.rule('╚', '╝');
        self.out
    }
}

fn show<T>(outcome: &Outcome<T>, f: impl FnOnce(&T) -> String) -> String {
    match outcome {
        Outcome::Available(value) => f(value),
        Outcome::Unavailable { .. } => "unavailable".to_string(),
    }
}

fn lift_rows(boxed: &mut Boxed, label: &str, lift: &Outcome<LiftSummary>) {
    match lift {
        Outcome::Available(l) => {
            boxed.section(label);
            boxed.row("  Control rate", format!("{:.4} ({}/{})", l.control.rate, l.control.converted, l.control.total));
            boxed.row(
                "  Treatment rate",
                format!("{:.4} ({}/{})", l.treatment.rate, l.treatment.converted, l.treatment.total),
            );
            boxed.row("  Absolute lift", format!("{:+.4}", l.absolute_lift));
            boxed.row("  Relative lift", show(&l.relative_lift, |r| format!("{:.3}x", r)));
            boxed.row("  Incremental conversions", format!("{:.1}", l.incremental_conversions));
        }
        Outcome::Unavailable { reason } => {
            boxed.section(label);
            boxed.row("  Unavailable", reason);
        }
    }
}

impl AnalysisReport {
    /// Render the terminal summary
    pub fn summary(&self) -> String {
        let mut boxed = Boxed::new("AD EXPERIMENT ANALYSIS");
        boxed.row("Generated", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));

        boxed.section("DATA");
        boxed.row("  Accepted records", self.load.accepted);
        boxed.row("  Rejected records", self.load.rejected);
        boxed.row("  Removed as outliers", self.outliers.removed());
        boxed.row("  Cleaned records", self.outliers.records_out);
        if let Some(bounds) = &self.outliers.first_pass {
            boxed.row("  Impression median", format!("{:.1}", bounds.median));
            if let Some(limit) = bounds.max_deviation {
                boxed.row("  Max deviation", format!("{:.1}", limit));
            }
        }

        lift_rows(&mut boxed, "LIFT (RAW, HEADLINE)", &self.effect.headline);
        lift_rows(&mut boxed, "LIFT (CLEANED)", &self.effect.cleaned);

        boxed.section("ADJUSTED EFFECT (CLEANED)");
        match &self.effect.adjusted {
            Outcome::Available(e) => {
                boxed.row("  Log-odds", format!("{:+.4} (SE {:.4})", e.log_odds, e.std_error));
                boxed.row(
                    "  Odds ratio",
                    format!("{:.3} [{:.3}, {:.3}]", e.odds_ratio, e.odds_ratio_ci.0, e.odds_ratio_ci.1),
                );
                boxed.row("  p-value", format!("{:.4}", e.p_value));
            }
            Outcome::Unavailable { reason } => boxed.row("  Unavailable", reason),
        }

        let balance = &self.balance;
        boxed.section("CONVERSION DIFFERENCE (EXPECTED EFFECT)");
        for snapshot in [Snapshot::Raw, Snapshot::Cleaned] {
            if let Some(diff) = balance.conversion_test(snapshot) {
                boxed.row(
                    &format!("  {}", snapshot),
                    show(&diff.test, |t| format!("z = {:.3}, p = {:.4}", t.statistic, t.p_value)),
                );
            }
        }

        boxed.section("COVARIATE BALANCE (RANDOMIZATION)");
        if let Some(srm) = &balance.sample_ratio {
            boxed.row(
                "  Sample ratio",
                show(srm, |t| format!("{:.3} observed, p = {:.4}", t.observed_treatment_share, t.p_value)),
            );
        }
        for fit in &balance.covariate_fits {
            let flag = if fit.is_suspect(balance.alpha) { " !" } else { "" };
            boxed.row(
                &format!("  {} {}", fit.snapshot, fit.covariate),
                match fit.joint_p_value {
                    Some(p) => format!("p = {:.4}{}", p, flag),
                    None => "unavailable".to_string(),
                },
            );
        }
        let suspect = balance.suspect_fits().len();
        if suspect > 0 {
            boxed.row("  Needs review", format!("{} covariate fit(s) at alpha {}", suspect, balance.alpha));
        }

        boxed.finish()
    }

    pub fn print_summary(&self) {
        println!("\n{}", self.summary());
    }
}
