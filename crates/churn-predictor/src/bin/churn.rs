use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use churn_predictor::{
    AppConfig, ChurnPredictor, Domain, LogStatus, PredictionLog, RawRecord, Schema,
};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing_subscriber::EnvFilter;

/// Predict whether a customer is likely to churn and browse past predictions.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// TOML config file (defaults to $CHURN_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one customer and record the prediction
    ///
    /// Every field starts at its schema default (range midpoint or first
    /// category); use --set to change individual values.
    Predict {
        /// Field value, e.g. --set last_nps_rating=6
        #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_assignment)]
        set: Vec<(String, String)>,
    },
    /// Show historical predictions
    History {
        /// Print outcome counts instead of the table
        #[arg(long)]
        summary: bool,
    },
    /// List the input fields and their domains
    Schema,
    /// Print what drives churn in the training data
    Insights,
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected FIELD=VALUE, got `{s}`")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the table output on stdout stays pipeable.
    let level = cli.verbose.tracing_level_filter();
    let filter = EnvFilter::new(format!("warn,churn_predictor={level},churn={level}"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Commands::Predict { set } => predict(&config, &set, &mut out),
        Commands::History { summary } => history(&config, summary, &mut out),
        Commands::Schema => schema(&config, &mut out),
        Commands::Insights => insights(&mut out),
    }
}

fn predict(config: &AppConfig, set: &[(String, String)], out: &mut impl Write) -> Result<()> {
    let predictor = ChurnPredictor::open(
        &config.artifacts,
        Some(config.engineered.clone()),
        &config.history_path,
    )
    .context("failed to load model artifacts")?;
    let schema = predictor.artifacts().schema();

    let mut record = schema.default_record();
    for (field, raw) in set {
        let value = schema
            .coerce(field, raw)
            .with_context(|| format!("invalid value for --set {field}={raw}"))?;
        record.set(field.clone(), value);
    }

    let outcome = predictor.predict(&record).context("prediction failed")?;

    writeln!(out, "Predicted outcome")?;
    writeln!(out, "  {} (p = {:.3})", outcome.label.verdict(), outcome.probability)?;
    writeln!(out)?;
    writeln!(out, "Provided details")?;
    write_record(out, &record)?;
    if let LogStatus::Failed(err) = &outcome.log_status {
        writeln!(out)?;
        writeln!(out, "(not saved to history: {err})")?;
    }
    Ok(())
}

fn write_record(out: &mut impl Write, record: &RawRecord) -> Result<()> {
    let width = record.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, value) in record.iter() {
        writeln!(out, "  {name:<width$}  {value}")?;
    }
    Ok(())
}

fn history(config: &AppConfig, summary: bool, out: &mut impl Write) -> Result<()> {
    let schema = Schema::load(&config.artifacts.schema).context("failed to load schema")?;
    let log = PredictionLog::new(&config.history_path, &schema);

    if summary {
        match log.summary().context("failed to read prediction history")? {
            Some(summary) => {
                writeln!(out, "Historical outcomes")?;
                for (label, count) in summary.occurrences() {
                    writeln!(out, "  {label:<9}  {count:>6}  {}", "#".repeat(bar(count, summary.total())))?;
                }
            }
            None => writeln!(out, "No historical data")?,
        }
        return Ok(());
    }

    let entries = log.read_all().context("failed to read prediction history")?;
    if entries.is_empty() {
        writeln!(out, "No historical data")?;
        return Ok(());
    }
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(log.display_header())?;
    for entry in &entries {
        let row = entry
            .record
            .iter()
            .map(|(_, v)| v.to_string())
            .chain(std::iter::once(entry.prediction.as_u8().to_string()));
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn bar(count: usize, total: usize) -> usize {
    const WIDTH: usize = 40;
    if total == 0 { 0 } else { count * WIDTH / total }
}

fn schema(config: &AppConfig, out: &mut impl Write) -> Result<()> {
    let schema = Schema::load(&config.artifacts.schema).context("failed to load schema")?;
    let width = schema.input_fields().map(|f| f.name.len()).max().unwrap_or(0);
    for field in schema.input_fields() {
        let domain = match &field.domain {
            Domain::Range { min, max } => format!("[{min}, {max}]"),
            Domain::Categories(c) => format!("{{{}}}", c.join(", ")),
        };
        writeln!(
            out,
            "{:<width$}  {:<7}  {domain}  (default {})",
            field.name,
            field.field_type.to_string(),
            field.default_value()
        )?;
    }
    Ok(())
}

fn insights(out: &mut impl Write) -> Result<()> {
    const INSIGHTS: &[(&str, &str, &str)] = &[
        (
            "last_nps_rating",
            "8",
            "Customers who gave an NPS rating below 8 were more likely to churn.",
        ),
        (
            "remaining_term",
            "5",
            "Customers with a remaining term below 5 months were more likely to churn.",
        ),
        (
            "promotions_offered",
            "N",
            "Customers who had not been offered promotions were more likely to churn.",
        ),
    ];
    for (field, threshold, text) in INSIGHTS {
        writeln!(out, "{field} ({threshold}): {text}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assignments() {
        assert_eq!(
            parse_assignment("last_nps_rating=6"),
            Ok(("last_nps_rating".to_string(), "6".to_string()))
        );
        assert_eq!(
            parse_assignment("state_code=a=b"),
            Ok(("state_code".to_string(), "a=b".to_string()))
        );
        assert!(parse_assignment("tenure").is_err());
        assert!(parse_assignment("=3").is_err());
    }

    #[test]
    fn bar_scales_to_width() {
        assert_eq!(bar(1, 2), 20);
        assert_eq!(bar(0, 0), 0);
        assert_eq!(bar(3, 3), 40);
    }

    #[test]
    fn history_table_hides_id_column() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            artifacts: churn_predictor::testing::fixture_paths(),
            history_path: dir.path().join("historical_data.csv"),
            ..AppConfig::default()
        };
        let schema = Schema::load(&config.artifacts.schema).unwrap();
        let log = PredictionLog::new(&config.history_path, &schema);
        let row = "7,KS,24,12,N,3,6,area_code_415,no,yes,25,150.0,10.0,3,1";
        std::fs::write(log.path(), format!("{}\n{row}\n", log.header().join(","))).unwrap();

        let mut out = Vec::new();
        history(&config, false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("state_code,tenure,"));
        assert!(lines.next().unwrap().starts_with("KS,24,"));
        assert!(!text.contains("id,"));
    }

    #[test]
    fn cli_accepts_repeated_set() {
        let cli = Cli::try_parse_from([
            "churn",
            "predict",
            "--set",
            "tenure=24",
            "--set",
            "last_nps_rating=6",
        ])
        .unwrap();
        match cli.command {
            Commands::Predict { set } => assert_eq!(set.len(), 2),
            _ => panic!("expected predict"),
        }
    }
}
