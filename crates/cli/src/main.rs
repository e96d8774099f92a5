use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use events::{EventBus, RunSummary, SummaryCollector};
use lockstep_core::WorkloadConfig;
use orchestrator::actors::default_cast;
use orchestrator::{RunReport, Workload, WorkloadExecutor};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Large enough that the summary collector rarely lags behind busy actors.
const EVENT_CAPACITY: usize = 1 << 16;

#[derive(Parser)]
#[command(name = "lockstep")]
#[command(about = "Phase-synchronized multi-actor workload runner", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload file
    Run {
        file: PathBuf,

        /// Validate and construct every actor, then stop
        #[arg(long)]
        dry_run: bool,
    },
    /// Check a workload file without running it
    Validate { file: PathBuf },
    /// List the registered actor types
    ListActors,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Run { file, dry_run } => run(&file, dry_run),
        Commands::Validate { file } => validate(&file),
        Commands::ListActors => list_actors(),
    }
}

fn run(file: &Path, dry_run: bool) -> Result<()> {
    let config = load_workload(file)?;
    let bus = EventBus::with_capacity(EVENT_CAPACITY);
    let collector = SummaryCollector::spawn(&bus).context("Failed to start summary collector")?;

    let workload = Workload::new(config, &default_cast()?, bus.clone())
        .with_context(|| format!("Invalid workload {}", file.display()))?;

    if dry_run {
        print_construction(&workload);
        return Ok(());
    }

    let result = WorkloadExecutor::new(workload).run();
    drop(bus);
    let summary = collector.finish();

    print_summary(&summary, result.as_ref().ok());
    result.map(|_| ()).context("Workload failed")
}

fn validate(file: &Path) -> Result<()> {
    let config = load_workload(file)?;
    let workload = Workload::new(config, &default_cast()?, EventBus::new())
        .with_context(|| format!("Invalid workload {}", file.display()))?;

    println!("{} {}", "✓".green(), file.display());
    print_construction(&workload);
    Ok(())
}

fn list_actors() -> Result<()> {
    let cast = default_cast()?;
    for name in cast.names() {
        println!("{}", name);
    }
    Ok(())
}

/// Parse a workload file, as JSON for `.json` files and as TOML otherwise.
fn load_workload(path: &Path) -> Result<WorkloadConfig> {
    debug!(path = %path.display(), "Loading workload");
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json {
        WorkloadConfig::from_json_str(&content)
    } else {
        WorkloadConfig::from_toml_str(&content)
    };
    config.with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_construction(workload: &Workload) {
    println!(
        "  {} actors, {} phases",
        workload.actor_count(),
        workload.orchestrator().max_phase() + 1
    );
    for actor in workload.actor_contexts() {
        println!(
            "  {} ({}) x{}: {} phases",
            actor.name().bold(),
            actor.actor_type(),
            actor.threads(),
            actor.phases().len()
        );
    }
}

fn print_summary(summary: &RunSummary, report: Option<&RunReport>) {
    println!();
    match report {
        Some(report) => println!(
            "{} {} actors through {} phases in {:.2?}",
            "Completed".green().bold(),
            report.actors,
            report.phases,
            report.elapsed
        ),
        None => println!(
            "{} {}",
            "Aborted".red().bold(),
            summary.aborted.as_deref().unwrap_or("")
        ),
    }

    if summary.operations.is_empty() {
        return;
    }
    println!();
    for (name, stats) in &summary.operations {
        let mean_us = stats
            .total_duration_us
            .checked_div(stats.completed + stats.failed)
            .unwrap_or(0);
        let failed = if stats.failed > 0 {
            stats.failed.to_string().red()
        } else {
            stats.failed.to_string().normal()
        };
        println!(
            "  {:<32} ok={} failed={} docs={} bytes={} mean={}us",
            name.bold(),
            stats.completed.to_string().green(),
            failed,
            stats.documents,
            stats.bytes,
            mean_us
        );
    }
    if summary.lagged > 0 {
        println!(
            "  {} {} events were dropped before they could be counted",
            "warning:".yellow(),
            summary.lagged
        );
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lockstep=info,orchestrator=info".into()),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const WORKLOAD: &str = r#"
SchemaVersion = "2018-07-01"

[[Actors]]
Name = "Greeter"
Type = "HelloWorld"
Threads = 2

[[Actors.Phases]]
Repeat = 3

[[Actors.Phases]]
Repeat = 2
Rate = "1 per 1 ms"
"#;

    fn workload_file(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write workload");
        file
    }

    #[test]
    fn test_load_toml_workload() {
        let file = workload_file(".toml", WORKLOAD);
        let config = load_workload(file.path()).unwrap();
        assert_eq!(config.actors.len(), 1);
        assert_eq!(config.actors[0].phases.len(), 2);
    }

    #[test]
    fn test_load_json_workload() {
        let file = workload_file(
            ".json",
            r#"{"SchemaVersion": "2018-07-01", "Actors": [{"Type": "HelloWorld", "Phases": [{"Repeat": 1}]}]}"#,
        );
        let config = load_workload(file.path()).unwrap();
        assert_eq!(config.actors[0].name(), "HelloWorld");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_workload(Path::new("/nonexistent/workload.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_validate_and_run() {
        let file = workload_file(".toml", WORKLOAD);
        validate(file.path()).unwrap();
        run(file.path(), true).unwrap();
        run(file.path(), false).unwrap();
    }

    #[test]
    fn test_invalid_workload_fails() {
        let file = workload_file(
            ".toml",
            r#"
SchemaVersion = "2018-07-01"

[[Actors]]
Type = "HelloWorld"

[[Actors.Phases]]
Rate = "1 per 1 second"
"#,
        );
        let err = validate(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Rate must be specified"));
        assert!(run(file.path(), false).is_err());
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["lockstep", "run", "w.toml", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { dry_run: true, .. }));

        let cli = Cli::try_parse_from(["lockstep", "list-actors"]).unwrap();
        assert!(matches!(cli.command, Commands::ListActors));

        assert!(Cli::try_parse_from(["lockstep", "validate"]).is_err());
    }
}
