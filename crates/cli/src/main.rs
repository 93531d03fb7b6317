use clap::{Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use scm_core::config::EngineConfig;
use scm_core::model::Model;
use scm_core::propagate::{propagate, Interventions, PropagationResult};
use scm_core::rng::rng_for;
use scm_core::sensitivity::{analyze, SensitivityReport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "scm", version, about = "Structural causal model simulator")]
struct Cli {
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    Propagate {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        interventions: Option<PathBuf>,
    },
    Analyze {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    Validate {
        #[arg(long)]
        model: PathBuf,
    },
}

fn init_tracing(log_format: LogFormat, log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .into_diagnostic()?;
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match log_format {
        LogFormat::Json => fmt.json().init(),
        LogFormat::Pretty => fmt.init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, &cli.log_level)?;

    match cli.command {
        Commands::Propagate {
            model,
            config,
            interventions,
        } => propagate_command(&model, config.as_deref(), interventions.as_deref()),
        Commands::Analyze {
            model,
            config,
            format,
        } => analyze_command(&model, config.as_deref(), format),
        Commands::Validate { model } => validate_command(&model),
    }
}

#[derive(Serialize)]
struct PropagateOutput<'a> {
    order: &'a [String],
    samples: &'a std::collections::HashMap<String, Vec<f64>>,
    summaries: &'a std::collections::HashMap<String, scm_core::distributions::DistributionSummary>,
}

#[tracing::instrument(skip(config_path, interventions_path))]
fn propagate_command(
    model_path: &Path,
    config_path: Option<&Path>,
    interventions_path: Option<&Path>,
) -> Result<()> {
    tracing::info!(command = "propagate", model = %model_path.display());
    let model = load_model(model_path)?;
    let config = load_config_or_default(config_path)?;
    let interventions = load_interventions(interventions_path)?;

    let seed = config.rng_seed.unwrap_or(0);
    let mut rng = rng_for(seed);
    let result: PropagationResult = propagate(&model, &config, &interventions, &mut rng)
        .into_diagnostic()
        .with_context(|| format!("Failed to propagate model {}", model_path.display()))?;

    let output = PropagateOutput {
        order: &result.order,
        samples: &result.samples,
        summaries: &result.summaries,
    };
    println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
    Ok(())
}

#[tracing::instrument(skip(config_path))]
fn analyze_command(model_path: &Path, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    tracing::info!(command = "analyze", model = %model_path.display());
    let model = load_model(model_path)?;
    let config = load_config_or_default(config_path)?;
    let seed = config.rng_seed.unwrap_or(0);

    let timestamp = chrono::Utc::now().to_rfc3339();
    let report: SensitivityReport = analyze(&model, &config, seed, timestamp)
        .into_diagnostic()
        .with_context(|| format!("Failed to analyze model {}", model_path.display()))?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("{}", scm_core::report::render_markdown(&report));
        }
    }
    Ok(())
}

fn validate_command(model_path: &Path) -> Result<()> {
    tracing::info!(command = "validate", model = %model_path.display());
    let model = load_model(model_path)?;
    scm_core::propagate::topological_order(&model)
        .into_diagnostic()
        .with_context(|| format!("Model {} is structurally invalid", model_path.display()))?;
    println!("Model OK");
    Ok(())
}

fn load_model(path: &Path) -> Result<Model> {
    read_json(path)
}

fn load_config_or_default(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => read_json(path),
        None => Ok(EngineConfig::default()),
    }
}

fn load_interventions(path: Option<&Path>) -> Result<Interventions> {
    match path {
        Some(path) => read_json(path),
        None => Ok(Interventions::new()),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .into_diagnostic()
        .with_context(|| format!("Failed to read JSON file {}", path.display()))?;
    serde_json::from_str(&contents)
        .into_diagnostic()
        .with_context(|| format!("Invalid JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_json(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn two_node_model_json() -> &'static str {
        r#"{
            "nodes": [
                {"id": "a", "type": "exogenous", "distribution": {"type": "normal", "mean": 10.0, "stdDev": 1.0}},
                {"id": "b", "type": "terminal", "distribution": {"type": "normal", "mean": 5.0, "stdDev": 1.0}}
            ],
            "edges": [
                {"source": "a", "target": "b", "effect": {"type": "linear", "coefficient": 0.5}}
            ]
        }"#
    }

    #[test]
    fn load_model_parses_valid_json() {
        let file = write_json(two_node_model_json());
        let model = load_model(file.path()).unwrap();
        assert_eq!(model.nodes.len(), 2);
        assert_eq!(model.edges.len(), 1);
    }

    #[test]
    fn load_model_rejects_invalid_json() {
        let file = write_json("not valid json");
        let result = load_model(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn load_config_or_default_falls_back_to_defaults() {
        let config = load_config_or_default(None).unwrap();
        assert_eq!(config.sample_count, 100);
    }

    #[test]
    fn load_config_or_default_reads_from_file() {
        let file = write_json(r#"{"sampleCount": 250}"#);
        let config = load_config_or_default(Some(file.path())).unwrap();
        assert_eq!(config.sample_count, 250);
    }

    #[test]
    fn load_interventions_defaults_to_empty() {
        let interventions = load_interventions(None).unwrap();
        assert!(interventions.is_empty());
    }

    #[test]
    fn load_interventions_reads_from_file() {
        let file = write_json(r#"{"a": 42.0}"#);
        let interventions = load_interventions(Some(file.path())).unwrap();
        assert_eq!(interventions.get("a"), Some(&42.0));
    }

    #[test]
    fn validate_command_accepts_acyclic_model() {
        let file = write_json(two_node_model_json());
        assert!(validate_command(file.path()).is_ok());
    }

    #[test]
    fn validate_command_rejects_cyclic_model() {
        let file = write_json(
            r#"{
            "nodes": [
                {"id": "a", "type": "endogenous", "distribution": {"type": "normal", "mean": 0.0, "stdDev": 1.0}},
                {"id": "b", "type": "endogenous", "distribution": {"type": "normal", "mean": 0.0, "stdDev": 1.0}}
            ],
            "edges": [
                {"source": "a", "target": "b", "effect": {"type": "linear"}},
                {"source": "b", "target": "a", "effect": {"type": "linear"}}
            ]
        }"#,
        );
        assert!(validate_command(file.path()).is_err());
    }

    #[test]
    fn propagate_command_runs_end_to_end() {
        let file = write_json(two_node_model_json());
        assert!(propagate_command(file.path(), None, None).is_ok());
    }

    #[test]
    fn analyze_command_runs_end_to_end_json() {
        let file = write_json(two_node_model_json());
        assert!(analyze_command(file.path(), None, OutputFormat::Json).is_ok());
    }

    #[test]
    fn analyze_command_runs_end_to_end_markdown() {
        let file = write_json(two_node_model_json());
        assert!(analyze_command(file.path(), None, OutputFormat::Markdown).is_ok());
    }

    #[test]
    fn propagate_command_rejects_invalid_config() {
        let model_file = write_json(two_node_model_json());
        let config_file = write_json(r#"{"globalMinClamp": 10.0, "globalMaxClamp": 0.1}"#);
        let result = propagate_command(model_file.path(), Some(config_file.path()), None);
        assert!(result.is_err());
    }
}
