use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use vintage_pipeline::{
    config::{CONFIG_FILE_PATH, PARAMS_FILE_PATH, SCHEMA_FILE_PATH},
    run_all, run_stage, ConfigurationManager, DataIngestionStage, DataTransformationStage,
    DataValidationStage, ModelEvaluationStage, ModelTrainingStage, PipelineTelemetry,
    PredictionPipeline,
};

#[derive(Parser, Debug)]
#[command(name = "vintage", version, about = "Wine-quality training pipeline")]
struct Cli {
    #[arg(long, global = true, default_value = CONFIG_FILE_PATH)]
    config: PathBuf,
    #[arg(long, global = true, default_value = PARAMS_FILE_PATH)]
    params: PathBuf,
    #[arg(long, global = true, default_value = SCHEMA_FILE_PATH)]
    schema: PathBuf,
    /// JSON log file; defaults to `<logs_dir>/running.log`.
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Downloads and extracts the raw dataset.
    Ingest,
    /// Checks the raw CSV against the schema.
    Validate,
    /// Cleans, splits and rebalances the data.
    Transform,
    /// Fits and saves the elastic net.
    Train,
    /// Scores the model and records the run.
    Evaluate,
    /// Runs every stage in order.
    Run,
    /// Predicts quality for one row of features.
    Predict {
        /// Feature values in training column order.
        #[arg(
            long,
            required = true,
            num_args = 1..,
            value_delimiter = ',',
            allow_negative_numbers = true
        )]
        values: Vec<f64>,
        /// Model artifact; defaults to the configured prediction model.
        #[arg(long)]
        model: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let manager = ConfigurationManager::new(&cli.config, &cli.params, &cli.schema)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| manager.logs_dir().join("running.log"));
    let telemetry = PipelineTelemetry::builder("vintage")
        .log_path(&log_path)
        .build()
        .with_context(|| format!("opening log {}", log_path.display()))?;

    match cli.command {
        Commands::Ingest => {
            let outcome = run_stage(&DataIngestionStage, &manager, &telemetry)?;
            for path in &outcome.extracted {
                println!("{}", path.display());
            }
        }
        Commands::Validate => {
            let report = run_stage(&DataValidationStage, &manager, &telemetry)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Transform => {
            let report = run_stage(&DataTransformationStage, &manager, &telemetry)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Train => {
            let outcome = run_stage(&ModelTrainingStage, &manager, &telemetry)?;
            println!(
                "{}",
                json!({
                    "model_path": outcome.model_path,
                    "train_rmse": outcome.train_rmse,
                    "test_rmse": outcome.test_rmse,
                })
            );
        }
        Commands::Evaluate => {
            let metrics = run_stage(&ModelEvaluationStage, &manager, &telemetry)?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Run => {
            let summary = run_all(&manager, &telemetry)?;
            println!("{}", serde_json::to_string_pretty(&summary.metrics)?);
        }
        Commands::Predict { values, model } => {
            let model = model.unwrap_or_else(|| manager.prediction_config().model_path);
            println!("{}", predict(&model, &values)?);
        }
    }
    Ok(())
}

fn predict(model: &Path, values: &[f64]) -> Result<f64> {
    let pipeline = PredictionPipeline::new(model)
        .with_context(|| format!("loading model {}", model.display()))?;
    ensure!(
        values.len() == pipeline.feature_names().len(),
        "expected {} values ({}), got {}",
        pipeline.feature_names().len(),
        pipeline.feature_names().join(", "),
        values.len()
    );
    Ok(pipeline.predict(values)?)
}
