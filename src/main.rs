mod categorize;
mod config;
mod features;
mod fuzzy;
mod geo;
mod http;
mod model;
mod preprocess;
mod schema;
mod text;

use categorize::HttpEmbedder;
use config::Config;
use eyre::WrapErr;
use features::FeatureEngineering;
use geo::GeorefClient;
use model::{ConditionModel, Metrics, TrainConfig};
use preprocess::Dataset;
use schema::FeatureRow;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const USAGE: &str = "usage: meli-features <process|features|train|evaluate>";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "meli.cli", "pipeline failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env();
    let command = std::env::args().nth(1).ok_or_else(|| eyre::eyre!(USAGE))?;
    match command.as_str() {
        "process" => process(&config),
        "features" => derive_features(&config).await,
        "train" => train(&config).await,
        "evaluate" => evaluate(&config).await,
        other => Err(eyre::eyre!("unknown command `{other}`; {USAGE}")),
    }
}

fn raw_path(config: &Config) -> PathBuf {
    Path::new("data/raw").join(&config.file_name)
}

fn load_and_split(config: &Config) -> eyre::Result<Dataset> {
    let path = raw_path(config);
    let records = preprocess::load_raw(&path)
        .wrap_err_with(|| format!("loading {}", path.display()))?;
    info!(target = "meli.cli", records = records.len(), "raw records loaded");
    Ok(preprocess::split_dataset(records, config.test_split))
}

/// `process`: flatten, impute and transform both splits, writing the clean
/// tables under `data/processed/`.
fn process(config: &Config) -> eyre::Result<()> {
    let dataset = load_and_split(config)?;
    let train = preprocess::preprocess(&dataset.train);
    let test = preprocess::preprocess(&dataset.test);
    preprocess::write_rows_csv(Path::new("data/processed/train.csv"), &train)
        .wrap_err("writing train split")?;
    preprocess::write_rows_csv(Path::new("data/processed/test.csv"), &test)
        .wrap_err("writing test split")?;
    info!(
        target = "meli.cli",
        train = train.len(),
        test = test.len(),
        "processed splits written"
    );
    Ok(())
}

fn engine(config: &Config) -> eyre::Result<FeatureEngineering<HttpEmbedder, GeorefClient>> {
    let embedder = HttpEmbedder::new(config);
    let geo = GeorefClient::new(config);
    Ok(FeatureEngineering::new(config, embedder, geo)?)
}

/// `features`: the full engineering pass over both splits with one shared
/// setup, persisted as feature tables.
async fn derive_features(config: &Config) -> eyre::Result<()> {
    let dataset = load_and_split(config)?;
    let mut splits = engine(config)?
        .run_splits(vec![
            preprocess::preprocess(&dataset.train),
            preprocess::preprocess(&dataset.test),
        ])
        .await?;
    let test: Vec<FeatureRow> = splits.pop().unwrap_or_default();
    let train: Vec<FeatureRow> = splits.pop().unwrap_or_default();
    features::write_features_csv(Path::new("data/processed/train_features.csv"), &train)
        .wrap_err("writing train features")?;
    features::write_features_csv(Path::new("data/processed/test_features.csv"), &test)
        .wrap_err("writing test features")?;
    info!(
        target = "meli.cli",
        train = train.len(),
        test = test.len(),
        "feature tables written"
    );
    Ok(())
}

/// `train`: fit the condition classifier on the train split and persist it.
async fn train(config: &Config) -> eyre::Result<()> {
    let dataset = load_and_split(config)?;
    let train = engine(config)?
        .run(preprocess::preprocess(&dataset.train))
        .await?;
    let model = ConditionModel::train(&train, &dataset.train_labels, &TrainConfig::default())?;
    let metrics = model.evaluate(&train, &dataset.train_labels);
    log_metrics("train", &metrics);
    model
        .save(Path::new("models/model.json"))
        .wrap_err("persisting model")?;
    Ok(())
}

/// `evaluate`: score the persisted model on the held-out split only.
async fn evaluate(config: &Config) -> eyre::Result<()> {
    let dataset = load_and_split(config)?;
    let test = engine(config)?
        .run(preprocess::preprocess(&dataset.test))
        .await?;
    let model = ConditionModel::load(Path::new("models/model.json"))
        .wrap_err("loading models/model.json (run `train` first)")?;
    let metrics = model.evaluate(&test, &dataset.test_labels);
    log_metrics("test", &metrics);
    Ok(())
}

fn log_metrics(split: &str, metrics: &Metrics) {
    info!(
        target = "meli.cli",
        split,
        rows = metrics.rows,
        accuracy = format!("{:.4}", metrics.accuracy),
        roc_auc = format!("{:.4}", metrics.roc_auc),
        "condition classifier metrics"
    );
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
