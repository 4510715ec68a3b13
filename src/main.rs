#![allow(non_snake_case)]

use std::path::PathBuf;

use async_trait::async_trait;
use clap::Parser;
use futures::{pin_mut, StreamExt};
use itertools::Itertools;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use TabCleaner::config::{load_steps, FilterRegistry};
use TabCleaner::data_model::{Sample, SampleSource};
use TabCleaner::error::{PipelineError, Result};
use TabCleaner::executor::PipelineExecutor;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a filter pipeline over a parallel corpus sample", long_about = None)]
struct Args {
    /// Directory containing filter definition JSON files
    #[arg(short, long, default_value = "filters")]
    filters: PathBuf,

    /// Directory containing dataset samples (one `<name>.tsv` per dataset)
    #[arg(short, long, default_value = "data/train-parts")]
    data: PathBuf,

    /// Ordered column labels of the dataset, e.g. `en,de`
    #[arg(short, long, value_delimiter = ',', required = true)]
    columns: Vec<String>,

    /// Path to a JSON file holding the ordered list of filter steps;
    /// omit to just print the unfiltered sample
    #[arg(short, long)]
    steps: Option<PathBuf>,

    /// Only feed the first N records of the sample through the chain
    #[arg(long)]
    head: Option<usize>,

    /// Name of the dataset to sample
    dataset: String,
}

/// File-backed sample provider: resolves a dataset name to the bytes of
/// `<data>/<name>.tsv`.
struct FileSampleSource {
    root: PathBuf,
    columns: Vec<String>,
    head: Option<usize>,
}

#[async_trait]
impl SampleSource for FileSampleSource {
    async fn sample(&self, dataset: &str) -> Result<Sample> {
        let path = self.root.join(format!("{dataset}.tsv"));
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            PipelineError::ConfigError(format!(
                "Failed to read dataset sample '{}': {}",
                path.display(),
                e
            ))
        })?;

        let bytes = match self.head {
            Some(limit) => take_records(&bytes, limit),
            None => bytes,
        };

        Ok(Sample::new(self.columns.clone(), bytes))
    }
}

/// First `limit` newline-terminated records of the buffer.
fn take_records(bytes: &[u8], limit: usize) -> Vec<u8> {
    let mut seen = 0;
    for (offset, &byte) in bytes.iter().enumerate() {
        if byte == b'\n' {
            seen += 1;
            if seen == limit {
                return bytes[..=offset].to_vec();
            }
        }
    }
    bytes.to_vec()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(filter).init();

    let registry = FilterRegistry::from_dir(&args.filters)?;
    info!(
        filters = registry.len(),
        columns = %args.columns.iter().join(","),
        "Loaded filter registry"
    );

    let steps = match &args.steps {
        Some(path) => load_steps(path)?,
        None => Vec::new(),
    };

    let source = FileSampleSource {
        root: args.data.clone(),
        columns: args.columns.clone(),
        head: args.head,
    };
    let sample = source.sample(&args.dataset).await?;
    info!(records = sample.record_count(), "Loaded dataset sample");

    let executor = PipelineExecutor::new(registry);
    let results = executor.execute(sample, &steps);
    pin_mut!(results);

    while let Some(result) = results.next().await {
        match result {
            Ok(output) => {
                println!("{}", serde_json::to_string(&output.to_json())?);
            }
            Err(e) => {
                error!(error = %e, "Pipeline failed");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
