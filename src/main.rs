//! Parallel Pipeline CLI
//!
//! Runs a random-delay demo chain to show barrier-synchronized stages.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use parallel_pipeline::demo::{run_demo, DemoOptions};
use parallel_pipeline::{build_runtime, Metrics, MetricsReporter, PipelineConfig};

#[derive(Parser)]
#[command(name = "parallel-pipeline")]
#[command(about = "Run multi-stage parallel pipelines", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "pipeline.yaml", global = true)]
    config: PathBuf,

    /// Override the per-stage concurrency cap
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo pipeline (default if no command specified)
    Run {
        /// Number of input elements
        #[arg(long, default_value_t = 10)]
        count: u64,

        /// Number of stages
        #[arg(long, default_value_t = 3)]
        stages: usize,

        /// Minimum per-element delay in milliseconds
        #[arg(long, default_value_t = 1000)]
        min_delay_ms: u64,

        /// Maximum per-element delay in milliseconds
        #[arg(long, default_value_t = 2000)]
        max_delay_ms: u64,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => {
            run_command(cli.config, cli.concurrency, DemoOptions::default())?;
        }

        Some(Commands::Run {
            count,
            stages,
            min_delay_ms,
            max_delay_ms,
        }) => {
            let options = DemoOptions {
                count,
                stages,
                min_delay_ms,
                max_delay_ms,
            };
            run_command(cli.config, cli.concurrency, options)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(config_path: &PathBuf) -> Result<PipelineConfig> {
    if config_path.exists() {
        PipelineConfig::from_file(config_path)
    } else {
        tracing::info!(
            "No config at {}, using defaults",
            config_path.display()
        );
        Ok(PipelineConfig::default())
    }
}

fn run_command(config_path: PathBuf, concurrency: Option<usize>, options: DemoOptions) -> Result<()> {
    let mut config = load_config(&config_path)?;

    // Apply overrides
    if let Some(c) = concurrency {
        config.max_concurrency = Some(c);
    }

    config.validate()?;
    options.validate()?;

    let runtime = build_runtime(config.worker_threads)?;
    let results = runtime.block_on(async {
        let metrics = config.enable_metrics.then(Metrics::new);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = match &metrics {
            Some(metrics) => {
                let reporter = MetricsReporter::new(
                    metrics.clone(),
                    config.metrics_interval_secs,
                    options.count * options.stages as u64,
                );
                Some(tokio::spawn(reporter.run(shutdown_rx)))
            }
            None => {
                drop(shutdown_rx);
                None
            }
        };

        let results = run_demo(&config, &options, metrics.clone()).await;

        // Shutdown metrics reporter
        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        if let Some(metrics) = &metrics {
            let reporter = MetricsReporter::new(
                metrics.clone(),
                config.metrics_interval_secs,
                options.count * options.stages as u64,
            );
            reporter.print_summary();

            if let Some(ref path) = config.metrics_output_path {
                if let Err(e) = metrics.snapshot().save_to_file(path) {
                    tracing::warn!("Failed to save metrics to {}: {}", path, e);
                }
            }
        }

        results
    })?;

    let joined: Vec<String> = results.iter().map(|x| x.to_string()).collect();
    println!("{}", joined.join(", "));

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = PipelineConfig::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# Parallel Pipeline Configuration

# Maximum transforms running at once within a stage.
# Leave unset (null) for one running task per element.
max_concurrency: null

# What a barrier does when an element fails:
#   fail_fast     - stop the chain at the first failed element
#   carry_forward - skip failed elements in later stages, report at collect
error_policy: fail_fast

# Tokio worker threads (defaults to the number of CPU cores)
worker_threads: null

# Progress reporting
enable_metrics: true
metrics_interval_secs: 10

# Optional path to save final metrics as JSON
metrics_output_path: null
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}
