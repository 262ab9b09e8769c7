//! MAML meta-learning on few-shot sine-wave regression
//!
//! Main entry point providing CLI interface for:
//! - Writing a default configuration
//! - Meta-training with rotating checkpoints
//! - Adapting the meta-learned initialization to a single task
//! - Listing checkpoints

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use maml_meta::{
    maml::MetaLearner,
    model::SineRegression,
    utils::{setup_logging, Config},
};

/// Model-Agnostic Meta-Learning
#[derive(Parser)]
#[command(name = "maml")]
#[command(version)]
#[command(about = "Meta-learn an initialization that adapts to new tasks in a few steps")]
struct Cli {
    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize default configuration file
    Init {
        /// Output configuration file path (.toml or .json)
        #[arg(short, long, default_value = "maml.toml")]
        output: String,
    },

    /// Meta-train on randomly sampled sine tasks
    Train {
        /// Path to configuration file
        #[arg(short, long, default_value = "maml.toml")]
        config: String,

        /// Override the number of meta-learning steps
        #[arg(short, long)]
        steps: Option<usize>,

        /// Resume from the most recent checkpoint
        #[arg(long)]
        restore: bool,
    },

    /// Fine tune the meta-learned model on one sine task
    Adapt {
        /// Path to configuration file
        #[arg(short, long, default_value = "maml.toml")]
        config: String,

        /// Amplitude of the task
        #[arg(short, long)]
        amplitude: f64,

        /// Phase of the task
        #[arg(short, long)]
        phase: f64,

        /// Gradient steps on the task
        #[arg(short, long, default_value = "10")]
        steps: usize,
    },

    /// List checkpoint files, most recent first
    Checkpoints {
        /// Path to configuration file
        #[arg(short, long, default_value = "maml.toml")]
        config: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level)?;

    match cli.command {
        Commands::Init { output } => {
            Config::default().save(&output)?;
            info!("Default configuration written to {}", output);
        }

        Commands::Train {
            config,
            steps,
            restore,
        } => {
            let config = load_config(&config)?;
            let mut fit = config.fit.clone();
            if let Some(steps) = steps {
                fit.steps = steps;
            }
            fit.restore |= restore;

            let learner = SineRegression::new(config.task.clone())?;
            info!(
                "Sine regression learner with {} parameters",
                learner.num_parameters()
            );
            let mut maml = MetaLearner::new(learner, config.maml.clone())?;

            let report = maml.fit(&fit)?;

            println!("\n=== Meta-Training Summary ===");
            println!("Steps:               {}", report.steps);
            println!("Global step:         {}", report.global_step);
            if let Some(loss) = report.final_meta_loss() {
                println!("Final meta-loss:     {:.6}", loss);
            }
            println!("Checkpoints written: {}", report.checkpoints_written);
            println!("Checkpoint dir:      {}", maml.checkpoint_dir().display());
        }

        Commands::Adapt {
            config,
            amplitude,
            phase,
            steps,
        } => {
            let config = load_config(&config)?;
            let learner = SineRegression::new(config.task.clone())?;
            let mut maml = MetaLearner::new(learner, config.maml.clone())?;
            maml.restore()
                .context("adapting requires a meta-trained checkpoint")?;

            maml.task_model_mut().set_task(amplitude, phase);
            let (low, high) = config.task.input_range;
            let grid: Vec<f32> = (0..100)
                .map(|i| (low + (high - low) * i as f64 / 99.0) as f32)
                .collect();
            let eval_batch = maml.task_model().make_batch(&grid);

            let (before, _) = maml.predict_on_batch(&eval_batch)?;
            let losses = maml.train_on_current_task(steps, false)?;
            let (after, _) = maml.predict_on_batch(&eval_batch)?;

            println!("\n=== Adaptation (amplitude={}, phase={}) ===", amplitude, phase);
            println!("Global step:      {}", maml.global_step());
            println!("Loss before:      {:.6}", before);
            println!("Loss after {:>3}:   {:.6}", steps, after);
            if let (Some(first), Some(last)) = (losses.first(), losses.last()) {
                println!("Training losses:  {:.6} -> {:.6}", first, last);
            }
        }

        Commands::Checkpoints { config } => {
            let config = load_config(&config)?;
            let dir = config
                .maml
                .checkpoint_dir
                .context("checkpoint_dir is not set in the configuration")?;

            let checkpoints = if dir.exists() {
                maml_meta::get_checkpoints(&dir)?
            } else {
                Vec::new()
            };
            if checkpoints.is_empty() {
                println!("No checkpoints in {}", dir.display());
            }
            for path in checkpoints {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    Config::load(path).with_context(|| format!("failed to load configuration from {}", path))
}
