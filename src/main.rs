//! MDD Domain Adaptation CLI
//!
//! Trains an MDD model on a synthetic shifted-blobs task and prints the
//! gradient-reversal schedule.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use burn::optim::{decay::WeightDecayConfig, momentum::MomentumConfig, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use mdd_adapt::backend::{backend_name_for, default_device, CpuTrainingBackend, TrainingBackend};
use mdd_adapt::dataset::{DomainBatcher, ShiftedBlobs, ShiftedBlobsConfig};
use mdd_adapt::model::{BackboneKind, MddConfig, MddNet};
use mdd_adapt::training::schedule::{coefficient, ScheduleConfig};
use mdd_adapt::training::{Mdd, DEFAULT_LEARNING_RATE};
use mdd_adapt::utils::logging::{init_logging, LogConfig};
use mdd_adapt::utils::{format_duration, load_toml_config, AccuracyTracker, LossMeter};

/// Margin Disparity Discrepancy domain adaptation with Burn
#[derive(Parser, Debug)]
#[command(name = "mdd_adapt")]
#[command(version)]
#[command(about = "Unsupervised domain adaptation with Margin Disparity Discrepancy", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Adapt from a labeled source domain to an unlabeled, shifted target domain
    Train {
        /// Model configuration (TOML); defaults to a small MLP model
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of training iterations
        #[arg(short, long, default_value = "300")]
        iterations: usize,

        /// Rows per domain in each batch
        #[arg(short, long, default_value = "16")]
        batch_size: usize,

        /// Base learning rate (scaled per sub-network)
        #[arg(short, long, default_value_t = DEFAULT_LEARNING_RATE)]
        learning_rate: f64,

        /// Number of classes in the synthetic task
        #[arg(long, default_value = "3")]
        classes: usize,

        /// Feature dimension of the synthetic task
        #[arg(long, default_value = "16")]
        input_dim: usize,

        /// Samples per class and domain
        #[arg(long, default_value = "128")]
        samples_per_class: usize,

        /// Offset applied to target features
        #[arg(long, default_value = "1.5")]
        shift: f32,

        /// Random seed for data generation
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Log averaged losses every N iterations
        #[arg(long, default_value = "50")]
        log_every: usize,

        /// Write the effective model configuration as JSON
        #[arg(long)]
        save_config: Option<PathBuf>,
    },

    /// Print the gradient-reversal coefficient over training
    Schedule {
        #[arg(long, default_value = "1.0")]
        alpha: f64,

        #[arg(long, default_value = "0.0")]
        low_value: f64,

        #[arg(long, default_value = "0.1")]
        high_value: f64,

        #[arg(long, default_value = "1000.0")]
        max_iter: f64,

        /// Last iteration to print
        #[arg(short, long, default_value = "10000")]
        iterations: u64,

        /// Print every N iterations
        #[arg(long, default_value = "1000")]
        every: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    if let Err(e) = init_logging(&log_config) {
        eprintln!("{} {}", "Warning:".yellow(), e);
    }

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            iterations,
            batch_size,
            learning_rate,
            classes,
            input_dim,
            samples_per_class,
            shift,
            seed,
            log_every,
            save_config,
        } => {
            let mut model_config = match &config {
                Some(path) => load_toml_config::<MddConfig>(path)?,
                None => MddConfig::features(input_dim, classes),
            };
            if config.is_none() {
                model_config.schedule.max_iter = iterations.max(1) as f64;
            }

            let blobs = ShiftedBlobsConfig {
                num_classes: model_config.class_num,
                input_dim: model_config.input_dim,
                samples_per_class,
                shift,
                seed,
                ..Default::default()
            };

            // use_gpu picks the backend type; CPU runs never touch the accelerator
            if model_config.use_gpu {
                cmd_train::<TrainingBackend>(
                    &model_config,
                    &blobs,
                    iterations,
                    batch_size,
                    learning_rate,
                    log_every,
                    &default_device(),
                )?;
            } else {
                cmd_train::<CpuTrainingBackend>(
                    &model_config,
                    &blobs,
                    iterations,
                    batch_size,
                    learning_rate,
                    log_every,
                    &Default::default(),
                )?;
            }

            if let Some(path) = save_config {
                model_config
                    .save(&path)
                    .with_context(|| format!("Failed to save config to {}", path.display()))?;
                println!("{} {}", "Config written to".green(), path.display());
            }
        }

        Commands::Schedule {
            alpha,
            low_value,
            high_value,
            max_iter,
            iterations,
            every,
        } => {
            let schedule = ScheduleConfig {
                iter_num: 0,
                alpha,
                low_value,
                high_value,
                max_iter,
            };
            cmd_schedule(schedule, iterations, every)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------------+
 |   MDD: Margin Disparity Discrepancy                        |
 |   Unsupervised Domain Adaptation with Burn + Rust          |
 +------------------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_train<B: AutodiffBackend>(
    config: &MddConfig,
    blobs: &ShiftedBlobsConfig,
    iterations: usize,
    batch_size: usize,
    learning_rate: f64,
    log_every: usize,
    device: &B::Device,
) -> Result<()> {
    anyhow::ensure!(batch_size > 0, "batch size must be greater than 0");
    anyhow::ensure!(
        config.base_net == BackboneKind::Mlp,
        "the synthetic task feeds flat feature vectors; use base_net = \"MLP\" (got {})",
        config.base_net
    );

    info!("Backend: {}", backend_name_for(config.use_gpu));

    let (source, target) = ShiftedBlobs::pair(blobs)?;
    let batcher = DomainBatcher::for_features(blobs.input_dim);
    info!(
        "Synthetic task: {} source / {} target samples, {} classes, shift {}",
        source.items().len(),
        target.items().len(),
        blobs.num_classes,
        blobs.shift
    );

    let mut mdd = Mdd::<B>::new(config, device)?;
    let mut optimizer = SgdConfig::new()
        .with_momentum(Some(MomentumConfig::new().with_dampening(0.0).with_nesterov(true)))
        .with_weight_decay(Some(WeightDecayConfig::new(5e-4)))
        .init::<B, MddNet<B>>();

    for group in mdd.get_parameter_list() {
        debug!(
            "Parameter group {}: {} tensors at lr x{}",
            group.sub_network,
            group.param_ids.len(),
            group.lr_multiplier
        );
    }

    let before = target_accuracy(&mdd, &target, &batcher, batch_size, device)?;
    println!(
        "{} {:.2}%",
        "Target accuracy before adaptation:".cyan(),
        before * 100.0
    );

    mdd.set_train(true);
    let progress = ProgressBar::new(iterations as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let mut meter = LossMeter::new();
    for iteration in 0..iterations {
        let offset = iteration * batch_size;
        let batch = batcher.pair::<B>(
            &source.window(offset, batch_size),
            &target.window(offset, batch_size),
            device,
        )?;

        let loss = mdd.compute_domain_loss(&batch)?;
        let values = loss.values();
        anyhow::ensure!(
            values.total.is_finite(),
            "loss diverged at iteration {}",
            iteration + 1
        );
        meter.add(&values);
        mdd.step(&mut optimizer, learning_rate, &loss)?;

        progress.set_message(format!("loss {:.4}", values.total));
        progress.inc(1);

        if log_every > 0 && (iteration + 1) % log_every == 0 {
            let avg = meter.averages();
            info!(
                "iter {:>5}: total {:.4} | cls {:.4} | transfer {:.4} (src {:.4}, tgt {:.4}) | grl coeff {:.4}",
                iteration + 1,
                avg.total,
                avg.classifier,
                avg.transfer,
                avg.adv_src,
                avg.adv_tgt,
                mdd.schedule().coefficient()
            );
            meter.reset();
        }
    }
    progress.finish_with_message("done");
    mdd.set_train(false);

    let after = target_accuracy(&mdd, &target, &batcher, batch_size, device)?;
    println!();
    println!(
        "{} {:.2}% -> {:.2}%",
        "Target accuracy:".green().bold(),
        before * 100.0,
        after * 100.0
    );
    println!(
        "{} {} iterations in {}",
        "Trained".green(),
        iterations,
        format_duration(start.elapsed().as_secs_f64())
    );

    Ok(())
}

/// Accuracy of `predict` against the held-out target labels
fn target_accuracy<B: AutodiffBackend>(
    mdd: &Mdd<B>,
    target: &ShiftedBlobs,
    batcher: &DomainBatcher,
    batch_size: usize,
    device: &B::Device,
) -> Result<f64> {
    let mut tracker = AccuracyTracker::new();

    for chunk in target.items().chunks(batch_size) {
        let batch = batcher.features::<B>(chunk, device)?;

        let predictions: Vec<usize> = mdd
            .predict_labels(batch.inputs)?
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| anyhow::anyhow!("{:?}", e))?
            .into_iter()
            .map(|p| p as usize)
            .collect();
        let truth: Vec<usize> = chunk.iter().map(|item| item.label).collect();

        tracker.add_batch(&predictions, &truth);
    }

    Ok(tracker.accuracy())
}

fn cmd_schedule(schedule: ScheduleConfig, iterations: u64, every: u64) -> Result<()> {
    schedule.validate()?;
    anyhow::ensure!(every > 0, "--every must be greater than 0");

    println!("{}", "Gradient-reversal schedule".cyan().bold());
    println!(
        "  alpha {}, low {}, high {}, max_iter {}",
        schedule.alpha, schedule.low_value, schedule.high_value, schedule.max_iter
    );
    println!();
    println!("  {:>10}  {:>12}", "iter".bold(), "coeff".bold());

    for iter_num in (0..=iterations).step_by(every as usize) {
        let coeff = coefficient(
            iter_num,
            schedule.alpha,
            schedule.low_value,
            schedule.high_value,
            schedule.max_iter,
        );
        println!("  {:>10}  {:>12.6}", iter_num, coeff);
    }

    Ok(())
}
