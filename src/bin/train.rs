//! 衣類分類モデルの学習CLI
//!
//! ```text
//! train --data-dir dataset --output models/closet_classifier.tar.gz --epochs 5
//! ```

use std::path::PathBuf;

use anyhow::Result;
use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use tracing::info;

use closet_vision_lib::{
    init_tracing,
    ml::{
        training::{check_backbone, TrainingReport},
        train, TrainingOptions,
    },
    model::AppConfig,
};

#[derive(Debug, Parser)]
#[command(name = "train", about = "衣類分類モデルを学習してチェックポイントを書き出す")]
struct Args {
    /// クラスごとのサブディレクトリを持つデータセット
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// チェックポイントの出力先（省略時は設定の checkpoint_path）
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    num_workers: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// 事前学習済みバックボーン（named mpk）
    #[arg(long)]
    backbone: Option<PathBuf>,

    /// GPU（wgpu）で学習する
    #[arg(long)]
    gpu: bool,

    /// 現在の設定をこのパスに書き出して終了する
    #[arg(long)]
    write_config: Option<PathBuf>,
}

fn print_report(report: &TrainingReport) {
    println!("\n=== 学習結果 ===");
    println!("クラス数: {}", report.class_labels.len());
    for (i, label) in report.class_labels.iter().enumerate() {
        println!("  [{i}] {label}");
    }
    for epoch in &report.epochs {
        println!(
            "epoch {:>3}: loss={:.4} train_acc={:.2}% valid_acc={:.2}%{}",
            epoch.epoch,
            epoch.train_loss,
            epoch.train_accuracy * 100.0,
            epoch.validation_accuracy * 100.0,
            if epoch.saved { " *" } else { "" }
        );
    }
    println!(
        "最良: epoch {} ({:.2}%) -> {}",
        report.best_epoch,
        report.best_validation_accuracy * 100.0,
        report.checkpoint_path.display()
    );
}

fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();

    let config = AppConfig::load_or_default();

    if let Some(path) = &args.write_config {
        config.save(path)?;
        println!("設定を書き出しました: {}", path.display());
        return Ok(());
    }

    let mut settings = config.training.clone();
    if let Some(dir) = &args.data_dir {
        settings.data_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(epochs) = args.epochs {
        settings.num_epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(lr) = args.learning_rate {
        settings.learning_rate = lr;
    }
    if let Some(workers) = args.num_workers {
        settings.num_workers = workers;
    }
    if let Some(seed) = args.seed {
        settings.seed = seed;
    }
    if let Some(backbone) = &args.backbone {
        settings.backbone_path = Some(backbone.to_string_lossy().into_owned());
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.model.checkpoint_path));
    let options = TrainingOptions::from_settings(&settings, output);

    if let Some(backbone) = &options.backbone_path {
        check_backbone(backbone)?;
    }

    let report = if args.gpu {
        train_gpu(&options)?
    } else {
        info!("CPU（NdArray）で学習します");
        train::<Autodiff<NdArray<f32>>>(&options, Default::default())?
    };

    print_report(&report);
    Ok(())
}

#[cfg(feature = "wgpu")]
fn train_gpu(options: &TrainingOptions) -> Result<TrainingReport> {
    use burn::backend::{wgpu::WgpuDevice, Wgpu};
    info!("GPU（wgpu）で学習します");
    train::<Autodiff<Wgpu>>(options, WgpuDevice::default())
}

#[cfg(not(feature = "wgpu"))]
fn train_gpu(_options: &TrainingOptions) -> Result<TrainingReport> {
    anyhow::bail!("GPU学習には `--features wgpu` でのビルドが必要です")
}
