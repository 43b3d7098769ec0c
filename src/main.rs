use anyhow::Context;
use clap::Parser;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deepwalk_rs::{Args, TrainingConfig, TrainingDevice};

/// CPU training runs on the ndarray backend
#[cfg(feature = "ndarray")]
mod cpu {
    use burn::backend::NdArray;
    use deepwalk_rs::{DeepWalkTrainer, Result, TrainingConfig};

    pub fn run(config: TrainingConfig) -> Result<()> {
        DeepWalkTrainer::<NdArray>::new(config)?.train()
    }
}

#[cfg(not(feature = "ndarray"))]
mod cpu {
    use deepwalk_rs::{DeepWalkError, Result, TrainingConfig};

    pub fn run(_config: TrainingConfig) -> Result<()> {
        Err(DeepWalkError::BackendUnavailable("ndarray"))
    }
}

/// GPU only and mixed training run on wgpu
#[cfg(feature = "wgpu")]
mod gpu {
    use burn::backend::Wgpu;
    use deepwalk_rs::{DeepWalkTrainer, Result, TrainingConfig};

    pub fn run(config: TrainingConfig) -> Result<()> {
        DeepWalkTrainer::<Wgpu>::new(config)?.train()
    }
}

#[cfg(not(feature = "wgpu"))]
mod gpu {
    use deepwalk_rs::{DeepWalkError, Result, TrainingConfig};

    pub fn run(_config: TrainingConfig) -> Result<()> {
        Err(DeepWalkError::BackendUnavailable("wgpu"))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = TrainingConfig::from_args(&args).context("invalid configuration")?;
    let net_file = config.net_file.display().to_string();

    let device = config.device;
    let start = Instant::now();
    match device {
        TrainingDevice::Cpu => cpu::run(config),
        TrainingDevice::Gpu | TrainingDevice::Mixed => gpu::run(config),
    }
    .with_context(|| format!("training on {net_file} failed"))?;

    info!(elapsed = ?start.elapsed(), "total used time");
    Ok(())
}
