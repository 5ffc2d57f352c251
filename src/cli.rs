// Command-line plumbing shared by the `retinex_vision` binary and `enhance_tester`:
// the filter flags, how they layer over a config file, logging setup, and the
// Ctrl-C and progress channels both binaries hand to a run.

use crate::config::{EnhanceConfig, FilterKind, Preset};
use crate::error::ConfigError;
use crate::progress::{CancelWatch, WatchProgress};
use clap::Args;
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Filter selection and tuning flags. Flags override the config file, which
/// overrides the built-in defaults.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// YAML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Filter to run: equalize, clahe, power-law or retinex
    #[arg(short, long, value_name = "FILTER")]
    pub filter: Option<FilterKind>,

    /// Retinex preset: default, dark or debright
    #[arg(short, long, value_name = "PRESET")]
    pub preset: Option<Preset>,

    /// Power-law exponent (0.1..=5.0)
    #[arg(long, value_name = "GAMMA")]
    pub gamma: Option<f32>,

    /// CLAHE clip limit (0.1..=20)
    #[arg(long, value_name = "LIMIT")]
    pub clip_limit: Option<f32>,

    /// CLAHE tile grid, same count in both directions (1..=64)
    #[arg(long, value_name = "N")]
    pub tiles: Option<usize>,

    /// Output frame rate (defaults to the source rate)
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f64>,

    /// Output codec (mp4v, XVID, MJPG, avc1, H264, png, jpg)
    #[arg(long, value_name = "CODEC")]
    pub codec: Option<String>,
}

impl FilterArgs {
    /// Loads the config file (if any), applies the flags and validates the result.
    pub fn resolve(&self) -> Result<EnhanceConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => EnhanceConfig::load(path)?,
            None => EnhanceConfig::default(),
        };
        if let Some(filter) = self.filter {
            config.filter = filter;
        }
        if let Some(preset) = self.preset {
            config.preset = preset;
        }
        if let Some(gamma) = self.gamma {
            config.power_law.gamma = gamma;
        }
        if let Some(clip_limit) = self.clip_limit {
            config.clahe.clip_limit = clip_limit;
        }
        if let Some(tiles) = self.tiles {
            config.clahe.tiles_x = tiles;
            config.clahe.tiles_y = tiles;
        }
        if let Some(fps) = self.fps {
            config.output.fps = Some(fps);
        }
        if let Some(codec) = &self.codec {
            config.output.codec = Some(codec.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Installs the fmt subscriber. `RUST_LOG` wins over `default_directives`.
pub fn init_logging(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// A cancel switch that flips on the first Ctrl-C. Must be called inside a
/// tokio runtime.
pub fn cancel_on_ctrl_c() -> CancelWatch {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current frame");
            tx.send_replace(true);
        }
    });
    CancelWatch(rx)
}

/// A progress sink plus the task that logs what it publishes. The task ends
/// once the run drops the sink, after logging the last event.
pub fn spawn_progress_logger() -> (WatchProgress, JoinHandle<usize>) {
    let (sink, mut rx) = WatchProgress::channel();
    let logger = tokio::spawn(async move {
        let mut logged = 0;
        while rx.changed().await.is_ok() {
            let event = rx.borrow_and_update().clone();
            match event.percent {
                Some(percent) => info!("[{percent:>3}%] {}", event.message),
                None => info!("{}", event.message),
            }
            logged += 1;
        }
        logged
    });
    (sink, logger)
}
