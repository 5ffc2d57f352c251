// Command-line runner over directories of frame images. Real video files go
// through `enhance_tester`, which carries the OpenCV backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retinex_vision::cli::{FilterArgs, cancel_on_ctrl_c, init_logging, spawn_progress_logger};
use retinex_vision::video::{FALLBACK_FPS, ImageSequenceBackend};
use retinex_vision::{EnhanceFilter, EnhanceRequest, EnhanceRunner, Preset, ReadAheadRunner, RunState};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "retinex_vision")]
#[command(version, about = "Per-frame video enhancement over image sequences", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enhance a directory of frames (png/jpg/jpeg/bmp, name order)
    Enhance {
        /// Directory of input frames
        #[arg(value_name = "INPUT_DIR")]
        input: PathBuf,

        /// Directory for frame_NNNNNN.png output
        #[arg(value_name = "OUTPUT_DIR")]
        output: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Overlap decoding and encoding with enhancement
        #[arg(long)]
        read_ahead: bool,
    },

    /// Print a Retinex preset as YAML
    Preset {
        #[arg(value_name = "NAME")]
        name: Preset,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("retinex_vision=info");
    let cli = Cli::parse();

    match cli.command {
        Commands::Preset { name } => {
            let yaml = serde_yaml::to_string(&name.config()).context("serializing preset")?;
            print!("{yaml}");
            Ok(())
        }
        Commands::Enhance {
            input,
            output,
            filter,
            read_ahead,
        } => {
            let config = filter.resolve().context("invalid filter settings")?;
            let enhance_filter = EnhanceFilter::from_config(&config)?;
            let request = EnhanceRequest::new(input, output).with_config(&config);
            let mut backend = ImageSequenceBackend {
                fps: config.output.fps.unwrap_or(FALLBACK_FPS),
            };

            let cancel = cancel_on_ctrl_c();
            let (progress, logger) = spawn_progress_logger();

            let summary = if read_ahead {
                ReadAheadRunner::new(enhance_filter)
                    .run(&mut backend, &request, progress, cancel)
                    .await?
            } else {
                tokio::task::spawn_blocking(move || {
                    let mut runner = EnhanceRunner::new(enhance_filter);
                    let mut progress = progress;
                    runner.run(&mut backend, &request, &mut progress, &cancel)
                })
                .await
                .context("enhancement task panicked")??
            };
            logger.await.context("progress logger panicked")?;

            match summary.state {
                RunState::Cancelled => warn!(frames = summary.frames_written, "cancelled"),
                _ => info!(frames = summary.frames_written, "done"),
            }
            Ok(())
        }
    }
}
