// THEORY:
// This file is the main entry point for the `retinex_vision` library crate. It
// defines the public API exposed to the binaries and to embedding applications.
//
// The primary surface is:
// - `RetinexPipeline` (and the other `FrameFilter`s): per-frame enhancement with
//   explicit cross-frame state.
// - `EnhanceRunner` / `ReadAheadRunner`: drive a filter over a whole video through
//   the `VideoBackend` collaborators, with progress and cooperative cancellation.
// - `RetinexConfig` / `EnhanceConfig` / `Preset`: validated configuration.
//
// The numerical stages live in `core_modules` and are public for callers who want
// to compose their own pipeline.

pub mod cli;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod video;

pub use config::{EnhanceConfig, FilterKind, Preset, RetinexConfig};
pub use core_modules::filters::FrameFilter;
pub use core_modules::frame::Frame;
pub use error::{ConfigError, EnhanceError, VideoError};
pub use parallel_pipeline::ReadAheadRunner;
pub use pipeline::{EnhanceFilter, ExposureState, RetinexOutput, RetinexPipeline};
pub use progress::{CancelFlag, CancelQuery, ProgressEvent, ProgressSink};
pub use runner::{EnhanceRequest, EnhanceRunner, FramePolicy, RunState, RunSummary};
pub use video::{VideoBackend, VideoMeta, VideoSink, VideoSource};
