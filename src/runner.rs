// THEORY:
// The `runner` module drives one enhancement run from request to terminal state:
//
//     Idle -> Running -> { Completed | Cancelled | Failed }
//
// Key architectural principles:
// 1.  **Fail Fast**: The output request is validated before the source is opened,
//     and the sink is opened before the first frame is decoded. A bad codec or an
//     unwritable output costs no decoding work.
// 2.  **Strict Order**: Frames are decoded, enhanced and written one at a time in
//     decode order, and the filter state is threaded through by value. Nothing
//     else in the run is mutable across frames.
// 3.  **Cooperative Cancellation**: The cancel query is polled once per frame
//     boundary, before the next decode. A frame that has been decoded is always
//     finished and written; no partial frame reaches the sink.
// 4.  **Release on Every Path**: The sink is finalized whether the loop completes,
//     is cancelled, or fails. The source is released when it goes out of scope.
//     Cancellation is a terminal state, not an error.

use crate::config::EnhanceConfig;
use crate::core_modules::filters::FrameFilter;
use crate::core_modules::frame::Frame;
use crate::error::EnhanceError;
use crate::progress::{CancelQuery, ProgressEvent, ProgressSink, ProgressThrottle};
use crate::video::{OutputSpec, SinkSpec, VideoBackend, VideoMeta, VideoSink, VideoSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled | RunState::Failed)
    }
}

/// What to do with a decoded frame whose size differs from the stream's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramePolicy {
    /// Resize to the stream dimensions and keep going.
    #[default]
    Resize,
    /// Fail the run.
    Reject,
}

/// One enhancement job.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhanceRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Output codec; `None` uses the container's usual one.
    pub codec: Option<String>,
    /// Output fps override; `None` follows the source.
    pub fps: Option<f64>,
    pub frame_policy: FramePolicy,
}

impl EnhanceRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            codec: None,
            fps: None,
            frame_policy: FramePolicy::default(),
        }
    }

    /// Takes codec, fps and frame policy from a config file.
    pub fn with_config(mut self, config: &EnhanceConfig) -> Self {
        self.codec = config.output.codec.clone();
        self.fps = config.output.fps;
        self.frame_policy = config.frame_policy;
        self
    }

    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn frame_policy(mut self, policy: FramePolicy) -> Self {
        self.frame_policy = policy;
        self
    }
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// `Completed` or `Cancelled`.
    pub state: RunState,
    pub frames_written: u64,
    pub meta: VideoMeta,
    pub output_fps: f64,
}

/// An opened source and sink, ready for the frame loop.
pub(crate) struct Prepared<S, K> {
    pub source: S,
    pub sink: K,
    pub meta: VideoMeta,
    pub sink_spec: SinkSpec,
}

/// Validates the output, then opens the source, then the sink.
pub(crate) fn prepare<B: VideoBackend>(
    backend: &mut B,
    request: &EnhanceRequest,
) -> Result<Prepared<B::Source, B::Sink>, EnhanceError> {
    let spec = OutputSpec::validate(&request.output, request.codec.as_deref(), request.fps)?;
    let source = backend.open_source(&request.input)?;
    let meta = source.meta();
    let sink_spec = SinkSpec {
        codec: spec.codec,
        fps: spec.output_fps(meta.fps),
        width: meta.width,
        height: meta.height,
    };
    // On failure `source` is dropped here, which releases it.
    let sink = backend.open_sink(&request.output, &sink_spec)?;
    Ok(Prepared {
        source,
        sink,
        meta,
        sink_spec,
    })
}

pub(crate) fn start_event(filter: &str, meta: &VideoMeta, fps: f64) -> ProgressEvent {
    ProgressEvent::new(
        Some(0),
        format!("{filter} running... {}x{} @ {fps:.2} fps", meta.width, meta.height),
    )
}

pub(crate) fn finish_event(state: RunState) -> ProgressEvent {
    match state {
        RunState::Cancelled => ProgressEvent::new(None, "Cancelled."),
        _ => ProgressEvent::new(Some(100), "Done."),
    }
}

/// Brings decoded frames to the stream's dimensions and layout according to
/// `policy`. The first frame fixes the layout (gray or colour) for the run.
pub(crate) struct FrameConformer {
    meta: VideoMeta,
    policy: FramePolicy,
    color: Option<bool>,
}

impl FrameConformer {
    pub(crate) fn new(meta: VideoMeta, policy: FramePolicy) -> Self {
        Self {
            meta,
            policy,
            color: None,
        }
    }

    pub(crate) fn conform(&mut self, frame: Frame, index: u64) -> Result<Frame, EnhanceError> {
        let frame = self.conform_size(frame, index)?;
        let color = *self.color.get_or_insert(frame.is_color());
        if frame.is_color() == color {
            return Ok(frame);
        }
        let expected = if color { "colour" } else { "gray" };
        match self.policy {
            FramePolicy::Resize => {
                warn!(index, actual = frame.layout_name(), expected, "converting frame layout");
                Ok(frame.with_layout(color))
            }
            FramePolicy::Reject => Err(EnhanceError::MixedLayout {
                index,
                expected,
                actual: frame.layout_name(),
            }),
        }
    }

    fn conform_size(&self, frame: Frame, index: u64) -> Result<Frame, EnhanceError> {
        let meta = &self.meta;
        let (width, height) = frame.dimensions();
        if meta.width == 0 || meta.height == 0 || (width, height) == (meta.width, meta.height) {
            return Ok(frame);
        }
        match self.policy {
            FramePolicy::Resize => {
                warn!(
                    index,
                    width,
                    height,
                    expected_width = meta.width,
                    expected_height = meta.height,
                    "resizing malformed frame"
                );
                Ok(frame.resized(meta.width, meta.height))
            }
            FramePolicy::Reject => Err(EnhanceError::MalformedFrame {
                index,
                expected_width: meta.width,
                expected_height: meta.height,
                actual_width: width,
                actual_height: height,
            }),
        }
    }
}

/// Combines the frame-loop result with the sink's finalize result. The loop's
/// error wins; a finalize failure after it is only logged.
pub(crate) fn settle<T>(
    outcome: Result<T, EnhanceError>,
    finalized: Result<(), crate::error::VideoError>,
) -> Result<T, EnhanceError> {
    match (outcome, finalized) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(finalize_error)) => {
            warn!(error = %finalize_error, "sink failed to finalize after an earlier error");
            Err(e)
        }
    }
}

/// Sequential run orchestrator.
#[derive(Debug)]
pub struct EnhanceRunner<F> {
    filter: F,
    state: RunState,
}

impl<F: FrameFilter> EnhanceRunner<F> {
    pub fn new(filter: F) -> Self {
        Self {
            filter,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// Runs the filter over `request.input` and writes `request.output`.
    ///
    /// Returns the summary for `Completed` and `Cancelled` runs; any error leaves
    /// the runner in `Failed`.
    pub fn run<B, P, C>(
        &mut self,
        backend: &mut B,
        request: &EnhanceRequest,
        progress: &mut P,
        cancel: &C,
    ) -> Result<RunSummary, EnhanceError>
    where
        B: VideoBackend,
        P: ProgressSink + ?Sized,
        C: CancelQuery + ?Sized,
    {
        self.state = RunState::Running;
        let result = self.execute(backend, request, progress, cancel);
        self.state = match &result {
            Ok(summary) => summary.state,
            Err(e) => {
                warn!(error = %e, filter = self.filter.name(), "run failed");
                RunState::Failed
            }
        };
        result
    }

    fn execute<B, P, C>(
        &self,
        backend: &mut B,
        request: &EnhanceRequest,
        progress: &mut P,
        cancel: &C,
    ) -> Result<RunSummary, EnhanceError>
    where
        B: VideoBackend,
        P: ProgressSink + ?Sized,
        C: CancelQuery + ?Sized,
    {
        let Prepared {
            mut source,
            mut sink,
            meta,
            sink_spec,
        } = prepare(backend, request)?;

        info!(
            filter = self.filter.name(),
            width = meta.width,
            height = meta.height,
            fps = sink_spec.fps,
            frames = ?meta.frame_count,
            "enhancement started"
        );
        progress.report(start_event(self.filter.name(), &meta, sink_spec.fps));

        let mut written = 0u64;
        let outcome = self.frame_loop(&mut source, &mut sink, &meta, request.frame_policy, progress, cancel, &mut written);
        drop(source);
        let state = settle(outcome, sink.finalize())?;

        info!(filter = self.filter.name(), frames = written, outcome = ?state, "enhancement finished");
        progress.report(finish_event(state));
        Ok(RunSummary {
            state,
            frames_written: written,
            meta,
            output_fps: sink_spec.fps,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn frame_loop<S, K, P, C>(
        &self,
        source: &mut S,
        sink: &mut K,
        meta: &VideoMeta,
        policy: FramePolicy,
        progress: &mut P,
        cancel: &C,
        written: &mut u64,
    ) -> Result<RunState, EnhanceError>
    where
        S: VideoSource,
        K: VideoSink,
        P: ProgressSink + ?Sized,
        C: CancelQuery + ?Sized,
    {
        let mut throttle = ProgressThrottle::new(meta.frame_count);
        let mut conformer = FrameConformer::new(*meta, policy);
        let mut state = F::State::default();
        loop {
            if cancel.is_cancelled() {
                return Ok(RunState::Cancelled);
            }
            let Some(frame) = source.read_frame()? else {
                return Ok(RunState::Completed);
            };
            let frame = conformer.conform(frame, *written)?;
            let (enhanced, next) = self.filter.process(&frame, state);
            state = next;
            sink.write_frame(&enhanced)?;
            *written += 1;
            if let Some(event) = throttle.frame_done(*written) {
                progress.report(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::filters::HistogramEqualizer;
    use crate::error::VideoError;
    use crate::progress::{NeverCancel, NoProgress};
    use crate::video::MemoryBackend;
    use image::{GrayImage, Luma};

    fn gray(width: u32, height: u32, level: u8) -> Frame {
        Frame::Gray(GrayImage::from_pixel(width, height, Luma([level])))
    }

    #[test]
    fn completes_and_finalizes_once() {
        let mut backend = MemoryBackend::new(vec![gray(4, 4, 10); 5], 25.0);
        let mut runner = EnhanceRunner::new(HistogramEqualizer);
        assert_eq!(runner.state(), RunState::Idle);
        let summary = runner
            .run(&mut backend, &EnhanceRequest::new("in", "out.mp4"), &mut NoProgress, &NeverCancel)
            .unwrap();
        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.frames_written, 5);
        assert_eq!(runner.state(), RunState::Completed);
        let record = backend.record();
        assert_eq!(record.finalize_calls, 1);
        assert!(record.source_released);
    }

    #[test]
    fn malformed_frames_are_resized_by_default() {
        let frames = vec![gray(8, 6, 50), gray(5, 5, 50), gray(8, 6, 50)];
        let mut backend = MemoryBackend::new(frames, 25.0);
        let mut runner = EnhanceRunner::new(HistogramEqualizer);
        runner
            .run(&mut backend, &EnhanceRequest::new("in", "out.avi"), &mut NoProgress, &NeverCancel)
            .unwrap();
        assert!(backend.record().written.iter().all(|f| f.dimensions() == (8, 6)));
    }

    #[test]
    fn reject_policy_fails_and_still_finalizes() {
        let frames = vec![gray(8, 6, 50), gray(5, 5, 50), gray(8, 6, 50)];
        let mut backend = MemoryBackend::new(frames, 25.0);
        let mut runner = EnhanceRunner::new(HistogramEqualizer);
        let request = EnhanceRequest::new("in", "out.avi").frame_policy(FramePolicy::Reject);
        let err = runner.run(&mut backend, &request, &mut NoProgress, &NeverCancel).unwrap_err();
        assert!(matches!(err, EnhanceError::MalformedFrame { index: 1, .. }));
        assert_eq!(runner.state(), RunState::Failed);
        let record = backend.record();
        assert_eq!(record.written.len(), 1);
        assert_eq!(record.finalize_calls, 1);
    }

    #[test]
    fn mixed_layouts_follow_the_first_frame() {
        let colour = Frame::Color(image::RgbImage::from_pixel(4, 4, image::Rgb([40, 80, 120])));
        let frames = vec![colour.clone(), gray(4, 4, 60), colour];
        let mut backend = MemoryBackend::new(frames.clone(), 25.0);
        let mut runner = EnhanceRunner::new(HistogramEqualizer);
        runner
            .run(&mut backend, &EnhanceRequest::new("in", "out.avi"), &mut NoProgress, &NeverCancel)
            .unwrap();
        assert!(backend.record().written.iter().all(Frame::is_color));

        let mut backend = MemoryBackend::new(frames, 25.0);
        let request = EnhanceRequest::new("in", "out.avi").frame_policy(FramePolicy::Reject);
        let err = runner.run(&mut backend, &request, &mut NoProgress, &NeverCancel).unwrap_err();
        assert!(matches!(
            err,
            EnhanceError::MixedLayout {
                index: 1,
                expected: "colour",
                actual: "gray"
            }
        ));
        assert_eq!(backend.record().written.len(), 1);
    }

    #[test]
    fn sink_open_failure_releases_the_source() {
        let mut backend = MemoryBackend::new(vec![gray(2, 2, 1)], 25.0).failing_sink();
        let mut runner = EnhanceRunner::new(HistogramEqualizer);
        let err = runner
            .run(&mut backend, &EnhanceRequest::new("in", "out.mp4"), &mut NoProgress, &NeverCancel)
            .unwrap_err();
        assert!(matches!(err, EnhanceError::Video(VideoError::SinkOpen { .. })));
        let record = backend.record();
        assert_eq!(record.frames_read, 0);
        assert!(record.source_opened && record.source_released);
    }

    #[test]
    fn progress_brackets_the_run() {
        let mut backend = MemoryBackend::new(vec![gray(2, 2, 1); 4], 0.0);
        let mut events = Vec::new();
        let mut sink = |e: ProgressEvent| events.push(e);
        let mut runner = EnhanceRunner::new(HistogramEqualizer);
        let summary = runner
            .run(&mut backend, &EnhanceRequest::new("in", "out.mkv"), &mut sink, &NeverCancel)
            .unwrap();
        assert_eq!(summary.output_fps, 30.0);
        assert_eq!(events.first().and_then(|e| e.percent), Some(0));
        let last = events.last().cloned().unwrap_or_default();
        assert_eq!((last.percent, last.message.as_str()), (Some(100), "Done."));
    }
}
