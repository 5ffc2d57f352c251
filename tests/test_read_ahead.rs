// tests/test_read_ahead.rs -- The pipelined runner must produce exactly what the
// sequential runner produces, and must release and finalize on every exit path.

use image::{GrayImage, Luma, Rgb, RgbImage};
use retinex_vision::progress::{NeverCancel, NoProgress};
use retinex_vision::video::MemoryBackend;
use retinex_vision::{
    CancelFlag, EnhanceError, EnhanceFilter, EnhanceRequest, EnhanceRunner, Frame, FrameFilter, FramePolicy, Preset,
    ReadAheadRunner, RetinexPipeline, RunState, VideoError,
};

/// Passes frames through and panics on the frame at `fail_at`.
struct Faulty {
    fail_at: u64,
}

impl FrameFilter for Faulty {
    type State = u64;

    fn name(&self) -> &'static str {
        "faulty"
    }

    fn process(&self, frame: &Frame, seen: u64) -> (Frame, u64) {
        assert!(seen != self.fail_at, "filter failed on frame {seen}");
        (frame.clone(), seen + 1)
    }
}

fn ramp(frames: usize) -> Vec<Frame> {
    (0..frames)
        .map(|i| {
            Frame::Color(RgbImage::from_fn(36, 20, |x, y| {
                let base = (x * 5 + y * 3) as u8;
                Rgb([base.wrapping_add(i as u8 * 17), base, 255 - base])
            }))
        })
        .collect()
}

fn debright() -> RetinexPipeline {
    RetinexPipeline::new(Preset::Debright.config()).unwrap()
}

#[tokio::test]
async fn read_ahead_matches_the_sequential_runner() {
    let frames = ramp(12);

    let mut sequential = MemoryBackend::new(frames.clone(), 30.0);
    EnhanceRunner::new(debright())
        .run(&mut sequential, &EnhanceRequest::new("in", "out.mp4"), &mut NoProgress, &NeverCancel)
        .unwrap();

    let mut pipelined = MemoryBackend::new(frames, 30.0);
    let summary = ReadAheadRunner::new(debright())
        .with_depth(2)
        .run(&mut pipelined, &EnhanceRequest::new("in", "out.mp4"), NoProgress, NeverCancel)
        .await
        .unwrap();

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.frames_written, 12);
    assert_eq!(pipelined.record().written, sequential.record().written);
    assert_eq!(pipelined.record().finalize_calls, 1);
}

#[tokio::test]
async fn runtime_selected_filters_run_through_read_ahead() {
    for preset_filter in ["equalize", "clahe", "power-law"] {
        let config = retinex_vision::EnhanceConfig {
            filter: preset_filter.parse().unwrap(),
            ..Default::default()
        };
        let filter = EnhanceFilter::from_config(&config).unwrap();
        let mut backend = MemoryBackend::new(ramp(3), 24.0);
        let summary = ReadAheadRunner::new(filter)
            .run(&mut backend, &EnhanceRequest::new("in", "out.avi"), NoProgress, NeverCancel)
            .await
            .unwrap();
        assert_eq!(summary.frames_written, 3, "{preset_filter}");
    }
}

#[tokio::test]
async fn cancelled_before_start_finalizes_an_empty_output() {
    let mut backend = MemoryBackend::new(ramp(6), 30.0);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let summary = ReadAheadRunner::new(debright())
        .run(&mut backend, &EnhanceRequest::new("in", "out.mp4"), NoProgress, cancel)
        .await
        .unwrap();

    assert_eq!(summary.state, RunState::Cancelled);
    assert_eq!(summary.frames_written, 0);
    let record = backend.record();
    assert_eq!(record.frames_read, 0);
    assert_eq!(record.finalize_calls, 1);
    assert!(record.source_released);
    assert!(record.sink_released);
}

#[tokio::test]
async fn sink_open_failure_releases_the_source() {
    let mut backend = MemoryBackend::new(ramp(2), 30.0).failing_sink();
    let err = ReadAheadRunner::new(debright())
        .run(&mut backend, &EnhanceRequest::new("in", "out.mp4"), NoProgress, NeverCancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EnhanceError::Video(VideoError::SinkOpen { .. })));
    let record = backend.record();
    assert!(record.source_opened);
    assert!(record.source_released);
    assert_eq!(record.frames_read, 0);
}

#[tokio::test]
async fn rejected_frame_stops_the_run_and_still_finalizes() {
    let mut frames = ramp(4);
    frames[2] = Frame::Gray(GrayImage::from_pixel(10, 10, Luma([128])));
    let mut backend = MemoryBackend::new(frames, 30.0);
    let request = EnhanceRequest::new("in", "out.mp4").frame_policy(FramePolicy::Reject);

    let err = ReadAheadRunner::new(debright())
        .run(&mut backend, &request, NoProgress, NeverCancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EnhanceError::MalformedFrame { index: 2, .. }));
    let record = backend.record();
    assert_eq!(record.written.len(), 2);
    assert_eq!(record.finalize_calls, 1);
}

#[tokio::test]
async fn panicking_filter_still_finalizes_before_returning() {
    let mut backend = MemoryBackend::new(ramp(8), 30.0);
    let err = ReadAheadRunner::new(Faulty { fail_at: 3 })
        .with_depth(2)
        .run(&mut backend, &EnhanceRequest::new("in", "out.mp4"), NoProgress, NeverCancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EnhanceError::Worker(_)));
    let record = backend.record();
    assert_eq!(record.written.len(), 3);
    assert_eq!(record.finalize_calls, 1);
    assert!(record.source_released);
    assert!(record.sink_released);
}

#[tokio::test]
async fn gray_frame_in_a_colour_stream_follows_the_policy() {
    let mut frames = ramp(3);
    frames[1] = Frame::Gray(GrayImage::from_pixel(36, 20, Luma([90])));

    let mut backend = MemoryBackend::new(frames.clone(), 30.0);
    let summary = ReadAheadRunner::new(debright())
        .run(&mut backend, &EnhanceRequest::new("in", "out.mp4"), NoProgress, NeverCancel)
        .await
        .unwrap();
    assert_eq!(summary.frames_written, 3);
    assert!(backend.record().written.iter().all(Frame::is_color));

    let mut backend = MemoryBackend::new(frames, 30.0);
    let request = EnhanceRequest::new("in", "out.mp4").frame_policy(FramePolicy::Reject);
    let err = ReadAheadRunner::new(debright())
        .run(&mut backend, &request, NoProgress, NeverCancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnhanceError::MixedLayout {
            index: 1,
            expected: "colour",
            actual: "gray"
        }
    ));
    assert_eq!(backend.record().written.len(), 1);
    assert_eq!(backend.record().finalize_calls, 1);
}
