// THEORY:
// The read-ahead runner overlaps I/O with enhancement. Decoding, enhancing and
// encoding run as three blocking tasks joined by bounded channels:
//
//     [decode] --frames--> [transform] --frames--> [encode]
//
// Only decode and encode are pipelined. The transform stage is one task that
// consumes frames strictly in decode order, so the filter state advances exactly
// as it would in `EnhanceRunner`. The channel depth bounds how many decoded
// frames can be in flight, and so the memory a long video can pin.
//
// Cancellation is polled by the decode stage before each read. Frames already
// buffered when it is observed are still enhanced and written. Each stage ends
// when its upstream channel closes, so an error anywhere drains the pipeline and
// the encode stage always finalizes the sink before it returns. All three stages
// are awaited before the run reports, so a panicking stage still leaves a
// finalized sink behind.

use crate::core_modules::filters::FrameFilter;
use crate::core_modules::frame::Frame;
use crate::error::{EnhanceError, VideoError};
use crate::progress::{CancelQuery, ProgressSink, ProgressThrottle};
use crate::runner::{
    EnhanceRequest, FrameConformer, Prepared, RunState, RunSummary, finish_event, prepare, settle, start_event,
};
use crate::video::{VideoBackend, VideoSink, VideoSource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

const MIN_DEPTH: usize = 2;
const MAX_DEPTH: usize = 8;

/// Channel depth for this machine: one slot per core, clamped to 2..=8.
pub fn default_depth() -> usize {
    num_cpus::get().clamp(MIN_DEPTH, MAX_DEPTH)
}

struct Decoded {
    state: RunState,
}

struct Encoded<P> {
    written: u64,
    outcome: Result<(), EnhanceError>,
    finalized: Result<(), VideoError>,
    progress: P,
}

async fn join_stage<T>(handle: JoinHandle<T>, stage: &'static str) -> Result<T, EnhanceError> {
    handle
        .await
        .map_err(|e| EnhanceError::Worker(format!("{stage} stage: {e}")))
}

/// Pipelined run orchestrator.
pub struct ReadAheadRunner<F> {
    filter: Arc<F>,
    depth: usize,
}

impl<F: FrameFilter + 'static> ReadAheadRunner<F> {
    pub fn new(filter: F) -> Self {
        Self {
            filter: Arc::new(filter),
            depth: default_depth(),
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub async fn run<B, P, C>(
        &self,
        backend: &mut B,
        request: &EnhanceRequest,
        mut progress: P,
        cancel: C,
    ) -> Result<RunSummary, EnhanceError>
    where
        B: VideoBackend,
        P: ProgressSink + 'static,
        C: CancelQuery + 'static,
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
            depth = self.depth,
            "read-ahead enhancement started"
        );
        progress.report(start_event(self.filter.name(), &meta, sink_spec.fps));

        let (decoded_tx, mut decoded_rx) = mpsc::channel::<(u64, Frame)>(self.depth);
        let (encoded_tx, mut encoded_rx) = mpsc::channel::<Frame>(self.depth);
        let policy = request.frame_policy;

        // Stage 1: Decode in order, polling for cancellation before each read.
        let decode = tokio::task::spawn_blocking(move || -> Result<Decoded, EnhanceError> {
            let mut conformer = FrameConformer::new(meta, policy);
            let mut index = 0u64;
            loop {
                if cancel.is_cancelled() {
                    return Ok(Decoded {
                        state: RunState::Cancelled,
                    });
                }
                let Some(frame) = source.read_frame()? else {
                    return Ok(Decoded {
                        state: RunState::Completed,
                    });
                };
                let frame = conformer.conform(frame, index)?;
                if decoded_tx.blocking_send((index, frame)).is_err() {
                    // Downstream stopped; its own result explains why.
                    return Ok(Decoded {
                        state: RunState::Completed,
                    });
                }
                index += 1;
            }
        });

        // Stage 2: Enhance strictly in decode order.
        let filter = Arc::clone(&self.filter);
        let transform = tokio::task::spawn_blocking(move || {
            let mut state = F::State::default();
            while let Some((_index, frame)) = decoded_rx.blocking_recv() {
                let (enhanced, next) = filter.process(&frame, state);
                state = next;
                if encoded_tx.blocking_send(enhanced).is_err() {
                    break;
                }
            }
        });

        // Stage 3: Encode, then finalize the sink whatever happened upstream.
        let frame_count = meta.frame_count;
        let encode = tokio::task::spawn_blocking(move || {
            let mut throttle = ProgressThrottle::new(frame_count);
            let mut written = 0u64;
            let mut outcome = Ok(());
            while let Some(frame) = encoded_rx.blocking_recv() {
                if let Err(e) = sink.write_frame(&frame) {
                    outcome = Err(e.into());
                    break;
                }
                written += 1;
                if let Some(event) = throttle.frame_done(written) {
                    progress.report(event);
                }
            }
            // Closing the receiver unblocks the upstream stages after an error.
            drop(encoded_rx);
            let finalized = sink.finalize();
            Encoded {
                written,
                outcome,
                finalized,
                progress,
            }
        });

        // Wait for every stage, even after a panic, so the sink is finalized
        // before `run` returns.
        let (decoded, transformed, encoded) = futures::join!(
            join_stage(decode, "decode"),
            join_stage(transform, "transform"),
            join_stage(encode, "encode"),
        );
        let Encoded {
            written,
            outcome,
            finalized,
            mut progress,
        } = encoded?;

        let loop_result = decoded
            .and_then(|d| d)
            .and_then(|d| transformed.map(|()| d))
            .and_then(|d| outcome.map(|()| d.state));
        let state = settle(loop_result, finalized)?;

        info!(filter = self.filter.name(), frames = written, outcome = ?state, "read-ahead enhancement finished");
        progress.report(finish_event(state));
        Ok(RunSummary {
            state,
            frames_written: written,
            meta,
            output_fps: sink_spec.fps,
        })
    }
}
