// THEORY:
// `FrameFilter` is the seam between the run orchestrators and the enhancement
// algorithms. A filter turns one frame into one frame and may carry state from
// each frame to the next.
//
// Key architectural principles:
// 1.  **State In, State Out**: A filter never holds per-run mutable state. The
//     state for frame N is passed into `process` and the state for frame N+1 comes
//     back out, so the orchestrator owns it and the data dependency between frames
//     is visible in the signature.
// 2.  **Shared Configuration**: `process` takes `&self`. A configured filter is
//     immutable and can be shared across threads for the lifetime of a run.
// 3.  **Stateless Is Just `()`**: Filters without memory use the unit state, and
//     the orchestrators treat every filter alike.

use crate::core_modules::equalize::{Clahe, equalize_histogram};
use crate::core_modules::frame::Frame;
use crate::core_modules::power_law::PowerLaw;
use std::fmt::Debug;

/// A per-frame enhancement with explicit cross-frame state.
pub trait FrameFilter: Send + Sync {
    /// State carried from one frame to the next. `Default` is the state before
    /// the first frame of a run.
    type State: Default + Clone + Debug + Send + 'static;

    /// Short name for logs and progress messages.
    fn name(&self) -> &'static str;

    /// Enhances one frame. Frames must be fed in decode order.
    fn process(&self, frame: &Frame, state: Self::State) -> (Frame, Self::State);
}

/// Global histogram equalization of luminance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistogramEqualizer;

impl FrameFilter for HistogramEqualizer {
    type State = ();

    fn name(&self) -> &'static str {
        "histogram equalization"
    }

    fn process(&self, frame: &Frame, _state: ()) -> (Frame, ()) {
        (equalize_histogram(frame), ())
    }
}

impl FrameFilter for Clahe {
    type State = ();

    fn name(&self) -> &'static str {
        "CLAHE"
    }

    fn process(&self, frame: &Frame, _state: ()) -> (Frame, ()) {
        (self.apply(frame), ())
    }
}

impl FrameFilter for PowerLaw {
    type State = ();

    fn name(&self) -> &'static str {
        "power-law"
    }

    fn process(&self, frame: &Frame, _state: ()) -> (Frame, ()) {
        (self.apply(frame), ())
    }
}
