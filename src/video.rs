// THEORY:
// The `video` module defines the boundary between an enhancement run and whatever
// actually decodes and encodes frames.
//
// Key architectural principles:
// 1.  **Narrow Collaborators**: A `VideoSource` hands out frames in decode order
//     plus metadata; a `VideoSink` accepts frames in submission order and is
//     finalized exactly once. A `VideoBackend` opens both from paths. The runners
//     never see a codec library.
// 2.  **Fail Before Work**: `OutputSpec::validate` checks the requested codec and
//     the output container against each other using nothing but the output path,
//     so a bad combination is rejected before the source is even opened.
// 3.  **Release on Drop**: Sources and sinks own their handles. Dropping one
//     releases it, so every exit path of a run (success, cancel, error) frees
//     them without extra bookkeeping.
//
// Two backends live here: an image-sequence backend (a directory of numbered
// frames, used by the CLI) and an in-memory backend for embedding and tests. The
// OpenCV backend lives in the `enhance_tester` package.

use crate::core_modules::frame::Frame;
use crate::error::VideoError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Frame rate used when neither the request nor the source provides one.
pub const FALLBACK_FPS: f64 = 30.0;

/// Image extensions an image-sequence source reads.
pub const SEQUENCE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Stream properties reported by a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMeta {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// `None` when the container does not report a usable count.
    pub frame_count: Option<u64>,
}

/// Everything a sink needs to know up front.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkSpec {
    pub codec: Codec,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

pub trait VideoSource: Send {
    fn meta(&self) -> VideoMeta;

    /// The next frame in decode order, or `None` when the stream is exhausted.
    fn read_frame(&mut self) -> Result<Option<Frame>, VideoError>;
}

pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VideoError>;

    /// Flushes and closes the output. Calling it again is a no-op.
    fn finalize(&mut self) -> Result<(), VideoError>;
}

pub trait VideoBackend {
    type Source: VideoSource + 'static;
    type Sink: VideoSink + 'static;

    fn open_source(&mut self, input: &Path) -> Result<Self::Source, VideoError>;

    fn open_sink(&mut self, output: &Path, spec: &SinkSpec) -> Result<Self::Sink, VideoError>;
}

/// Output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Mp4v,
    Xvid,
    Mjpg,
    Avc1,
    H264,
    Png,
    Jpg,
}

impl Codec {
    pub const ALL: [Codec; 7] = [
        Codec::Mp4v,
        Codec::Xvid,
        Codec::Mjpg,
        Codec::Avc1,
        Codec::H264,
        Codec::Png,
        Codec::Jpg,
    ];

    /// The fourcc (video codecs) or file extension (image codecs).
    pub fn name(self) -> &'static str {
        match self {
            Codec::Mp4v => "mp4v",
            Codec::Xvid => "XVID",
            Codec::Mjpg => "MJPG",
            Codec::Avc1 => "avc1",
            Codec::H264 => "H264",
            Codec::Png => "png",
            Codec::Jpg => "jpg",
        }
    }

    pub fn is_video(self) -> bool {
        !matches!(self, Codec::Png | Codec::Jpg)
    }

    /// The four fourcc characters of a video codec.
    pub fn fourcc(self) -> Option<[char; 4]> {
        if !self.is_video() {
            return None;
        }
        let mut chars = self.name().chars();
        Some([
            chars.next()?,
            chars.next()?,
            chars.next()?,
            chars.next()?,
        ])
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = VideoError;

    /// Fourccs match case-insensitively, so `xvid` and `XVID` are the same codec.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if wanted.eq_ignore_ascii_case("jpeg") {
            return Ok(Codec::Jpg);
        }
        Codec::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| VideoError::UnsupportedCodec(s.to_string()))
    }
}

/// Output containers, derived from the output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Mov,
    Avi,
    Mkv,
    /// A directory of numbered image files.
    ImageSequence,
}

impl Container {
    /// A path with no extension is an image-sequence directory.
    pub fn from_path(path: &Path) -> Result<Self, VideoError> {
        let Some(ext) = path.extension() else {
            return Ok(Container::ImageSequence);
        };
        match ext.to_string_lossy().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Container::Mp4),
            "mov" => Ok(Container::Mov),
            "avi" => Ok(Container::Avi),
            "mkv" => Ok(Container::Mkv),
            other => Err(VideoError::UnsupportedContainer(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mov => "mov",
            Container::Avi => "avi",
            Container::Mkv => "mkv",
            Container::ImageSequence => "image-sequence",
        }
    }

    pub fn accepts(self, codec: Codec) -> bool {
        match self {
            Container::Mp4 | Container::Mov => matches!(codec, Codec::Mp4v | Codec::Avc1 | Codec::H264),
            Container::Avi => matches!(codec, Codec::Xvid | Codec::Mjpg | Codec::Mp4v),
            Container::Mkv => codec.is_video(),
            Container::ImageSequence => !codec.is_video(),
        }
    }

    /// The codec used when a request names none.
    pub fn default_codec(self) -> Codec {
        match self {
            Container::Mp4 | Container::Mov | Container::Mkv => Codec::Mp4v,
            Container::Avi => Codec::Xvid,
            Container::ImageSequence => Codec::Png,
        }
    }
}

/// A validated output request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputSpec {
    pub container: Container,
    pub codec: Codec,
    /// Requested rate; `None` follows the source.
    pub fps: Option<f64>,
}

impl OutputSpec {
    /// Checks the codec against the container implied by `output`. Touches no
    /// files.
    pub fn validate(output: &Path, codec: Option<&str>, fps: Option<f64>) -> Result<Self, VideoError> {
        let container = Container::from_path(output)?;
        let codec = match codec {
            Some(name) => name.parse::<Codec>()?,
            None => container.default_codec(),
        };
        if !container.accepts(codec) {
            let hint = if codec.is_video() && container != Container::ImageSequence {
                "XVID with an .avi output".to_string()
            } else {
                container.default_codec().name().to_string()
            };
            return Err(VideoError::IncompatibleContainer {
                codec: codec.name().to_string(),
                container: container.name().to_string(),
                hint,
            });
        }
        Ok(Self { container, codec, fps })
    }

    /// The override if positive, else the source rate if positive, else 30.
    pub fn output_fps(&self, source_fps: f64) -> f64 {
        [self.fps.unwrap_or(0.0), source_fps]
            .into_iter()
            .find(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(FALLBACK_FPS)
    }
}

// ---------------------------------------------------------------------------
// Image sequences
// ---------------------------------------------------------------------------

/// File name of frame `index` in an image sequence.
pub fn frame_file_name(index: u64, ext: &str) -> String {
    format!("frame_{index:06}.{ext}")
}

/// Lists the frame images of a directory in name order.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, VideoError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map(|ext| {
                        let ext = ext.to_string_lossy().to_ascii_lowercase();
                        SEQUENCE_EXTENSIONS.contains(&ext.as_str())
                    })
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Reads a directory of frame images as a video.
#[derive(Debug)]
pub struct ImageSequenceSource {
    files: VecDeque<PathBuf>,
    meta: VideoMeta,
    index: u64,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self, VideoError> {
        let open_error = |reason: String| VideoError::SourceOpen {
            path: dir.to_path_buf(),
            reason,
        };
        if !dir.is_dir() {
            return Err(open_error("not a directory".to_string()));
        }
        let files = list_frames(dir).map_err(|e| open_error(e.to_string()))?;
        let Some(first) = files.first() else {
            return Err(open_error("no png/jpg/bmp frames found".to_string()));
        };
        let (width, height) = image::image_dimensions(first).map_err(|e| open_error(e.to_string()))?;
        let meta = VideoMeta {
            fps,
            width,
            height,
            frame_count: Some(files.len() as u64),
        };
        Ok(Self {
            files: files.into(),
            meta,
            index: 0,
        })
    }
}

impl VideoSource for ImageSequenceSource {
    fn meta(&self) -> VideoMeta {
        self.meta
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, VideoError> {
        let Some(path) = self.files.pop_front() else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;
        let image = image::open(&path).map_err(|e| VideoError::Decode {
            index,
            reason: format!("{}: {e}", path.display()),
        })?;
        Ok(Some(Frame::from_dynamic(image)))
    }
}

/// Writes numbered frame images into a directory.
#[derive(Debug)]
pub struct ImageSequenceSink {
    dir: PathBuf,
    codec: Codec,
    index: u64,
    finalized: bool,
}

impl ImageSequenceSink {
    pub fn create(dir: &Path, codec: Codec) -> Result<Self, VideoError> {
        if codec.is_video() {
            return Err(VideoError::IncompatibleContainer {
                codec: codec.name().to_string(),
                container: Container::ImageSequence.name().to_string(),
                hint: Codec::Png.name().to_string(),
            });
        }
        fs::create_dir_all(dir).map_err(|e| VideoError::SinkOpen {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            codec,
            index: 0,
            finalized: false,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.index
    }
}

fn encode_frame(path: &Path, codec: Codec, frame: &Frame) -> Result<(), image::ImageError> {
    let writer = BufWriter::new(File::create(path)?);
    let (width, height) = frame.dimensions();
    let (bytes, color): (&[u8], ExtendedColorType) = match frame {
        Frame::Gray(gray) => (gray.as_raw(), ExtendedColorType::L8),
        Frame::Color(rgb) => (rgb.as_raw(), ExtendedColorType::Rgb8),
    };
    match codec {
        Codec::Jpg => JpegEncoder::new_with_quality(writer, 95).write_image(bytes, width, height, color),
        _ => PngEncoder::new(writer).write_image(bytes, width, height, color),
    }
}

impl VideoSink for ImageSequenceSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VideoError> {
        let path = self.dir.join(frame_file_name(self.index, self.codec.name()));
        encode_frame(&path, self.codec, frame).map_err(|e| VideoError::Encode {
            index: self.index,
            reason: e.to_string(),
        })?;
        self.index += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), VideoError> {
        if !self.finalized {
            self.finalized = true;
            debug!(dir = %self.dir.display(), frames = self.index, "image sequence finalized");
        }
        Ok(())
    }
}

/// Opens directories as sources and sinks. The directory carries no frame rate,
/// so the backend supplies one.
#[derive(Debug, Clone, Copy)]
pub struct ImageSequenceBackend {
    pub fps: f64,
}

impl Default for ImageSequenceBackend {
    fn default() -> Self {
        Self { fps: FALLBACK_FPS }
    }
}

impl VideoBackend for ImageSequenceBackend {
    type Source = ImageSequenceSource;
    type Sink = ImageSequenceSink;

    fn open_source(&mut self, input: &Path) -> Result<Self::Source, VideoError> {
        ImageSequenceSource::open(input, self.fps)
    }

    fn open_sink(&mut self, output: &Path, spec: &SinkSpec) -> Result<Self::Sink, VideoError> {
        ImageSequenceSink::create(output, spec.codec)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// What happened to an in-memory backend's source and sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryRecord {
    pub source_opened: bool,
    pub source_released: bool,
    pub frames_read: u64,
    pub sink_spec: Option<SinkSpec>,
    pub written: Vec<Frame>,
    pub finalize_calls: u32,
    pub sink_released: bool,
}

type SharedRecord = Arc<Mutex<MemoryRecord>>;

fn lock(record: &SharedRecord) -> MutexGuard<'_, MemoryRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MemorySource {
    frames: VecDeque<Frame>,
    meta: VideoMeta,
    record: SharedRecord,
}

impl VideoSource for MemorySource {
    fn meta(&self) -> VideoMeta {
        self.meta
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, VideoError> {
        let frame = self.frames.pop_front();
        if frame.is_some() {
            lock(&self.record).frames_read += 1;
        }
        Ok(frame)
    }
}

impl Drop for MemorySource {
    fn drop(&mut self) {
        lock(&self.record).source_released = true;
    }
}

pub struct MemorySink {
    record: SharedRecord,
}

impl VideoSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VideoError> {
        lock(&self.record).written.push(frame.clone());
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), VideoError> {
        lock(&self.record).finalize_calls += 1;
        Ok(())
    }
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        lock(&self.record).sink_released = true;
    }
}

/// Serves a fixed list of frames and records everything written back.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    frames: Vec<Frame>,
    meta: VideoMeta,
    fail_sink_open: bool,
    record: SharedRecord,
}

impl MemoryBackend {
    /// Metadata is taken from the first frame; the frame count is known.
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        let (width, height) = frames.first().map(Frame::dimensions).unwrap_or((0, 0));
        let meta = VideoMeta {
            fps,
            width,
            height,
            frame_count: Some(frames.len() as u64),
        };
        Self::with_meta(frames, meta)
    }

    pub fn with_meta(frames: Vec<Frame>, meta: VideoMeta) -> Self {
        Self {
            frames,
            meta,
            fail_sink_open: false,
            record: SharedRecord::default(),
        }
    }

    /// Makes `open_sink` fail, as a misconfigured encoder would.
    pub fn failing_sink(mut self) -> Self {
        self.fail_sink_open = true;
        self
    }

    pub fn record(&self) -> MemoryRecord {
        lock(&self.record).clone()
    }
}

impl VideoBackend for MemoryBackend {
    type Source = MemorySource;
    type Sink = MemorySink;

    fn open_source(&mut self, _input: &Path) -> Result<Self::Source, VideoError> {
        lock(&self.record).source_opened = true;
        Ok(MemorySource {
            frames: self.frames.clone().into(),
            meta: self.meta,
            record: Arc::clone(&self.record),
        })
    }

    fn open_sink(&mut self, output: &Path, spec: &SinkSpec) -> Result<Self::Sink, VideoError> {
        if self.fail_sink_open {
            return Err(VideoError::SinkOpen {
                path: output.to_path_buf(),
                reason: "encoder refused the configuration".to_string(),
            });
        }
        lock(&self.record).sink_spec = Some(*spec);
        Ok(MemorySink {
            record: Arc::clone(&self.record),
        })
    }
}
