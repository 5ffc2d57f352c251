use anyhow::{Context, Result};
use clap::Parser;
use image::{GrayImage, RgbImage};
use opencv::{
    core::{self, Mat, Size},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use retinex_vision::cli::{FilterArgs, cancel_on_ctrl_c, init_logging, spawn_progress_logger};
use retinex_vision::video::{Codec, SinkSpec};
use retinex_vision::{
    EnhanceFilter, EnhanceRequest, EnhanceRunner, Frame, ReadAheadRunner, RunState, VideoBackend,
    VideoError, VideoMeta, VideoSink, VideoSource,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "enhance_tester", version, about = "Enhance a video file with a retinex_vision filter")]
struct Cli {
    /// Input video (anything OpenCV can decode)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output video (.mp4, .mov, .avi or .mkv)
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    #[command(flatten)]
    filter: FilterArgs,

    /// Overlap decoding and encoding with enhancement
    #[arg(long)]
    read_ahead: bool,
}

// --- OpenCV video I/O ---

fn cv_reason(e: opencv::Error) -> String {
    e.to_string()
}

struct OpenCvSource {
    capture: VideoCapture,
    meta: VideoMeta,
    index: u64,
}

impl OpenCvSource {
    fn open(path: &Path) -> Result<Self, VideoError> {
        let open_error = |reason: String| VideoError::SourceOpen {
            path: path.to_path_buf(),
            reason,
        };
        let capture = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)
            .map_err(|e| open_error(cv_reason(e)))?;
        if !capture.is_opened().map_err(|e| open_error(cv_reason(e)))? {
            return Err(open_error("OpenCV could not open the file".to_string()));
        }
        let prop = |id| capture.get(id).map_err(|e| open_error(cv_reason(e)));
        let frames = prop(videoio::CAP_PROP_FRAME_COUNT)?;
        let meta = VideoMeta {
            fps: prop(videoio::CAP_PROP_FPS)?,
            width: prop(videoio::CAP_PROP_FRAME_WIDTH)? as u32,
            height: prop(videoio::CAP_PROP_FRAME_HEIGHT)? as u32,
            // Containers without an index report 0.
            frame_count: (frames > 0.0).then_some(frames as u64),
        };
        Ok(Self {
            capture,
            meta,
            index: 0,
        })
    }

    fn to_frame(&self, mat: &Mat) -> Result<Frame, opencv::Error> {
        let width = mat.cols() as u32;
        let height = mat.rows() as u32;
        if mat.channels() == 1 {
            let bytes = mat.data_bytes()?.to_vec();
            return GrayImage::from_raw(width, height, bytes)
                .map(Frame::Gray)
                .ok_or_else(|| opencv::Error::new(core::StsUnmatchedSizes, "gray buffer size mismatch"));
        }
        let mut rgb = Mat::default();
        imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let bytes = rgb.data_bytes()?.to_vec();
        RgbImage::from_raw(width, height, bytes)
            .map(Frame::Color)
            .ok_or_else(|| opencv::Error::new(core::StsUnmatchedSizes, "rgb buffer size mismatch"))
    }
}

impl VideoSource for OpenCvSource {
    fn meta(&self) -> VideoMeta {
        self.meta
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, VideoError> {
        let index = self.index;
        let decode_error = |e: opencv::Error| VideoError::Decode {
            index,
            reason: cv_reason(e),
        };
        let mut mat = Mat::default();
        if !self.capture.read(&mut mat).map_err(decode_error)? || mat.empty() {
            return Ok(None);
        }
        let frame = self.to_frame(&mat).map_err(decode_error)?;
        self.index += 1;
        Ok(Some(frame))
    }
}

impl Drop for OpenCvSource {
    fn drop(&mut self) {
        let _ = self.capture.release();
    }
}

struct OpenCvSink {
    writer: VideoWriter,
    index: u64,
    released: bool,
}

impl OpenCvSink {
    fn create(path: &Path, spec: &SinkSpec) -> Result<Self, VideoError> {
        let open_error = |reason: String| VideoError::SinkOpen {
            path: path.to_path_buf(),
            reason,
        };
        let Some([a, b, c, d]) = spec.codec.fourcc() else {
            return Err(VideoError::UnsupportedCodec(spec.codec.name().to_string()));
        };
        let fourcc = VideoWriter::fourcc(a, b, c, d).map_err(|e| open_error(cv_reason(e)))?;
        let size = Size::new(spec.width as i32, spec.height as i32);
        let writer = VideoWriter::new(&path.to_string_lossy(), fourcc, spec.fps, size, true)
            .map_err(|e| open_error(cv_reason(e)))?;
        if !writer.is_opened().map_err(|e| open_error(cv_reason(e)))? {
            let hint = match spec.codec {
                Codec::Xvid => "check that the OpenCV build has an XVID encoder",
                _ => "Try codec='XVID' or output .avi",
            };
            return Err(open_error(format!("encoder for {} refused to open. {hint}", spec.codec)));
        }
        Ok(Self {
            writer,
            index: 0,
            released: false,
        })
    }

    fn to_mat(frame: &Frame) -> Result<Mat, opencv::Error> {
        let (width, height) = frame.dimensions();
        let (bytes, typ, code) = match frame {
            Frame::Gray(gray) => (gray.as_raw(), core::CV_8UC1, imgproc::COLOR_GRAY2BGR),
            Frame::Color(rgb) => (rgb.as_raw(), core::CV_8UC3, imgproc::COLOR_RGB2BGR),
        };
        let mut packed = Mat::new_rows_cols_with_default(height as i32, width as i32, typ, core::Scalar::all(0.0))?;
        packed.data_bytes_mut()?.copy_from_slice(bytes);
        let mut bgr = Mat::default();
        imgproc::cvt_color(&packed, &mut bgr, code, 0)?;
        Ok(bgr)
    }
}

impl VideoSink for OpenCvSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VideoError> {
        let encode_error = |e: opencv::Error| VideoError::Encode {
            index: self.index,
            reason: cv_reason(e),
        };
        let mat = Self::to_mat(frame).map_err(encode_error)?;
        self.writer.write(&mat).map_err(encode_error)?;
        self.index += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), VideoError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.writer.release().map_err(|e| VideoError::Encode {
            index: self.index,
            reason: cv_reason(e),
        })
    }
}

impl Drop for OpenCvSink {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.writer.release();
        }
    }
}

struct OpenCvBackend;

impl VideoBackend for OpenCvBackend {
    type Source = OpenCvSource;
    type Sink = OpenCvSink;

    fn open_source(&mut self, input: &Path) -> Result<Self::Source, VideoError> {
        OpenCvSource::open(input)
    }

    fn open_sink(&mut self, output: &Path, spec: &SinkSpec) -> Result<Self::Sink, VideoError> {
        OpenCvSink::create(output, spec)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("enhance_tester=info,retinex_vision=info");
    let cli = Cli::parse();

    let config = cli.filter.resolve().context("invalid filter settings")?;
    let filter = EnhanceFilter::from_config(&config)?;
    let request = EnhanceRequest::new(&cli.input, &cli.output).with_config(&config);

    let cancel = cancel_on_ctrl_c();
    let (progress, logger) = spawn_progress_logger();

    let mut backend = OpenCvBackend;
    let summary = if cli.read_ahead {
        ReadAheadRunner::new(filter)
            .run(&mut backend, &request, progress, cancel)
            .await?
    } else {
        tokio::task::spawn_blocking(move || {
            let mut runner = EnhanceRunner::new(filter);
            let mut progress = progress;
            runner.run(&mut backend, &request, &mut progress, &cancel)
        })
        .await
        .context("enhancement task panicked")??
    };
    logger.await.context("progress logger panicked")?;

    match summary.state {
        RunState::Cancelled => warn!(frames = summary.frames_written, "cancelled, partial output kept"),
        _ => info!(
            frames = summary.frames_written,
            output = %cli.output.display(),
            "processing complete"
        ),
    }
    Ok(())
}
