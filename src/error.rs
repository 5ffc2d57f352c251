use std::path::PathBuf;
use thiserror::Error;

/// A run configuration that cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unknown preset '{0}' (expected default, dark or debright)")]
    UnknownPreset(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures of the video collaborators and of output validation.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("cannot open input {path}: {reason}")]
    SourceOpen { path: PathBuf, reason: String },

    #[error("cannot open output {path}: {reason}")]
    SinkOpen { path: PathBuf, reason: String },

    #[error("unsupported codec '{0}'")]
    UnsupportedCodec(String),

    #[error("unsupported output container '{0}'")]
    UnsupportedContainer(String),

    #[error("codec {codec} cannot be written to a {container} output; try codec '{hint}'")]
    IncompatibleContainer {
        codec: String,
        container: String,
        hint: String,
    },

    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: u64, reason: String },

    #[error("failed to encode frame {index}: {reason}")]
    Encode { index: u64, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Everything that can end an enhancement run in the `Failed` state.
#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Video(#[from] VideoError),

    #[error("frame {index} is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    MalformedFrame {
        index: u64,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("frame {index} is {actual}, the stream is {expected}")]
    MixedLayout {
        index: u64,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("pipeline worker failed: {0}")]
    Worker(String),
}
