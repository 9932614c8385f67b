use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("webcam support not enabled (build with feature: camflow-input-camera/native)")]
    NotEnabled,

    /// The producer cannot deliver the requested preview size exactly.
    #[error("unsupported video size")]
    UnsupportedSize,

    #[error("no output surface set")]
    NoSurface,

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to dump frame to {}: {message}", path.display())]
    Dump { path: PathBuf, message: String },

    #[error("{0}")]
    Backend(String),
}
