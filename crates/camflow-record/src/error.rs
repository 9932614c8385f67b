use std::path::PathBuf;

use thiserror::Error;

use camflow_core::EngineError;

use crate::codec::EncoderKind;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{0:?} encoder registered twice")]
    DuplicateEncoder(EncoderKind),

    #[error("muxer already started")]
    MuxerAlreadyStarted,

    #[error("sample produced before the muxer started")]
    MuxerNotStarted,

    #[error("encoder output format changed twice")]
    FormatChangedTwice,

    #[error("codec: {0}")]
    Codec(String),

    #[error("record target: {0}")]
    Target(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("track header: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("recorder released")]
    Released,

    #[error(transparent)]
    Engine(#[from] EngineError),
}
