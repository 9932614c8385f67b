use std::fmt;
use std::path::PathBuf;

/// Failures shared by the GL runtime, the recorder and hosts.
///
/// Stage-local variants (`ShaderNotFound` through `GlCreate`) disable one render stage; the
/// pipeline keeps running. Config variants abort loading and leave nothing half-applied.
#[derive(Debug)]
pub enum EngineError {
    /// The config file exists but could not be read.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`crate::CamflowConfig`].
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Parsed, but a value is out of range (hold interval, bitrate, frame rate).
    InvalidConfig {
        path: PathBuf,
        msg: String,
    },

    /// No vertex/fragment pair registered under this logical name.
    ShaderNotFound(String),
    VertexCompile(String),
    FragmentCompile(String),
    Link(String),
    /// A texture, framebuffer, renderbuffer or buffer could not be allocated.
    GlCreate(String),

    /// A preview size, encoder format or surface the stage cannot work with.
    Unsupported(String),

    Other(String),
}

impl EngineError {
    pub fn other<T: Into<String>>(s: T) -> Self {
        EngineError::Other(s.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io { path, source } => {
                write!(f, "cannot read camflow config {}: {}", path.display(), source)
            }
            EngineError::Json { path, source } => {
                write!(f, "camflow config {} is malformed: {}", path.display(), source)
            }
            EngineError::InvalidConfig { path, msg } => {
                write!(f, "camflow config {} rejected: {}", path.display(), msg)
            }
            EngineError::ShaderNotFound(name) => write!(f, "no shader pair registered as '{name}'"),
            EngineError::VertexCompile(log) => write!(f, "vertex stage failed to compile: {log}"),
            EngineError::FragmentCompile(log) => {
                write!(f, "fragment stage failed to compile: {log}")
            }
            EngineError::Link(log) => write!(f, "shader pair failed to link: {log}"),
            EngineError::GlCreate(what) => write!(f, "GL allocation failed: {what}"),
            EngineError::Unsupported(what) => write!(f, "not supported by the pipeline: {what}"),
            EngineError::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io { source, .. } => Some(source),
            EngineError::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_errors_name_the_file_and_keep_their_source() {
        let err = EngineError::Io {
            path: PathBuf::from("camflow.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("camflow.json"));
        assert!(err.source().is_some());
    }

    #[test]
    fn shader_errors_carry_the_driver_log() {
        let err = EngineError::Link("varying mismatch".into());
        assert!(err.to_string().ends_with("varying mismatch"));
        assert!(err.source().is_none());
        assert_eq!(EngineError::other("plain").to_string(), "plain");
    }
}
