use std::fmt;

/// A convenient result type wrapping [`StreamError`].
pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug)]
pub enum StreamError {
    /// The device could not create a buffer.
    DeviceOutOfMemory { debug_name: String, byte_size: u64 },
    /// The slice allocator needed more blocks than it is allowed to own.
    BlockCapExceeded { max_blocks: u32 },
    /// A mesh task could not allocate its CPU-side slice storage.
    HostOutOfMemory { bytes: usize },
    InvalidConfig(String),
    Config(serde_json::Error),
    Io(std::io::Error),
    WorkerPool(String),
}

impl StreamError {
    /// Resource exhaustion the streamer has no degraded mode for.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::DeviceOutOfMemory { .. }
                | StreamError::BlockCapExceeded { .. }
                | StreamError::HostOutOfMemory { .. }
        )
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::DeviceOutOfMemory {
                debug_name,
                byte_size,
            } => write!(
                f,
                "Out of device memory creating '{}' ({} bytes)!",
                debug_name, byte_size
            ),
            StreamError::BlockCapExceeded { max_blocks } => write!(
                f,
                "Ran out of allocation blocks! (cap is {} blocks)",
                max_blocks
            ),
            StreamError::HostOutOfMemory { bytes } => {
                write!(f, "Failed to allocate {} bytes of slice storage!", bytes)
            }
            StreamError::InvalidConfig(reason) => write!(f, "Invalid stream config: {}", reason),
            StreamError::Config(err) => write!(f, "Failed to parse stream config: {}", err),
            StreamError::Io(err) => write!(f, "IO error: {}", err),
            StreamError::WorkerPool(reason) => {
                write!(f, "Failed to build mesh worker pool: {}", reason)
            }
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Config(err) => Some(err),
            StreamError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(value: serde_json::Error) -> Self {
        StreamError::Config(value)
    }
}

impl From<std::io::Error> for StreamError {
    fn from(value: std::io::Error) -> Self {
        StreamError::Io(value)
    }
}

impl From<rayon::ThreadPoolBuildError> for StreamError {
    fn from(value: rayon::ThreadPoolBuildError) -> Self {
        StreamError::WorkerPool(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhaustion_is_fatal() {
        assert!(StreamError::BlockCapExceeded { max_blocks: 4 }.is_fatal());
        assert!(StreamError::HostOutOfMemory { bytes: 16 }.is_fatal());
        assert!(StreamError::DeviceOutOfMemory {
            debug_name: "block".into(),
            byte_size: 64,
        }
        .is_fatal());
        assert!(!StreamError::InvalidConfig("bad".into()).is_fatal());
    }

    #[test]
    fn display_names_the_cap() {
        let msg = StreamError::BlockCapExceeded { max_blocks: 64 }.to_string();
        assert!(msg.contains("64"));
    }
}
