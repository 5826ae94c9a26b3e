use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StreamError};
use crate::mesh::ChunkVertex;

/// Constructor-time parameters of the chunk streamer.
///
/// Every size is fixed once a [`crate::ChunkStreamer`] is built from it.
/// Missing fields in a JSON document fall back to [`StreamConfig::default`]:
///
/// ```
/// use meshi_voxel::StreamConfig;
///
/// let cfg = StreamConfig::from_json_str(r#"{ "frames_in_flight": 3 }"#).unwrap();
/// assert_eq!(cfg.frames_in_flight, 3);
/// assert_eq!(cfg.slice_capacity, StreamConfig::default().slice_capacity);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Vertices per slice.
    pub slice_capacity: u32,
    /// Byte budget of one allocation block. Rounded down to whole slices.
    pub alloc_block_bytes: u64,
    pub frames_in_flight: u32,
    pub staging_buf_bytes: u64,
    pub min_staging_bufs: u32,
    /// Hard cap on allocation blocks. Exceeding it is fatal.
    pub max_blocks: u32,
    /// Mesh worker threads, 0 lets rayon pick.
    pub worker_threads: u32,
    /// Remesh tasks submitted per call to `dispatch_remesh`.
    pub max_dispatch_per_frame: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            slice_capacity: 4096,
            alloc_block_bytes: 64 * 1024 * 1024,
            frames_in_flight: 2,
            staging_buf_bytes: 4 * 1024 * 1024,
            min_staging_bufs: 1,
            max_blocks: 64,
            worker_threads: 0,
            max_dispatch_per_frame: 64,
        }
    }
}

impl StreamConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: StreamConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slice_capacity == 0 {
            return Err(StreamError::InvalidConfig(
                "slice_capacity must be non-zero".into(),
            ));
        }
        if self.frames_in_flight < 2 {
            return Err(StreamError::InvalidConfig(format!(
                "frames_in_flight must be at least 2, got {}",
                self.frames_in_flight
            )));
        }
        if self.min_staging_bufs < 1 {
            return Err(StreamError::InvalidConfig(
                "min_staging_bufs must be at least 1".into(),
            ));
        }
        if self.max_blocks < 1 {
            return Err(StreamError::InvalidConfig(
                "max_blocks must be at least 1".into(),
            ));
        }
        if self.alloc_block_bytes < self.slice_bytes() {
            return Err(StreamError::InvalidConfig(format!(
                "alloc_block_bytes ({}) cannot hold one slice ({} bytes)",
                self.alloc_block_bytes,
                self.slice_bytes()
            )));
        }
        if self.staging_buf_bytes < self.slice_bytes() {
            return Err(StreamError::InvalidConfig(format!(
                "staging_buf_bytes ({}) cannot hold one slice ({} bytes)",
                self.staging_buf_bytes,
                self.slice_bytes()
            )));
        }
        Ok(())
    }

    pub fn slice_bytes(&self) -> u64 {
        self.slice_capacity as u64 * std::mem::size_of::<ChunkVertex>() as u64
    }

    pub fn slices_per_block(&self) -> u32 {
        (self.alloc_block_bytes / self.slice_bytes()) as u32
    }

    /// Actual size of each block buffer: whole slices only.
    pub fn block_bytes(&self) -> u64 {
        self.slices_per_block() as u64 * self.slice_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_block_holds_whole_slices() {
        let cfg = StreamConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.slice_bytes(), 4096 * 16);
        assert_eq!(cfg.slices_per_block(), 1024);
        assert_eq!(cfg.block_bytes(), cfg.alloc_block_bytes);
    }

    #[test]
    fn partial_slice_budget_is_rounded_down() {
        let cfg = StreamConfig {
            slice_capacity: 4,
            alloc_block_bytes: 4 * 16 * 3 + 10,
            ..Default::default()
        };
        assert_eq!(cfg.slices_per_block(), 3);
        assert_eq!(cfg.block_bytes(), 4 * 16 * 3);
    }

    #[test]
    fn rejects_single_frame_in_flight() {
        let err = StreamConfig::from_json_str(r#"{ "frames_in_flight": 1 }"#).unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_staging_smaller_than_slice() {
        let cfg = StreamConfig {
            staging_buf_bytes: 8,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = StreamConfig::from_json_str("{ frames_in_flight: }").unwrap_err();
        assert!(matches!(err, StreamError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp config");
        write!(
            file,
            r#"{{ "slice_capacity": 128, "alloc_block_bytes": 32768, "min_staging_bufs": 2 }}"#
        )
        .expect("write temp config");

        let cfg = StreamConfig::from_json_file(file.path()).expect("load config");
        assert_eq!(cfg.slice_capacity, 128);
        assert_eq!(cfg.slices_per_block(), 16);
        assert_eq!(cfg.min_staging_bufs, 2);
    }
}
