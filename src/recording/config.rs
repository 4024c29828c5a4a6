//! Recording configuration

use std::path::PathBuf;

/// Configuration for the recording manager
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Directory recordings are written to and served from
    pub recordings_dir: PathBuf,

    /// Buffered writer capacity per recording
    pub write_buffer_size: usize,

    /// Extension used when the upstream content type is not recognized
    pub default_extension: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("recordings"),
            write_buffer_size: 64 * 1024, // 64KB
            default_extension: "bin".to_string(),
        }
    }
}

impl RecordingConfig {
    /// Create a config writing to `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            recordings_dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the recordings directory
    pub fn recordings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recordings_dir = dir.into();
        self
    }

    /// Set the write buffer size
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size.max(512);
        self
    }

    /// Set the fallback file extension (without the dot)
    pub fn default_extension(mut self, ext: impl Into<String>) -> Self {
        self.default_extension = ext.into().trim_start_matches('.').to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecordingConfig::default();

        assert_eq!(config.recordings_dir, PathBuf::from("recordings"));
        assert_eq!(config.write_buffer_size, 64 * 1024);
        assert_eq!(config.default_extension, "bin");
    }

    #[test]
    fn test_builder() {
        let config = RecordingConfig::with_dir("/tmp/rec")
            .write_buffer_size(1)
            .default_extension(".mp3");

        assert_eq!(config.recordings_dir, PathBuf::from("/tmp/rec"));
        assert_eq!(config.write_buffer_size, 512);
        assert_eq!(config.default_extension, "mp3");
    }
}
