//! Queue geometry agreed between producer and consumer before first use.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FreeQueueError, Result};
use crate::store::{MAX_CAPACITY_FRAMES, MAX_CHANNEL_COUNT};

/// Web Audio render quantum: frames per `AudioWorkletProcessor::process` call.
pub const RENDER_QUANTUM_FRAMES: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct QueueConfig {
    /// Frames the ring holds when full.
    pub capacity_frames: usize,
    pub channel_count: usize,
    /// Fixed block size both sides push and pull per call.
    pub render_quantum_frames: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity_frames: RENDER_QUANTUM_FRAMES * 16,
            channel_count: 2,
            render_quantum_frames: RENDER_QUANTUM_FRAMES,
        }
    }
}

impl QueueConfig {
    /// Clamp every field into its supported range.
    ///
    /// The capacity is raised to at least one render quantum so a single
    /// block can always fit.
    pub fn normalize(&mut self) {
        self.channel_count = self.channel_count.clamp(1, MAX_CHANNEL_COUNT);
        self.render_quantum_frames = self.render_quantum_frames.clamp(1, MAX_CAPACITY_FRAMES);
        self.capacity_frames = self
            .capacity_frames
            .clamp(self.render_quantum_frames, MAX_CAPACITY_FRAMES);
    }

    /// Check the config without modifying it.
    ///
    /// # Errors
    /// `FreeQueueError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0 || self.channel_count > MAX_CHANNEL_COUNT {
            return Err(FreeQueueError::Config(format!(
                "channelCount must be in 1..={MAX_CHANNEL_COUNT}, got {}",
                self.channel_count
            )));
        }
        if self.render_quantum_frames == 0 {
            return Err(FreeQueueError::Config(
                "renderQuantumFrames must be non-zero".into(),
            ));
        }
        if self.capacity_frames < self.render_quantum_frames
            || self.capacity_frames > MAX_CAPACITY_FRAMES
        {
            return Err(FreeQueueError::Config(format!(
                "capacityFrames must be in {}..={MAX_CAPACITY_FRAMES}, got {}",
                self.render_quantum_frames, self.capacity_frames
            )));
        }
        Ok(())
    }

    /// Render quanta that fit in the ring at once.
    pub fn quanta_per_ring(&self) -> usize {
        self.capacity_frames / self.render_quantum_frames.max(1)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quanta_per_ring(), 16);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = QueueConfig::from_json_str(r#"{ "channelCount": 1 }"#).unwrap();
        assert_eq!(config.channel_count, 1);
        assert_eq!(config.render_quantum_frames, RENDER_QUANTUM_FRAMES);
        assert_eq!(config.capacity_frames, RENDER_QUANTUM_FRAMES * 16);
    }

    #[test]
    fn invalid_json_values_are_config_errors() {
        let err = QueueConfig::from_json_str(r#"{ "channelCount": 0 }"#).unwrap_err();
        assert!(matches!(err, FreeQueueError::Config(_)), "{err}");

        let err =
            QueueConfig::from_json_str(r#"{ "capacityFrames": 64, "renderQuantumFrames": 128 }"#)
                .unwrap_err();
        assert!(matches!(err, FreeQueueError::Config(_)), "{err}");

        let err = QueueConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, FreeQueueError::Json(_)), "{err}");
    }

    #[test]
    fn normalize_clamps_into_range() {
        let mut config = QueueConfig {
            capacity_frames: 10,
            channel_count: 500,
            render_quantum_frames: 0,
        };
        config.normalize();
        assert_eq!(config.channel_count, MAX_CHANNEL_COUNT);
        assert_eq!(config.render_quantum_frames, 1);
        assert_eq!(config.capacity_frames, 10);

        let mut config = QueueConfig {
            capacity_frames: 16,
            channel_count: 0,
            render_quantum_frames: 128,
        };
        config.normalize();
        assert_eq!(config.channel_count, 1);
        assert_eq!(config.capacity_frames, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("freequeue-config-{}", std::process::id()));
        let path = dir.join("queue.json");
        let config = QueueConfig {
            capacity_frames: 4096,
            channel_count: 4,
            render_quantum_frames: 256,
        };
        config.save(&path).unwrap();
        assert_eq!(QueueConfig::load(&path).unwrap(), config);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = QueueConfig::load(Path::new("/nonexistent/freequeue/queue.json")).unwrap_err();
        assert!(matches!(err, FreeQueueError::Io(_)));
    }
}
