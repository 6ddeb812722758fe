//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use freequeue_core::QueueConfig;
use serde::{Deserialize, Serialize};

pub const SETTINGS_PATH_ENV: &str = "FREEQUEUE_SETTINGS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub queue: QueueConfig,
    pub sample_rate: u32,
    pub tone_hz: f32,
    pub tone_gain: f32,
    /// Zero runs until interrupted.
    pub run_seconds: u64,
    pub report_interval_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            sample_rate: 48_000,
            tone_hz: 440.0,
            tone_gain: 0.25,
            run_seconds: 5,
            report_interval_ms: 1_000,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.queue.normalize();
        self.sample_rate = self.sample_rate.clamp(8_000, 384_000);
        let nyquist = self.sample_rate as f32 / 2.0;
        self.tone_hz = if self.tone_hz.is_finite() {
            self.tone_hz.clamp(1.0, nyquist)
        } else {
            440.0
        };
        self.tone_gain = if self.tone_gain.is_finite() {
            self.tone_gain.clamp(0.0, 1.0)
        } else {
            0.25
        };
        self.report_interval_ms = self.report_interval_ms.clamp(50, 60_000);
    }

    /// Wall time covered by one render quantum at the configured rate.
    pub fn quantum_period(&self) -> std::time::Duration {
        let frames = self.queue.render_quantum_frames.max(1) as f64;
        std::time::Duration::from_secs_f64(frames / f64::from(self.sample_rate.max(1)))
    }
}

pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("FreeQueue")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("freequeue")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("freequeue-app-{}-{name}", std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("/nonexistent/freequeue/settings.json"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let path = scratch_path("malformed");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = scratch_path("roundtrip");
        let mut settings = AppSettings::default();
        settings.queue.channel_count = 4;
        settings.tone_hz = 220.0;
        settings.run_seconds = 0;
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut settings = AppSettings {
            sample_rate: 1,
            tone_hz: 1.0e9,
            tone_gain: f32::NAN,
            report_interval_ms: 0,
            ..AppSettings::default()
        };
        settings.queue.channel_count = 0;
        settings.normalize();
        assert_eq!(settings.sample_rate, 8_000);
        assert_eq!(settings.tone_hz, 4_000.0);
        assert_eq!(settings.tone_gain, 0.25);
        assert_eq!(settings.report_interval_ms, 50);
        assert_eq!(settings.queue.channel_count, 1);
    }

    #[test]
    fn partial_json_keeps_nested_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{ "queue": { "channelCount": 1 }, "toneHz": 330 }"#).unwrap();
        assert_eq!(settings.queue.channel_count, 1);
        assert_eq!(settings.queue.capacity_frames, QueueConfig::default().capacity_frames);
        assert_eq!(settings.tone_hz, 330.0);
        assert_eq!(settings.sample_rate, 48_000);
    }

    #[test]
    fn quantum_period_matches_rate() {
        let settings = AppSettings::default();
        let period = settings.quantum_period();
        assert!((period.as_secs_f64() - 128.0 / 48_000.0).abs() < 1e-9);
    }
}
