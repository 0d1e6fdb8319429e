//! Emulator configuration
//!
//! Loaded from TOML; every field has a default so a partial file (or none)
//! is valid.
//!
//! ```toml
//! mode = "cycle-accurate"
//! frame_interval_ms = 16
//! failure_policy = "abort"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::jit::FailurePolicy;

/// CPU steps per frame
pub const CYCLES_PER_FRAME: u32 = 29781;
/// Nominal NTSC CPU clock
pub const NTSC_CPU_CLOCK_HZ: f64 = 1_789_773.0;
/// PPU dots per CPU step
pub const PPU_STEPS_PER_CPU_STEP: u32 = 3;

/// Real-time pacing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimingModeKind {
    /// One frame per periodic tick
    #[default]
    EventDriven,
    /// Pace against the nominal clock
    CycleAccurate,
}

impl FromStr for TimingModeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event-driven" | "event" => Ok(TimingModeKind::EventDriven),
            "cycle-accurate" | "cycle" => Ok(TimingModeKind::CycleAccurate),
            other => Err(ConfigError::Invalid(format!("unknown timing mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub mode: TimingModeKind,
    pub cycles_per_frame: u32,
    /// Emit a stats event every this many CPU steps
    pub stats_interval_cycles: u64,
    /// Tick period of the event-driven mode
    pub frame_interval_ms: u64,
    pub cpu_clock_hz: f64,
    pub failure_policy: FailurePolicy,
    /// Compiled-function cache to load at start and save on exit
    pub cache_path: Option<PathBuf>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            mode: TimingModeKind::EventDriven,
            cycles_per_frame: CYCLES_PER_FRAME,
            stats_interval_cycles: 10_000,
            frame_interval_ms: 16,
            cpu_clock_hz: NTSC_CPU_CLOCK_HZ,
            failure_policy: FailurePolicy::MarkAbsent,
            cache_path: None,
        }
    }
}

impl EmulatorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycles_per_frame == 0 {
            return Err(ConfigError::Invalid("cycles_per_frame must be positive".into()));
        }
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("frame_interval_ms must be positive".into()));
        }
        if !(self.cpu_clock_hz.is_finite() && self.cpu_clock_hz > 0.0) {
            return Err(ConfigError::Invalid("cpu_clock_hz must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EmulatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, EmulatorConfig::default());
        assert_eq!(config.cycles_per_frame, 29781);
        assert_eq!(config.frame_interval_ms, 16);
    }

    #[test]
    fn test_partial_file() {
        let config = EmulatorConfig::from_toml_str(
            "mode = \"cycle-accurate\"\nfailure_policy = \"abort\"\ncache_path = \"game.njit\"\n",
        )
        .unwrap();
        assert_eq!(config.mode, TimingModeKind::CycleAccurate);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.cache_path, Some(PathBuf::from("game.njit")));
        assert_eq!(config.stats_interval_cycles, 10_000);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            EmulatorConfig::from_toml_str("cycles_per_frame = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EmulatorConfig::from_toml_str("mode = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("cycle".parse::<TimingModeKind>().unwrap(), TimingModeKind::CycleAccurate);
        assert!("turbo".parse::<TimingModeKind>().is_err());
    }
}
