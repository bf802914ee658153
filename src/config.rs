//! Profiler configuration
//!
//! Builder-style configuration applied before or between sessions. It can
//! also be loaded from a TOML file:
//!
//! ```toml
//! include_blocking_time = false
//! percentage_mode = true
//! attach_duration_secs = 5.0
//! format = "json"
//!
//! [suspend_point]
//! module = "hub"
//! name = "switch"
//! ```

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::call_site::CallSite;
use crate::error::{ProfilerError, Result};

/// Session length used by `attach_default` and signal-armed attaches
pub const DEFAULT_ATTACH_DURATION: Duration = Duration::from_secs(60);

/// Report rendering format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Ranked table and indented call trees (default)
    #[default]
    Text,
    /// Single JSON document for machine parsing
    Json,
}

/// The scheduler callable whose entry means "this context yields"
///
/// Hosts that can deliver explicit suspend/resume notifications do not need
/// one; it exists for event sources that only see calls and returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendPoint {
    pub module: String,
    pub name: String,
}

impl SuspendPoint {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    pub fn matches(&self, site: &CallSite) -> bool {
        site.is_callable(&self.module, &self.name)
    }
}

/// Profiler configuration with builder pattern
///
/// # Example
/// ```
/// use coprof::config::{ProfilerConfig, SuspendPoint};
/// use std::time::Duration;
///
/// let config = ProfilerConfig::new()
///     .with_percentage_mode(true)
///     .with_attach_duration(Duration::from_secs(5))
///     .with_suspend_point(SuspendPoint::new("hub", "switch"));
/// assert!(config.percentage_mode);
/// assert!(!config.include_blocking_time);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    /// Count time spent suspended at the scheduler toward elapsed time
    pub include_blocking_time: bool,

    /// Annotate time columns with their share of the session
    pub percentage_mode: bool,

    /// Session length for `attach_default` and signal-armed attaches
    #[serde(rename = "attach_duration_secs", with = "secs_f64")]
    pub attach_duration: Duration,

    /// Scheduler callable treated as a suspension point
    pub suspend_point: Option<SuspendPoint>,

    /// Report rendering format
    pub format: ReportFormat,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            include_blocking_time: false,
            percentage_mode: false,
            attach_duration: DEFAULT_ATTACH_DURATION,
            suspend_point: None,
            format: ReportFormat::Text,
        }
    }
}

impl ProfilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocking_time(mut self, enabled: bool) -> Self {
        self.include_blocking_time = enabled;
        self
    }

    pub fn with_percentage_mode(mut self, enabled: bool) -> Self {
        self.percentage_mode = enabled;
        self
    }

    pub fn with_attach_duration(mut self, duration: Duration) -> Self {
        self.attach_duration = duration;
        self
    }

    pub fn with_suspend_point(mut self, point: SuspendPoint) -> Self {
        self.suspend_point = Some(point);
        self
    }

    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.format = format;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ProfilerError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

mod secs_f64 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProfilerConfig::default();
        assert!(!config.include_blocking_time);
        assert!(!config.percentage_mode);
        assert_eq!(config.attach_duration, Duration::from_secs(60));
        assert!(config.suspend_point.is_none());
        assert_eq!(config.format, ReportFormat::Text);
    }

    #[test]
    fn test_builder_chain() {
        let config = ProfilerConfig::new()
            .with_blocking_time(true)
            .with_format(ReportFormat::Json)
            .with_attach_duration(Duration::from_millis(1500));
        assert!(config.include_blocking_time);
        assert_eq!(config.format, ReportFormat::Json);
        assert_eq!(config.attach_duration, Duration::from_millis(1500));
    }

    #[test]
    fn test_suspend_point_matches_ignoring_location() {
        let point = SuspendPoint::new("hub", "switch");
        assert!(point.matches(&CallSite::new("hub", "switch").with_location("hub.py", 3)));
        assert!(!point.matches(&CallSite::new("hub", "run")));
    }

    #[test]
    fn test_from_toml_full() {
        let config = ProfilerConfig::from_toml_str(
            r#"
            include_blocking_time = true
            percentage_mode = true
            attach_duration_secs = 2.5
            format = "json"

            [suspend_point]
            module = "hub"
            name = "switch"
            "#,
        )
        .unwrap();
        assert!(config.include_blocking_time);
        assert!(config.percentage_mode);
        assert_eq!(config.attach_duration, Duration::from_millis(2500));
        assert_eq!(config.format, ReportFormat::Json);
        assert_eq!(config.suspend_point, Some(SuspendPoint::new("hub", "switch")));
    }

    #[test]
    fn test_from_toml_partial_keeps_defaults() {
        let config = ProfilerConfig::from_toml_str("percentage_mode = true").unwrap();
        assert!(config.percentage_mode);
        assert_eq!(config.attach_duration, DEFAULT_ATTACH_DURATION);
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let err = ProfilerConfig::from_toml_str("sample_rate = 10").unwrap_err();
        assert!(matches!(err, ProfilerError::Config(_)));
    }

    #[test]
    fn test_from_toml_rejects_negative_duration() {
        let err = ProfilerConfig::from_toml_str("attach_duration_secs = -1.0").unwrap_err();
        assert!(matches!(err, ProfilerError::Config(_)));
    }
}
