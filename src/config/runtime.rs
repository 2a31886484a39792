//! Hot-swappable request-logging settings.
//!
//! # Responsibilities
//! - Hand the request path a consistent point-in-time [`LogSettings`] snapshot
//! - Replace the snapshot as a unit on admin updates, resets and file reloads
//!
//! # Design Decisions
//! - Readers load an `Arc` from an [`ArcSwap`]; they never take a lock and
//!   never see a half-applied update
//! - Writers serialise on a mutex so two concurrent partial updates compose
//!   instead of overwriting each other
//! - Writers that must do async work between reading and replacing the
//!   snapshot use [`RuntimeConfig::apply_if_current`] and retry on conflict
//! - `buffer_size` is only read when a sink is built; changing it at runtime
//!   affects the next sink, not the live one

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::config::validation::ValidationError;
use crate::sink::entry::{is_valid_time_format, CustomFields, DEFAULT_TIME_FORMAT};

pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Request-logging settings. One snapshot governs one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub enabled: bool,

    /// Paths that are never logged. Matched exactly.
    pub skip_paths: Vec<String>,

    /// Template fields copied into every entry.
    pub custom_fields: CustomFields,

    /// chrono strftime layout for `LogEntry::timestamp`.
    pub time_format: String,

    pub async_mode: bool,

    pub buffer_size: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_paths: vec![
                "/health".to_string(),
                "/metrics".to_string(),
                "/.well-known/appspecific/com.chrome.devtools.json".to_string(),
            ],
            custom_fields: CustomFields::new(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            async_mode: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl LogSettings {
    /// Fill in defaults for empty values and reject unusable ones.
    pub fn normalized(mut self) -> Result<Self, ValidationError> {
        if self.time_format.trim().is_empty() {
            self.time_format = DEFAULT_TIME_FORMAT.to_string();
        } else if !is_valid_time_format(&self.time_format) {
            return Err(ValidationError::InvalidTimeFormat(self.time_format));
        }
        if self.buffer_size == 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        Ok(self)
    }

    pub fn should_skip(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|skip| skip == path)
    }
}

/// Partial update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<CustomFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<String>,
    #[serde(alias = "async", skip_serializing_if = "Option::is_none")]
    pub async_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
}

impl SettingsPatch {
    pub fn apply_to(&self, base: &LogSettings) -> LogSettings {
        let mut next = base.clone();
        if let Some(enabled) = self.enabled {
            next.enabled = enabled;
        }
        if let Some(paths) = &self.skip_paths {
            next.skip_paths = paths.clone();
        }
        if let Some(fields) = &self.custom_fields {
            next.custom_fields = fields.clone();
        }
        if let Some(format) = &self.time_format {
            next.time_format = format.clone();
        }
        if let Some(async_mode) = self.async_mode {
            next.async_mode = async_mode;
        }
        if let Some(size) = self.buffer_size {
            next.buffer_size = size;
        }
        next
    }
}

/// Process-wide logging settings shared by the request path and admin writers.
pub struct RuntimeConfig {
    current: ArcSwap<LogSettings>,
    writer: Mutex<()>,
}

impl RuntimeConfig {
    pub fn new(settings: LogSettings) -> Result<Self, ValidationError> {
        Ok(Self {
            current: ArcSwap::from_pointee(settings.normalized()?),
            writer: Mutex::new(()),
        })
    }

    /// Current settings. Never blocks and never fails.
    pub fn snapshot(&self) -> Arc<LogSettings> {
        self.current.load_full()
    }

    /// Replace every setting at once.
    pub fn apply(&self, settings: LogSettings) -> Result<Arc<LogSettings>, ValidationError> {
        let next = Arc::new(settings.normalized()?);
        let _guard = self.lock_writer();
        self.current.store(Arc::clone(&next));
        tracing::info!(
            enabled = next.enabled,
            async_mode = next.async_mode,
            skip_paths = next.skip_paths.len(),
            "logging settings applied"
        );
        Ok(next)
    }

    /// Apply a partial update on top of the latest settings.
    pub fn update(&self, patch: &SettingsPatch) -> Result<Arc<LogSettings>, ValidationError> {
        let _guard = self.lock_writer();
        let next = Arc::new(patch.apply_to(&self.current.load()).normalized()?);
        self.current.store(Arc::clone(&next));
        tracing::info!(patch = ?patch, "logging settings updated");
        Ok(next)
    }

    /// Install `settings` only if the live snapshot is still `base`.
    ///
    /// Returns `None` when another writer replaced the snapshot after `base`
    /// was taken; the caller recomputes from a fresh snapshot.
    pub fn apply_if_current(
        &self,
        base: &Arc<LogSettings>,
        settings: LogSettings,
    ) -> Result<Option<Arc<LogSettings>>, ValidationError> {
        let next = Arc::new(settings.normalized()?);
        let _guard = self.lock_writer();
        if !Arc::ptr_eq(&self.current.load(), base) {
            return Ok(None);
        }
        self.current.store(Arc::clone(&next));
        tracing::info!(
            enabled = next.enabled,
            async_mode = next.async_mode,
            skip_paths = next.skip_paths.len(),
            "logging settings applied"
        );
        Ok(Some(next))
    }

    pub fn reset(&self) -> Arc<LogSettings> {
        let next = Arc::new(LogSettings::default());
        let _guard = self.lock_writer();
        self.current.store(Arc::clone(&next));
        tracing::info!("logging settings reset to defaults");
        next
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(LogSettings::default()),
            writer: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn apply_if_current_refuses_a_stale_base() {
        let runtime = RuntimeConfig::default();
        let base = runtime.snapshot();

        runtime
            .update(&SettingsPatch {
                skip_paths: Some(vec!["/reloaded".to_string()]),
                ..SettingsPatch::default()
            })
            .unwrap();

        let stale = LogSettings {
            enabled: false,
            ..(*base).clone()
        };
        assert!(runtime.apply_if_current(&base, stale).unwrap().is_none());
        assert!(runtime.snapshot().enabled);
        assert_eq!(runtime.snapshot().skip_paths, vec!["/reloaded"]);

        let fresh = runtime.snapshot();
        let next = LogSettings {
            enabled: false,
            ..(*fresh).clone()
        };
        let applied = runtime.apply_if_current(&fresh, next).unwrap().unwrap();
        assert!(!applied.enabled);
        assert_eq!(applied.skip_paths, vec!["/reloaded"]);
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = LogSettings::default();
        assert!(settings.enabled);
        assert!(settings.async_mode);
        assert_eq!(settings.buffer_size, 1000);
        assert_eq!(settings.time_format, DEFAULT_TIME_FORMAT);
        assert!(settings.should_skip("/health"));
        assert!(!settings.should_skip("/health/live"));
    }

    #[test]
    fn normalisation_fills_defaults() {
        let settings = LogSettings {
            time_format: "  ".into(),
            buffer_size: 0,
            ..LogSettings::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(settings.time_format, DEFAULT_TIME_FORMAT);
        assert_eq!(settings.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn invalid_time_format_is_rejected_without_change() {
        let runtime = RuntimeConfig::default();
        let patch = SettingsPatch {
            enabled: Some(false),
            time_format: Some("%Q".into()),
            ..SettingsPatch::default()
        };
        assert!(runtime.update(&patch).is_err());
        assert!(runtime.snapshot().enabled);
    }

    #[test]
    fn snapshot_is_isolated_from_later_updates() {
        let runtime = RuntimeConfig::default();
        let before = runtime.snapshot();
        runtime
            .update(&SettingsPatch {
                enabled: Some(false),
                ..SettingsPatch::default()
            })
            .unwrap();
        assert!(before.enabled);
        assert!(!runtime.snapshot().enabled);
    }

    #[test]
    fn patch_accepts_async_alias() {
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"async": false, "buffer_size": 50}"#).unwrap();
        assert_eq!(patch.async_mode, Some(false));
        assert_eq!(patch.buffer_size, Some(50));
        assert_eq!(patch.enabled, None);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut custom = CustomFields::new();
        custom.insert("env".into(), Value::from("prod"));
        let runtime = RuntimeConfig::new(LogSettings {
            custom_fields: custom,
            skip_paths: Vec::new(),
            ..LogSettings::default()
        })
        .unwrap();
        assert_eq!(*runtime.reset(), LogSettings::default());
        assert_eq!(*runtime.snapshot(), LogSettings::default());
    }

    #[test]
    fn concurrent_patches_all_land() {
        let runtime = Arc::new(RuntimeConfig::default());
        let patches = [
            SettingsPatch {
                enabled: Some(false),
                ..SettingsPatch::default()
            },
            SettingsPatch {
                async_mode: Some(false),
                ..SettingsPatch::default()
            },
            SettingsPatch {
                buffer_size: Some(42),
                ..SettingsPatch::default()
            },
            SettingsPatch {
                skip_paths: Some(vec!["/ping".into()]),
                ..SettingsPatch::default()
            },
        ];

        let handles: Vec<_> = patches
            .into_iter()
            .map(|patch| {
                let runtime = Arc::clone(&runtime);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        runtime.update(&patch).unwrap();
                        assert!(!runtime.snapshot().time_format.is_empty());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let settings = runtime.snapshot();
        assert!(!settings.enabled);
        assert!(!settings.async_mode);
        assert_eq!(settings.buffer_size, 42);
        assert_eq!(settings.skip_paths, vec!["/ping"]);
    }
}
