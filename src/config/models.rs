use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::EngineOptions;
use crate::pattern::SearchSettings;

/// Root configuration for aimacro.
///
/// Deserialized from a JSON file. Every field has a default, so `{}` is a
/// valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate, Default, PartialEq)]
pub struct Config {
    /// Log at `debug` instead of `info` unless `RUST_LOG` or `--log-level` says otherwise.
    #[serde(default)]
    pub verbose: bool,

    /// Engine tunables.
    #[serde(default)]
    #[validate]
    pub engine: EngineSettings,

    /// Notification presets, merged with (and overridden by) the ones stored
    /// in the macro document.
    #[serde(default)]
    pub notifications: NotificationMap,
}

/// Notification name -> preset.
pub type NotificationMap = BTreeMap<String, NotificationPreset>;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Repeat count used when the command line gives none.
    #[validate(minimum = 1)]
    pub default_repeat: u32,

    /// Pause between finding a pattern and clicking it, in milliseconds.
    pub click_settle_ms: u64,

    /// Sleep between two unsuccessful pattern search attempts, in milliseconds.
    #[validate(minimum = 1)]
    pub retry_interval_ms: u64,

    /// Minimum `[width, height]` of an image sent to a vision backend.
    pub vision_min_size: [u32; 2],

    /// Threshold used when a pattern event's own threshold lies outside `0..=1`.
    #[validate(minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub default_threshold: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_repeat: 1,
            click_settle_ms: 500,
            retry_interval_ms: 1000,
            vision_min_size: [50, 50],
            default_threshold: 0.7,
        }
    }
}

impl EngineSettings {
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            search: SearchSettings {
                retry_interval: Duration::from_millis(self.retry_interval_ms),
                click_settle: Duration::from_millis(self.click_settle_ms),
            },
            vision_min_size: (self.vision_min_size[0], self.vision_min_size[1]),
            default_threshold: self.default_threshold,
        }
    }
}

/// A push notification the macro can fire by name.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NotificationPreset {
    pub message: String,

    /// Push priority, `-2..=2`: 0 is normal, 2 is emergency.
    #[serde(default)]
    pub priority: i64,

    /// Push service credentials, kept so documents round-trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl NotificationPreset {
    pub fn new(message: impl Into<String>, priority: i64) -> Self {
        Self {
            message: message.into(),
            priority,
            token: None,
            user: None,
        }
    }
}
