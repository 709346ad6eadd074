//! Typed views over the host's key/value settings.

use std::collections::BTreeMap;
use std::time::Duration;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use tracing::warn;

use crate::keys;

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    String(String),
    Int(i64),
    Bool(bool),
}

/// The host's settings object for one source, output or filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsData {
    values: BTreeMap<String, SettingValue>,
}

impl SettingsData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.values
            .insert(key.to_owned(), SettingValue::String(value.into()));
        self
    }

    pub fn set_int(&mut self, key: &str, value: i64) -> &mut Self {
        self.values.insert(key.to_owned(), SettingValue::Int(value));
        self
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.values.insert(key.to_owned(), SettingValue::Bool(value));
        self
    }

    /// Set `key` only if the host has no value for it yet.
    pub fn set_default(&mut self, key: &str, value: SettingValue) -> &mut Self {
        self.values.entry(key.to_owned()).or_insert(value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(SettingValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(SettingValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(SettingValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

// =====================================================================
// Enumerated settings
// =====================================================================

/// How often an unresolved receiver may query the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive)]
pub enum PollTier {
    Crazy = 1,
    #[default]
    Fast = 100,
    Normal = 500,
    Slow = 1000,
}

impl PollTier {
    pub fn from_setting(value: i64) -> Self {
        Self::from_i64(value).unwrap_or_else(|| {
            warn!(value, "unknown poll interval, using {:?}", Self::default());
            Self::default()
        })
    }

    pub fn millis(self) -> u64 {
        self as u64
    }

    pub fn interval(self) -> Duration {
        Duration::from_millis(self.millis())
    }
}

/// How a received texture is composited over what is beneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive)]
pub enum CompositeMode {
    /// Blending disabled; the texture's alpha is ignored.
    #[default]
    Opaque = 1,
    PremultipliedAlpha = 2,
    /// Whatever blend state the host has set.
    Default = 3,
}

impl CompositeMode {
    pub fn from_setting(value: i64) -> Self {
        Self::from_i64(value).unwrap_or_else(|| {
            warn!(value, "unknown composite mode, using {:?}", Self::default());
            Self::default()
        })
    }
}

// =====================================================================
// Per-surface settings
// =====================================================================

fn name_or_default(settings: &SettingsData, key: &str, default: &str) -> String {
    match settings.get_string(key) {
        Some(name) if !name.is_empty() => name.to_owned(),
        Some(_) => {
            warn!(key, "empty sender name, using {default:?}");
            default.to_owned()
        }
        None => default.to_owned(),
    }
}

/// Receiver (source) settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverSettings {
    /// `None` selects the first available sender.
    pub sender: Option<String>,
    pub poll: PollTier,
    pub composite: CompositeMode,
}

impl ReceiverSettings {
    pub fn from_settings(settings: &SettingsData) -> Self {
        let sender = match settings.get_string(keys::SENDER_LIST) {
            None | Some("") | Some(keys::USE_FIRST_AVAILABLE) => None,
            Some(name) => Some(name.to_owned()),
        };
        Self {
            sender,
            poll: settings
                .get_int(keys::TICK_SPEED_LIMIT)
                .map(PollTier::from_setting)
                .unwrap_or_default(),
            composite: settings
                .get_int(keys::COMPOSITE_MODE)
                .map(CompositeMode::from_setting)
                .unwrap_or_default(),
        }
    }

    pub fn write_defaults(settings: &mut SettingsData) {
        settings
            .set_default(
                keys::SENDER_LIST,
                SettingValue::String(keys::USE_FIRST_AVAILABLE.into()),
            )
            .set_default(
                keys::TICK_SPEED_LIMIT,
                SettingValue::Int(PollTier::default().millis() as i64),
            )
            .set_default(
                keys::COMPOSITE_MODE,
                SettingValue::Int(CompositeMode::default() as i64),
            );
    }
}

/// Output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    pub sender_name: String,
    pub auto_start: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            sender_name: keys::DEFAULT_OUTPUT_NAME.to_owned(),
            auto_start: false,
        }
    }
}

impl OutputSettings {
    /// `senderName` wins over the persisted `spout_output_name`.
    pub fn from_settings(settings: &SettingsData) -> Self {
        let persisted = name_or_default(settings, keys::OUTPUT_NAME, keys::DEFAULT_OUTPUT_NAME);
        Self {
            sender_name: name_or_default(settings, keys::OUTPUT_SENDER_NAME, &persisted),
            auto_start: settings.get_bool(keys::AUTO_START).unwrap_or(false),
        }
    }

    pub fn write_defaults(settings: &mut SettingsData) {
        settings
            .set_default(
                keys::OUTPUT_SENDER_NAME,
                SettingValue::String(keys::DEFAULT_OUTPUT_NAME.into()),
            )
            .set_default(keys::AUTO_START, SettingValue::Bool(false));
    }

    /// Persist the configuration the way the host stores it between runs.
    pub fn save(&self, settings: &mut SettingsData) {
        settings
            .set_string(keys::OUTPUT_NAME, self.sender_name.clone())
            .set_bool(keys::AUTO_START, self.auto_start);
    }
}

/// Filter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSettings {
    pub sender_name: String,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            sender_name: keys::DEFAULT_FILTER_NAME.to_owned(),
        }
    }
}

impl FilterSettings {
    pub fn from_settings(settings: &SettingsData) -> Self {
        Self {
            sender_name: name_or_default(
                settings,
                keys::FILTER_SENDER_NAME,
                keys::DEFAULT_FILTER_NAME,
            ),
        }
    }

    pub fn write_defaults(settings: &mut SettingsData) {
        settings.set_default(
            keys::FILTER_SENDER_NAME,
            SettingValue::String(keys::DEFAULT_FILTER_NAME.into()),
        );
    }
}
