//! Host-facing contract of the shared-texture bridge.
//!
//! Everything the compositing host hands to the bridge lives here: the
//! settings schema and its typed views, raw video frames from the output
//! path, and the logging bootstrap.

pub mod frame;
pub mod keys;
pub mod logging;
pub mod settings;

pub use frame::{RawFrame, VideoFormat};
pub use settings::{
    CompositeMode, FilterSettings, OutputSettings, PollTier, ReceiverSettings, SettingValue,
    SettingsData,
};
