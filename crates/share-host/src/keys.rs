//! Setting keys and defaults.
//!
//! Keys match what the host has persisted for existing scenes, so they must
//! not be renamed.

// =====================================================================
// Receiver (source)
// =====================================================================

/// Selected sender name, or [`USE_FIRST_AVAILABLE`].
pub const SENDER_LIST: &str = "spoutsenders";
/// Poll interval tier in milliseconds.
pub const TICK_SPEED_LIMIT: &str = "tickspeedlimit";
pub const COMPOSITE_MODE: &str = "compositemode";

/// Selection sentinel meaning "whichever sender is listed first".
pub const USE_FIRST_AVAILABLE: &str = "usefirstavailablesender";
pub const USE_FIRST_AVAILABLE_LABEL: &str = "Use first available sender";

// =====================================================================
// Sender (output and filter)
// =====================================================================

pub const OUTPUT_SENDER_NAME: &str = "senderName";
pub const FILTER_SENDER_NAME: &str = "spout_filter_name";

/// Persisted output configuration.
pub const AUTO_START: &str = "auto_start";
pub const OUTPUT_NAME: &str = "spout_output_name";

// =====================================================================
// Defaults
// =====================================================================

pub const DEFAULT_OUTPUT_NAME: &str = "OBS_Spout";
pub const DEFAULT_FILTER_NAME: &str = "OBS Spout Filter";

/// Size a receiver reports before it has resolved a sender.
pub const DEFAULT_SOURCE_WIDTH: u32 = 100;
pub const DEFAULT_SOURCE_HEIGHT: u32 = 100;
