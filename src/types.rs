use crate::error::{QscError, Result};
use serde::{Deserialize, Serialize};

/// Suffix that addresses the gain (dB) control of a block
pub const GAIN_SUFFIX: &str = "Gain";

/// Suffix that addresses the mute control of a block
pub const MUTE_SUFFIX: &str = "Mute";

/// Value written for a volume of 0%, where the logarithmic conversion is undefined
pub const ZERO_VOLUME_DB: f64 = -100.0;

/// Mute control value meaning muted
pub const MUTED: f64 = 1.0;

/// Mute control value meaning unmuted
pub const UNMUTED: f64 = 0.0;

/// One result record of a `Control.Get` or `Control.Set` response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ControlValue {
    pub name: String,

    /// Numeric value of the control (dB for gains, 0/1 for mutes)
    pub value: f64,

    /// Value as formatted by the core, e.g. "-6.0dB"
    #[serde(default)]
    pub string: String,

    /// Normalized 0..1 position of the control
    #[serde(default)]
    pub position: f64,
}

/// Result of the `StatusGet` method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatusRecord {
    /// Hardware platform, e.g. "Core 110f"
    pub platform: String,

    /// Engine state, e.g. "Active", "Standby", "Idle"
    pub state: String,

    pub design_name: String,
    pub design_code: String,
    pub is_redundant: bool,
    pub is_emulator: bool,
    pub status: CoreStatus,
}

/// Overall health reported inside a [`StatusRecord`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CoreStatus {
    /// 0 means OK, anything else is a fault or warning
    pub code: i64,
    pub string: String,
}

/// Identity and state of a core, assembled by [`QscClient::info`](crate::QscClient::info)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    /// Reverse DNS name of the core, or its IP address when the lookup fails
    pub hostname: String,
    pub model_name: String,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    pub state: String,
    pub status_code: i64,
    pub status: String,

    /// The full `StatusGet` response envelope as received
    pub raw_state: String,
}

/// Name of the gain control for a block, e.g. `Main` -> `MainGain`
pub fn gain_control(block: &str) -> String {
    format!("{}{}", block, GAIN_SUFFIX)
}

/// Name of the mute control for a block, e.g. `Main` -> `MainMute`
pub fn mute_control(block: &str) -> String {
    format!("{}{}", block, MUTE_SUFFIX)
}

/// Convert a volume percentage to a gain in dB.
///
/// Only meaningful for `percent > 0`; callers send [`ZERO_VOLUME_DB`] for zero.
pub fn percent_to_db(percent: u32) -> f64 {
    20.0 * (f64::from(percent) / 100.0).log10()
}

/// Convert a gain in dB to a volume percentage, truncating toward zero.
pub fn db_to_percent(db: f64) -> u32 {
    (10f64.powf(db / 20.0) * 100.0) as u32
}

/// Interpret the value of a mute control.
pub fn mute_from_value(name: &str, value: f64) -> Result<bool> {
    if value == MUTED {
        Ok(true)
    } else if value == UNMUTED {
        Ok(false)
    } else {
        Err(QscError::InvalidMute {
            name: name.to_string(),
            value,
        })
    }
}

pub(crate) fn mute_to_value(mute: bool) -> f64 {
    if mute {
        MUTED
    } else {
        UNMUTED
    }
}
