//! Error types for the MotionMount engine.

use std::io;

/// Errors surfaced by every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    /// The device handle could not be resolved to a reachable peripheral.
    #[error("MotionMount not found: {0}")]
    DeviceNotFound(String),

    /// Any other transport failure, including a link dropped mid-call.
    #[error("BLE connection error: {0}")]
    Connection(String),

    /// The connected peripheral does not expose a required characteristic.
    #[error("Characteristic {uuid} not found")]
    CharacteristicNotFound {
        /// UUID of the missing characteristic.
        uuid: String,
    },

    /// The PIN is missing or wrong.
    #[error("Authentication failed (cooldown: {cooldown}s)")]
    Authentication {
        /// Seconds before the mount accepts another attempt.
        cooldown: u32,
    },

    /// Authenticated, but the current tier lacks this capability.
    #[error("Permission denied for {action}")]
    PermissionDenied {
        /// The refused action.
        action: &'static str,
    },

    /// The write was accepted but the read-back differs.
    #[error("Setting {setting} not persisted (expected {expected}, actual {actual})")]
    SettingNotPersisted {
        /// Name of the setting.
        setting: &'static str,
        /// Value that was written.
        expected: String,
        /// Value the mount reported afterwards.
        actual: String,
    },

    /// A caller-supplied value is out of range.
    #[error("Invalid value: {0}")]
    Validation(String),

    /// A characteristic payload could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] io::Error),

    /// The authentication loop was cancelled between attempts.
    #[error("Authentication cancelled")]
    Cancelled,

    /// The PIN change was applied, but re-reading the mount afterwards failed.
    #[error("PIN changed, but the follow-up refresh failed: {0}")]
    RefreshAfterPinChange(#[source] Box<MountError>),
}

impl MountError {
    /// Errors that retrying cannot fix.
    pub fn is_persistent(&self) -> bool {
        if let Self::RefreshAfterPinChange(inner) = self {
            return inner.is_persistent();
        }
        matches!(
            self,
            Self::Authentication { .. }
                | Self::PermissionDenied { .. }
                | Self::Validation(_)
                | Self::Cancelled
        )
    }
}

impl From<btleplug::Error> for MountError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::DeviceNotFound => Self::DeviceNotFound(err.to_string()),
            other => Self::Connection(other.to_string()),
        }
    }
}
