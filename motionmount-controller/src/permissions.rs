//! Permission resolution from authentication level and feature bitmask.

use motionmount_proto::{Feature, MultiPinFeatures};
use serde::{Deserialize, Serialize};

/// Authentication level of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// No PIN configured (or not yet authenticated).
    #[default]
    Missing,
    /// The PIN was rejected; see the cooldown.
    Wrong,
    /// Authorized-user access: movement and preset selection.
    Control,
    /// Supervisor access: everything.
    Full,
}

impl AuthType {
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Control | Self::Full)
    }
}

/// Whether an action moves the mount or changes its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// Movement and preset selection.
    Control,
    /// Configuration writes.
    Settings,
}

/// Capabilities of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub auth_type: AuthType,
    /// Meaningful only when `auth_type` is `Wrong`.
    pub cooldown_seconds: u32,
    /// Full-only settings.
    pub change_settings: bool,
    pub change_presets: bool,
    pub change_name: bool,
    pub disable_channel: bool,
    pub change_tv_on_off_detection: bool,
    pub change_default_position: bool,
    pub start_calibration: bool,
}

impl Permissions {
    /// Combine an authentication level with the feature bitmask.
    ///
    /// The bitmask only matters for `Control`; pass whatever was last read.
    pub fn resolve(auth_type: AuthType, cooldown_seconds: u32, features: MultiPinFeatures) -> Self {
        let granted = match auth_type {
            AuthType::Full => MultiPinFeatures::ALL,
            AuthType::Control => features,
            AuthType::Missing | AuthType::Wrong => MultiPinFeatures::default(),
        };
        Self {
            auth_type,
            cooldown_seconds: if auth_type == AuthType::Wrong { cooldown_seconds } else { 0 },
            change_settings: auth_type == AuthType::Full,
            change_presets: granted.change_presets,
            change_name: granted.change_name,
            disable_channel: granted.disable_channel,
            change_tv_on_off_detection: granted.change_tv_on_off_detection,
            change_default_position: granted.change_default_position,
            start_calibration: granted.start_calibration,
        }
    }

    pub fn features(&self) -> MultiPinFeatures {
        MultiPinFeatures {
            change_presets: self.change_presets,
            change_name: self.change_name,
            disable_channel: self.disable_channel,
            change_tv_on_off_detection: self.change_tv_on_off_detection,
            change_default_position: self.change_default_position,
            start_calibration: self.start_calibration,
        }
    }

    /// Whether an action is allowed.
    ///
    /// A settings action with no `feature` can only be unlocked by the
    /// supervisor tier.
    pub fn allows(&self, class: ActionClass, feature: Option<Feature>) -> bool {
        match self.auth_type {
            AuthType::Full => true,
            AuthType::Control => match class {
                ActionClass::Control => true,
                ActionClass::Settings => feature.is_some_and(|f| self.features().allows(f)),
            },
            AuthType::Missing | AuthType::Wrong => false,
        }
    }
}
