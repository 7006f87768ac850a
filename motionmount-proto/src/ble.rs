//! BLE GATT Characteristic UUIDs for the MotionMount service
//!
//! Every characteristic sits under the vendor base
//! `c005fa00-0651-4800-b000-000000000000`, differing only in the last
//! octet of the first group.

/// BLE Service UUID: c005fa00-0651-4800-b000-000000000000
pub const SERVICE_UUID: &str = "c005fa00-0651-4800-b000-000000000000";

/// Distance Characteristic UUID (read/write/notify)
pub const DISTANCE_UUID: &str = "c005fa21-0651-4800-b000-000000000000";

/// Rotation Characteristic UUID (read/write/notify)
pub const ROTATION_UUID: &str = "c005fa22-0651-4800-b000-000000000000";

/// Select Preset Characteristic UUID (write)
pub const SELECT_PRESET_UUID: &str = "c005fa23-0651-4800-b000-000000000000";

/// TV Width Characteristic UUID (read/write)
pub const WIDTH_UUID: &str = "c005fa24-0651-4800-b000-000000000000";

/// Device Name Characteristic UUID (read/write)
pub const NAME_UUID: &str = "c005fa25-0651-4800-b000-000000000000";

/// Automove Characteristic UUID (read/write)
pub const AUTOMOVE_UUID: &str = "c005fa26-0651-4800-b000-000000000000";

/// Freeze Preset Characteristic UUID (read/write)
pub const FREEZE_UUID: &str = "c005fa27-0651-4800-b000-000000000000";

/// Calibration Characteristic UUID (write)
pub const CALIBRATE_UUID: &str = "c005fa28-0651-4800-b000-000000000000";

/// Authenticate Characteristic UUID (write)
pub const AUTHENTICATE_UUID: &str = "c005fa29-0651-4800-b000-000000000000";

/// Authentication Status Characteristic UUID (read)
pub const AUTH_STATUS_UUID: &str = "c005fa2a-0651-4800-b000-000000000000";

/// Change PIN Characteristic UUID (write)
pub const CHANGE_PIN_UUID: &str = "c005fa2b-0651-4800-b000-000000000000";

/// PIN Settings Characteristic UUID (read)
pub const PIN_SETTINGS_UUID: &str = "c005fa2c-0651-4800-b000-000000000000";

/// Multi-PIN Features Characteristic UUID (read/write)
pub const MULTI_PIN_FEATURES_UUID: &str = "c005fa2d-0651-4800-b000-000000000000";

/// CEB Versions Characteristic UUID (read)
pub const VERSIONS_CEB_UUID: &str = "c005fa2e-0651-4800-b000-000000000000";

/// MCP Versions Characteristic UUID (read)
pub const VERSIONS_MCP_UUID: &str = "c005fa2f-0651-4800-b000-000000000000";

/// Preset head characteristics, one per user slot (read/write)
///
/// Carries the occupied flag, distance, rotation and the name prefix.
pub const PRESET_UUIDS: [&str; 7] = [
    "c005fa30-0651-4800-b000-000000000000",
    "c005fa31-0651-4800-b000-000000000000",
    "c005fa32-0651-4800-b000-000000000000",
    "c005fa33-0651-4800-b000-000000000000",
    "c005fa34-0651-4800-b000-000000000000",
    "c005fa35-0651-4800-b000-000000000000",
    "c005fa36-0651-4800-b000-000000000000",
];

/// Preset tail characteristics, one per user slot (read/write)
///
/// Carries the remainder of the preset name.
pub const PRESET_NAME_UUIDS: [&str; 7] = [
    "c005fa40-0651-4800-b000-000000000000",
    "c005fa41-0651-4800-b000-000000000000",
    "c005fa42-0651-4800-b000-000000000000",
    "c005fa43-0651-4800-b000-000000000000",
    "c005fa44-0651-4800-b000-000000000000",
    "c005fa45-0651-4800-b000-000000000000",
    "c005fa46-0651-4800-b000-000000000000",
];

/// Single-byte command payloads
pub mod commands {
    /// Start the calibration run
    pub const START_CALIBRATION: u8 = 0x01;

    /// Select / freeze target for the built-in default position
    pub const DEFAULT_POSITION: u8 = 0x00;
}
