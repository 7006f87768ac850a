//! MotionMount wire protocol - characteristic layouts and codec
//!
//! Pure encode/decode functions for every characteristic the mount exposes.
//! Multi-byte integers are big-endian except the PIN, which is little-endian.
//! Nothing in here performs I/O or holds state.

pub mod ble;

use std::fmt;
use std::io;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// Value ranges
pub const MAX_DISTANCE: u16 = 100;
pub const MIN_ROTATION: i16 = -100;
pub const MAX_ROTATION: i16 = 100;
pub const MIN_WIDTH: u8 = 1;
pub const MAX_WIDTH: u8 = 243;

// Field widths
pub const NAME_LEN: usize = 20;
pub const PRESET_COUNT: usize = 7;
pub const PRESET_HEAD_LEN: usize = 20;
pub const PRESET_TAIL_LEN: usize = 17;
/// Occupied flag + distance + rotation
const PRESET_POSITION_LEN: usize = 5;
pub const PRESET_HEAD_NAME_LEN: usize = PRESET_HEAD_LEN - PRESET_POSITION_LEN;
pub const PRESET_NAME_MAX: usize = PRESET_HEAD_NAME_LEN + PRESET_TAIL_LEN;

const PRESET_OCCUPIED: u8 = 0x01;

// Authentication status
pub const AUTH_GRANTED: u8 = 0x80;
pub const SUPERVISOR_PIN_OFFSET: u8 = 0x40;

// Automove device codes, indexed by HDMI channel
pub const AUTOMOVE_ON_CODES: [u16; 5] = [0, 4, 8, 12, 16];
pub const AUTOMOVE_OFF_CODES: [u16; 5] = [1, 5, 9, 13, 17];

// PIN settings raw values
pub const PIN_DEACTIVATED: u8 = 12;
pub const PIN_SINGLE: u8 = 13;
pub const PIN_MULTI: u8 = 15;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn require(data: &[u8], len: usize, what: &str) -> io::Result<()> {
    if data.len() < len {
        return Err(invalid_data(format!(
            "{what} too short: expected {len} bytes, got {}",
            data.len()
        )));
    }
    Ok(())
}

/// Strip NUL padding and decode as UTF-8, replacing invalid sequences
fn decode_text(data: &[u8]) -> String {
    let end = data.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&data[..end]).into_owned()
}

// =============================================================================
// Position
// =============================================================================

pub fn encode_distance(distance: u16) -> [u8; 2] {
    distance.to_be_bytes()
}

pub fn decode_distance(data: &[u8]) -> io::Result<u16> {
    require(data, 2, "distance")?;
    Ok(u16::from_be_bytes([data[0], data[1]]))
}

pub fn encode_rotation(rotation: i16) -> [u8; 2] {
    rotation.to_be_bytes()
}

pub fn decode_rotation(data: &[u8]) -> io::Result<i16> {
    require(data, 2, "rotation")?;
    Ok(i16::from_be_bytes([data[0], data[1]]))
}

// =============================================================================
// Single-byte settings
// =============================================================================

pub fn encode_width(width: u8) -> [u8; 1] {
    [width]
}

pub fn decode_width(data: &[u8]) -> io::Result<u8> {
    require(data, 1, "width")?;
    Ok(data[0])
}

/// Target of a select-preset or freeze-preset write
///
/// On the wire the built-in default position is `0` and user slot `n`
/// is `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PresetTarget {
    #[default]
    Default,
    Slot(u8),
}

impl PresetTarget {
    /// Slots past the last preset are rejected rather than wrapped.
    pub fn to_byte(self) -> io::Result<u8> {
        match self {
            Self::Default => Ok(ble::commands::DEFAULT_POSITION),
            Self::Slot(index) if usize::from(index) < PRESET_COUNT => Ok(index + 1),
            Self::Slot(index) => Err(invalid_data(format!("preset slot {index} out of range"))),
        }
    }

    pub fn from_byte(byte: u8) -> io::Result<Self> {
        match byte {
            0 => Ok(Self::Default),
            b if usize::from(b) <= PRESET_COUNT => Ok(Self::Slot(b - 1)),
            b => Err(invalid_data(format!("preset target {b} out of range"))),
        }
    }
}

impl fmt::Display for PresetTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Slot(index) => write!(f, "slot {index}"),
        }
    }
}

pub fn encode_preset_target(target: PresetTarget) -> io::Result<[u8; 1]> {
    Ok([target.to_byte()?])
}

pub fn decode_preset_target(data: &[u8]) -> io::Result<PresetTarget> {
    require(data, 1, "preset target")?;
    PresetTarget::from_byte(data[0])
}

// =============================================================================
// Name
// =============================================================================

/// Encode the device name into its fixed NUL-padded field
pub fn encode_name(name: &str) -> io::Result<[u8; NAME_LEN]> {
    let bytes = name.as_bytes();
    if bytes.len() > NAME_LEN {
        return Err(invalid_data(format!(
            "name is {} bytes, field holds {NAME_LEN}",
            bytes.len()
        )));
    }
    let mut buf = [0u8; NAME_LEN];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

pub fn decode_name(data: &[u8]) -> String {
    decode_text(data)
}

// =============================================================================
// Presets
// =============================================================================

/// Position memory stored in an occupied preset slot
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PresetData {
    pub name: String,
    pub distance: u16,
    pub rotation: i16,
}

/// Encode a preset into its head and tail characteristics
///
/// `None` produces the all-zero payloads that clear a slot. The name is
/// split after [`PRESET_HEAD_NAME_LEN`] bytes; the same split is used by
/// [`decode_preset`].
pub fn encode_preset(
    data: Option<&PresetData>,
) -> io::Result<([u8; PRESET_HEAD_LEN], [u8; PRESET_TAIL_LEN])> {
    let mut head = [0u8; PRESET_HEAD_LEN];
    let mut tail = [0u8; PRESET_TAIL_LEN];

    let Some(data) = data else {
        return Ok((head, tail));
    };

    let name = data.name.as_bytes();
    if name.len() > PRESET_NAME_MAX {
        return Err(invalid_data(format!(
            "preset name is {} bytes, slot holds {PRESET_NAME_MAX}",
            name.len()
        )));
    }

    head[0] = PRESET_OCCUPIED;
    head[1..3].copy_from_slice(&data.distance.to_be_bytes());
    head[3..5].copy_from_slice(&data.rotation.to_be_bytes());

    let split = name.len().min(PRESET_HEAD_NAME_LEN);
    head[PRESET_POSITION_LEN..PRESET_POSITION_LEN + split].copy_from_slice(&name[..split]);
    tail[..name.len() - split].copy_from_slice(&name[split..]);

    Ok((head, tail))
}

/// Decode a preset from its head and tail characteristics
///
/// An occupied byte of zero means the slot is empty whatever the other
/// bytes hold. Distance and rotation are clamped to their valid ranges.
pub fn decode_preset(head: &[u8], tail: &[u8]) -> io::Result<Option<PresetData>> {
    require(head, 1, "preset")?;
    if head[0] == 0 {
        return Ok(None);
    }
    require(head, PRESET_POSITION_LEN, "preset")?;

    let distance = u16::from_be_bytes([head[1], head[2]]).min(MAX_DISTANCE);
    let rotation = i16::from_be_bytes([head[3], head[4]]).clamp(MIN_ROTATION, MAX_ROTATION);

    // A multi-byte character may straddle the split, so join before decoding
    let mut name = Vec::with_capacity(PRESET_NAME_MAX);
    name.extend_from_slice(&head[PRESET_POSITION_LEN..]);
    name.extend_from_slice(tail);

    Ok(Some(PresetData {
        name: decode_text(&name),
        distance,
        rotation,
    }))
}

// =============================================================================
// Multi-PIN features
// =============================================================================

/// A settings capability the supervisor can grant to the authorized user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Feature {
    ChangePresets,
    ChangeName,
    DisableChannel,
    ChangeTvOnOffDetection,
    ChangeDefaultPosition,
    StartCalibration,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::ChangePresets,
        Feature::ChangeName,
        Feature::DisableChannel,
        Feature::ChangeTvOnOffDetection,
        Feature::ChangeDefaultPosition,
        Feature::StartCalibration,
    ];

    /// Bit in the multi-PIN feature byte; bits 5 and 6 are unused
    pub fn bit(self) -> u8 {
        match self {
            Self::ChangePresets => 1 << 0,
            Self::ChangeName => 1 << 1,
            Self::DisableChannel => 1 << 2,
            Self::ChangeTvOnOffDetection => 1 << 3,
            Self::ChangeDefaultPosition => 1 << 4,
            Self::StartCalibration => 1 << 7,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChangePresets => "change_presets",
            Self::ChangeName => "change_name",
            Self::DisableChannel => "disable_channel",
            Self::ChangeTvOnOffDetection => "change_tv_on_off_detection",
            Self::ChangeDefaultPosition => "change_default_position",
            Self::StartCalibration => "start_calibration",
        };
        f.write_str(name)
    }
}

/// Features granted to the authorized-user tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MultiPinFeatures {
    pub change_presets: bool,
    pub change_name: bool,
    pub disable_channel: bool,
    pub change_tv_on_off_detection: bool,
    pub change_default_position: bool,
    pub start_calibration: bool,
}

impl MultiPinFeatures {
    pub const ALL: Self = Self {
        change_presets: true,
        change_name: true,
        disable_channel: true,
        change_tv_on_off_detection: true,
        change_default_position: true,
        start_calibration: true,
    };

    pub fn from_byte(byte: u8) -> Self {
        let has = |feature: Feature| byte & feature.bit() != 0;
        Self {
            change_presets: has(Feature::ChangePresets),
            change_name: has(Feature::ChangeName),
            disable_channel: has(Feature::DisableChannel),
            change_tv_on_off_detection: has(Feature::ChangeTvOnOffDetection),
            change_default_position: has(Feature::ChangeDefaultPosition),
            start_calibration: has(Feature::StartCalibration),
        }
    }

    pub fn to_byte(self) -> u8 {
        Feature::ALL
            .iter()
            .filter(|feature| self.allows(**feature))
            .fold(0, |acc, feature| acc | feature.bit())
    }

    pub fn allows(self, feature: Feature) -> bool {
        match feature {
            Feature::ChangePresets => self.change_presets,
            Feature::ChangeName => self.change_name,
            Feature::DisableChannel => self.disable_channel,
            Feature::ChangeTvOnOffDetection => self.change_tv_on_off_detection,
            Feature::ChangeDefaultPosition => self.change_default_position,
            Feature::StartCalibration => self.start_calibration,
        }
    }
}

pub fn encode_multi_pin_features(features: MultiPinFeatures) -> [u8; 1] {
    [features.to_byte()]
}

pub fn decode_multi_pin_features(data: &[u8]) -> io::Result<MultiPinFeatures> {
    require(data, 1, "multi-pin features")?;
    Ok(MultiPinFeatures::from_byte(data[0]))
}

// =============================================================================
// Automove
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HdmiChannel {
    Hdmi1,
    Hdmi2,
    Hdmi3,
    Hdmi4,
    Hdmi5,
}

impl HdmiChannel {
    pub const ALL: [HdmiChannel; 5] = [
        HdmiChannel::Hdmi1,
        HdmiChannel::Hdmi2,
        HdmiChannel::Hdmi3,
        HdmiChannel::Hdmi4,
        HdmiChannel::Hdmi5,
    ];

    /// Zero-based index into the automove code tables
    pub fn index(self) -> usize {
        match self {
            Self::Hdmi1 => 0,
            Self::Hdmi2 => 1,
            Self::Hdmi3 => 2,
            Self::Hdmi4 => 3,
            Self::Hdmi5 => 4,
        }
    }

    /// Channel from its one-based number as printed on the TV
    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.get(usize::from(number).checked_sub(1)?).copied()
    }

    pub fn number(self) -> u8 {
        // index() is at most 4
        self.index() as u8 + 1
    }
}

/// Automove setting, decoded by table membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AutoMove {
    /// Follow the given HDMI input
    On(HdmiChannel),
    /// Disabled, remembering the last HDMI input
    Off(HdmiChannel),
    /// A code in neither table
    Unknown(u16),
}

impl AutoMove {
    pub fn from_code(code: u16) -> Self {
        let lookup = |table: &[u16; 5]| {
            table
                .iter()
                .position(|c| *c == code)
                .map(|i| HdmiChannel::ALL[i])
        };
        if let Some(channel) = lookup(&AUTOMOVE_ON_CODES) {
            Self::On(channel)
        } else if let Some(channel) = lookup(&AUTOMOVE_OFF_CODES) {
            Self::Off(channel)
        } else {
            Self::Unknown(code)
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::On(channel) => AUTOMOVE_ON_CODES[channel.index()],
            Self::Off(channel) => AUTOMOVE_OFF_CODES[channel.index()],
            Self::Unknown(code) => code,
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, Self::On(_))
    }
}

impl fmt::Display for AutoMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On(channel) => write!(f, "on (HDMI {})", channel.number()),
            Self::Off(channel) => write!(f, "off (HDMI {})", channel.number()),
            Self::Unknown(code) => write!(f, "unknown (0x{code:04x})"),
        }
    }
}

pub fn encode_automove(automove: AutoMove) -> [u8; 2] {
    automove.code().to_be_bytes()
}

pub fn decode_automove(data: &[u8]) -> io::Result<AutoMove> {
    require(data, 2, "automove")?;
    Ok(AutoMove::from_code(u16::from_be_bytes([data[0], data[1]])))
}

// =============================================================================
// PIN and authentication
// =============================================================================

/// Which PIN the mount has configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PinSetting {
    /// No PIN: everyone has full access
    Deactivated,
    /// Only the authorized-user PIN is set
    Single,
    /// Authorized-user and supervisor PINs are both set
    Multi,
    Unknown(u8),
}

impl PinSetting {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            PIN_DEACTIVATED => Self::Deactivated,
            PIN_SINGLE => Self::Single,
            PIN_MULTI => Self::Multi,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for PinSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deactivated => write!(f, "deactivated"),
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
            Self::Unknown(raw) => write!(f, "unknown ({raw})"),
        }
    }
}

pub fn decode_pin_setting(data: &[u8]) -> io::Result<PinSetting> {
    require(data, 1, "pin settings")?;
    Ok(PinSetting::from_byte(data[0]))
}

/// PIN tier used when authenticating or changing a PIN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PinTier {
    /// Grants control access
    AuthorizedUser,
    /// Grants full access
    Supervisor,
}

impl PinTier {
    pub fn other(self) -> Self {
        match self {
            Self::AuthorizedUser => Self::Supervisor,
            Self::Supervisor => Self::AuthorizedUser,
        }
    }
}

impl fmt::Display for PinTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorizedUser => write!(f, "authorized user"),
            Self::Supervisor => write!(f, "supervisor"),
        }
    }
}

/// Encode a PIN for the given tier (little-endian)
///
/// The supervisor encoding adds 0x40 to the high byte, wrapping at 256.
pub fn encode_pin(pin: u16, tier: PinTier) -> [u8; 2] {
    let [low, high] = pin.to_le_bytes();
    match tier {
        PinTier::AuthorizedUser => [low, high],
        PinTier::Supervisor => [low, high.wrapping_add(SUPERVISOR_PIN_OFFSET)],
    }
}

/// Authentication level reported by the status characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Full,
    Control,
    /// Not authenticated; further attempts are refused for `cooldown` seconds
    Locked { cooldown: u32 },
}

/// Lockout code to cooldown seconds: `max(0, 3 * code - 10)`
pub fn cooldown_from_code(code: u16) -> u32 {
    (3 * u32::from(code)).saturating_sub(10)
}

pub fn decode_auth_status(data: &[u8]) -> AuthStatus {
    match data {
        [AUTH_GRANTED, AUTH_GRANTED, ..] => AuthStatus::Full,
        [AUTH_GRANTED, ..] => AuthStatus::Control,
        _ => {
            let low = data.first().copied().unwrap_or(0);
            let high = data.get(1).copied().unwrap_or(0);
            AuthStatus::Locked {
                cooldown: cooldown_from_code(u16::from_le_bytes([low, high])),
            }
        }
    }
}

// =============================================================================
// Versions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Versions {
    pub ceb_bl: String,
    pub mcp_hw: String,
    pub mcp_bl: String,
    pub mcp_fw: String,
}

fn dotted(data: &[u8], start: usize, end: usize) -> String {
    let end = end.min(data.len());
    let start = start.min(end);
    data[start..end]
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

pub fn decode_versions(ceb: &[u8], mcp: &[u8]) -> Versions {
    Versions {
        ceb_bl: dotted(ceb, 0, ceb.len()),
        mcp_hw: dotted(mcp, 0, 3),
        mcp_bl: dotted(mcp, 3, 5),
        mcp_fw: dotted(mcp, 5, 7),
    }
}
