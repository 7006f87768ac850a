//! In-memory MotionMount for testing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use motionmount_proto::ble::{
    AUTH_STATUS_UUID, AUTHENTICATE_UUID, AUTOMOVE_UUID, CHANGE_PIN_UUID, DISTANCE_UUID,
    FREEZE_UUID, MULTI_PIN_FEATURES_UUID, NAME_UUID, PIN_SETTINGS_UUID, PRESET_NAME_UUIDS,
    PRESET_UUIDS, ROTATION_UUID, VERSIONS_CEB_UUID, VERSIONS_MCP_UUID, WIDTH_UUID,
};
use motionmount_proto::{
    AUTH_GRANTED, AutoMove, HdmiChannel, MultiPinFeatures, PIN_DEACTIVATED, PIN_MULTI,
    PIN_SINGLE, PRESET_HEAD_LEN, PRESET_TAIL_LEN, PresetTarget, SUPERVISOR_PIN_OFFSET,
    encode_automove, encode_distance, encode_multi_pin_features, encode_name,
    encode_preset_target, encode_rotation, encode_width,
};

use crate::error::MountError;
use crate::link::{GattLink, LinkEvents};

/// One call made against the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    Connect,
    Disconnect,
    Read(String),
    Write(String, Vec<u8>),
    Subscribe(String),
}

#[derive(Debug)]
struct MockDevice {
    values: HashMap<String, Vec<u8>>,
    user_pin: Option<u16>,
    supervisor_pin: Option<u16>,
    /// Access granted this session; `[0x80, x]` once a PIN matched.
    granted: Option<[u8; 2]>,
    lockout_code: u16,
    /// Status polls that still report locked after a matching PIN.
    grant_delay: u32,
    pending_polls: u32,
    connected: bool,
    fail_connect: Option<MountError>,
    fail_reads: u32,
    ignored_writes: HashSet<String>,
    ops: Vec<MockOp>,
    events: Option<LinkEvents>,
}

impl MockDevice {
    fn new() -> Self {
        let mut values = HashMap::new();
        let mut set = |uuid: &str, value: &[u8]| {
            values.insert(uuid.to_string(), value.to_vec());
        };

        set(NAME_UUID, &encode_name("MotionMount").unwrap_or([0; 20]));
        set(DISTANCE_UUID, &encode_distance(0));
        set(ROTATION_UUID, &encode_rotation(0));
        set(WIDTH_UUID, &encode_width(55));
        for (head, tail) in PRESET_UUIDS.iter().zip(PRESET_NAME_UUIDS.iter()) {
            set(head, &[0; PRESET_HEAD_LEN]);
            set(tail, &[0; PRESET_TAIL_LEN]);
        }
        set(FREEZE_UUID, &encode_preset_target(PresetTarget::Default).unwrap_or([0]));
        set(AUTOMOVE_UUID, &encode_automove(AutoMove::Off(HdmiChannel::Hdmi1)));
        set(MULTI_PIN_FEATURES_UUID, &encode_multi_pin_features(MultiPinFeatures::default()));
        set(VERSIONS_CEB_UUID, &[1, 4]);
        set(VERSIONS_MCP_UUID, &[2, 0, 1, 1, 2, 3, 7]);

        let mut device = Self {
            values,
            user_pin: None,
            supervisor_pin: None,
            granted: None,
            lockout_code: 0,
            grant_delay: 0,
            pending_polls: 0,
            connected: false,
            fail_connect: None,
            fail_reads: 0,
            ignored_writes: HashSet::new(),
            ops: Vec::new(),
            events: None,
        };
        device.sync_pin_setting();
        device
    }

    fn sync_pin_setting(&mut self) {
        let setting = match (self.user_pin, self.supervisor_pin) {
            (None, _) => PIN_DEACTIVATED,
            (Some(_), None) => PIN_SINGLE,
            (Some(_), Some(_)) => PIN_MULTI,
        };
        self.values.insert(PIN_SETTINGS_UUID.to_string(), vec![setting]);
    }

    fn auth_status(&mut self) -> Vec<u8> {
        if self.user_pin.is_none() {
            return vec![AUTH_GRANTED, AUTH_GRANTED];
        }
        match self.granted {
            Some(status) if self.pending_polls == 0 => status.to_vec(),
            Some(_) => {
                self.pending_polls -= 1;
                self.lockout_code.to_le_bytes().to_vec()
            }
            None => self.lockout_code.to_le_bytes().to_vec(),
        }
    }

    /// Split a PIN payload into its value and whether it used the supervisor offset.
    fn decode_pin(data: &[u8]) -> Option<(u16, bool)> {
        let [low, high] = *data else {
            return None;
        };
        let supervisor = high >= SUPERVISOR_PIN_OFFSET;
        let high = if supervisor { high - SUPERVISOR_PIN_OFFSET } else { high };
        Some((u16::from_le_bytes([low, high]), supervisor))
    }

    fn authenticate(&mut self, data: &[u8]) {
        let Some((pin, supervisor)) = Self::decode_pin(data) else {
            return;
        };
        let status = if supervisor {
            (self.supervisor_pin == Some(pin)).then_some([AUTH_GRANTED, AUTH_GRANTED])
        } else if self.user_pin == Some(pin) {
            // A lone user PIN unlocks everything
            Some(match self.supervisor_pin {
                Some(_) => [AUTH_GRANTED, 0],
                None => [AUTH_GRANTED, AUTH_GRANTED],
            })
        } else {
            None
        };
        if status.is_some() {
            self.granted = status;
            self.pending_polls = self.grant_delay;
        }
    }

    fn change_pin(&mut self, data: &[u8]) {
        let Some((pin, supervisor)) = Self::decode_pin(data) else {
            return;
        };
        let pin = (pin != 0).then_some(pin);
        if supervisor {
            if self.user_pin.is_some() {
                self.supervisor_pin = pin;
            }
        } else {
            self.user_pin = pin;
            if pin.is_none() {
                self.supervisor_pin = None;
            }
        }
        self.sync_pin_setting();
    }
}

/// A simulated mount implementing [`GattLink`].
///
/// Clones share the same device, so a test can keep a handle for
/// inspection while the engine owns another.
///
/// ```
/// use motionmount_controller::{MockLink, MotionMount};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let link = MockLink::new();
/// let mount = MotionMount::new(link.clone(), None).unwrap();
/// mount.set_distance(40).await.unwrap();
/// assert!(link.is_connected());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MockLink {
    device: Arc<Mutex<MockDevice>>,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    /// A PIN-less mount with empty preset slots.
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(MockDevice::new())),
        }
    }

    fn device(&self) -> MutexGuard<'_, MockDevice> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configure the authorized-user and supervisor PINs.
    pub fn with_pins(self, user: Option<u16>, supervisor: Option<u16>) -> Self {
        {
            let mut device = self.device();
            device.user_pin = user;
            device.supervisor_pin = user.and(supervisor);
            device.sync_pin_setting();
        }
        self
    }

    /// Lockout code reported while not authenticated.
    pub fn with_lockout_code(self, code: u16) -> Self {
        self.device().lockout_code = code;
        self
    }

    /// Number of status polls that still report locked after a correct PIN.
    pub fn with_grant_delay(self, polls: u32) -> Self {
        self.device().grant_delay = polls;
        self
    }

    pub fn set_value(&self, uuid: &str, value: &[u8]) {
        self.device().values.insert(uuid.to_string(), value.to_vec());
    }

    pub fn value(&self, uuid: &str) -> Option<Vec<u8>> {
        self.device().values.get(uuid).cloned()
    }

    /// Accept writes to `uuid` without storing them.
    pub fn ignore_writes(&self, uuid: &str) {
        self.device().ignored_writes.insert(uuid.to_string());
    }

    /// Fail the next `count` reads with a connection error.
    pub fn fail_reads(&self, count: u32) {
        self.device().fail_reads = count;
    }

    /// Make every connect attempt fail with `err`.
    pub fn fail_connect(&self, err: MountError) {
        self.device().fail_connect = Some(err);
    }

    pub fn is_connected(&self) -> bool {
        self.device().connected
    }

    pub fn ops(&self) -> Vec<MockOp> {
        self.device().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.device().ops.clear();
    }

    pub fn reads_of(&self, uuid: &str) -> usize {
        self.device()
            .ops
            .iter()
            .filter(|op| matches!(op, MockOp::Read(u) if u == uuid))
            .count()
    }

    pub fn writes_to(&self, uuid: &str) -> Vec<Vec<u8>> {
        self.device()
            .ops
            .iter()
            .filter_map(|op| match op {
                MockOp::Write(u, data) if u == uuid => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop the link as the platform would, invoking the disconnect callback.
    pub fn simulate_disconnect(&self) {
        let events = {
            let mut device = self.device();
            device.connected = false;
            device.granted = None;
            device.events.clone()
        };
        if let Some(events) = events {
            events.disconnected();
        }
    }

    /// Push a notification for a subscribed characteristic.
    pub fn notify(&self, uuid: &str, value: &[u8]) {
        let events = {
            let mut device = self.device();
            device.values.insert(uuid.to_string(), value.to_vec());
            device.events.clone()
        };
        if let Some(events) = events {
            events.notification(uuid, value);
        }
    }
}

#[async_trait]
impl GattLink for MockLink {
    async fn connect(&self, events: LinkEvents) -> Result<(), MountError> {
        let mut device = self.device();
        device.ops.push(MockOp::Connect);
        if let Some(err) = &device.fail_connect {
            return Err(match err {
                MountError::DeviceNotFound(name) => MountError::DeviceNotFound(name.clone()),
                other => MountError::Connection(other.to_string()),
            });
        }
        device.connected = true;
        device.granted = None;
        device.events = Some(events);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MountError> {
        let mut device = self.device();
        device.ops.push(MockOp::Disconnect);
        device.connected = false;
        device.granted = None;
        Ok(())
    }

    async fn read(&self, uuid: &str) -> Result<Vec<u8>, MountError> {
        let mut device = self.device();
        device.ops.push(MockOp::Read(uuid.to_string()));
        if !device.connected {
            return Err(MountError::Connection("not connected".to_string()));
        }
        if device.fail_reads > 0 {
            device.fail_reads -= 1;
            return Err(MountError::Connection("read timed out".to_string()));
        }
        if uuid == AUTH_STATUS_UUID {
            return Ok(device.auth_status());
        }
        device
            .values
            .get(uuid)
            .cloned()
            .ok_or_else(|| MountError::CharacteristicNotFound { uuid: uuid.to_string() })
    }

    async fn write(&self, uuid: &str, data: &[u8]) -> Result<(), MountError> {
        let mut device = self.device();
        device.ops.push(MockOp::Write(uuid.to_string(), data.to_vec()));
        if !device.connected {
            return Err(MountError::Connection("not connected".to_string()));
        }
        match uuid {
            AUTHENTICATE_UUID => device.authenticate(data),
            CHANGE_PIN_UUID => device.change_pin(data),
            _ if device.ignored_writes.contains(uuid) => {}
            _ => {
                device.values.insert(uuid.to_string(), data.to_vec());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, uuid: &str) -> Result<(), MountError> {
        let mut device = self.device();
        device.ops.push(MockOp::Subscribe(uuid.to_string()));
        Ok(())
    }
}
