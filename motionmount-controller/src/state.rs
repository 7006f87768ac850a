//! Cached device state and its update channels.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use motionmount_proto::{
    AutoMove, HdmiChannel, MultiPinFeatures, PinSetting, PresetData, PresetTarget, Versions,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::permissions::Permissions;

const EVENT_BUFFER: usize = 64;

/// One of the seven user preset slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetSlot {
    pub index: u8,
    /// `None` when the slot is unoccupied.
    pub data: Option<PresetData>,
}

impl PresetSlot {
    pub fn is_occupied(&self) -> bool {
        self.data.is_some()
    }
}

/// Snapshot of everything known about the mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub connected: bool,
    pub name: String,
    pub distance: u16,
    pub rotation: i16,
    /// Last requested distance, pending physical confirmation.
    pub requested_distance: Option<u16>,
    /// Last requested rotation, pending physical confirmation.
    pub requested_rotation: Option<i16>,
    pub width: u8,
    /// Keyed by slot index 0..=6.
    pub presets: BTreeMap<u8, PresetSlot>,
    pub freeze_preset: PresetTarget,
    pub automove: AutoMove,
    pub pin_setting: PinSetting,
    pub multi_pin_features: MultiPinFeatures,
    pub versions: Versions,
    pub permissions: Permissions,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            connected: false,
            name: String::new(),
            distance: 0,
            rotation: 0,
            requested_distance: None,
            requested_rotation: None,
            width: 0,
            presets: BTreeMap::new(),
            freeze_preset: PresetTarget::Default,
            automove: AutoMove::Off(HdmiChannel::Hdmi1),
            pin_setting: PinSetting::Deactivated,
            multi_pin_features: MultiPinFeatures::default(),
            versions: Versions::default(),
            permissions: Permissions::default(),
        }
    }
}

/// A single-field change to [`DeviceState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    Connected(bool),
    Name(String),
    Distance(u16),
    Rotation(i16),
    RequestedDistance(u16),
    RequestedRotation(i16),
    Width(u8),
    Preset(PresetSlot),
    FreezePreset(PresetTarget),
    AutoMove(AutoMove),
    PinSetting(PinSetting),
    MultiPinFeatures(MultiPinFeatures),
    Permissions(Permissions),
}

impl DeviceState {
    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::Connected(connected) => self.connected = connected,
            StateUpdate::Name(name) => self.name = name,
            StateUpdate::Distance(distance) => self.distance = distance,
            StateUpdate::Rotation(rotation) => self.rotation = rotation,
            StateUpdate::RequestedDistance(distance) => self.requested_distance = Some(distance),
            StateUpdate::RequestedRotation(rotation) => self.requested_rotation = Some(rotation),
            StateUpdate::Width(width) => self.width = width,
            StateUpdate::Preset(slot) => {
                self.presets.insert(slot.index, slot);
            }
            StateUpdate::FreezePreset(target) => self.freeze_preset = target,
            StateUpdate::AutoMove(automove) => self.automove = automove,
            StateUpdate::PinSetting(setting) => self.pin_setting = setting,
            StateUpdate::MultiPinFeatures(features) => self.multi_pin_features = features,
            StateUpdate::Permissions(permissions) => self.permissions = permissions,
        }
    }

    /// Copy of this state with one field changed.
    pub fn with(&self, update: StateUpdate) -> Self {
        let mut next = self.clone();
        next.apply(update);
        next
    }

    pub fn preset(&self, index: u8) -> Option<&PresetData> {
        self.presets.get(&index).and_then(|slot| slot.data.as_ref())
    }
}

/// Incremental change pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountEvent {
    Connection(bool),
    Distance(u16),
    Rotation(i16),
    Permissions(Permissions),
}

/// State shared between the engine and the transport's callbacks.
///
/// Every method is synchronous and returns without waiting on the
/// operation lock.
#[derive(Debug)]
pub(crate) struct Shared {
    connected: AtomicBool,
    state: watch::Sender<DeviceState>,
    events: broadcast::Sender<MountEvent>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(DeviceState::default());
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            connected: AtomicBool::new(false),
            state,
            events,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Record a connection change; returns whether it differed.
    ///
    /// The flag and the published state change together under the watch lock.
    pub(crate) fn set_connected(&self, connected: bool) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if self.connected.swap(connected, Ordering::SeqCst) == connected {
                return false;
            }
            state.apply(StateUpdate::Connected(connected));
            true
        });
        if changed {
            self.emit(MountEvent::Connection(connected));
        }
        changed
    }

    pub(crate) fn update(&self, update: StateUpdate) {
        self.state.send_modify(|state| state.apply(update));
    }

    pub(crate) fn replace(&self, state: DeviceState) {
        self.state.send_modify(|current| {
            *current = DeviceState {
                connected: self.is_connected(),
                ..state
            };
        });
    }

    pub(crate) fn snapshot(&self) -> DeviceState {
        self.state.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<DeviceState> {
        self.state.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<MountEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: MountEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn set_permissions(&self, permissions: Permissions) {
        let changed = self.state.borrow().permissions != permissions;
        if changed {
            self.update(StateUpdate::Permissions(permissions));
            self.emit(MountEvent::Permissions(permissions));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_with_leaves_original_untouched() {
        let state = DeviceState::default();
        let next = state.with(StateUpdate::Name("Lounge".to_string()));
        assert_eq!(next.name, "Lounge");
        assert_eq!(state.name, "");
    }

    #[test]
    fn preset_updates_replace_by_index() {
        let mut state = DeviceState::default();
        let data = PresetData {
            name: "Cinema".to_string(),
            distance: 80,
            rotation: 10,
        };
        state.apply(StateUpdate::Preset(PresetSlot { index: 3, data: Some(data.clone()) }));
        state.apply(StateUpdate::Preset(PresetSlot { index: 1, data: None }));
        state.apply(StateUpdate::Preset(PresetSlot { index: 3, data: Some(data.clone()) }));
        assert_eq!(state.presets.len(), 2);
        assert_eq!(state.preset(3), Some(&data));
        assert_eq!(state.preset(1), None);
    }

    #[test]
    fn connection_changes_are_broadcast_once() {
        let shared = Shared::new();
        let mut events = shared.subscribe();
        assert!(shared.set_connected(true));
        assert!(!shared.set_connected(true));
        assert!(shared.snapshot().connected);
        assert_eq!(events.try_recv().unwrap(), MountEvent::Connection(true));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn racing_connection_changes_keep_flag_and_state_in_step() {
        let shared = Shared::new();
        std::thread::scope(|scope| {
            for connected in [true, false] {
                let shared = &shared;
                scope.spawn(move || {
                    for _ in 0..1000 {
                        shared.set_connected(connected);
                    }
                });
            }
        });
        assert_eq!(shared.is_connected(), shared.snapshot().connected);
    }
}
