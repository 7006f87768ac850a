//! Command executor for a single MotionMount.
//!
//! Every operation runs connect -> authenticate -> permission check ->
//! write -> verify -> cache update while holding the operation lock, so only
//! one request is ever in flight on the link.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use motionmount_proto::ble::{
    AUTOMOVE_UUID, CALIBRATE_UUID, CHANGE_PIN_UUID, DISTANCE_UUID, FREEZE_UUID,
    MULTI_PIN_FEATURES_UUID, NAME_UUID, PIN_SETTINGS_UUID, PRESET_NAME_UUIDS, PRESET_UUIDS,
    ROTATION_UUID, SELECT_PRESET_UUID, VERSIONS_CEB_UUID, VERSIONS_MCP_UUID, WIDTH_UUID, commands,
};
use motionmount_proto::{
    AutoMove, Feature, MAX_DISTANCE, MAX_ROTATION, MAX_WIDTH, MIN_ROTATION, MIN_WIDTH,
    MultiPinFeatures, NAME_LEN, PRESET_COUNT, PRESET_NAME_MAX, PinSetting, PinTier, PresetData,
    PresetTarget, decode_automove, decode_distance, decode_multi_pin_features, decode_name,
    decode_pin_setting, decode_preset, decode_preset_target, decode_rotation, decode_versions,
    decode_width, encode_automove, encode_distance, encode_multi_pin_features, encode_name,
    encode_pin, encode_preset, encode_preset_target, encode_rotation, encode_width,
};
use tokio::sync::{Mutex, MutexGuard, broadcast, watch};
use tracing::{debug, info, warn};

use crate::auth::{AuthPolicy, Authenticator, Pin};
use crate::connection::ConnectionManager;
use crate::error::MountError;
use crate::link::GattLink;
use crate::permissions::{ActionClass, AuthType, Permissions};
use crate::state::{DeviceState, MountEvent, PresetSlot, Shared, StateUpdate};

/// How a failed refresh is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// A MotionMount reached over one GATT link.
pub struct MotionMount<L> {
    conn: ConnectionManager<L>,
    auth: Mutex<Authenticator>,
    cancel: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl<L: GattLink> MotionMount<L> {
    /// Create an engine for a resolved link and an optional stored PIN.
    ///
    /// # Errors
    ///
    /// [`MountError::Validation`] if the PIN is not four decimal digits.
    pub fn new(link: L, pin: Option<&str>) -> Result<Self, MountError> {
        Self::with_policy(link, pin, AuthPolicy::default())
    }

    pub fn with_policy(link: L, pin: Option<&str>, policy: AuthPolicy) -> Result<Self, MountError> {
        let pin = pin.map(str::parse::<Pin>).transpose()?;
        let shared = Arc::new(Shared::new());
        let auth = Authenticator::new(pin, policy);
        Ok(Self {
            conn: ConnectionManager::new(link, Arc::clone(&shared)),
            cancel: auth.cancel_handle(),
            auth: Mutex::new(auth),
            shared,
        })
    }

    // =========================================================================
    // Snapshot and subscriptions
    // =========================================================================

    pub fn state(&self) -> DeviceState {
        self.shared.snapshot()
    }

    /// Receiver that always holds the latest [`DeviceState`].
    pub fn watch(&self) -> watch::Receiver<DeviceState> {
        self.shared.watch()
    }

    /// Incremental updates: connection, distance, rotation and permissions.
    pub fn subscribe(&self) -> broadcast::Receiver<MountEvent> {
        self.shared.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Permissions as of the last authentication.
    pub fn permissions(&self) -> Permissions {
        self.shared.snapshot().permissions
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn connect(&self) -> Result<(), MountError> {
        let mut auth = self.auth.lock().await;
        if self.conn.connect().await? {
            auth.reset();
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), MountError> {
        let mut auth = self.auth.lock().await;
        auth.reset();
        self.conn.disconnect().await
    }

    /// Disconnect and release the link.
    pub async fn unload(self) -> Result<(), MountError> {
        self.disconnect().await
    }

    /// Stop an in-flight authentication poll loop at its next attempt.
    pub fn cancel_authentication(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Read every characteristic and rebuild the cached state.
    pub async fn refresh(&self) -> Result<DeviceState, MountError> {
        let (_session, permissions) = self.session().await?;
        let state = self.read_all(permissions).await?;
        self.shared.replace(state);
        Ok(self.shared.snapshot())
    }

    /// [`refresh`](Self::refresh), retrying transient failures with backoff.
    ///
    /// Authentication, permission and validation failures are returned at once.
    pub async fn refresh_with_retry(&self, policy: &RetryPolicy) -> Result<DeviceState, MountError> {
        let mut attempt = 1;
        loop {
            match self.refresh().await {
                Ok(state) => return Ok(state),
                Err(err) if err.is_persistent() || attempt >= policy.attempts => return Err(err),
                Err(err) => {
                    warn!(%err, attempt, "refresh failed, retrying");
                    tokio::time::sleep(policy.backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Whether the current PIN permits an action.
    ///
    /// Connects and authenticates as needed; a rejected or missing PIN
    /// yields `false` rather than an error.
    pub async fn has_permission(
        &self,
        class: ActionClass,
        feature: Option<Feature>,
    ) -> Result<bool, MountError> {
        match self.session().await {
            Ok((_session, permissions)) => Ok(permissions.allows(class, feature)),
            Err(MountError::Authentication { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Move to a preset slot or the default position.
    pub async fn select_preset(&self, target: PresetTarget) -> Result<(), MountError> {
        check_target(target)?;
        let _session = self.session().await?;
        self.conn
            .write(SELECT_PRESET_UUID, &encode_preset_target(target)?)
            .await?;
        info!(%target, "preset selected");
        Ok(())
    }

    pub async fn set_distance(&self, distance: u16) -> Result<(), MountError> {
        check_distance(distance)?;
        let _session = self.session().await?;
        self.conn.write(DISTANCE_UUID, &encode_distance(distance)).await?;
        self.shared.update(StateUpdate::RequestedDistance(distance));
        Ok(())
    }

    pub async fn set_rotation(&self, rotation: i16) -> Result<(), MountError> {
        check_rotation(rotation)?;
        let _session = self.session().await?;
        self.conn.write(ROTATION_UUID, &encode_rotation(rotation)).await?;
        self.shared.update(StateUpdate::RequestedRotation(rotation));
        Ok(())
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub async fn set_width(&self, width: u8) -> Result<(), MountError> {
        if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
            return Err(MountError::Validation(format!(
                "width {width} outside {MIN_WIDTH}..={MAX_WIDTH}"
            )));
        }
        let _session = self.settings_session("set width", None).await?;
        let actual = self
            .write_verified("width", WIDTH_UUID, &encode_width(width), &width, decode_width)
            .await?;
        self.shared.update(StateUpdate::Width(actual));
        Ok(())
    }

    pub async fn set_name(&self, name: &str) -> Result<(), MountError> {
        if name.is_empty() || name.len() > NAME_LEN {
            return Err(MountError::Validation(format!(
                "name must be 1..={NAME_LEN} bytes, got {}",
                name.len()
            )));
        }
        let _session = self
            .settings_session("set name", Some(Feature::ChangeName))
            .await?;
        let expected = name.to_string();
        let actual = self
            .write_verified("name", NAME_UUID, &encode_name(name)?, &expected, |data| {
                Ok(decode_name(data))
            })
            .await?;
        self.shared.update(StateUpdate::Name(actual));
        Ok(())
    }

    pub async fn set_preset(&self, index: u8, data: PresetData) -> Result<(), MountError> {
        check_slot(index)?;
        check_preset(&data)?;
        let _session = self
            .settings_session("set preset", Some(Feature::ChangePresets))
            .await?;
        self.write_preset(index, Some(&data)).await
    }

    pub async fn delete_preset(&self, index: u8) -> Result<(), MountError> {
        check_slot(index)?;
        let _session = self
            .settings_session("delete preset", Some(Feature::ChangePresets))
            .await?;
        self.write_preset(index, None).await
    }

    pub async fn set_automove(&self, automove: AutoMove) -> Result<(), MountError> {
        if let AutoMove::Unknown(code) = automove {
            return Err(MountError::Validation(format!(
                "automove code 0x{code:04x} is not a known setting"
            )));
        }
        let _session = self.settings_session("set automove", None).await?;
        let actual = self
            .write_verified(
                "automove",
                AUTOMOVE_UUID,
                &encode_automove(automove),
                &automove,
                decode_automove,
            )
            .await?;
        self.shared.update(StateUpdate::AutoMove(actual));
        Ok(())
    }

    /// Choose the position automove returns to.
    pub async fn set_freeze_preset(&self, target: PresetTarget) -> Result<(), MountError> {
        check_target(target)?;
        let _session = self
            .settings_session("set freeze preset", Some(Feature::ChangeTvOnOffDetection))
            .await?;
        let actual = self
            .write_verified(
                "freeze preset",
                FREEZE_UUID,
                &encode_preset_target(target)?,
                &target,
                decode_preset_target,
            )
            .await?;
        self.shared.update(StateUpdate::FreezePreset(actual));
        Ok(())
    }

    /// Grant settings features to the authorized-user tier.
    pub async fn set_multi_pin_features(
        &self,
        features: MultiPinFeatures,
    ) -> Result<(), MountError> {
        let _session = self.settings_session("set multi-pin features", None).await?;
        let actual = self
            .write_verified(
                "multi-pin features",
                MULTI_PIN_FEATURES_UUID,
                &encode_multi_pin_features(features),
                &features,
                decode_multi_pin_features,
            )
            .await?;
        self.shared.update(StateUpdate::MultiPinFeatures(actual));
        Ok(())
    }

    pub async fn start_calibration(&self) -> Result<(), MountError> {
        let _session = self
            .settings_session("start calibration", Some(Feature::StartCalibration))
            .await?;
        self.conn
            .write(CALIBRATE_UUID, &[commands::START_CALIBRATION])
            .await?;
        info!("calibration started");
        Ok(())
    }

    /// Set or remove (`"0000"`) the PIN of a tier.
    ///
    /// The mount ends the session after a PIN change, so on success the
    /// link is dropped and the state refreshed. If that refresh fails the
    /// change has still been applied, and the error comes back wrapped in
    /// [`MountError::RefreshAfterPinChange`], e.g. when the stored PIN no
    /// longer unlocks the mount.
    pub async fn set_pin(&self, tier: PinTier, pin: &str) -> Result<(), MountError> {
        let pin: Pin = pin.parse()?;
        {
            let mut session = self.settings_session("set pin", None).await?;
            self.conn
                .write(CHANGE_PIN_UUID, &encode_pin(pin.value(), tier))
                .await?;
            let actual = decode_pin_setting(&self.conn.read(PIN_SETTINGS_UUID).await?)?;

            let (persisted, expected) = match (tier, pin.is_removal()) {
                (PinTier::AuthorizedUser, true) => {
                    (actual == PinSetting::Deactivated, "deactivated")
                }
                (PinTier::AuthorizedUser, false) => {
                    (actual != PinSetting::Deactivated, "single or multi")
                }
                (PinTier::Supervisor, true) => (actual == PinSetting::Single, "single"),
                (PinTier::Supervisor, false) => (actual == PinSetting::Multi, "multi"),
            };
            if !persisted {
                warn!(%tier, %actual, "PIN change not persisted");
                return Err(MountError::SettingNotPersisted {
                    setting: "pin",
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
            self.shared.update(StateUpdate::PinSetting(actual));

            if actual == PinSetting::Deactivated {
                session.set_pin(None);
            } else if !pin.is_removal()
                && (session.pin().is_none() || session.granted_tier() == Some(tier))
            {
                session.set_pin(Some(pin));
            }
            session.reset();
            self.conn.disconnect().await?;
            info!(%tier, "PIN changed");
        }
        self.refresh()
            .await
            .map(drop)
            .map_err(|err| MountError::RefreshAfterPinChange(Box::new(err)))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Take the operation lock, connect and authenticate.
    async fn session(&self) -> Result<(MutexGuard<'_, Authenticator>, Permissions), MountError> {
        let mut auth = self.auth.lock().await;
        if self.conn.connect().await? {
            auth.reset();
        }

        if let Err(err) = auth.authenticate(&self.conn).await {
            self.shared.set_permissions(Permissions::resolve(
                auth.auth_type(),
                auth.cooldown(),
                MultiPinFeatures::default(),
            ));
            return Err(err);
        }

        let permissions = self.resolve_permissions(&auth).await?;
        Ok((auth, permissions))
    }

    /// The bitmask is re-read on every resolve; a supervisor may change it
    /// from another client at any time.
    async fn resolve_permissions(&self, auth: &Authenticator) -> Result<Permissions, MountError> {
        let features = match auth.auth_type() {
            AuthType::Control => {
                decode_multi_pin_features(&self.conn.read(MULTI_PIN_FEATURES_UUID).await?)?
            }
            _ => MultiPinFeatures::default(),
        };
        let permissions = Permissions::resolve(auth.auth_type(), auth.cooldown(), features);
        self.shared.set_permissions(permissions);
        Ok(permissions)
    }

    async fn settings_session(
        &self,
        action: &'static str,
        feature: Option<Feature>,
    ) -> Result<MutexGuard<'_, Authenticator>, MountError> {
        let (session, permissions) = self.session().await?;
        if !permissions.allows(ActionClass::Settings, feature) {
            warn!(action, auth_type = ?permissions.auth_type, "permission denied");
            return Err(MountError::PermissionDenied { action });
        }
        Ok(session)
    }

    /// Write a setting, read it back and compare.
    async fn write_verified<T, D>(
        &self,
        setting: &'static str,
        uuid: &str,
        payload: &[u8],
        expected: &T,
        decode: D,
    ) -> Result<T, MountError>
    where
        T: PartialEq + fmt::Debug,
        D: FnOnce(&[u8]) -> io::Result<T>,
    {
        self.conn.write(uuid, payload).await?;
        let actual = decode(&self.conn.read(uuid).await?)?;
        if &actual != expected {
            return Err(not_persisted(setting, expected, &actual));
        }
        debug!(setting, value = ?actual, "setting verified");
        Ok(actual)
    }

    async fn write_preset(&self, index: u8, data: Option<&PresetData>) -> Result<(), MountError> {
        let slot = usize::from(index);
        let (head, tail) = encode_preset(data)?;

        self.conn.write(PRESET_UUIDS[slot], &head).await?;
        self.conn.write(PRESET_NAME_UUIDS[slot], &tail).await?;

        let actual = self.read_preset(index).await?;
        if actual.data.as_ref() != data {
            return Err(not_persisted("preset", &data.cloned(), &actual.data));
        }
        self.shared.update(StateUpdate::Preset(actual));
        Ok(())
    }

    async fn read_preset(&self, index: u8) -> Result<PresetSlot, MountError> {
        let slot = usize::from(index);
        let head = self.conn.read(PRESET_UUIDS[slot]).await?;
        let tail = self.conn.read(PRESET_NAME_UUIDS[slot]).await?;
        Ok(PresetSlot {
            index,
            data: decode_preset(&head, &tail)?,
        })
    }

    async fn read_all(&self, permissions: Permissions) -> Result<DeviceState, MountError> {
        let mut state = DeviceState {
            permissions,
            ..DeviceState::default()
        };

        state.name = decode_name(&self.conn.read(NAME_UUID).await?);
        state.width = decode_width(&self.conn.read(WIDTH_UUID).await?)?;
        state.distance = decode_distance(&self.conn.read(DISTANCE_UUID).await?)?;
        state.rotation = decode_rotation(&self.conn.read(ROTATION_UUID).await?)?;

        for index in 0..PRESET_COUNT as u8 {
            let slot = self.read_preset(index).await?;
            state.presets.insert(index, slot);
        }

        state.freeze_preset = decode_preset_target(&self.conn.read(FREEZE_UUID).await?)?;
        state.automove = decode_automove(&self.conn.read(AUTOMOVE_UUID).await?)?;
        if let AutoMove::Unknown(code) = state.automove {
            warn!(code, "unrecognized automove code");
        }
        state.pin_setting = decode_pin_setting(&self.conn.read(PIN_SETTINGS_UUID).await?)?;
        state.multi_pin_features =
            decode_multi_pin_features(&self.conn.read(MULTI_PIN_FEATURES_UUID).await?)?;
        state.versions = decode_versions(
            &self.conn.read(VERSIONS_CEB_UUID).await?,
            &self.conn.read(VERSIONS_MCP_UUID).await?,
        );

        info!(name = %state.name, "state refreshed");
        Ok(state)
    }
}

fn not_persisted<T: fmt::Debug>(setting: &'static str, expected: &T, actual: &T) -> MountError {
    warn!(setting, ?expected, ?actual, "setting not persisted");
    MountError::SettingNotPersisted {
        setting,
        expected: format!("{expected:?}"),
        actual: format!("{actual:?}"),
    }
}

fn check_slot(index: u8) -> Result<(), MountError> {
    if usize::from(index) >= PRESET_COUNT {
        return Err(MountError::Validation(format!(
            "preset slot {index} outside 0..{PRESET_COUNT}"
        )));
    }
    Ok(())
}

fn check_target(target: PresetTarget) -> Result<(), MountError> {
    match target {
        PresetTarget::Default => Ok(()),
        PresetTarget::Slot(index) => check_slot(index),
    }
}

fn check_distance(distance: u16) -> Result<(), MountError> {
    if distance > MAX_DISTANCE {
        return Err(MountError::Validation(format!(
            "distance {distance} outside 0..={MAX_DISTANCE}"
        )));
    }
    Ok(())
}

fn check_rotation(rotation: i16) -> Result<(), MountError> {
    if !(MIN_ROTATION..=MAX_ROTATION).contains(&rotation) {
        return Err(MountError::Validation(format!(
            "rotation {rotation} outside {MIN_ROTATION}..={MAX_ROTATION}"
        )));
    }
    Ok(())
}

fn check_preset(data: &PresetData) -> Result<(), MountError> {
    check_distance(data.distance)?;
    check_rotation(data.rotation)?;
    if data.name.is_empty() || data.name.len() > PRESET_NAME_MAX {
        return Err(MountError::Validation(format!(
            "preset name must be 1..={PRESET_NAME_MAX} bytes, got {}",
            data.name.len()
        )));
    }
    Ok(())
}
