//! Transport seam between the engine and a BLE stack.

use std::sync::Arc;

use async_trait::async_trait;
use motionmount_proto::ble::{DISTANCE_UUID, ROTATION_UUID};
use motionmount_proto::{decode_distance, decode_rotation};
use tracing::{debug, warn};

use crate::error::MountError;
use crate::state::{MountEvent, Shared, StateUpdate};

/// A GATT link to a single mount.
///
/// Implementations carry exactly one outstanding request at a time; the
/// engine serializes calls. Characteristics are addressed by their
/// lowercase hyphenated UUID string.
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Establish the link and route disconnects and notifications to `events`.
    async fn connect(&self, events: LinkEvents) -> Result<(), MountError>;

    /// Tear the link down. Must succeed when already disconnected.
    async fn disconnect(&self) -> Result<(), MountError>;

    async fn read(&self, uuid: &str) -> Result<Vec<u8>, MountError>;

    async fn write(&self, uuid: &str, data: &[u8]) -> Result<(), MountError>;

    /// Enable notifications for a characteristic.
    async fn subscribe(&self, uuid: &str) -> Result<(), MountError>;
}

/// Callbacks the transport invokes out of band.
///
/// Both methods only flip flags and push to channels; they never touch the
/// link, so they are safe to call from any task at any time.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    shared: Arc<Shared>,
}

impl LinkEvents {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// The platform reports the link as gone.
    pub fn disconnected(&self) {
        if self.shared.set_connected(false) {
            debug!("MotionMount disconnected");
        }
    }

    /// A characteristic value was pushed by the mount.
    pub fn notification(&self, uuid: &str, value: &[u8]) {
        match uuid {
            DISTANCE_UUID => match decode_distance(value) {
                Ok(distance) => {
                    self.shared.update(StateUpdate::Distance(distance));
                    self.shared.emit(MountEvent::Distance(distance));
                }
                Err(err) => warn!(%err, "bad distance notification"),
            },
            ROTATION_UUID => match decode_rotation(value) {
                Ok(rotation) => {
                    self.shared.update(StateUpdate::Rotation(rotation));
                    self.shared.emit(MountEvent::Rotation(rotation));
                }
                Err(err) => warn!(%err, "bad rotation notification"),
            },
            other => debug!(uuid = other, "ignoring notification"),
        }
    }
}
