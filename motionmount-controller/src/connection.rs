//! Lazy connection management for the single link to a mount.

use std::sync::Arc;

use motionmount_proto::ble::{DISTANCE_UUID, ROTATION_UUID};
use tracing::{debug, info, warn};

use crate::error::MountError;
use crate::link::{GattLink, LinkEvents};
use crate::state::Shared;

/// Owns the link and tracks whether it is up.
pub struct ConnectionManager<L> {
    link: L,
    shared: Arc<Shared>,
}

impl<L: GattLink> ConnectionManager<L> {
    pub(crate) fn new(link: L, shared: Arc<Shared>) -> Self {
        Self { link, shared }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Connect if not already connected.
    ///
    /// Returns `true` when a new link was established, so session state
    /// tied to the previous link can be discarded.
    pub async fn connect(&self) -> Result<bool, MountError> {
        if self.is_connected() {
            return Ok(false);
        }

        debug!("connecting to MotionMount");
        self.link
            .connect(LinkEvents::new(Arc::clone(&self.shared)))
            .await?;
        self.shared.set_connected(true);
        info!("connected to MotionMount");

        for uuid in [DISTANCE_UUID, ROTATION_UUID] {
            if let Err(err) = self.link.subscribe(uuid).await {
                warn!(%err, uuid, "failed to subscribe to notifications");
            }
        }

        Ok(true)
    }

    pub async fn disconnect(&self) -> Result<(), MountError> {
        let result = self.link.disconnect().await;
        self.shared.set_connected(false);
        result
    }

    pub async fn read(&self, uuid: &str) -> Result<Vec<u8>, MountError> {
        let result = self.link.read(uuid).await;
        self.observe(&result);
        let data = result?;
        debug!(uuid, len = data.len(), "read characteristic");
        Ok(data)
    }

    pub async fn write(&self, uuid: &str, data: &[u8]) -> Result<(), MountError> {
        debug!(uuid, len = data.len(), "write characteristic");
        let result = self.link.write(uuid, data).await;
        self.observe(&result);
        result
    }

    /// A transport failure mid-call means the link is gone; the next
    /// operation reconnects.
    fn observe<T>(&self, result: &Result<T, MountError>) {
        if let Err(MountError::Connection(err)) = result {
            warn!(%err, "link failed during request");
            self.shared.set_connected(false);
        }
    }
}
