//! MotionMount BLE Controller
//!
//! Protocol engine for Vogel's MotionMount motorized TV wall mounts. One
//! [`MotionMount`] owns the link to one mount: it connects lazily,
//! authenticates with the stored PIN, checks permissions, writes the
//! characteristic and verifies the mount kept the value.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use motionmount_controller::{MotionMount, PresetTarget, ble};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let link = ble::find_device(None, Duration::from_secs(5)).await?;
//!     let mount = MotionMount::new(link, Some("2222"))?;
//!
//!     let state = mount.refresh().await?;
//!     println!("{} at distance {}", state.name, state.distance);
//!
//!     mount.select_preset(PresetTarget::Slot(0)).await?;
//!     mount.unload().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod ble;
pub mod connection;
pub mod error;
pub mod link;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod mount;
pub mod permissions;
pub mod state;

pub use auth::{AuthPolicy, MAX_AUTH_ATTEMPTS, Pin};
pub use error::MountError;
pub use link::{GattLink, LinkEvents};
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockLink, MockOp};
pub use mount::{MotionMount, RetryPolicy};
pub use permissions::{ActionClass, AuthType, Permissions};
pub use state::{DeviceState, MountEvent, PresetSlot, StateUpdate};

pub use motionmount_proto::{
    AutoMove, Feature, HdmiChannel, MultiPinFeatures, PinSetting, PinTier, PresetData,
    PresetTarget, Versions,
};
