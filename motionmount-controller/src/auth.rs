//! Two-tier PIN authentication handshake.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use motionmount_proto::ble::{AUTH_STATUS_UUID, AUTHENTICATE_UUID};
use motionmount_proto::{AuthStatus, PinTier, decode_auth_status, encode_pin};
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::error::MountError;
use crate::link::GattLink;
use crate::permissions::AuthType;

/// A four-digit PIN.
///
/// `Debug` never prints the digits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Pin(u16);

impl Pin {
    /// `0000` removes the PIN when written through the change-PIN action.
    pub const REMOVE: Pin = Pin(0);

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn is_removal(self) -> bool {
        self == Self::REMOVE
    }
}

impl FromStr for Pin {
    type Err = MountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MountError::Validation(
                "PIN must be exactly 4 decimal digits".to_string(),
            ));
        }
        s.parse::<u16>()
            .map(Pin)
            .map_err(|err| MountError::Validation(err.to_string()))
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// Most status checks made per tier after a PIN write.
pub const MAX_AUTH_ATTEMPTS: u32 = 4;

/// How the status characteristic is polled after a PIN write.
///
/// `attempts` is clamped to `1..=MAX_AUTH_ATTEMPTS` when the policy is used.
#[derive(Debug, Clone, Copy)]
pub struct AuthPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            attempts: MAX_AUTH_ATTEMPTS,
            interval: Duration::from_millis(100),
        }
    }
}

/// Tracks the authentication level of the current link session.
#[derive(Debug)]
pub struct Authenticator {
    pin: Option<Pin>,
    policy: AuthPolicy,
    auth_type: AuthType,
    remembered: PinTier,
    /// Tier whose PIN write unlocked the current session.
    granted: Option<PinTier>,
    cooldown: u32,
    cancel: Arc<AtomicBool>,
}

impl Authenticator {
    pub fn new(pin: Option<Pin>, policy: AuthPolicy) -> Self {
        let policy = AuthPolicy {
            attempts: policy.attempts.clamp(1, MAX_AUTH_ATTEMPTS),
            ..policy
        };
        Self {
            pin,
            policy,
            auth_type: AuthType::Missing,
            remembered: PinTier::Supervisor,
            granted: None,
            cooldown: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    pub fn cooldown(&self) -> u32 {
        self.cooldown
    }

    pub fn remembered_tier(&self) -> PinTier {
        self.remembered
    }

    pub fn granted_tier(&self) -> Option<PinTier> {
        self.granted
    }

    pub fn pin(&self) -> Option<Pin> {
        self.pin
    }

    pub fn set_pin(&mut self, pin: Option<Pin>) {
        self.pin = pin;
    }

    /// Handle for cancelling an in-flight poll loop from another task.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Forget the session level after the link was re-established.
    pub fn reset(&mut self) {
        self.auth_type = AuthType::Missing;
        self.granted = None;
        self.cooldown = 0;
    }

    /// Read the status characteristic and record what it says.
    pub async fn check_authentication<L: GattLink>(
        &mut self,
        conn: &ConnectionManager<L>,
    ) -> Result<AuthStatus, MountError> {
        let status = decode_auth_status(&conn.read(AUTH_STATUS_UUID).await?);
        match status {
            AuthStatus::Full => self.auth_type = AuthType::Full,
            AuthStatus::Control => self.auth_type = AuthType::Control,
            AuthStatus::Locked { cooldown } => self.cooldown = cooldown,
        }
        Ok(status)
    }

    /// Write the PIN for `tier` and poll until the mount grants access.
    ///
    /// Returns `false` once every poll attempt reported a lockout.
    pub async fn authenticate_as<L: GattLink>(
        &mut self,
        conn: &ConnectionManager<L>,
        tier: PinTier,
    ) -> Result<bool, MountError> {
        let Some(pin) = self.pin else {
            return Ok(false);
        };

        debug!(%tier, "writing PIN");
        conn.write(AUTHENTICATE_UUID, &encode_pin(pin.value(), tier)).await?;

        for attempt in 1..=self.policy.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.interval).await;
            }
            if self.cancel.swap(false, Ordering::SeqCst) {
                return Err(MountError::Cancelled);
            }

            match self.check_authentication(conn).await? {
                AuthStatus::Full => {
                    self.remembered = PinTier::Supervisor;
                    self.granted = Some(tier);
                    info!(%tier, "authenticated with full access");
                    return Ok(true);
                }
                AuthStatus::Control => {
                    self.remembered = PinTier::AuthorizedUser;
                    self.granted = Some(tier);
                    info!(%tier, "authenticated with control access");
                    return Ok(true);
                }
                AuthStatus::Locked { cooldown } => {
                    debug!(%tier, attempt, cooldown, "not authenticated yet");
                }
            }
        }

        Ok(false)
    }

    /// Make sure the session is at least at `Control`.
    pub async fn authenticate<L: GattLink>(
        &mut self,
        conn: &ConnectionManager<L>,
    ) -> Result<AuthType, MountError> {
        self.cancel.store(false, Ordering::SeqCst);

        if self.auth_type.is_authenticated() {
            return Ok(self.auth_type);
        }

        if self.pin.is_none() {
            // PIN-less mounts report access without a handshake
            if let AuthStatus::Locked { .. } = self.check_authentication(conn).await? {
                self.auth_type = AuthType::Missing;
                self.cooldown = 0;
                warn!("MotionMount requires a PIN but none is configured");
                return Err(MountError::Authentication { cooldown: 0 });
            }
            return Ok(self.auth_type);
        }

        let first = self.remembered;
        for tier in [first, first.other()] {
            if self.authenticate_as(conn, tier).await? {
                return Ok(self.auth_type);
            }
        }

        self.auth_type = AuthType::Wrong;
        warn!(cooldown = self.cooldown, "PIN rejected by MotionMount");
        Err(MountError::Authentication {
            cooldown: self.cooldown,
        })
    }
}
