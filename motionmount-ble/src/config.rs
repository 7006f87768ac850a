//! Persistent CLI settings under MOTIONMOUNT_HOME.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use motionmount_controller::{AuthPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.json";
pub const REDACTED: &str = "**REDACTED**";

/// Get MOTIONMOUNT_HOME directory, creating it if needed
pub fn motionmount_home() -> io::Result<PathBuf> {
    let home = match std::env::var_os("MOTIONMOUNT_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?
            .join(".motionmount"),
    };

    if !home.exists() {
        fs::create_dir_all(&home)?;
    }

    Ok(home)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name or address of the mount to talk to
    pub device: Option<String>,
    pub pin: Option<String>,
    pub scan_secs: u64,
    pub auth_interval_ms: u64,
    pub refresh_attempts: u32,
    pub refresh_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let auth = AuthPolicy::default();
        let retry = RetryPolicy::default();
        Self {
            device: None,
            pin: None,
            scan_secs: 5,
            auth_interval_ms: auth.interval.as_millis() as u64,
            refresh_attempts: retry.attempts,
            refresh_backoff_ms: retry.backoff.as_millis() as u64,
        }
    }
}

impl Config {
    pub fn path() -> io::Result<PathBuf> {
        Ok(motionmount_home()?.join(CONFIG_FILE))
    }

    /// Load from MOTIONMOUNT_HOME, falling back to defaults if absent
    pub fn load() -> io::Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self) -> io::Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy {
            interval: Duration::from_millis(self.auth_interval_ms),
            ..AuthPolicy::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.refresh_attempts,
            backoff: Duration::from_millis(self.refresh_backoff_ms),
        }
    }

    /// Copy safe to print or attach to a bug report
    pub fn redacted(&self) -> Self {
        Self {
            pin: self.pin.as_ref().map(|_| REDACTED.to_string()),
            device: self.device.as_ref().map(|_| REDACTED.to_string()),
            ..self.clone()
        }
    }
}
