//! Configuration types for the DNS shim
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::traits::WorkloadAction;

/// Identity sent with every directory request
pub const DEFAULT_CLIENT_IDENTITY: &str = "docker-pihole-dns-shim";

/// Label carrying the declared records
pub const DEFAULT_LABEL_KEY: &str = "pihole.custom-record";

/// Upper bound for every configured period (ten years, in seconds)
pub const MAX_PERIOD_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn check_period(name: &str, secs: u64) -> Result<(), crate::Error> {
    if secs > MAX_PERIOD_SECS {
        return Err(crate::Error::config(format!(
            "{} must be at most {}s, got {}s",
            name, MAX_PERIOD_SECS, secs
        )));
    }
    Ok(())
}

/// Main shim configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShimConfig {
    /// Directory API configuration
    pub directory: DirectoryConfig,

    /// State store configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Reconciliation engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Trigger scheduler settings
    #[serde(default)]
    pub trigger: TriggerConfig,
}

impl ShimConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.directory.validate()?;
        self.state.validate()?;
        self.engine.validate()?;
        self.trigger.validate()?;
        Ok(())
    }
}

/// Directory API configuration
///
/// The Debug implementation does NOT expose the secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the API, e.g. `http://pi.hole:8080/api`
    pub base_url: String,

    /// Shared secret exchanged for a session
    /// ⚠️ NEVER log this value
    pub secret: String,

    /// Client identity header used to recognise our own sessions
    #[serde(default = "default_client_identity")]
    pub client_identity: String,
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("base_url", &self.base_url)
            .field("secret", &"<REDACTED>")
            .field("client_identity", &self.client_identity)
            .finish()
    }
}

impl DirectoryConfig {
    /// Validate the directory configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.secret.is_empty() {
            return Err(crate::Error::config("Directory secret cannot be empty"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(crate::Error::config(format!(
                "Directory base URL must use HTTP or HTTPS scheme. Got: {}",
                self.base_url
            )));
        }
        if self.client_identity.is_empty() {
            return Err(crate::Error::config("Client identity cannot be empty"));
        }
        Ok(())
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://pi.hole:8080/api".to_string(),
            secret: String::new(),
            client_identity: default_client_identity(),
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path to the state file
    pub path: String,
}

impl StateConfig {
    /// Validate the state configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.path.is_empty() {
            return Err(crate::Error::config("State file path cannot be empty"));
        }
        Ok(())
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: "/state/pihole.state".to_string(),
        }
    }
}

/// Reconciliation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum time a no-longer-desired record is kept before deletion
    /// (in seconds)
    ///
    /// Absorbs workload restarts without flapping records.
    #[serde(default = "default_reap_grace_secs")]
    pub reap_grace_secs: u64,

    /// Workload label carrying the declared records
    #[serde(default = "default_label_key")]
    pub label_key: String,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.label_key.is_empty() {
            return Err(crate::Error::config("Label key cannot be empty"));
        }
        check_period("Reap grace period", self.reap_grace_secs)?;
        Ok(())
    }

    /// Reap grace period as a chrono duration, saturating at the maximum
    pub fn reap_grace(&self) -> chrono::Duration {
        i64::try_from(self.reap_grace_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reap_grace_secs: default_reap_grace_secs(),
            label_key: default_label_key(),
        }
    }
}

/// What drives reconciliation passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Fixed-interval full passes only
    #[default]
    Interval,
    /// Runtime events drive incremental passes, with a full-pass safety net
    Events,
}

/// How pending workloads are released to an incremental pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowPolicy {
    /// Flush after the window passes with no new events
    #[default]
    Debounce,
    /// Flush on a fixed tick regardless of event activity
    Batch,
}

/// Trigger scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger mode
    #[serde(default)]
    pub mode: TriggerMode,

    /// Full reconciliation interval in interval mode (in seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Debounce or batch flushing
    #[serde(default)]
    pub window: WindowPolicy,

    /// Debounce quiet period or batch tick (in milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Workload actions that mark a workload dirty
    #[serde(default = "default_actions")]
    pub actions: Vec<WorkloadAction>,

    /// Full reconciliation interval in event mode (in seconds)
    #[serde(default = "default_safety_net_secs")]
    pub safety_net_secs: u64,

    /// Delay before re-subscribing after the event stream fails (in seconds)
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,

    /// Time tasks get to exit after shutdown is requested (in seconds)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl TriggerConfig {
    /// Validate the trigger configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config("Reconciliation interval must be > 0"));
        }
        check_period("Reconciliation interval", self.interval_secs)?;
        check_period("Safety-net interval", self.safety_net_secs)?;
        check_period("Event window", self.window_ms / 1000)?;
        check_period("Reconnect backoff", self.reconnect_backoff_secs)?;
        check_period("Shutdown grace", self.shutdown_grace_secs)?;
        if self.mode == TriggerMode::Events {
            if self.window_ms == 0 {
                return Err(crate::Error::config("Event window must be > 0"));
            }
            if self.safety_net_secs == 0 {
                return Err(crate::Error::config("Safety-net interval must be > 0"));
            }
            if self.actions.is_empty() {
                return Err(crate::Error::config(
                    "Event mode needs at least one workload action",
                ));
            }
        }
        Ok(())
    }

    /// Full-pass period for the active mode
    pub fn full_pass_period(&self) -> Duration {
        match self.mode {
            TriggerMode::Interval => Duration::from_secs(self.interval_secs),
            TriggerMode::Events => Duration::from_secs(self.safety_net_secs),
        }
    }

    /// Debounce quiet period or batch tick
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Event stream reconnect backoff
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    /// Shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            mode: TriggerMode::default(),
            interval_secs: default_interval_secs(),
            window: WindowPolicy::default(),
            window_ms: default_window_ms(),
            actions: default_actions(),
            safety_net_secs: default_safety_net_secs(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_client_identity() -> String {
    DEFAULT_CLIENT_IDENTITY.to_string()
}

fn default_label_key() -> String {
    DEFAULT_LABEL_KEY.to_string()
}

fn default_reap_grace_secs() -> u64 {
    300
}

fn default_interval_secs() -> u64 {
    10
}

fn default_window_ms() -> u64 {
    2_000
}

fn default_actions() -> Vec<WorkloadAction> {
    WorkloadAction::ALL.to_vec()
}

fn default_safety_net_secs() -> u64 {
    300
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    10
}
