//! Per-session configuration with field-by-field merge against a process
//! default, following a "zero means inherit" convention.

use std::sync::OnceLock;
use std::time::Duration;

/// `SessionConfig { BufferCapacity, ClientTimeout, KeepAlive }`, plus the
/// advanced `PollTimeout` field controlling server long-poll duration.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Capacity of the non-terminal event buffer. `0` is a valid,
    /// synchronous-rendezvous buffer.
    pub buffer_capacity: usize,
    /// How long a session may sit with zero outstanding pollers before the
    /// idle detector commits `EndCause::ClientTimeout`.
    pub client_timeout: Duration,
    /// How long the manager keeps a terminated session's registry entry
    /// alive so one last in-flight `Poll` can still observe the terminal.
    pub keep_alive: Duration,
    /// How long a single `Poll` may block server-side waiting for the first
    /// event of a batch. `None` means block until `end_signal` closes.
    pub poll_timeout: Option<Duration>,
}

impl SessionConfig {
    fn validate(&self) -> bool {
        self.client_timeout > Duration::ZERO && self.keep_alive > Duration::ZERO
    }

    /// Copy present fields from `src` onto `self`. A zero duration or `None`
    /// `poll_timeout` in `src` means "leave `self` unchanged" — the merge
    /// convention used throughout this layer.
    fn copy_from(&mut self, src: &PartialSessionConfig, strict: bool) -> bool {
        if strict && !src.validate_if_set() {
            return false;
        }
        if let Some(cap) = src.buffer_capacity {
            self.buffer_capacity = cap;
        }
        if let Some(t) = src.client_timeout {
            if t > Duration::ZERO {
                self.client_timeout = t;
            }
        }
        if let Some(t) = src.keep_alive {
            if t > Duration::ZERO {
                self.keep_alive = t;
            }
        }
        if src.poll_timeout.is_some() {
            self.poll_timeout = src.poll_timeout;
        }
        true
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10,
            client_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(10),
            poll_timeout: None,
        }
    }
}

/// A sparse override used at call sites: every field is optional, and
/// absence means "inherit the process default".
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialSessionConfig {
    pub buffer_capacity: Option<usize>,
    pub client_timeout: Option<Duration>,
    pub keep_alive: Option<Duration>,
    pub poll_timeout: Option<Duration>,
}

impl PartialSessionConfig {
    fn validate_if_set(&self) -> bool {
        self.client_timeout.is_none_or(|t| t > Duration::ZERO)
            && self.keep_alive.is_none_or(|t| t > Duration::ZERO)
    }
}

static DEFAULT_CONFIG: OnceLock<std::sync::RwLock<SessionConfig>> = OnceLock::new();

fn default_config_cell() -> &'static std::sync::RwLock<SessionConfig> {
    DEFAULT_CONFIG.get_or_init(|| std::sync::RwLock::new(SessionConfig::default()))
}

/// Read the process-wide default `SessionConfig`.
pub fn default_session_config() -> SessionConfig {
    *default_config_cell().read().unwrap_or_else(|e| e.into_inner())
}

/// Override the process-wide default. Returns `false` (and leaves the
/// default untouched) if `cfg` fails validation.
pub fn set_default_session_config(cfg: SessionConfig) -> bool {
    if !cfg.validate() {
        return false;
    }
    let mut guard = default_config_cell().write().unwrap_or_else(|e| e.into_inner());
    *guard = cfg;
    true
}

/// `mergeConfig`: overlay `cfg` (if any) onto the current process default,
/// field by field.
pub fn merge_config(cfg: Option<PartialSessionConfig>) -> SessionConfig {
    let mut merged = default_session_config();
    if let Some(cfg) = cfg {
        merged.copy_from(&cfg, false);
    }
    merged
}
