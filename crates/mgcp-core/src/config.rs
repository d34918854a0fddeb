//! Gateway configuration
//!
//! Configuration is read from a TOML file with `RVOIP_MGCP__<SECTION>__<KEY>`
//! environment overrides layered on top. Every field has a default so an
//! empty file is a valid configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::Format;
use crate::endpoint::EndpointProfile;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Domain appended to endpoint names in notifications
    pub domain: String,
    /// Address advertised in local session descriptions
    pub bind_address: String,
    pub scheduler: SchedulerSettings,
    pub media: MediaSettings,
    pub pools: PoolSettings,
    pub signals: SignalSettings,
    pub transactions: TransactionSettings,
    pub endpoints: Vec<EndpointGroup>,
    pub logging: LogSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            domain: "127.0.0.1:2427".to_string(),
            bind_address: "127.0.0.1".to_string(),
            scheduler: SchedulerSettings::default(),
            media: MediaSettings::default(),
            pools: PoolSettings::default(),
            signals: SignalSettings::default(),
            transactions: TransactionSettings::default(),
            endpoints: vec![
                EndpointGroup::new("rvoip/ann", EndpointProfile::Announcement, 4),
                EndpointGroup::new("rvoip/ivr", EndpointProfile::Ivr, 4),
                EndpointGroup::new("rvoip/cnf", EndpointProfile::Conference, 2),
                EndpointGroup::new("rvoip/bridge", EndpointProfile::Bridge, 4),
                EndpointGroup::new("rvoip/relay", EndpointProfile::PacketRelay, 4),
            ],
            logging: LogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Tick period of the control scheduler
    pub control_tick_ms: u64,
    /// Tick period of the media scheduler
    pub media_tick_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            control_tick_ms: 10,
            media_tick_ms: 5,
        }
    }
}

/// Preferred G.711 law, set through endpoint configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// μ-law
    Pcmu,
    /// A-law
    Pcma,
}

impl Encoding {
    /// Formats offered by an endpoint, preferred law first
    pub fn formats(self) -> Vec<Format> {
        match self {
            Encoding::Pcmu => vec![Format::pcmu(), Format::pcma(), Format::telephone_event()],
            Encoding::Pcma => vec![Format::pcma(), Format::pcmu(), Format::telephone_event()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub rtp_port_min: u16,
    pub rtp_port_max: u16,
    /// A half-open connection still unanswered after this long is deleted
    pub half_open_timeout_ms: u64,
    pub preferred_encoding: Encoding,
    /// Mixing cycle period
    pub frame_period_ms: u64,
    /// Samples per mixed frame
    pub frame_samples: usize,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            rtp_port_min: 34534,
            rtp_port_max: 65534,
            half_open_timeout_ms: 30_000,
            preferred_encoding: Encoding::Pcmu,
            frame_period_ms: 20,
            frame_samples: 160,
        }
    }
}

impl MediaSettings {
    pub fn half_open_timeout(&self) -> Duration {
        Duration::from_millis(self.half_open_timeout_ms)
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.frame_period_ms)
    }
}

/// Initial size and optional hard limit of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLimit {
    pub initial: usize,
    #[serde(default)]
    pub max: Option<usize>,
}

impl PoolLimit {
    pub const fn new(initial: usize, max: Option<usize>) -> Self {
        Self { initial, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub connections: PoolLimit,
    pub players: PoolLimit,
    pub recorders: PoolLimit,
    pub detectors: PoolLimit,
    pub generators: PoolLimit,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            connections: PoolLimit::new(32, None),
            players: PoolLimit::new(8, None),
            recorders: PoolLimit::new(4, None),
            detectors: PoolLimit::new(8, None),
            generators: PoolLimit::new(4, None),
        }
    }
}

/// Defaults applied to media signals when a request leaves them out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    /// Pause between consecutive prompt segments
    pub segment_interval_ms: u64,
    pub pre_speech_timer_ms: u64,
    pub post_speech_timer_ms: u64,
    pub total_record_length_ms: u64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            segment_interval_ms: 1000,
            pre_speech_timer_ms: 3000,
            post_speech_timer_ms: 2000,
            total_record_length_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    /// Upper bound on the time a command's task chain may take
    pub chain_deadline_ms: u64,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self { chain_deadline_ms: 5000 }
    }
}

/// A run of endpoints named `<prefix>/1 .. <prefix>/<count>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointGroup {
    pub prefix: String,
    pub profile: EndpointProfile,
    pub count: usize,
}

impl EndpointGroup {
    pub fn new(prefix: impl Into<String>, profile: EndpointProfile, count: usize) -> Self {
        Self { prefix: prefix.into(), profile, count }
    }

    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.count).map(move |n| format!("{}/{}", self.prefix, n))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl GatewayConfig {
    /// Load from a file, applying `RVOIP_MGCP__...` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("RVOIP_MGCP").separator("__"))
            .build()?;
        let config: GatewayConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.media.rtp_port_min > self.media.rtp_port_max {
            return Err(ConfigError::Invalid(format!(
                "rtp port range {}..{} is empty",
                self.media.rtp_port_min, self.media.rtp_port_max
            )));
        }
        if self.scheduler.control_tick_ms == 0 || self.scheduler.media_tick_ms == 0 {
            return Err(ConfigError::Invalid("scheduler tick periods must be non-zero".into()));
        }
        if self.media.frame_period_ms == 0 || self.media.frame_samples == 0 {
            return Err(ConfigError::Invalid("frame period and size must be non-zero".into()));
        }

        let mut prefixes = HashSet::new();
        for group in &self.endpoints {
            if group.prefix.is_empty() || group.prefix.contains(&['*', '$', '@'][..]) {
                return Err(ConfigError::Invalid(format!("invalid endpoint prefix '{}'", group.prefix)));
            }
            if !prefixes.insert(group.prefix.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate endpoint prefix '{}'", group.prefix)));
            }
        }
        Ok(())
    }
}
