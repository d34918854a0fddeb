//! Media signals
//!
//! A signal is a scripted, multi-phase media operation requested through
//! RQNT and run against one endpoint. Only play-record (`AU/pr`) is
//! implemented.

pub mod options;
pub mod play_record;
pub mod playlist;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::SignalSettings;
use crate::media::{MediaGroup, ResourceError};
use crate::notify::{EventSink, ObservedEvent};
use crate::scheduler::Scheduler;

pub use options::PlayRecordOptions;
pub use play_record::{PlayRecord, PlayRecordState};
pub use playlist::Playlist;

/// Signal errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("Unknown signal {name}")]
    UnknownSignal { name: String },

    #[error("Invalid signal request: {reason}")]
    Malformed { reason: String },

    #[error("Invalid option {option}: {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("Signal {name} was already executed")]
    AlreadyExecuted { name: String },

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl SignalError {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownSignal { name: name.into() }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }

    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption { option: option.into(), reason: reason.into() }
    }
}

/// Return codes carried in `rc=` of completion events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    UnspecifiedFailure,
    BadAudioId,
    NoSpeech,
    SpokeTooLong,
    MaxAttemptsExceeded,
}

impl ReturnCode {
    pub fn code(self) -> u16 {
        match self {
            ReturnCode::Success => 100,
            ReturnCode::UnspecifiedFailure => 300,
            ReturnCode::BadAudioId => 301,
            ReturnCode::NoSpeech => 327,
            ReturnCode::SpokeTooLong => 328,
            ReturnCode::MaxAttemptsExceeded => 330,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A running or finished signal
pub trait Signal: Send + Sync {
    fn name(&self) -> &str;

    /// Start the signal. Runs its first phases synchronously.
    fn execute(&self) -> Result<(), SignalError>;

    /// Stop the signal; a no-op once it has finished
    fn cancel(&self);

    fn is_active(&self) -> bool;
}

/// A parsed signal request such as `AU/pr(ip=hello.wav na=2)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRequest {
    pub package: String,
    pub name: String,
    pub params: Vec<(String, String)>,
}

impl SignalRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }
}

/// Parse the value of an `S:` line. An empty value yields `None`.
pub fn parse_signal_request(value: &str) -> Result<Option<SignalRequest>, SignalError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    let (symbol, body) = match value.find('(') {
        Some(open) => {
            let body = value[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| SignalError::malformed(format!("unbalanced parameters in '{}'", value)))?;
            (&value[..open], body)
        }
        None => (value, ""),
    };

    let (package, name) = symbol
        .trim()
        .split_once('/')
        .ok_or_else(|| SignalError::malformed(format!("signal '{}' has no package", symbol)))?;

    let mut params = Vec::new();
    for token in body.split_whitespace() {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| SignalError::malformed(format!("parameter '{}' has no value", token)))?;
        params.push((key.to_ascii_lowercase(), value.trim_matches('"').to_string()));
    }

    Ok(Some(SignalRequest { package: package.to_string(), name: name.to_string(), params }))
}

/// Everything a signal needs from its endpoint
pub struct SignalContext {
    pub endpoint: String,
    pub media: Arc<Mutex<MediaGroup>>,
    pub scheduler: Scheduler,
    pub sink: Arc<dyn EventSink>,
    pub settings: SignalSettings,
}

/// Build the signal named by `request`
pub fn create_signal(request: &SignalRequest, context: SignalContext) -> Result<Arc<dyn Signal>, SignalError> {
    if request.package.eq_ignore_ascii_case("AU") && request.name.eq_ignore_ascii_case("pr") {
        let options = PlayRecordOptions::parse(request, &context.settings)?;
        let signal: Arc<dyn Signal> = PlayRecord::new(options, context);
        Ok(signal)
    } else {
        Err(SignalError::unknown(format!("{}/{}", request.package, request.name)))
    }
}

/// Event sink that keeps everything it receives, for tests and diagnostics
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: ObservedEvent) {
        self.events.lock().push(event);
    }
}
