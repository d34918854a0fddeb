//! Media resource capabilities
//!
//! The control plane never touches audio. Players, recorders and DTMF
//! components are supplied by the embedding media plane through the traits
//! below and are recycled through [`ResourcePool`](crate::pool::ResourcePool)s.
//! Each resource accepts a single listener at a time; registering a second
//! one fails with [`ResourceError::TooManyListeners`].

pub mod group;
pub mod resources;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::pool::Poolable;

pub use group::{MediaGroup, ResourceKind};
pub use resources::{ResourcesPool, ResourcesPoolBuilder};

/// Errors reported by media resources
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Resource {kind} unavailable: {reason}")]
    Unavailable { kind: String, reason: String },

    #[error("Malformed media URI: {uri}")]
    MalformedUri { uri: String },

    #[error("Too many listeners on {kind}")]
    TooManyListeners { kind: String },

    #[error("Resource {kind} not supported by this endpoint")]
    NotSupported { kind: String },

    #[error("Resource {kind} failed: {reason}")]
    Failed { kind: String, reason: String },
}

impl ResourceError {
    pub fn unavailable(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable { kind: kind.into(), reason: reason.into() }
    }

    pub fn malformed_uri(uri: impl Into<String>) -> Self {
        Self::MalformedUri { uri: uri.into() }
    }

    pub fn too_many_listeners(kind: impl Into<String>) -> Self {
        Self::TooManyListeners { kind: kind.into() }
    }

    pub fn not_supported(kind: impl Into<String>) -> Self {
        Self::NotSupported { kind: kind.into() }
    }

    pub fn failed(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed { kind: kind.into(), reason: reason.into() }
    }
}

/// Why a recorder stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStop {
    /// Post-speech silence ended the recording
    Completed,
    /// The pre-speech timer expired without speech
    NoSpeech,
    /// The maximum record time elapsed
    MaxDuration,
    /// Stopped by `deactivate`
    Deactivated,
}

/// Events raised by media resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    PlayerStarted,
    /// The current segment finished or the player was deactivated
    PlayerStopped,
    PlayerFailed { reason: String },
    RecorderStarted,
    RecorderStopped(RecordStop),
    RecorderFailed { reason: String },
    SpeechDetected,
    /// A DTMF tone was detected
    Tone(char),
}

impl fmt::Display for MediaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaEvent::PlayerStarted => f.write_str("player-started"),
            MediaEvent::PlayerStopped => f.write_str("player-stopped"),
            MediaEvent::PlayerFailed { reason } => write!(f, "player-failed({})", reason),
            MediaEvent::RecorderStarted => f.write_str("recorder-started"),
            MediaEvent::RecorderStopped(stop) => write!(f, "recorder-stopped({:?})", stop),
            MediaEvent::RecorderFailed { reason } => write!(f, "recorder-failed({})", reason),
            MediaEvent::SpeechDetected => f.write_str("speech-detected"),
            MediaEvent::Tone(tone) => write!(f, "tone({})", tone),
        }
    }
}

/// Receiver of media events
pub trait MediaListener: Send + Sync {
    fn on_media_event(&self, event: MediaEvent);
}

pub type ListenerRef = Arc<dyn MediaListener>;

/// Announcement player
pub trait Player: Poolable {
    fn set_url(&mut self, url: &str) -> Result<(), ResourceError>;
    fn set_initial_delay(&mut self, delay: Duration);
    fn activate(&mut self) -> Result<(), ResourceError>;
    fn deactivate(&mut self);
    fn add_listener(&mut self, listener: ListenerRef) -> Result<(), ResourceError>;
    fn remove_listener(&mut self);
}

/// Speech recorder
pub trait Recorder: Poolable {
    fn set_max_record_time(&mut self, max: Duration);
    fn set_pre_speech_timer(&mut self, timer: Duration);
    fn set_post_speech_timer(&mut self, timer: Duration);
    fn set_record_file(&mut self, uri: &str, append: bool) -> Result<(), ResourceError>;
    fn activate(&mut self) -> Result<(), ResourceError>;
    fn deactivate(&mut self);
    fn add_listener(&mut self, listener: ListenerRef) -> Result<(), ResourceError>;
    fn remove_listener(&mut self);
    /// Remove a partial recording before a retry
    fn discard(&mut self, uri: &str) -> Result<(), ResourceError>;
}

/// DTMF detector with a digit buffer
pub trait DtmfDetector: Poolable {
    fn activate(&mut self) -> Result<(), ResourceError>;
    fn deactivate(&mut self);
    fn add_listener(&mut self, listener: ListenerRef) -> Result<(), ResourceError>;
    fn remove_listener(&mut self);
    /// Drop buffered digits
    fn clear_digits(&mut self);
    /// Deliver buffered digits to the listener
    fn flush_buffer(&mut self);
}

/// DTMF generator
pub trait DtmfGenerator: Poolable {
    fn set_digits(&mut self, digits: &str) -> Result<(), ResourceError>;
    fn set_tone_duration(&mut self, duration: Duration);
    fn activate(&mut self) -> Result<(), ResourceError>;
    fn deactivate(&mut self);
}
