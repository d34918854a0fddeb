//! Transaction / action engine
//!
//! Every inbound command opens a [`Transaction`]. The [`ActionSelector`]
//! picks the singleton [`Action`] bound to the command's verb and starts its
//! task chain with a fresh [`TxContext`]. The chain either completes and the
//! built response is sent, or fails and the action's rollback chain runs and
//! an error response is sent. Either way the transaction answers once.

pub mod action;
pub mod commands;
pub mod context;
pub mod selector;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::connection::{ConnectionError, SdpError};
use crate::endpoint::EndpointError;
use crate::media::ResourceError;
use crate::message::{MgcpCommand, MgcpResponse, ResponseCode, Verb};
use crate::naming::NamingError;
use crate::pool::PoolError;
use crate::provider::{MgcpProvider, OutboundMessage};
use crate::scheduler::ChainFailure;
use crate::signal::SignalError;

pub use action::Action;
pub use context::{ActionEnv, TxContext};
pub use selector::ActionSelector;

/// A command failure with the response code it maps to
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: ResponseCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::ProtocolError, message)
    }

    pub fn missing(parameter: &str) -> Self {
        Self::protocol(format!("Missing parameter {}", parameter))
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::TransientError, message)
    }

    pub fn response(&self, transaction_id: u32) -> MgcpResponse {
        MgcpResponse::new(self.code, transaction_id).with_message(self.message.clone())
    }
}

impl From<NamingError> for CommandError {
    fn from(error: NamingError) -> Self {
        let code = match error {
            NamingError::Unavailable { .. } => ResponseCode::EndpointNotAvailable,
            NamingError::InvalidName { .. } => ResponseCode::ProtocolError,
            NamingError::UnknownEndpoint { .. } | NamingError::Duplicate { .. } => ResponseCode::EndpointUnknown,
        };
        Self::new(code, error.to_string())
    }
}

impl From<PoolError> for CommandError {
    fn from(error: PoolError) -> Self {
        Self::new(ResponseCode::InsufficientResources, error.to_string())
    }
}

impl From<ResourceError> for CommandError {
    fn from(error: ResourceError) -> Self {
        Self::new(ResponseCode::InsufficientResources, error.to_string())
    }
}

impl From<ConnectionError> for CommandError {
    fn from(error: ConnectionError) -> Self {
        let code = match &error {
            ConnectionError::NoPortAvailable => ResponseCode::InsufficientResources,
            ConnectionError::IllegalState { .. } | ConnectionError::WrongType { .. } => {
                ResponseCode::TransientError
            }
            ConnectionError::Negotiation(SdpError::NoCommonCodec)
            | ConnectionError::Negotiation(SdpError::UnsupportedTransport { .. }) => {
                ResponseCode::CodecNegotiationFailure
            }
            ConnectionError::Negotiation(_) => ResponseCode::ProtocolError,
        };
        Self::new(code, error.to_string())
    }
}

impl From<EndpointError> for CommandError {
    fn from(error: EndpointError) -> Self {
        match error {
            EndpointError::NotStarted { .. } => {
                Self::new(ResponseCode::EndpointNotAvailable, error.to_string())
            }
            EndpointError::ConnectionNotFound { .. } => {
                Self::new(ResponseCode::IncorrectConnectionId, error.to_string())
            }
            EndpointError::Pool(e) => e.into(),
            EndpointError::Connection(e) => e.into(),
            EndpointError::Resource(e) => e.into(),
        }
    }
}

impl From<SignalError> for CommandError {
    fn from(error: SignalError) -> Self {
        let code = match &error {
            SignalError::UnknownSignal { .. } => ResponseCode::NoSuchEventOrSignal,
            SignalError::Malformed { .. } | SignalError::InvalidOption { .. } => ResponseCode::ProtocolError,
            SignalError::AlreadyExecuted { .. } | SignalError::Resource(_) => ResponseCode::TransientError,
        };
        Self::new(code, error.to_string())
    }
}

impl From<ChainFailure<CommandError>> for CommandError {
    fn from(failure: ChainFailure<CommandError>) -> Self {
        match failure {
            ChainFailure::Step(error) => error,
            other => Self::transient(other.to_string()),
        }
    }
}

/// One in-flight command/response exchange
#[derive(Clone)]
pub struct Transaction {
    id: u32,
    verb: Verb,
    provider: Arc<dyn MgcpProvider>,
    inflight: Arc<DashMap<u32, Verb>>,
    responded: Arc<AtomicBool>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("verb", &self.verb)
            .field("responded", &self.is_responded())
            .finish()
    }
}

impl Transaction {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn is_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// Send the response. Only the first call sends; later calls are
    /// dropped and return `false`.
    pub fn respond(&self, response: MgcpResponse) -> bool {
        if self.responded.swap(true, Ordering::AcqRel) {
            warn!(transaction = self.id, code = response.code.code(), "duplicate response suppressed");
            return false;
        }

        self.inflight.remove(&self.id);
        debug!(transaction = self.id, verb = %self.verb, code = response.code.code(), "sending response");
        if let Err(e) = self.provider.send(OutboundMessage::Response(response)) {
            warn!(transaction = self.id, "Failed to send response: {}", e);
        }
        true
    }
}

/// Tracks transactions in flight by id
pub struct TransactionManager {
    provider: Arc<dyn MgcpProvider>,
    inflight: Arc<DashMap<u32, Verb>>,
}

impl TransactionManager {
    pub fn new(provider: Arc<dyn MgcpProvider>) -> Self {
        Self { provider, inflight: Arc::new(DashMap::new()) }
    }

    /// Open a transaction for `command`, or `None` if one with the same id
    /// is still in flight
    pub fn begin(&self, command: &MgcpCommand) -> Option<Transaction> {
        match self.inflight.entry(command.transaction_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(command.verb);
                Some(Transaction {
                    id: command.transaction_id,
                    verb: command.verb,
                    provider: self.provider.clone(),
                    inflight: self.inflight.clone(),
                    responded: Arc::new(AtomicBool::new(false)),
                })
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChannelProvider;

    #[test]
    fn test_transaction_responds_once() {
        let (provider, mut rx) = ChannelProvider::new();
        let manager = TransactionManager::new(Arc::new(provider));
        let command = MgcpCommand::new(Verb::NotificationRequest, 42, "ivr/1");

        let tx = manager.begin(&command).unwrap();
        assert!(manager.begin(&command).is_none());
        assert_eq!(manager.in_flight(), 1);

        assert!(tx.respond(MgcpResponse::new(ResponseCode::TransactionExecuted, 42)));
        assert!(!tx.clone().respond(MgcpResponse::new(ResponseCode::TransientError, 42)));
        assert_eq!(manager.in_flight(), 0);

        assert!(matches!(rx.try_recv(), Ok(OutboundMessage::Response(r)) if r.code == ResponseCode::TransactionExecuted));
        assert!(rx.try_recv().is_err());

        // The id is free again once answered
        assert!(manager.begin(&command).is_some());
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(CommandError::from(NamingError::unknown("x")).code, ResponseCode::EndpointUnknown);
        assert_eq!(
            CommandError::from(NamingError::Unavailable { name: "x/$".into() }).code,
            ResponseCode::EndpointNotAvailable
        );
        assert_eq!(
            CommandError::from(ConnectionError::Negotiation(SdpError::NoCommonCodec)).code,
            ResponseCode::CodecNegotiationFailure
        );
        assert_eq!(CommandError::from(ConnectionError::NoPortAvailable).code, ResponseCode::InsufficientResources);
        assert_eq!(
            CommandError::from(SignalError::unknown("AU/xx")).code,
            ResponseCode::NoSuchEventOrSignal
        );
        assert_eq!(
            CommandError::from(ChainFailure::<CommandError>::TimedOut).code,
            ResponseCode::TransientError
        );
    }
}
