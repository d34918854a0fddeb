//! Outbound message surface
//!
//! The engine hands responses, notifications and gateway-initiated commands
//! to an [`MgcpProvider`]; the transport layer encodes and sends them.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::message::{MgcpCommand, MgcpResponse, NotifyMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Response(MgcpResponse),
    Notify(NotifyMessage),
    /// Command the gateway sends on its own, such as DLCX after a timeout
    Command(MgcpCommand),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider closed")]
    Closed,
}

pub trait MgcpProvider: Send + Sync {
    fn send(&self, message: OutboundMessage) -> Result<(), ProviderError>;
}

/// Provider that forwards everything onto an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelProvider {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelProvider {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MgcpProvider for ChannelProvider {
    fn send(&self, message: OutboundMessage) -> Result<(), ProviderError> {
        trace!(?message, "outbound message");
        self.tx.send(message).map_err(|_| ProviderError::Closed)
    }
}
