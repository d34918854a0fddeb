//! Notification requests and observed-event delivery
//!
//! An RQNT stores a [`NotificationRequest`] on the endpoint. Signals report
//! what happened through an [`EventSink`]; the [`EndpointNotifier`] turns the
//! events the call agent asked for into NTFY messages, and the
//! [`CallAgentLink`] reports connections the gateway removes on its own.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use crate::connection::{CallId, ConnectionId, ConnectionStats};
use crate::message::{MgcpCommand, NotifyMessage, Parameter, Verb};
use crate::provider::{MgcpProvider, OutboundMessage};

/// Events the call agent asked to be told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub request_id: String,
    pub notified_entity: Option<String>,
    /// Event symbols such as `AU/oc`, without their action part
    pub requested_events: Vec<String>,
}

impl NotificationRequest {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), notified_entity: None, requested_events: Vec::new() }
    }

    pub fn with_notified_entity(mut self, entity: Option<String>) -> Self {
        self.notified_entity = entity;
        self
    }

    /// Parse an `R:` value like `AU/oc(N),AU/of(N)`
    pub fn with_requested_events(mut self, events: &str) -> Self {
        self.requested_events = split_top_level(events)
            .into_iter()
            .map(|event| match event.find('(') {
                Some(open) => event[..open].trim().to_string(),
                None => event.trim().to_string(),
            })
            .filter(|event| !event.is_empty())
            .collect();
        self
    }

    /// Whether `event` was requested; unqualified requests match any package
    pub fn is_requested(&self, event: &ObservedEvent) -> bool {
        self.requested_events.iter().any(|requested| match requested.split_once('/') {
            Some((package, name)) => {
                (package == "*" || package.eq_ignore_ascii_case(&event.package))
                    && name.eq_ignore_ascii_case(&event.name)
            }
            None => requested.eq_ignore_ascii_case(&event.name),
        })
    }
}

/// Split on commas that are not inside parentheses
fn split_top_level(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in value.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

/// An event observed on an endpoint, e.g. `AU/oc(rc=100 na=1)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    pub package: String,
    pub name: String,
    pub params: Vec<(String, String)>,
}

impl ObservedEvent {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self { package: package.into(), name: name.into(), params: Vec::new() }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
    }

    /// `package/name`
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.package, self.name)
    }
}

impl fmt::Display for ObservedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.name)?;
        if !self.params.is_empty() {
            f.write_str("(")?;
            for (index, (key, value)) in self.params.iter().enumerate() {
                if index > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{}={}", key, value)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Receiver of events observed by signals
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: ObservedEvent);
}

/// Sends requested events to the call agent as NTFY
pub struct EndpointNotifier {
    endpoint: String,
    request: NotificationRequest,
    provider: Arc<dyn MgcpProvider>,
    transactions: Arc<AtomicU32>,
}

impl EndpointNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        request: NotificationRequest,
        provider: Arc<dyn MgcpProvider>,
        transactions: Arc<AtomicU32>,
    ) -> Self {
        Self { endpoint: endpoint.into(), request, provider, transactions }
    }
}

impl EventSink for EndpointNotifier {
    fn on_event(&self, event: ObservedEvent) {
        if !self.request.is_requested(&event) {
            debug!(endpoint = %self.endpoint, event = %event, "event not requested, dropping");
            return;
        }

        let message = NotifyMessage {
            transaction_id: self.transactions.fetch_add(1, Ordering::Relaxed),
            endpoint: self.endpoint.clone(),
            request_id: self.request.request_id.clone(),
            notified_entity: self.request.notified_entity.clone(),
            observed_events: vec![event.to_string()],
        };
        debug!(endpoint = %self.endpoint, event = %event, "notifying call agent");
        if let Err(e) = self.provider.send(OutboundMessage::Notify(message)) {
            warn!(endpoint = %self.endpoint, "Failed to send notification: {}", e);
        }
    }
}

/// Reason reported when a half-open connection gets no answer in time
pub const REASON_HALF_OPEN_TIMEOUT: &str = "902 Loss of lower layer connectivity";

/// Gateway-initiated commands towards the call agent
pub struct CallAgentLink {
    domain: String,
    provider: Arc<dyn MgcpProvider>,
    transactions: Arc<AtomicU32>,
}

impl CallAgentLink {
    /// `transactions` is shared with NTFY so ids never collide
    pub fn new(domain: impl Into<String>, provider: Arc<dyn MgcpProvider>, transactions: Arc<AtomicU32>) -> Self {
        Self { domain: domain.into(), provider, transactions }
    }

    fn qualified(&self, endpoint: &str) -> String {
        if self.domain.is_empty() {
            endpoint.to_string()
        } else {
            format!("{}@{}", endpoint, self.domain)
        }
    }

    /// Send DLCX for a connection the gateway deleted, with reason code `E`
    pub fn connection_deleted(
        &self,
        endpoint: &str,
        call_id: Option<&CallId>,
        connection: ConnectionId,
        stats: &ConnectionStats,
        reason: &str,
    ) {
        let transaction_id = self.transactions.fetch_add(1, Ordering::Relaxed);
        let mut command = MgcpCommand::new(Verb::DeleteConnection, transaction_id, self.qualified(endpoint))
            .with_param(Parameter::ConnectionId, connection.to_string())
            .with_param(Parameter::ReasonCode, reason)
            .with_param(Parameter::ConnectionParameters, stats.to_string());
        if let Some(call_id) = call_id {
            command = command.with_param(Parameter::CallId, call_id.as_str());
        }

        debug!(endpoint, connection = %connection, reason, "reporting deleted connection");
        if let Err(e) = self.provider.send(OutboundMessage::Command(command)) {
            warn!(endpoint, connection = %connection, "Failed to send DLCX: {}", e);
        }
    }
}
