//! Parsed MGCP commands and responses
//!
//! Wire encoding belongs to the transport layer; the engine only sees these
//! structured values.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Command verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    CreateConnection,
    ModifyConnection,
    DeleteConnection,
    NotificationRequest,
    Notify,
    EndpointConfiguration,
    AuditConnection,
    AuditEndpoint,
    RestartInProgress,
}

impl Verb {
    pub fn code(self) -> &'static str {
        match self {
            Verb::CreateConnection => "CRCX",
            Verb::ModifyConnection => "MDCX",
            Verb::DeleteConnection => "DLCX",
            Verb::NotificationRequest => "RQNT",
            Verb::Notify => "NTFY",
            Verb::EndpointConfiguration => "EPCF",
            Verb::AuditConnection => "AUCX",
            Verb::AuditEndpoint => "AUEP",
            Verb::RestartInProgress => "RSIP",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRCX" => Ok(Verb::CreateConnection),
            "MDCX" => Ok(Verb::ModifyConnection),
            "DLCX" => Ok(Verb::DeleteConnection),
            "RQNT" => Ok(Verb::NotificationRequest),
            "NTFY" => Ok(Verb::Notify),
            "EPCF" => Ok(Verb::EndpointConfiguration),
            "AUCX" => Ok(Verb::AuditConnection),
            "AUEP" => Ok(Verb::AuditEndpoint),
            "RSIP" => Ok(Verb::RestartInProgress),
            other => Err(format!("unknown verb '{}'", other)),
        }
    }
}

/// Command and response parameter names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Parameter {
    CallId,
    ConnectionId,
    Mode,
    ReasonCode,
    RequestId,
    RequestedEvents,
    SignalRequests,
    NotifiedEntity,
    ObservedEvents,
    LocalOptions,
    SpecificEndpointId,
    SecondEndpointId,
    SecondConnectionId,
    ConnectionParameters,
    BearerInformation,
    RequestedInfo,
}

impl Parameter {
    pub fn code(self) -> &'static str {
        match self {
            Parameter::CallId => "C",
            Parameter::ConnectionId => "I",
            Parameter::Mode => "M",
            Parameter::ReasonCode => "E",
            Parameter::RequestId => "X",
            Parameter::RequestedEvents => "R",
            Parameter::SignalRequests => "S",
            Parameter::NotifiedEntity => "N",
            Parameter::ObservedEvents => "O",
            Parameter::LocalOptions => "L",
            Parameter::SpecificEndpointId => "Z",
            Parameter::SecondEndpointId => "Z2",
            Parameter::SecondConnectionId => "I2",
            Parameter::ConnectionParameters => "P",
            Parameter::BearerInformation => "B",
            Parameter::RequestedInfo => "F",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Parameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parameter = match s.trim().to_ascii_uppercase().as_str() {
            "C" => Parameter::CallId,
            "I" => Parameter::ConnectionId,
            "M" => Parameter::Mode,
            "E" => Parameter::ReasonCode,
            "X" => Parameter::RequestId,
            "R" => Parameter::RequestedEvents,
            "S" => Parameter::SignalRequests,
            "N" => Parameter::NotifiedEntity,
            "O" => Parameter::ObservedEvents,
            "L" => Parameter::LocalOptions,
            "Z" => Parameter::SpecificEndpointId,
            "Z2" => Parameter::SecondEndpointId,
            "I2" => Parameter::SecondConnectionId,
            "P" => Parameter::ConnectionParameters,
            "B" => Parameter::BearerInformation,
            "F" => Parameter::RequestedInfo,
            other => return Err(format!("unknown parameter '{}'", other)),
        };
        Ok(parameter)
    }
}

/// An inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MgcpCommand {
    pub verb: Verb,
    pub transaction_id: u32,
    /// Target endpoint, possibly wildcarded and with `@domain`
    pub endpoint: String,
    pub params: BTreeMap<Parameter, String>,
    pub sdp: Option<String>,
}

impl MgcpCommand {
    pub fn new(verb: Verb, transaction_id: u32, endpoint: impl Into<String>) -> Self {
        Self {
            verb,
            transaction_id,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            sdp: None,
        }
    }

    pub fn with_param(mut self, parameter: Parameter, value: impl Into<String>) -> Self {
        self.params.insert(parameter, value.into());
        self
    }

    pub fn with_sdp(mut self, sdp: impl Into<String>) -> Self {
        self.sdp = Some(sdp.into());
        self
    }

    /// Parameter value, trimmed; empty values count as present
    pub fn param(&self, parameter: Parameter) -> Option<&str> {
        self.params.get(&parameter).map(|value| value.trim())
    }

    pub fn has_param(&self, parameter: Parameter) -> bool {
        self.params.contains_key(&parameter)
    }
}

/// Response codes and their fixed default text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    TransactionExecuted,
    ConnectionDeleted,
    TransientError,
    InsufficientResources,
    EndpointUnknown,
    EndpointNotAvailable,
    UnknownCommand,
    ProtocolError,
    IncorrectConnectionId,
    IncorrectCallId,
    UnsupportedMode,
    NoSuchEventOrSignal,
    MissingRemoteDescriptor,
    CodecNegotiationFailure,
}

impl ResponseCode {
    pub fn code(self) -> u16 {
        match self {
            ResponseCode::TransactionExecuted => 200,
            ResponseCode::ConnectionDeleted => 250,
            ResponseCode::TransientError => 400,
            ResponseCode::InsufficientResources => 403,
            ResponseCode::EndpointUnknown => 500,
            ResponseCode::EndpointNotAvailable => 501,
            ResponseCode::UnknownCommand => 504,
            ResponseCode::ProtocolError => 510,
            ResponseCode::IncorrectConnectionId => 515,
            ResponseCode::IncorrectCallId => 516,
            ResponseCode::UnsupportedMode => 517,
            ResponseCode::NoSuchEventOrSignal => 522,
            ResponseCode::MissingRemoteDescriptor => 527,
            ResponseCode::CodecNegotiationFailure => 534,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ResponseCode::TransactionExecuted => "Success",
            ResponseCode::ConnectionDeleted => "Connection was deleted",
            ResponseCode::TransientError => "Transient error",
            ResponseCode::InsufficientResources => "Insufficient resources now",
            ResponseCode::EndpointUnknown => "Endpoint unknown",
            ResponseCode::EndpointNotAvailable => "Endpoint not available",
            ResponseCode::UnknownCommand => "Unknown or unsupported command",
            ResponseCode::ProtocolError => "Protocol error",
            ResponseCode::IncorrectConnectionId => "Incorrect connection id",
            ResponseCode::IncorrectCallId => "Unknown or incorrect call id",
            ResponseCode::UnsupportedMode => "Unsupported or invalid mode",
            ResponseCode::NoSuchEventOrSignal => "No such event or signal",
            ResponseCode::MissingRemoteDescriptor => "Missing remote connection descriptor",
            ResponseCode::CodecNegotiationFailure => "Codec negotiation failure",
        }
    }

    pub fn is_success(self) -> bool {
        self.code() < 300
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.message())
    }
}

/// An outbound response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MgcpResponse {
    pub code: ResponseCode,
    pub message: String,
    pub transaction_id: u32,
    pub params: BTreeMap<Parameter, String>,
    pub sdp: Option<String>,
}

impl MgcpResponse {
    pub fn new(code: ResponseCode, transaction_id: u32) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            transaction_id,
            params: BTreeMap::new(),
            sdp: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_param(mut self, parameter: Parameter, value: impl Into<String>) -> Self {
        self.params.insert(parameter, value.into());
        self
    }

    pub fn with_sdp(mut self, sdp: impl Into<String>) -> Self {
        self.sdp = Some(sdp.into());
        self
    }

    pub fn param(&self, parameter: Parameter) -> Option<&str> {
        self.params.get(&parameter).map(String::as_str)
    }
}

/// Gateway-initiated notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyMessage {
    pub transaction_id: u32,
    pub endpoint: String,
    pub request_id: String,
    pub notified_entity: Option<String>,
    pub observed_events: Vec<String>,
}
