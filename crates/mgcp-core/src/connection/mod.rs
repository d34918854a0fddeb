//! Media connections
//!
//! A [`Connection`] is one media leg of a call. It moves through
//! `CLOSED -> HALF_OPEN -> OPEN -> CLOSED` as the offer/answer exchange
//! progresses. Connections are pool managed: closing one and returning it to
//! its pool keeps the numeric id slot but regenerates every externally
//! visible session identifier.

pub mod ports;
pub mod sdp;

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::pool::Poolable;

pub use ports::PortManager;
pub use sdp::{Format, SdpError, SessionDescription};

/// Frames buffered per direction before the oldest is dropped
const MAX_BUFFERED_FRAMES: usize = 8;

/// Connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not legal in the current state. The state is unchanged.
    #[error("Cannot {operation} connection in state {state}")]
    IllegalState {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("No RTP port available")]
    NoPortAvailable,

    #[error("Operation {operation} not supported on {kind} connection")]
    WrongType {
        operation: &'static str,
        kind: ConnectionType,
    },

    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] SdpError),
}

impl ConnectionError {
    pub fn illegal_state(operation: &'static str, state: ConnectionState) -> Self {
        Self::IllegalState { operation, state }
    }
}

/// Numeric connection identifier, rendered in hex on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u32::from_str_radix(s.trim(), 16).map(ConnectionId)
    }
}

/// Call identifier: up to 32 hex digits, compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CallId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.len() > 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid call id '{}'", s));
        }
        Ok(CallId(s.to_ascii_uppercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Closed,
    HalfOpen,
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::HalfOpen => "HALF_OPEN",
            ConnectionState::Open => "OPEN",
        };
        f.write_str(name)
    }
}

/// Connection modes as named on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    SendOnly,
    RecvOnly,
    SendRecv,
    Conference,
    Inactive,
    Loopback,
    NetworkLoopback,
}

impl ConnectionMode {
    pub const ALL: [ConnectionMode; 7] = [
        ConnectionMode::SendOnly,
        ConnectionMode::RecvOnly,
        ConnectionMode::SendRecv,
        ConnectionMode::Conference,
        ConnectionMode::Inactive,
        ConnectionMode::Loopback,
        ConnectionMode::NetworkLoopback,
    ];

    /// Media arriving on the connection is read into the endpoint
    pub fn reads(self) -> bool {
        matches!(
            self,
            ConnectionMode::RecvOnly | ConnectionMode::SendRecv | ConnectionMode::Conference
        )
    }

    /// The endpoint writes media out on the connection
    pub fn writes(self) -> bool {
        matches!(
            self,
            ConnectionMode::SendOnly | ConnectionMode::SendRecv | ConnectionMode::Conference
        )
    }

    /// Media is echoed back without passing the mixer
    pub fn loops(self) -> bool {
        matches!(self, ConnectionMode::Loopback | ConnectionMode::NetworkLoopback)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionMode::SendOnly => "sendonly",
            ConnectionMode::RecvOnly => "recvonly",
            ConnectionMode::SendRecv => "sendrecv",
            ConnectionMode::Conference => "confrnce",
            ConnectionMode::Inactive => "inactive",
            ConnectionMode::Loopback => "loopback",
            ConnectionMode::NetworkLoopback => "netwloop",
        };
        f.write_str(name)
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sendonly" => Ok(ConnectionMode::SendOnly),
            "recvonly" => Ok(ConnectionMode::RecvOnly),
            "sendrecv" => Ok(ConnectionMode::SendRecv),
            "confrnce" => Ok(ConnectionMode::Conference),
            "inactive" => Ok(ConnectionMode::Inactive),
            "loopback" => Ok(ConnectionMode::Loopback),
            "netwloop" => Ok(ConnectionMode::NetworkLoopback),
            other => Err(format!("unsupported connection mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Network leg negotiated with SDP
    Rtp,
    /// In-gateway leg joined to a connection on another endpoint
    Local,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Rtp => f.write_str("RTP"),
            ConnectionType::Local => f.write_str("LOCAL"),
        }
    }
}

/// Packet counters reported on delete and audit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub octets_sent: u64,
    pub packets_received: u64,
    pub octets_received: u64,
    pub packets_lost: u64,
    pub jitter: u32,
}

impl fmt::Display for ConnectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PS={}, OS={}, PR={}, OR={}, PL={}, JI={}",
            self.packets_sent,
            self.octets_sent,
            self.packets_received,
            self.octets_received,
            self.packets_lost,
            self.jitter
        )
    }
}

/// One media leg
pub struct Connection {
    id: ConnectionId,
    cname: Uuid,
    generation: u64,
    kind: ConnectionType,
    state: ConnectionState,
    mode: ConnectionMode,
    call_id: Option<CallId>,
    created_at: Duration,
    address: String,
    port: Option<u16>,
    local_sdp: Option<SessionDescription>,
    remote_sdp: Option<SessionDescription>,
    formats: Vec<Format>,
    stats: ConnectionStats,
    inbound: VecDeque<Vec<i16>>,
    outbound: VecDeque<Vec<i16>>,
    ports: Arc<PortManager>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("cname", &self.cname)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("call_id", &self.call_id)
            .field("port", &self.port)
            .finish()
    }
}

impl Connection {
    pub fn new(id: ConnectionId, ports: Arc<PortManager>, address: impl Into<String>) -> Self {
        Self {
            id,
            cname: Uuid::new_v4(),
            generation: 0,
            kind: ConnectionType::Rtp,
            state: ConnectionState::Closed,
            mode: ConnectionMode::Inactive,
            call_id: None,
            created_at: Duration::ZERO,
            address: address.into(),
            port: None,
            local_sdp: None,
            remote_sdp: None,
            formats: Vec::new(),
            stats: ConnectionStats::default(),
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            ports,
        }
    }

    /// Prepare a freshly borrowed connection for a call
    pub fn assign(&mut self, kind: ConnectionType, call_id: Option<CallId>, now: Duration) {
        self.kind = kind;
        self.call_id = call_id;
        self.created_at = now;
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Session handle, regenerated every time the connection is recycled
    pub fn cname(&self) -> Uuid {
        self.cname
    }

    pub fn kind(&self) -> ConnectionType {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    pub fn created_at(&self) -> Duration {
        self.created_at
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_sdp.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_sdp.as_ref()
    }

    /// Formats agreed with the remote side, or offered while half open
    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    fn session_id(&self) -> u64 {
        (u64::from(self.id.0) << 32) | (self.generation & 0xFFFF_FFFF)
    }

    fn require_rtp(&self, operation: &'static str) -> Result<(), ConnectionError> {
        if self.kind == ConnectionType::Rtp {
            Ok(())
        } else {
            Err(ConnectionError::WrongType { operation, kind: self.kind })
        }
    }

    fn release_port(&mut self) {
        if let Some(port) = self.port.take() {
            self.ports.release(port);
        }
    }

    fn local_description_for(&self, port: u16, formats: Vec<Format>, version: u64) -> SessionDescription {
        SessionDescription::local(self.session_id(), version, &self.address, port, formats, self.mode)
    }

    /// Bind a port and produce a local offer. Legal only from CLOSED.
    pub fn half_open(&mut self, formats: &[Format]) -> Result<SessionDescription, ConnectionError> {
        self.require_rtp("half-open")?;
        if self.state != ConnectionState::Closed {
            return Err(ConnectionError::illegal_state("half-open", self.state));
        }

        let port = self.ports.allocate()?;
        let offer = self.local_description_for(port, formats.to_vec(), 1);
        self.port = Some(port);
        self.formats = formats.to_vec();
        self.local_sdp = Some(offer.clone());
        self.state = ConnectionState::HalfOpen;
        debug!(connection = %self.id, port, "connection half open");
        Ok(offer)
    }

    /// Complete negotiation with the remote description.
    ///
    /// From CLOSED the connection answers the remote offer and returns the
    /// answer. From HALF_OPEN the remote description is the answer to our
    /// offer and nothing is returned; a failed negotiation then closes the
    /// connection.
    pub fn open(
        &mut self,
        remote: &str,
        formats: &[Format],
    ) -> Result<Option<SessionDescription>, ConnectionError> {
        self.require_rtp("open")?;
        match self.state {
            ConnectionState::Closed => {
                let remote: SessionDescription = remote.parse()?;
                let common = sdp::negotiate(&remote, formats)?;
                let port = self.ports.allocate()?;
                let answer = self.local_description_for(port, common.clone(), 1);
                self.port = Some(port);
                self.formats = common;
                self.local_sdp = Some(answer.clone());
                self.remote_sdp = Some(remote);
                self.state = ConnectionState::Open;
                debug!(connection = %self.id, port, "connection opened with answer");
                Ok(Some(answer))
            }
            ConnectionState::HalfOpen => {
                let negotiated = remote
                    .parse::<SessionDescription>()
                    .and_then(|remote| sdp::negotiate(&remote, &self.formats).map(|common| (remote, common)));
                match negotiated {
                    Ok((remote, common)) => {
                        self.formats = common;
                        self.remote_sdp = Some(remote);
                        self.state = ConnectionState::Open;
                        debug!(connection = %self.id, "connection opened by answer");
                        Ok(None)
                    }
                    Err(e) => {
                        debug!(connection = %self.id, error = %e, "negotiation failed, closing");
                        self.revert();
                        Err(e.into())
                    }
                }
            }
            ConnectionState::Open => Err(ConnectionError::illegal_state("open", self.state)),
        }
    }

    /// Apply an updated remote description mid-call. Legal only from OPEN;
    /// the state does not change.
    pub fn renegotiate(
        &mut self,
        remote: &str,
        formats: &[Format],
    ) -> Result<SessionDescription, ConnectionError> {
        self.require_rtp("renegotiate")?;
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::illegal_state("renegotiate", self.state));
        }

        let remote: SessionDescription = remote.parse()?;
        let common = sdp::negotiate(&remote, formats)?;
        let port = match self.port {
            Some(port) => port,
            None => return Err(ConnectionError::illegal_state("renegotiate", self.state)),
        };
        let version = self.local_sdp.as_ref().map_or(1, |sdp| sdp.version + 1);
        let answer = self.local_description_for(port, common.clone(), version);
        self.formats = common;
        self.local_sdp = Some(answer.clone());
        self.remote_sdp = Some(remote);
        trace!(connection = %self.id, version, "connection renegotiated");
        Ok(answer)
    }

    /// Open an in-gateway leg. No negotiation is involved.
    pub fn open_local(&mut self) -> Result<(), ConnectionError> {
        if self.kind != ConnectionType::Local {
            return Err(ConnectionError::WrongType { operation: "open-local", kind: self.kind });
        }
        if self.state != ConnectionState::Closed {
            return Err(ConnectionError::illegal_state("open-local", self.state));
        }
        self.state = ConnectionState::Open;
        Ok(())
    }

    /// Release the port and return to CLOSED. Legal from HALF_OPEN or OPEN.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::illegal_state("close", self.state));
        }
        self.revert();
        debug!(connection = %self.id, "connection closed");
        Ok(())
    }

    fn revert(&mut self) {
        self.release_port();
        self.state = ConnectionState::Closed;
        self.local_sdp = None;
        self.remote_sdp = None;
        self.formats.clear();
        self.inbound.clear();
        self.outbound.clear();
    }

    /// Change the mode, returning the previous one. Legal from HALF_OPEN or OPEN.
    pub fn set_mode(&mut self, mode: ConnectionMode) -> Result<ConnectionMode, ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::illegal_state("set mode on", self.state));
        }
        let old = std::mem::replace(&mut self.mode, mode);
        if let Some(local) = self.local_sdp.as_mut() {
            for media in &mut local.media {
                media.direction = Some(sdp::direction_for(mode).to_string());
            }
        }
        trace!(connection = %self.id, %old, new = %mode, "mode changed");
        Ok(old)
    }

    /// Account for a frame arriving from the network or a local peer
    pub fn receive_frame(&mut self, frame: Vec<i16>) {
        if self.state != ConnectionState::Open {
            return;
        }
        self.stats.packets_received += 1;
        self.stats.octets_received += frame.len() as u64;
        if self.mode.reads() || self.mode.loops() {
            if self.inbound.len() == MAX_BUFFERED_FRAMES {
                self.inbound.pop_front();
                self.stats.packets_lost += 1;
            }
            self.inbound.push_back(frame);
        }
    }

    pub fn take_inbound(&mut self) -> Option<Vec<i16>> {
        self.inbound.pop_front()
    }

    /// Queue a frame produced by the endpoint for transmission
    pub fn send_frame(&mut self, frame: Vec<i16>) {
        self.stats.packets_sent += 1;
        self.stats.octets_sent += frame.len() as u64;
        if self.outbound.len() == MAX_BUFFERED_FRAMES {
            self.outbound.pop_front();
        }
        self.outbound.push_back(frame);
    }

    pub fn take_outbound(&mut self) -> Option<Vec<i16>> {
        self.outbound.pop_front()
    }
}

impl Poolable for Connection {
    fn reset(&mut self) {
        self.revert();
        self.generation += 1;
        self.cname = Uuid::new_v4();
        self.kind = ConnectionType::Rtp;
        self.mode = ConnectionMode::Inactive;
        self.call_id = None;
        self.created_at = Duration::ZERO;
        self.stats = ConnectionStats::default();
    }
}
