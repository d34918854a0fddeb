//! Endpoints
//!
//! An [`Endpoint`] is a named media termination point. It exclusively owns
//! its connections and its topology, borrows media resources through its
//! [`MediaGroup`], and runs its mixing cycle on the media scheduler while at
//! least one connection reads or writes media and none is looping back.
//!
//! Endpoint variants differ only in their [`EndpointProfile`], which picks
//! the topology strategy and the media resources the endpoint may borrow.

pub mod topology;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{Encoding, MediaSettings};
use crate::connection::{
    CallId, Connection, ConnectionError, ConnectionId, ConnectionMode, ConnectionState,
    ConnectionStats, ConnectionType, SessionDescription,
};
use crate::media::{MediaGroup, ResourceError, ResourceKind, ResourcesPool};
use crate::naming::Resolvable;
use crate::notify::{CallAgentLink, NotificationRequest, REASON_HALF_OPEN_TIMEOUT};
use crate::pool::PoolError;
use crate::scheduler::{Queue, Reschedule, Scheduler, Task, TaskHandle};
use crate::signal::Signal;

pub use topology::{MixerTopology, ModeCounters, Side, SplitterTopology, Topology, mix_frames};

/// Endpoint errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Endpoint {endpoint} is not started")]
    NotStarted { endpoint: String },

    #[error("Connection {id} not found on endpoint {endpoint}")]
    ConnectionNotFound { endpoint: String, id: ConnectionId },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl EndpointError {
    pub fn connection_not_found(endpoint: impl Into<String>, id: ConnectionId) -> Self {
        Self::ConnectionNotFound { endpoint: endpoint.into(), id }
    }
}

/// Endpoint variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointProfile {
    /// Plays announcements
    Announcement,
    /// Prompt, collect and record
    Ivr,
    /// N-way conference bridge
    Conference,
    /// Joins local legs to network legs
    Bridge,
    /// Forwards between network and local legs without media resources
    #[serde(rename = "relay")]
    PacketRelay,
}

impl EndpointProfile {
    pub fn topology(self) -> Box<dyn Topology> {
        match self {
            EndpointProfile::Announcement | EndpointProfile::Ivr | EndpointProfile::Conference => {
                Box::new(MixerTopology::new())
            }
            EndpointProfile::Bridge | EndpointProfile::PacketRelay => Box::new(SplitterTopology::new()),
        }
    }

    /// Media resources endpoints of this profile may borrow
    pub fn resources(self) -> &'static [ResourceKind] {
        match self {
            EndpointProfile::Announcement => &[ResourceKind::Player],
            EndpointProfile::Ivr => &[
                ResourceKind::Player,
                ResourceKind::Recorder,
                ResourceKind::DtmfDetector,
                ResourceKind::DtmfGenerator,
            ],
            EndpointProfile::Conference => &[ResourceKind::DtmfDetector],
            EndpointProfile::Bridge | EndpointProfile::PacketRelay => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Ready,
    InUse,
}

/// Gateway collaborators shared by every endpoint
pub struct EndpointEnv {
    pub control: Scheduler,
    pub media: Scheduler,
    pub resources: Arc<ResourcesPool>,
    pub settings: MediaSettings,
    /// Where gateway-initiated deletes are reported; none in standalone use
    pub agent: Option<CallAgentLink>,
}

/// Read-only view of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub cname: Uuid,
    pub call_id: Option<CallId>,
    pub kind: ConnectionType,
    pub state: ConnectionState,
    pub mode: ConnectionMode,
    pub stats: ConnectionStats,
    pub local_sdp: Option<String>,
    pub remote_sdp: Option<String>,
}

impl From<&Connection> for ConnectionInfo {
    fn from(connection: &Connection) -> Self {
        Self {
            id: connection.id(),
            cname: connection.cname(),
            call_id: connection.call_id().cloned(),
            kind: connection.kind(),
            state: connection.state(),
            mode: connection.mode(),
            stats: connection.stats(),
            local_sdp: connection.local_description().map(ToString::to_string),
            remote_sdp: connection.remote_description().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone)]
struct PeerLink {
    endpoint: Weak<Endpoint>,
    connection: ConnectionId,
}

struct Leg {
    connection: Connection,
    peer: Option<PeerLink>,
}

struct EndpointInner {
    state: EndpointState,
    started: bool,
    legs: BTreeMap<ConnectionId, Leg>,
    topology: Box<dyn Topology>,
    counters: ModeCounters,
    mixing: Option<TaskHandle>,
    encoding: Encoding,
    request: Option<NotificationRequest>,
}

/// A media termination point
pub struct Endpoint {
    name: String,
    profile: EndpointProfile,
    weak_self: Weak<Endpoint>,
    env: Arc<EndpointEnv>,
    inner: Mutex<EndpointInner>,
    media: Arc<Mutex<MediaGroup>>,
    signal: Mutex<Option<Arc<dyn Signal>>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("profile", &self.profile)
            .field("state", &self.state())
            .finish()
    }
}

impl Endpoint {
    pub fn new(name: impl Into<String>, profile: EndpointProfile, env: Arc<EndpointEnv>) -> Arc<Self> {
        let name = name.into();
        let encoding = env.settings.preferred_encoding;
        let media = MediaGroup::new(name.clone(), env.resources.clone(), profile.resources());
        Arc::new_cyclic(|weak_self| Endpoint {
            name,
            profile,
            weak_self: weak_self.clone(),
            env,
            inner: Mutex::new(EndpointInner {
                state: EndpointState::Ready,
                started: false,
                legs: BTreeMap::new(),
                topology: profile.topology(),
                counters: ModeCounters::default(),
                mixing: None,
                encoding,
                request: None,
            }),
            media: Arc::new(Mutex::new(media)),
            signal: Mutex::new(None),
        })
    }

    /// Local name, e.g. `rvoip/ivr/1`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> EndpointProfile {
        self.profile
    }

    pub fn state(&self) -> EndpointState {
        self.inner.lock().state
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    pub fn control_scheduler(&self) -> &Scheduler {
        &self.env.control
    }

    pub fn media_group(&self) -> Arc<Mutex<MediaGroup>> {
        self.media.clone()
    }

    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if !inner.started {
            inner.started = true;
            info!(endpoint = %self.name, profile = ?self.profile, topology = inner.topology.kind(), "endpoint started");
        }
    }

    /// Delete every connection, cancel the active signal and return all
    /// borrowed resources
    pub fn stop(&self) {
        self.cancel_signal();
        self.delete_all();
        self.media.lock().release_all();
        let mut inner = self.inner.lock();
        inner.started = false;
        inner.request = None;
        info!(endpoint = %self.name, "endpoint stopped");
    }

    fn ensure_started(&self, inner: &EndpointInner) -> Result<(), EndpointError> {
        if inner.started {
            Ok(())
        } else {
            Err(EndpointError::NotStarted { endpoint: self.name.clone() })
        }
    }

    /// Borrow a connection from the pool and attach it to this endpoint
    pub fn create_connection(
        &self,
        kind: ConnectionType,
        call_id: Option<CallId>,
    ) -> Result<ConnectionId, EndpointError> {
        let mut inner = self.inner.lock();
        self.ensure_started(&inner)?;

        let mut connection = self.env.resources.acquire_connection()?;
        connection.assign(kind, call_id, self.env.control.now());
        let id = connection.id();

        inner.topology.add_participant(id, Side::from(kind));
        inner.legs.insert(id, Leg { connection, peer: None });
        inner.state = EndpointState::InUse;
        debug!(endpoint = %self.name, connection = %id, %kind, "connection created");
        Ok(id)
    }

    fn with_connection<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut Connection, Encoding) -> Result<R, ConnectionError>,
    ) -> Result<R, EndpointError> {
        let mut inner = self.inner.lock();
        let encoding = inner.encoding;
        let leg = inner
            .legs
            .get_mut(&id)
            .ok_or_else(|| EndpointError::connection_not_found(&self.name, id))?;
        Ok(f(&mut leg.connection, encoding)?)
    }

    /// Produce a local offer; the connection is deleted if no answer
    /// arrives before the half-open timeout
    pub fn half_open(&self, id: ConnectionId) -> Result<SessionDescription, EndpointError> {
        let (offer, cname) = self.with_connection(id, |connection, encoding| {
            let offer = connection.half_open(&encoding.formats())?;
            Ok((offer, connection.cname()))
        })?;

        self.env.control.schedule(
            HalfOpenTimeout {
                endpoint: self.weak_self.clone(),
                connection: id,
                cname,
            },
            Queue::Heartbeat,
            self.env.settings.half_open_timeout(),
        );
        Ok(offer)
    }

    /// Apply a remote description. A half-open connection whose answer
    /// fails to negotiate is deleted before the error is returned.
    pub fn open(&self, id: ConnectionId, remote: &str) -> Result<Option<SessionDescription>, EndpointError> {
        let (result, abandoned) = {
            let mut inner = self.inner.lock();
            let encoding = inner.encoding;
            let leg = inner
                .legs
                .get_mut(&id)
                .ok_or_else(|| EndpointError::connection_not_found(&self.name, id))?;
            let was_half_open = leg.connection.state() == ConnectionState::HalfOpen;
            let result = leg.connection.open(remote, &encoding.formats());
            let abandoned = result.is_err() && was_half_open && leg.connection.state() == ConnectionState::Closed;
            (result, abandoned)
        };

        if abandoned {
            if let Err(e) = self.delete_connection(id) {
                warn!(endpoint = %self.name, connection = %id, error = %e, "failed to delete abandoned connection");
            }
        }
        Ok(result?)
    }

    pub fn renegotiate(&self, id: ConnectionId, remote: &str) -> Result<SessionDescription, EndpointError> {
        self.with_connection(id, |connection, encoding| {
            connection.renegotiate(remote, &encoding.formats())
        })
    }

    /// Change a connection's mode, starting or stopping the topology only
    /// when the aggregate counters cross zero or loopback toggles
    pub fn set_mode(&self, id: ConnectionId, mode: ConnectionMode) -> Result<ConnectionMode, EndpointError> {
        let mut inner = self.inner.lock();
        let leg = inner
            .legs
            .get_mut(&id)
            .ok_or_else(|| EndpointError::connection_not_found(&self.name, id))?;
        let old = leg.connection.set_mode(mode)?;
        if inner.counters.apply(old, mode) {
            self.update_mixing(&mut inner);
        }
        Ok(old)
    }

    fn update_mixing(&self, inner: &mut EndpointInner) {
        if inner.counters.should_run() {
            if inner.mixing.is_none() {
                let task = MixerTask {
                    endpoint: self.weak_self.clone(),
                    period: self.env.settings.frame_period(),
                };
                inner.mixing = Some(self.env.media.submit(task, Queue::Mixer));
                debug!(endpoint = %self.name, counters = %inner.counters, "topology started");
            }
        } else if let Some(handle) = inner.mixing.take() {
            handle.cancel();
            debug!(endpoint = %self.name, counters = %inner.counters, "topology stopped");
        }
    }

    /// Whether the mixing cycle is scheduled
    pub fn is_mixing(&self) -> bool {
        self.inner.lock().mixing.is_some()
    }

    pub fn mode_counters(&self) -> ModeCounters {
        self.inner.lock().counters
    }

    /// Open a pair of local connections on two endpoints and join them
    pub fn join_local(
        first: &Arc<Endpoint>,
        first_id: ConnectionId,
        second: &Arc<Endpoint>,
        second_id: ConnectionId,
    ) -> Result<(), EndpointError> {
        first.attach_peer(first_id, second, second_id)?;
        second.attach_peer(second_id, first, first_id)
    }

    fn attach_peer(&self, id: ConnectionId, peer: &Arc<Endpoint>, peer_id: ConnectionId) -> Result<(), EndpointError> {
        let mut inner = self.inner.lock();
        let leg = inner
            .legs
            .get_mut(&id)
            .ok_or_else(|| EndpointError::connection_not_found(&self.name, id))?;
        leg.connection.open_local()?;
        leg.peer = Some(PeerLink {
            endpoint: Arc::downgrade(peer),
            connection: peer_id,
        });
        Ok(())
    }

    /// Delete a connection and return its final statistics. Deleting the
    /// last connection releases the endpoint's media resources. Deleting a
    /// local connection also deletes its peer.
    pub fn delete_connection(&self, id: ConnectionId) -> Result<ConnectionStats, EndpointError> {
        let (connection, peer, stats, now_idle) = {
            let mut inner = self.inner.lock();
            let mut leg = inner
                .legs
                .remove(&id)
                .ok_or_else(|| EndpointError::connection_not_found(&self.name, id))?;

            if inner.counters.apply(leg.connection.mode(), ConnectionMode::Inactive) {
                self.update_mixing(&mut inner);
            }
            inner.topology.remove_participant(id);
            if leg.connection.state() != ConnectionState::Closed {
                leg.connection.close()?;
            }

            let now_idle = inner.legs.is_empty();
            if now_idle {
                inner.state = EndpointState::Ready;
            }
            let stats = leg.connection.stats();
            (leg.connection, leg.peer, stats, now_idle)
        };

        self.env.resources.release_connection(connection);
        debug!(endpoint = %self.name, connection = %id, %stats, "connection deleted");

        if now_idle {
            self.cancel_signal();
            self.media.lock().release_all();
            trace!(endpoint = %self.name, "endpoint idle, media released");
        }

        if let Some(peer) = peer {
            if let Some(endpoint) = peer.endpoint.upgrade() {
                // The peer may already be gone if both sides are torn down
                let _ = endpoint.delete_connection(peer.connection);
            }
        }
        Ok(stats)
    }

    /// Delete every connection belonging to `call_id`
    pub fn delete_call(&self, call_id: &CallId) -> Vec<(ConnectionId, ConnectionStats)> {
        let ids: Vec<ConnectionId> = {
            let inner = self.inner.lock();
            inner
                .legs
                .values()
                .filter(|leg| leg.connection.call_id() == Some(call_id))
                .map(|leg| leg.connection.id())
                .collect()
        };
        self.delete_ids(ids)
    }

    pub fn delete_all(&self) -> Vec<(ConnectionId, ConnectionStats)> {
        let ids: Vec<ConnectionId> = self.inner.lock().legs.keys().copied().collect();
        self.delete_ids(ids)
    }

    fn delete_ids(&self, ids: Vec<ConnectionId>) -> Vec<(ConnectionId, ConnectionStats)> {
        ids.into_iter()
            .filter_map(|id| self.delete_connection(id).ok().map(|stats| (id, stats)))
            .collect()
    }

    fn expire_half_open(&self, id: ConnectionId, cname: Uuid) {
        let call_id = {
            let inner = self.inner.lock();
            match inner.legs.get(&id) {
                Some(leg)
                    if leg.connection.state() == ConnectionState::HalfOpen && leg.connection.cname() == cname =>
                {
                    leg.connection.call_id().cloned()
                }
                _ => return,
            }
        };

        warn!(endpoint = %self.name, connection = %id, "half-open connection timed out");
        match self.delete_connection(id) {
            Ok(stats) => {
                if let Some(agent) = &self.env.agent {
                    agent.connection_deleted(&self.name, call_id.as_ref(), id, &stats, REASON_HALF_OPEN_TIMEOUT);
                }
            }
            Err(e) => {
                warn!(endpoint = %self.name, connection = %id, error = %e, "failed to delete expired connection");
            }
        }
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.inner.lock().legs.get(&id).map(|leg| ConnectionInfo::from(&leg.connection))
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner
            .lock()
            .legs
            .values()
            .map(|leg| ConnectionInfo::from(&leg.connection))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().legs.len()
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.lock().encoding
    }

    /// Set the preferred law for future negotiations
    pub fn configure(&self, encoding: Encoding) {
        self.inner.lock().encoding = encoding;
        debug!(endpoint = %self.name, ?encoding, "endpoint configured");
    }

    pub fn set_notification_request(&self, request: Option<NotificationRequest>) {
        self.inner.lock().request = request;
    }

    pub fn notification_request(&self) -> Option<NotificationRequest> {
        self.inner.lock().request.clone()
    }

    /// Install `signal` as the active signal, cancelling any previous one
    pub fn set_signal(&self, signal: Arc<dyn Signal>) {
        let previous = self.signal.lock().replace(signal);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    pub fn active_signal(&self) -> Option<Arc<dyn Signal>> {
        self.signal.lock().clone().filter(|signal| signal.is_active())
    }

    pub fn cancel_signal(&self) {
        let signal = self.signal.lock().take();
        if let Some(signal) = signal {
            signal.cancel();
        }
    }

    /// Hand a frame received from the network (or a local peer) to a connection
    pub fn deliver_frame(&self, id: ConnectionId, frame: Vec<i16>) -> Result<(), EndpointError> {
        let mut inner = self.inner.lock();
        let leg = inner
            .legs
            .get_mut(&id)
            .ok_or_else(|| EndpointError::connection_not_found(&self.name, id))?;
        leg.connection.receive_frame(frame);
        if leg.connection.mode().loops() {
            if let Some(echo) = leg.connection.take_inbound() {
                leg.connection.send_frame(echo);
            }
        }
        Ok(())
    }

    /// Next frame queued for transmission on a connection
    pub fn take_frame(&self, id: ConnectionId) -> Option<Vec<i16>> {
        self.inner
            .lock()
            .legs
            .get_mut(&id)
            .and_then(|leg| leg.connection.take_outbound())
    }

    /// One mixing cycle: consume inbound frames of reading connections and
    /// write each writing connection the sum of its topology sources
    pub fn mix_cycle(&self) {
        let samples = self.env.settings.frame_samples;
        let forwards = {
            let mut inner = self.inner.lock();
            let inner = &mut *inner;

            let mut inputs: BTreeMap<ConnectionId, Vec<i16>> = BTreeMap::new();
            for (id, leg) in inner.legs.iter_mut() {
                if leg.connection.mode().reads() {
                    if let Some(frame) = leg.connection.take_inbound() {
                        inputs.insert(*id, frame);
                    }
                }
            }

            let mut forwards = Vec::new();
            for (id, leg) in inner.legs.iter_mut() {
                if !leg.connection.mode().writes() {
                    continue;
                }
                let sources: Vec<&[i16]> = inner
                    .topology
                    .sources_for(*id)
                    .iter()
                    .filter_map(|source| inputs.get(source).map(Vec::as_slice))
                    .collect();
                if sources.is_empty() {
                    continue;
                }
                leg.connection.send_frame(mix_frames(&sources, samples));

                if let Some(peer) = &leg.peer {
                    if let Some(frame) = leg.connection.take_outbound() {
                        forwards.push((peer.clone(), frame));
                    }
                }
            }
            forwards
        };

        for (peer, frame) in forwards {
            if let Some(endpoint) = peer.endpoint.upgrade() {
                let _ = endpoint.deliver_frame(peer.connection, frame);
            }
        }
    }
}

impl Resolvable for Endpoint {
    fn is_free(&self) -> bool {
        let inner = self.inner.lock();
        inner.started && inner.state == EndpointState::Ready
    }
}

struct MixerTask {
    endpoint: Weak<Endpoint>,
    period: Duration,
}

impl Task for MixerTask {
    fn name(&self) -> &str {
        "mixer"
    }

    fn run(&mut self, _now: Duration) -> Reschedule {
        match self.endpoint.upgrade() {
            Some(endpoint) => {
                endpoint.mix_cycle();
                Reschedule::After(self.period)
            }
            None => Reschedule::Done,
        }
    }
}

struct HalfOpenTimeout {
    endpoint: Weak<Endpoint>,
    connection: ConnectionId,
    cname: Uuid,
}

impl Task for HalfOpenTimeout {
    fn name(&self) -> &str {
        "half-open-timeout"
    }

    fn run(&mut self, _now: Duration) -> Reschedule {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.expire_half_open(self.connection, self.cname);
        }
        Reschedule::Done
    }
}
