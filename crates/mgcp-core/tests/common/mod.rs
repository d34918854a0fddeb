//! Shared helpers for the integration tests: scripted media resources and a
//! gateway driven by a manual clock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use rvoip_mgcp_core::config::{EndpointGroup, PoolLimit};
use rvoip_mgcp_core::media::{
    DtmfDetector, DtmfGenerator, ListenerRef, MediaEvent, Player, RecordStop, Recorder, ResourceError,
};
use rvoip_mgcp_core::pool::Poolable;
use rvoip_mgcp_core::provider::{ChannelProvider, OutboundMessage};
use rvoip_mgcp_core::{
    EndpointProfile, GatewayConfig, ManualClock, MediaGateway, MgcpCommand, MgcpResponse, NotifyMessage,
};

pub const OFFER: &str = "v=0\r\n\
o=- 4711 1 IN IP4 10.0.0.9\r\n\
s=-\r\n\
c=IN IP4 10.0.0.9\r\n\
t=0 0\r\n\
m=audio 5004 RTP/AVP 0 101\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:101 telephone-event/8000\r\n";

/// An offer with nothing but G.729
pub const G729_OFFER: &str = "v=0\r\n\
o=- 4712 1 IN IP4 10.0.0.9\r\n\
s=-\r\n\
c=IN IP4 10.0.0.9\r\n\
t=0 0\r\n\
m=audio 5006 RTP/AVP 18\r\n\
a=rtpmap:18 G729/8000\r\n";

/// Everything the fake media resources saw, plus the listeners currently
/// registered so tests can raise events
#[derive(Default)]
pub struct MediaTap {
    pub played: Mutex<Vec<String>>,
    pub delays: Mutex<Vec<Duration>>,
    pub record_files: Mutex<Vec<String>>,
    pub recordings_started: Mutex<usize>,
    pub discarded: Mutex<Vec<String>>,
    pub flushes: Mutex<usize>,
    player: Mutex<Option<ListenerRef>>,
    recorder: Mutex<Option<ListenerRef>>,
    detector: Mutex<Option<ListenerRef>>,
}

impl MediaTap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn raise(slot: &Mutex<Option<ListenerRef>>, event: MediaEvent) -> bool {
        let listener = slot.lock().clone();
        match listener {
            Some(listener) => {
                listener.on_media_event(event);
                true
            }
            None => false,
        }
    }

    /// The current segment finished playing
    pub fn segment_done(&self) -> bool {
        Self::raise(&self.player, MediaEvent::PlayerStopped)
    }

    pub fn player_failed(&self, reason: &str) -> bool {
        Self::raise(&self.player, MediaEvent::PlayerFailed { reason: reason.to_string() })
    }

    pub fn speech(&self) -> bool {
        Self::raise(&self.recorder, MediaEvent::SpeechDetected)
    }

    pub fn recording_stopped(&self, stop: RecordStop) -> bool {
        Self::raise(&self.recorder, MediaEvent::RecorderStopped(stop))
    }

    pub fn press(&self, tone: char) -> bool {
        Self::raise(&self.detector, MediaEvent::Tone(tone))
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn discarded(&self) -> Vec<String> {
        self.discarded.lock().clone()
    }

    pub fn recordings_started(&self) -> usize {
        *self.recordings_started.lock()
    }

    pub fn has_player_listener(&self) -> bool {
        self.player.lock().is_some()
    }
}

pub struct FakePlayer {
    tap: Arc<MediaTap>,
    listener: Option<ListenerRef>,
    url: Option<String>,
    delay: Duration,
}

impl FakePlayer {
    pub fn new(tap: Arc<MediaTap>) -> Self {
        Self { tap, listener: None, url: None, delay: Duration::ZERO }
    }
}

impl Poolable for FakePlayer {
    fn reset(&mut self) {
        self.remove_listener();
        self.url = None;
        self.delay = Duration::ZERO;
    }
}

impl Player for FakePlayer {
    fn set_url(&mut self, url: &str) -> Result<(), ResourceError> {
        if url.is_empty() || url.contains("bad") {
            return Err(ResourceError::malformed_uri(url));
        }
        self.url = Some(url.to_string());
        Ok(())
    }

    fn set_initial_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    fn activate(&mut self) -> Result<(), ResourceError> {
        let url = self.url.clone().ok_or_else(|| ResourceError::failed("player", "no url"))?;
        self.tap.played.lock().push(url);
        self.tap.delays.lock().push(self.delay);
        Ok(())
    }

    fn deactivate(&mut self) {}

    fn add_listener(&mut self, listener: ListenerRef) -> Result<(), ResourceError> {
        if self.listener.is_some() {
            return Err(ResourceError::too_many_listeners("player"));
        }
        *self.tap.player.lock() = Some(listener.clone());
        self.listener = Some(listener);
        Ok(())
    }

    fn remove_listener(&mut self) {
        if self.listener.take().is_some() {
            *self.tap.player.lock() = None;
        }
    }
}

pub struct FakeRecorder {
    tap: Arc<MediaTap>,
    listener: Option<ListenerRef>,
}

impl FakeRecorder {
    pub fn new(tap: Arc<MediaTap>) -> Self {
        Self { tap, listener: None }
    }
}

impl Poolable for FakeRecorder {
    fn reset(&mut self) {
        self.remove_listener();
    }
}

impl Recorder for FakeRecorder {
    fn set_max_record_time(&mut self, _max: Duration) {}

    fn set_pre_speech_timer(&mut self, _timer: Duration) {}

    fn set_post_speech_timer(&mut self, _timer: Duration) {}

    fn set_record_file(&mut self, uri: &str, _append: bool) -> Result<(), ResourceError> {
        self.tap.record_files.lock().push(uri.to_string());
        Ok(())
    }

    fn activate(&mut self) -> Result<(), ResourceError> {
        *self.tap.recordings_started.lock() += 1;
        Ok(())
    }

    fn deactivate(&mut self) {}

    fn add_listener(&mut self, listener: ListenerRef) -> Result<(), ResourceError> {
        if self.listener.is_some() {
            return Err(ResourceError::too_many_listeners("recorder"));
        }
        *self.tap.recorder.lock() = Some(listener.clone());
        self.listener = Some(listener);
        Ok(())
    }

    fn remove_listener(&mut self) {
        if self.listener.take().is_some() {
            *self.tap.recorder.lock() = None;
        }
    }

    fn discard(&mut self, uri: &str) -> Result<(), ResourceError> {
        self.tap.discarded.lock().push(uri.to_string());
        Ok(())
    }
}

pub struct FakeDetector {
    tap: Arc<MediaTap>,
    listener: Option<ListenerRef>,
}

impl FakeDetector {
    pub fn new(tap: Arc<MediaTap>) -> Self {
        Self { tap, listener: None }
    }
}

impl Poolable for FakeDetector {
    fn reset(&mut self) {
        self.remove_listener();
    }
}

impl DtmfDetector for FakeDetector {
    fn activate(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn deactivate(&mut self) {}

    fn add_listener(&mut self, listener: ListenerRef) -> Result<(), ResourceError> {
        if self.listener.is_some() {
            return Err(ResourceError::too_many_listeners("dtmf-detector"));
        }
        *self.tap.detector.lock() = Some(listener.clone());
        self.listener = Some(listener);
        Ok(())
    }

    fn remove_listener(&mut self) {
        if self.listener.take().is_some() {
            *self.tap.detector.lock() = None;
        }
    }

    fn clear_digits(&mut self) {}

    fn flush_buffer(&mut self) {
        *self.tap.flushes.lock() += 1;
    }
}

#[derive(Default)]
pub struct FakeGenerator;

impl Poolable for FakeGenerator {
    fn reset(&mut self) {}
}

impl DtmfGenerator for FakeGenerator {
    fn set_digits(&mut self, _digits: &str) -> Result<(), ResourceError> {
        Ok(())
    }

    fn set_tone_duration(&mut self, _duration: Duration) {}

    fn activate(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn deactivate(&mut self) {}
}

/// Small gateway: two announcement, two IVR, one conference and two bridge
/// endpoints
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.domain = "mgw.test:2427".to_string();
    config.bind_address = "10.0.0.1".to_string();
    config.media.rtp_port_min = 40000;
    config.media.rtp_port_max = 40100;
    config.pools.connections = PoolLimit::new(4, Some(16));
    config.pools.players = PoolLimit::new(1, None);
    config.pools.recorders = PoolLimit::new(1, None);
    config.pools.detectors = PoolLimit::new(1, None);
    config.pools.generators = PoolLimit::new(0, None);
    config.endpoints = vec![
        EndpointGroup::new("mgw/ann", EndpointProfile::Announcement, 2),
        EndpointGroup::new("mgw/ivr", EndpointProfile::Ivr, 2),
        EndpointGroup::new("mgw/cnf", EndpointProfile::Conference, 1),
        EndpointGroup::new("mgw/bridge", EndpointProfile::Bridge, 2),
    ];
    config
}

pub struct TestGateway {
    pub gateway: MediaGateway,
    pub clock: Arc<ManualClock>,
    pub tap: Arc<MediaTap>,
    outbound: UnboundedReceiver<OutboundMessage>,
    responses: Vec<MgcpResponse>,
    notifications: Vec<NotifyMessage>,
    commands: Vec<MgcpCommand>,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        let tap = MediaTap::new();
        let (provider, outbound) = ChannelProvider::new();

        let players = tap.clone();
        let recorders = tap.clone();
        let detectors = tap.clone();
        let gateway = MediaGateway::builder(config)
            .provider(Arc::new(provider))
            .clock(clock.clone())
            .media(move |pools| {
                pools
                    .players(move || Box::new(FakePlayer::new(players.clone())) as Box<dyn Player>)
                    .recorders(move || Box::new(FakeRecorder::new(recorders.clone())) as Box<dyn Recorder>)
                    .detectors(move || Box::new(FakeDetector::new(detectors.clone())) as Box<dyn DtmfDetector>)
                    .generators(|| Box::new(FakeGenerator) as Box<dyn DtmfGenerator>)
            })
            .build()
            .expect("test gateway builds");

        Self {
            gateway,
            clock,
            tap,
            outbound,
            responses: Vec::new(),
            notifications: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn tick(&mut self) {
        self.gateway.tick();
        self.collect();
    }

    /// Move the clock forward and run one tick
    pub fn advance(&mut self, delta: Duration) {
        self.clock.advance(delta);
        self.tick();
    }

    /// Submit a command and tick until its response arrives
    pub fn run(&mut self, command: MgcpCommand) -> MgcpResponse {
        let transaction_id = command.transaction_id;
        self.gateway.process(command);
        for _ in 0..32 {
            self.tick();
            if let Some(at) = self.responses.iter().position(|r| r.transaction_id == transaction_id) {
                return self.responses.remove(at);
            }
        }
        panic!("no response for transaction {}", transaction_id);
    }

    fn collect(&mut self) {
        while let Ok(message) = self.outbound.try_recv() {
            match message {
                OutboundMessage::Response(response) => self.responses.push(response),
                OutboundMessage::Notify(notify) => self.notifications.push(notify),
                OutboundMessage::Command(command) => self.commands.push(command),
            }
        }
    }

    /// Responses not yet claimed by `run`
    pub fn take_responses(&mut self) -> Vec<MgcpResponse> {
        self.collect();
        std::mem::take(&mut self.responses)
    }

    pub fn take_notifications(&mut self) -> Vec<NotifyMessage> {
        self.collect();
        std::mem::take(&mut self.notifications)
    }

    /// Commands the gateway sent to the call agent on its own
    pub fn take_commands(&mut self) -> Vec<MgcpCommand> {
        self.collect();
        std::mem::take(&mut self.commands)
    }
}
