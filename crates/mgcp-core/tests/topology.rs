//! Endpoint topology tests
//!
//! The mixing cycle must be scheduled exactly while some connection reads or
//! writes and none is in loopback, whatever order modes change in.

use std::sync::Arc;

use proptest::prelude::*;

use rvoip_mgcp_core::config::{MediaSettings, PoolSettings};
use rvoip_mgcp_core::connection::PortManager;
use rvoip_mgcp_core::endpoint::{EndpointEnv, ModeCounters};
use rvoip_mgcp_core::media::ResourcesPool;
use rvoip_mgcp_core::{
    ConnectionId, ConnectionMode, ConnectionType, Endpoint, EndpointProfile, EndpointState, ManualClock, Scheduler,
};

struct Fixture {
    env: Arc<EndpointEnv>,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let ports = Arc::new(PortManager::new(41000, 41200));
        let resources = Arc::new(ResourcesPool::builder(PoolSettings::default(), ports, "10.0.0.1").build());
        let env = Arc::new(EndpointEnv {
            control: Scheduler::new("control", clock.clone()),
            media: Scheduler::new("media", clock),
            resources,
            settings: MediaSettings::default(),
            agent: None,
        });
        Self { env }
    }

    fn endpoint(&self, name: &str, profile: EndpointProfile) -> Arc<Endpoint> {
        let endpoint = Endpoint::new(name, profile, self.env.clone());
        endpoint.start();
        endpoint
    }
}

fn rtp_leg(endpoint: &Endpoint) -> ConnectionId {
    let id = endpoint.create_connection(ConnectionType::Rtp, None).unwrap();
    endpoint.half_open(id).unwrap();
    id
}

fn counters_for(modes: &[Option<ConnectionMode>]) -> ModeCounters {
    let live = || modes.iter().flatten();
    ModeCounters {
        read: live().filter(|m| m.reads()).count(),
        write: live().filter(|m| m.writes()).count(),
        loopback: live().filter(|m| m.loops()).count(),
    }
}

#[derive(Debug, Clone)]
enum Op {
    SetMode(usize, ConnectionMode),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..4, prop::sample::select(ConnectionMode::ALL.to_vec())).prop_map(|(i, m)| Op::SetMode(i, m)),
        1 => (0usize..4).prop_map(Op::Delete),
    ]
}

proptest! {
    #[test]
    fn test_mixing_runs_iff_counters_allow(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let fixture = Fixture::new();
        let endpoint = fixture.endpoint("cnf/1", EndpointProfile::Conference);
        let ids: Vec<ConnectionId> = (0..4).map(|_| rtp_leg(&endpoint)).collect();
        let mut modes: Vec<Option<ConnectionMode>> = vec![Some(ConnectionMode::Inactive); 4];

        for op in &ops {
            match *op {
                Op::SetMode(i, mode) => {
                    let result = endpoint.set_mode(ids[i], mode);
                    prop_assert_eq!(result.is_ok(), modes[i].is_some());
                    if modes[i].is_some() {
                        modes[i] = Some(mode);
                    }
                }
                Op::Delete(i) => {
                    let result = endpoint.delete_connection(ids[i]);
                    prop_assert_eq!(result.is_ok(), modes[i].is_some());
                    modes[i] = None;
                }
            }

            let expected = counters_for(&modes);
            prop_assert_eq!(endpoint.mode_counters(), expected);
            prop_assert_eq!(endpoint.is_mixing(), expected.should_run());
            prop_assert_eq!(
                expected.should_run(),
                expected.loopback == 0 && (expected.read > 0 || expected.write > 0)
            );
        }

        let live = modes.iter().flatten().count();
        prop_assert_eq!(endpoint.connection_count(), live);
        let state = if live == 0 { EndpointState::Ready } else { EndpointState::InUse };
        prop_assert_eq!(endpoint.state(), state);
    }
}

#[test]
fn test_conference_mixes_other_participants() {
    let fixture = Fixture::new();
    let endpoint = fixture.endpoint("cnf/1", EndpointProfile::Conference);
    let alice = rtp_leg(&endpoint);
    let bob = rtp_leg(&endpoint);
    endpoint.set_mode(alice, ConnectionMode::SendRecv).unwrap();
    endpoint.set_mode(bob, ConnectionMode::SendRecv).unwrap();

    // Half-open legs drop inbound media, so open them with an answer first
    let answer = "v=0\r\no=- 1 1 IN IP4 10.0.0.9\r\ns=-\r\nc=IN IP4 10.0.0.9\r\nt=0 0\r\nm=audio 5004 RTP/AVP 0\r\n";
    endpoint.open(alice, answer).unwrap();
    endpoint.open(bob, answer).unwrap();

    endpoint.deliver_frame(alice, vec![100; 160]).unwrap();
    fixture.env.media.tick();

    assert_eq!(endpoint.take_frame(bob), Some(vec![100; 160]));
    assert_eq!(endpoint.take_frame(alice), None);
}

#[test]
fn test_loopback_echoes_without_mixing() {
    let fixture = Fixture::new();
    let endpoint = fixture.endpoint("ann/1", EndpointProfile::Announcement);
    let id = rtp_leg(&endpoint);
    let answer = "v=0\r\no=- 1 1 IN IP4 10.0.0.9\r\ns=-\r\nc=IN IP4 10.0.0.9\r\nt=0 0\r\nm=audio 5004 RTP/AVP 0\r\n";
    endpoint.open(id, answer).unwrap();

    endpoint.set_mode(id, ConnectionMode::Loopback).unwrap();
    assert!(!endpoint.is_mixing());

    endpoint.deliver_frame(id, vec![7; 160]).unwrap();
    assert_eq!(endpoint.take_frame(id), Some(vec![7; 160]));

    let info = endpoint.connection(id).unwrap();
    assert_eq!(info.stats.packets_received, 1);
    assert_eq!(info.stats.packets_sent, 1);
}

#[test]
fn test_local_pair_forwards_across_endpoints() {
    let fixture = Fixture::new();
    let ivr = fixture.endpoint("ivr/1", EndpointProfile::Ivr);
    let bridge = fixture.endpoint("bridge/1", EndpointProfile::Bridge);

    let network = rtp_leg(&bridge);
    let answer = "v=0\r\no=- 1 1 IN IP4 10.0.0.9\r\ns=-\r\nc=IN IP4 10.0.0.9\r\nt=0 0\r\nm=audio 5004 RTP/AVP 0\r\n";
    bridge.open(network, answer).unwrap();
    bridge.set_mode(network, ConnectionMode::SendRecv).unwrap();

    let inside = bridge.create_connection(ConnectionType::Local, None).unwrap();
    let peer = ivr.create_connection(ConnectionType::Local, None).unwrap();
    Endpoint::join_local(&bridge, inside, &ivr, peer).unwrap();
    bridge.set_mode(inside, ConnectionMode::SendRecv).unwrap();
    ivr.set_mode(peer, ConnectionMode::SendRecv).unwrap();

    // Network audio crosses the splitter onto the local leg and its peer
    bridge.deliver_frame(network, vec![42; 160]).unwrap();
    fixture.env.media.tick();
    assert_eq!(ivr.connection(peer).unwrap().stats.packets_received, 1);

    // Deleting one side of the pair removes the other
    bridge.delete_connection(inside).unwrap();
    assert!(ivr.connection(peer).is_none());
    assert_eq!(ivr.state(), EndpointState::Ready);
}
