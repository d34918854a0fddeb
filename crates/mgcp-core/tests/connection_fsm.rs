//! Connection state machine tests
//!
//! Random operation sequences are replayed against a reference model of the
//! CLOSED / HALF_OPEN / OPEN table. Illegal operations must fail without
//! changing state, and a port is held exactly while the connection is not
//! closed.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use proptest::prelude::*;

use rvoip_mgcp_core::connection::{ConnectionError, Format, PortManager};
use rvoip_mgcp_core::pool::ResourcePool;
use rvoip_mgcp_core::{CallId, Connection, ConnectionId, ConnectionMode, ConnectionState, ConnectionType};

use common::{G729_OFFER, OFFER};

#[derive(Debug, Clone)]
enum Op {
    HalfOpen,
    Open,
    OpenIncompatible,
    Renegotiate,
    RenegotiateIncompatible,
    Close,
    SetMode(ConnectionMode),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::HalfOpen),
        Just(Op::Open),
        Just(Op::OpenIncompatible),
        Just(Op::Renegotiate),
        Just(Op::RenegotiateIncompatible),
        Just(Op::Close),
        prop::sample::select(ConnectionMode::ALL.to_vec()).prop_map(Op::SetMode),
    ]
}

fn formats() -> Vec<Format> {
    vec![Format::pcmu(), Format::pcma(), Format::telephone_event()]
}

/// Whether the reference model accepts `op`, and the state it leaves behind
fn expected(state: ConnectionState, op: &Op) -> (bool, ConnectionState) {
    use ConnectionState::*;
    match (op, state) {
        (Op::HalfOpen, Closed) => (true, HalfOpen),
        (Op::Open, Closed | HalfOpen) => (true, Open),
        // A failed answer to our own offer closes the connection
        (Op::OpenIncompatible, HalfOpen) => (false, Closed),
        (Op::Renegotiate, Open) => (true, Open),
        (Op::Close, HalfOpen | Open) => (true, Closed),
        (Op::SetMode(_), HalfOpen | Open) => (true, state),
        (_, state) => (false, state),
    }
}

fn apply(connection: &mut Connection, op: &Op) -> Result<(), ConnectionError> {
    match op {
        Op::HalfOpen => connection.half_open(&formats()).map(|_| ()),
        Op::Open => connection.open(OFFER, &formats()).map(|_| ()),
        Op::OpenIncompatible => connection.open(G729_OFFER, &formats()).map(|_| ()),
        Op::Renegotiate => connection.renegotiate(OFFER, &formats()).map(|_| ()),
        Op::RenegotiateIncompatible => connection.renegotiate(G729_OFFER, &formats()).map(|_| ()),
        Op::Close => connection.close(),
        Op::SetMode(mode) => connection.set_mode(*mode).map(|_| ()),
    }
}

proptest! {
    #[test]
    fn test_operations_follow_the_state_table(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let ports = Arc::new(PortManager::new(30000, 30010));
        let mut connection = Connection::new(ConnectionId(7), ports.clone(), "10.0.0.1");
        connection.assign(ConnectionType::Rtp, None, Duration::ZERO);

        for op in &ops {
            let before = connection.state();
            let (legal, after) = expected(before, op);
            let result = apply(&mut connection, op);

            prop_assert_eq!(result.is_ok(), legal, "{:?} from {}", op, before);
            prop_assert_eq!(connection.state(), after, "{:?} from {}", op, before);
            let holds_port = connection.state() != ConnectionState::Closed;
            prop_assert_eq!(connection.port().is_some(), holds_port);
            prop_assert_eq!(ports.in_use(), usize::from(holds_port));
        }
    }
}

#[test]
fn test_illegal_operation_reports_current_state() {
    let ports = Arc::new(PortManager::new(30000, 30010));
    let mut connection = Connection::new(ConnectionId(1), ports, "10.0.0.1");

    let err = connection.renegotiate(OFFER, &formats()).unwrap_err();
    assert_eq!(
        err,
        ConnectionError::IllegalState { operation: "renegotiate", state: ConnectionState::Closed }
    );
}

#[test]
fn test_local_connection_refuses_negotiation() {
    let ports = Arc::new(PortManager::new(30000, 30010));
    let mut connection = Connection::new(ConnectionId(1), ports.clone(), "10.0.0.1");
    connection.assign(ConnectionType::Local, None, Duration::ZERO);

    assert!(matches!(connection.half_open(&formats()), Err(ConnectionError::WrongType { .. })));
    connection.open_local().unwrap();
    assert_eq!(connection.state(), ConnectionState::Open);
    assert_eq!(ports.in_use(), 0);
}

#[test]
fn test_port_exhaustion_leaves_connection_closed() {
    let ports = Arc::new(PortManager::new(30000, 30000));
    let mut first = Connection::new(ConnectionId(1), ports.clone(), "10.0.0.1");
    let mut second = Connection::new(ConnectionId(2), ports.clone(), "10.0.0.1");

    first.half_open(&formats()).unwrap();
    assert_eq!(second.half_open(&formats()).unwrap_err(), ConnectionError::NoPortAvailable);
    assert_eq!(second.state(), ConnectionState::Closed);
}

#[test]
fn test_recycled_connection_keeps_id_and_gets_new_identity() {
    let ports = Arc::new(PortManager::new(30000, 30010));
    let next_id = Arc::new(AtomicU32::new(1));
    let pool = {
        let ports = ports.clone();
        ResourcePool::new("connections", 1, Some(1), move || {
            Connection::new(ConnectionId(next_id.fetch_add(1, Ordering::Relaxed)), ports.clone(), "10.0.0.1")
        })
    };

    let mut connection = pool.acquire().unwrap();
    let call: CallId = "A1B2".parse().unwrap();
    connection.assign(ConnectionType::Rtp, Some(call), Duration::from_secs(3));
    connection.open(OFFER, &formats()).unwrap();
    connection.set_mode(ConnectionMode::SendRecv).unwrap();
    connection.receive_frame(vec![0; 160]);

    let id = connection.id();
    let cname = connection.cname();
    pool.release(connection);
    assert_eq!(ports.in_use(), 0);

    let recycled = pool.acquire().unwrap();
    assert_eq!(recycled.id(), id);
    assert_ne!(recycled.cname(), cname);
    assert_eq!(recycled.state(), ConnectionState::Closed);
    assert_eq!(recycled.mode(), ConnectionMode::Inactive);
    assert_eq!(recycled.call_id(), None);
    assert_eq!(recycled.stats().packets_received, 0);
}
