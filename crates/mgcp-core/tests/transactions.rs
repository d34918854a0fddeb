//! End-to-end command handling
//!
//! Commands go through the controller, run as task chains on the control
//! scheduler and are answered through the provider, exactly once each.

mod common;

use std::collections::HashMap;

use pretty_assertions::assert_eq;

use rvoip_mgcp_core::config::Encoding;
use rvoip_mgcp_core::endpoint::ModeCounters;
use rvoip_mgcp_core::{
    ConnectionId, ConnectionMode, EndpointState, MgcpCommand, MgcpResponse, Parameter, ResponseCode, Verb,
};

use common::{G729_OFFER, OFFER, TestGateway};

const CALL: &str = "A1B2C3";

fn crcx(tx: u32, endpoint: &str) -> MgcpCommand {
    MgcpCommand::new(Verb::CreateConnection, tx, endpoint)
        .with_param(Parameter::CallId, CALL)
        .with_param(Parameter::Mode, "sendrecv")
}

fn connection_id(response: &MgcpResponse) -> ConnectionId {
    response
        .param(Parameter::ConnectionId)
        .expect("response carries a connection id")
        .parse()
        .expect("connection id is hex")
}

fn create(gw: &mut TestGateway, tx: u32, endpoint: &str) -> ConnectionId {
    let response = gw.run(crcx(tx, endpoint).with_sdp(OFFER));
    assert_eq!(response.code, ResponseCode::TransactionExecuted, "{}", response.message);
    connection_id(&response)
}

#[test]
fn test_create_then_delete_reports_statistics() {
    let mut gw = TestGateway::new();

    let response = gw.run(crcx(1, "mgw/ann/1").with_sdp(OFFER));
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
    assert_eq!(response.transaction_id, 1);
    let id = connection_id(&response);
    let answer = response.sdp.expect("answer sdp");
    assert!(answer.contains("c=IN IP4 10.0.0.1"));
    assert!(answer.contains("RTP/AVP 0 101"));

    let endpoint = gw.gateway.endpoint("mgw/ann/1").unwrap();
    assert_eq!(endpoint.state(), EndpointState::InUse);
    endpoint.deliver_frame(id, vec![0; 160]).unwrap();

    let response = gw.run(
        MgcpCommand::new(Verb::DeleteConnection, 2, "mgw/ann/1")
            .with_param(Parameter::CallId, CALL)
            .with_param(Parameter::ConnectionId, id.to_string()),
    );
    assert_eq!(response.code, ResponseCode::ConnectionDeleted);
    let stats = response.param(Parameter::ConnectionParameters).unwrap();
    assert!(stats.contains("PS=0"), "{}", stats);
    assert!(stats.contains("PR=1"), "{}", stats);

    assert_eq!(endpoint.state(), EndpointState::Ready);
    assert_eq!(endpoint.connection_count(), 0);
    assert_eq!(gw.gateway.resources().stats().connections.outstanding, 0);
    assert_eq!(gw.gateway.in_flight(), 0);
}

#[test]
fn test_create_without_sdp_returns_offer() {
    let mut gw = TestGateway::new();

    let response = gw.run(crcx(1, "mgw/ann/1"));
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
    let id = connection_id(&response);
    assert!(response.sdp.unwrap().contains("a=rtpmap:0 PCMU/8000"));

    let endpoint = gw.gateway.endpoint("mgw/ann/1").unwrap();
    let info = endpoint.connection(id).unwrap();
    assert_eq!(info.mode, ConnectionMode::SendRecv);
    assert_eq!(info.call_id.unwrap().as_str(), CALL);
}

#[test]
fn test_dollar_names_the_selected_endpoint() {
    let mut gw = TestGateway::new();

    let first = gw.run(crcx(1, "mgw/ann/$").with_sdp(OFFER));
    assert_eq!(first.param(Parameter::SpecificEndpointId), Some("mgw/ann/1@mgw.test:2427"));

    let second = gw.run(crcx(2, "mgw/ann/$").with_sdp(OFFER));
    assert_eq!(second.param(Parameter::SpecificEndpointId), Some("mgw/ann/2@mgw.test:2427"));

    let third = gw.run(crcx(3, "mgw/ann/$").with_sdp(OFFER));
    assert_eq!(third.code, ResponseCode::EndpointNotAvailable);
}

#[test]
fn test_codec_failure_rolls_back_the_connection() {
    let mut gw = TestGateway::new();

    let response = gw.run(crcx(1, "mgw/ann/1").with_sdp(G729_OFFER));
    assert_eq!(response.code, ResponseCode::CodecNegotiationFailure);
    assert_eq!(response.param(Parameter::ConnectionId), None);

    let endpoint = gw.gateway.endpoint("mgw/ann/1").unwrap();
    assert_eq!(endpoint.connection_count(), 0);
    assert_eq!(endpoint.state(), EndpointState::Ready);
    assert_eq!(gw.gateway.resources().stats().connections.outstanding, 0);
    assert!(gw.take_responses().is_empty());
}

#[test]
fn test_local_pair_joins_two_endpoints() {
    let mut gw = TestGateway::new();

    let response = gw.run(crcx(1, "mgw/ivr/1").with_param(Parameter::SecondEndpointId, "mgw/bridge/$"));
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
    assert_eq!(response.param(Parameter::SpecificEndpointId), Some("mgw/ivr/1@mgw.test:2427"));
    assert_eq!(response.param(Parameter::SecondEndpointId), Some("mgw/bridge/1@mgw.test:2427"));
    assert!(response.param(Parameter::SecondConnectionId).is_some());

    let ivr = gw.gateway.endpoint("mgw/ivr/1").unwrap();
    let bridge = gw.gateway.endpoint("mgw/bridge/1").unwrap();
    assert_eq!(bridge.connection_count(), 1);
    assert_eq!(bridge.connections()[0].mode, ConnectionMode::SendRecv);

    let response = gw.run(
        MgcpCommand::new(Verb::DeleteConnection, 2, "mgw/ivr/1").with_param(Parameter::CallId, CALL),
    );
    assert_eq!(response.code, ResponseCode::ConnectionDeleted);
    assert_eq!(ivr.connection_count(), 0);
    assert_eq!(bridge.connection_count(), 0);
}

#[test]
fn test_joining_an_endpoint_to_itself_fails_cleanly() {
    let mut gw = TestGateway::new();

    let response = gw.run(crcx(1, "mgw/ivr/1").with_param(Parameter::SecondEndpointId, "mgw/ivr/1"));
    assert_eq!(response.code, ResponseCode::ProtocolError);
    assert_eq!(gw.gateway.endpoint("mgw/ivr/1").unwrap().connection_count(), 0);
}

#[test]
fn test_create_parameter_errors() {
    let mut gw = TestGateway::new();

    let missing_call = MgcpCommand::new(Verb::CreateConnection, 1, "mgw/ann/1").with_param(Parameter::Mode, "sendrecv");
    assert_eq!(gw.run(missing_call).code, ResponseCode::ProtocolError);

    let bad_call = MgcpCommand::new(Verb::CreateConnection, 2, "mgw/ann/1")
        .with_param(Parameter::CallId, "not-hex")
        .with_param(Parameter::Mode, "sendrecv");
    assert_eq!(gw.run(bad_call).code, ResponseCode::IncorrectCallId);

    let bad_mode = MgcpCommand::new(Verb::CreateConnection, 3, "mgw/ann/1")
        .with_param(Parameter::CallId, CALL)
        .with_param(Parameter::Mode, "shout");
    assert_eq!(gw.run(bad_mode).code, ResponseCode::UnsupportedMode);

    assert_eq!(gw.run(crcx(4, "mgw/ann/*")).code, ResponseCode::ProtocolError);
    assert_eq!(gw.run(crcx(5, "mgw/pbx/1")).code, ResponseCode::EndpointUnknown);

    assert_eq!(gw.gateway.resources().stats().connections.outstanding, 0);
}

#[test]
fn test_modify_connection() {
    let mut gw = TestGateway::new();
    let id = create(&mut gw, 1, "mgw/ann/1");
    let endpoint = gw.gateway.endpoint("mgw/ann/1").unwrap();

    let modify = |tx: u32, call: &str, id: &str| {
        MgcpCommand::new(Verb::ModifyConnection, tx, "mgw/ann/1")
            .with_param(Parameter::CallId, call)
            .with_param(Parameter::ConnectionId, id)
    };

    assert_eq!(gw.run(modify(2, CALL, "FFFF")).code, ResponseCode::IncorrectConnectionId);
    assert_eq!(gw.run(modify(3, "DEAD", &id.to_string())).code, ResponseCode::IncorrectCallId);

    let response = gw.run(modify(4, CALL, &id.to_string()).with_param(Parameter::Mode, "recvonly"));
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
    assert_eq!(endpoint.connection(id).unwrap().mode, ConnectionMode::RecvOnly);

    // A new offer on an open connection renegotiates and returns a fresh answer
    let response = gw.run(modify(5, CALL, &id.to_string()).with_sdp(OFFER));
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
    assert!(response.sdp.unwrap().contains("o=- "));

    // An incompatible offer fails but leaves the connection open
    let response = gw.run(modify(6, CALL, &id.to_string()).with_sdp(G729_OFFER));
    assert_eq!(response.code, ResponseCode::CodecNegotiationFailure);
    assert_eq!(endpoint.connection(id).unwrap().mode, ConnectionMode::RecvOnly);
    assert_eq!(endpoint.connection_count(), 1);
}

#[test]
fn test_modify_completes_a_half_open_connection() {
    let mut gw = TestGateway::new();
    let response = gw.run(crcx(1, "mgw/ann/1"));
    let id = connection_id(&response);

    let response = gw.run(
        MgcpCommand::new(Verb::ModifyConnection, 2, "mgw/ann/1")
            .with_param(Parameter::CallId, CALL)
            .with_param(Parameter::ConnectionId, id.to_string())
            .with_sdp(OFFER),
    );
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
    assert_eq!(response.sdp, None);

    let info = gw.gateway.endpoint("mgw/ann/1").unwrap().connection(id).unwrap();
    assert!(info.remote_sdp.is_some());
}

#[test]
fn test_delete_variants() {
    let mut gw = TestGateway::new();
    create(&mut gw, 1, "mgw/ann/1");
    create(&mut gw, 2, "mgw/ann/2");

    let by_id_without_call =
        MgcpCommand::new(Verb::DeleteConnection, 3, "mgw/ann/1").with_param(Parameter::ConnectionId, "1");
    assert_eq!(gw.run(by_id_without_call).code, ResponseCode::ProtocolError);

    let unknown_call =
        MgcpCommand::new(Verb::DeleteConnection, 4, "mgw/ann/1").with_param(Parameter::CallId, "BEEF");
    assert_eq!(gw.run(unknown_call).code, ResponseCode::IncorrectCallId);

    let everything = MgcpCommand::new(Verb::DeleteConnection, 5, "mgw/ann/*");
    assert_eq!(gw.run(everything).code, ResponseCode::ConnectionDeleted);
    for name in ["mgw/ann/1", "mgw/ann/2"] {
        assert_eq!(gw.gateway.endpoint(name).unwrap().connection_count(), 0);
    }
}

#[test]
fn test_delete_with_reason_code_is_handled_as_notify() {
    let mut gw = TestGateway::new();
    let id = create(&mut gw, 1, "mgw/ann/1");

    let response = gw.run(
        MgcpCommand::new(Verb::DeleteConnection, 2, "mgw/ann/1")
            .with_param(Parameter::CallId, CALL)
            .with_param(Parameter::ConnectionId, id.to_string())
            .with_param(Parameter::ReasonCode, "900 Endpoint malfunctioning"),
    );
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
    assert_eq!(gw.gateway.endpoint("mgw/ann/1").unwrap().connection_count(), 1);
}

#[test]
fn test_audit_connection() {
    let mut gw = TestGateway::new();
    let id = create(&mut gw, 1, "mgw/ann/1");

    let audit = |tx: u32| {
        MgcpCommand::new(Verb::AuditConnection, tx, "mgw/ann/1").with_param(Parameter::ConnectionId, id.to_string())
    };

    let response = gw.run(audit(2));
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
    assert_eq!(response.param(Parameter::CallId), Some(CALL));
    assert_eq!(response.param(Parameter::Mode), Some("sendrecv"));
    assert!(response.param(Parameter::ConnectionParameters).unwrap().starts_with("PS="));
    assert_eq!(response.sdp, None);

    let response = gw.run(audit(3).with_param(Parameter::RequestedInfo, "LC,RC"));
    let sdp = response.sdp.unwrap();
    assert!(sdp.contains("10.0.0.1"));
    assert!(sdp.contains("10.0.0.9"));

    let response = gw.run(audit(4).with_param(Parameter::RequestedInfo, "XY"));
    assert_eq!(response.code, ResponseCode::ProtocolError);
}

#[test]
fn test_endpoint_configuration_sets_encoding() {
    let mut gw = TestGateway::new();

    let configure = |tx: u32, bearer: &str| {
        MgcpCommand::new(Verb::EndpointConfiguration, tx, "mgw/ann/*").with_param(Parameter::BearerInformation, bearer)
    };

    assert_eq!(gw.run(configure(1, "e:A")).code, ResponseCode::TransactionExecuted);
    for name in ["mgw/ann/1", "mgw/ann/2"] {
        assert_eq!(gw.gateway.endpoint(name).unwrap().encoding(), Encoding::Pcma);
    }
    assert_eq!(gw.gateway.endpoint("mgw/ivr/1").unwrap().encoding(), Encoding::Pcmu);

    assert_eq!(gw.run(configure(2, "e:G729")).code, ResponseCode::ProtocolError);
    let missing = MgcpCommand::new(Verb::EndpointConfiguration, 3, "mgw/ann/1");
    assert_eq!(gw.run(missing).code, ResponseCode::ProtocolError);
}

#[test]
fn test_notification_request_errors() {
    let mut gw = TestGateway::new();
    let endpoint = gw.gateway.endpoint("mgw/ivr/1").unwrap();

    let stored = MgcpCommand::new(Verb::NotificationRequest, 1, "mgw/ivr/1")
        .with_param(Parameter::RequestId, "GOOD")
        .with_param(Parameter::RequestedEvents, "AU/oc(N)");
    assert_eq!(gw.run(stored).code, ResponseCode::TransactionExecuted);
    let before = endpoint.notification_request().expect("request stored");
    assert_eq!(before.request_id, "GOOD");

    let unknown = MgcpCommand::new(Verb::NotificationRequest, 2, "mgw/ivr/1")
        .with_param(Parameter::RequestId, "UNKNOWN")
        .with_param(Parameter::SignalRequests, "XX/zz(a=b)");
    assert_eq!(gw.run(unknown).code, ResponseCode::NoSuchEventOrSignal);
    assert_eq!(endpoint.notification_request(), Some(before.clone()));

    let bad_option = MgcpCommand::new(Verb::NotificationRequest, 3, "mgw/ivr/1")
        .with_param(Parameter::RequestId, "BAD")
        .with_param(Parameter::RequestedEvents, "AU/of(N)")
        .with_param(Parameter::SignalRequests, "AU/pr(ip=a.wav na=0)");
    assert_eq!(gw.run(bad_option).code, ResponseCode::ProtocolError);
    assert_eq!(endpoint.notification_request(), Some(before.clone()));

    let missing_request_id = MgcpCommand::new(Verb::NotificationRequest, 4, "mgw/ivr/1");
    assert_eq!(gw.run(missing_request_id).code, ResponseCode::ProtocolError);
    assert_eq!(endpoint.notification_request(), Some(before));

    assert!(endpoint.active_signal().is_none());
}

#[test]
fn test_notify_is_acknowledged() {
    let mut gw = TestGateway::new();
    let response = gw.run(
        MgcpCommand::new(Verb::Notify, 1, "mgw/ivr/1")
            .with_param(Parameter::RequestId, "7")
            .with_param(Parameter::ObservedEvents, "L/hu"),
    );
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
}

#[test]
fn test_unbound_verbs_are_rejected() {
    let mut gw = TestGateway::new();
    assert_eq!(gw.run(MgcpCommand::new(Verb::AuditEndpoint, 1, "mgw/ann/1")).code, ResponseCode::UnknownCommand);
    assert_eq!(gw.run(MgcpCommand::new(Verb::RestartInProgress, 2, "mgw/*")).code, ResponseCode::UnknownCommand);
}

#[test]
fn test_every_command_is_answered_exactly_once() {
    let mut gw = TestGateway::new();

    let commands = vec![
        crcx(10, "mgw/ann/1").with_sdp(OFFER),
        crcx(11, "mgw/ann/2").with_sdp(G729_OFFER),
        crcx(12, "mgw/ivr/$"),
        MgcpCommand::new(Verb::DeleteConnection, 13, "mgw/bridge/*"),
        MgcpCommand::new(Verb::AuditEndpoint, 14, "mgw/ann/1"),
        MgcpCommand::new(Verb::ModifyConnection, 15, "mgw/ann/1"),
    ];
    for command in commands {
        gw.gateway.process(command);
    }

    // A retransmission of an in-flight transaction is dropped
    assert!(gw.gateway.process(crcx(10, "mgw/ann/1").with_sdp(OFFER)).is_none());

    for _ in 0..8 {
        gw.tick();
    }

    let mut answers: HashMap<u32, usize> = HashMap::new();
    for response in gw.take_responses() {
        *answers.entry(response.transaction_id).or_default() += 1;
    }
    assert_eq!(answers, (10..=15).map(|tx| (tx, 1)).collect::<HashMap<_, _>>());
    assert_eq!(gw.gateway.in_flight(), 0);
    assert_eq!(gw.gateway.endpoint("mgw/ann/1").unwrap().connection_count(), 1);
}

#[test]
fn test_half_open_connection_expires() {
    let mut gw = TestGateway::new();
    let response = gw.run(crcx(1, "mgw/ann/1"));
    let id = connection_id(&response);
    let endpoint = gw.gateway.endpoint("mgw/ann/1").unwrap();
    assert!(gw.take_commands().is_empty());

    let timeout = gw.gateway.config().media.half_open_timeout();
    gw.advance(timeout);

    assert!(endpoint.connection(id).is_none());
    assert_eq!(endpoint.state(), EndpointState::Ready);
    assert_eq!(gw.gateway.resources().stats().connections.outstanding, 0);

    let commands = gw.take_commands();
    assert_eq!(commands.len(), 1);
    let delete = &commands[0];
    assert_eq!(delete.verb, Verb::DeleteConnection);
    assert_eq!(delete.endpoint, "mgw/ann/1@mgw.test:2427");
    assert_eq!(delete.param(Parameter::CallId), Some(CALL));
    assert_eq!(delete.param(Parameter::ConnectionId), Some(id.to_string().as_str()));
    assert!(delete.param(Parameter::ReasonCode).is_some_and(|reason| reason.starts_with("902")));
    assert!(delete.has_param(Parameter::ConnectionParameters));

    // Nothing further once the connection is gone
    gw.advance(timeout);
    assert!(gw.take_commands().is_empty());
}

#[test]
fn test_failed_answer_deletes_half_open_connection() {
    let mut gw = TestGateway::new();
    let response = gw.run(crcx(1, "mgw/ann/1"));
    assert_eq!(response.code, ResponseCode::TransactionExecuted);
    let id = connection_id(&response);
    let endpoint = gw.gateway.endpoint("mgw/ann/1").unwrap();
    assert!(endpoint.is_mixing());

    let response = gw.run(
        MgcpCommand::new(Verb::ModifyConnection, 2, "mgw/ann/1")
            .with_param(Parameter::CallId, CALL)
            .with_param(Parameter::ConnectionId, id.to_string())
            .with_sdp(G729_OFFER),
    );
    assert_eq!(response.code, ResponseCode::CodecNegotiationFailure);

    assert!(endpoint.connection(id).is_none());
    assert_eq!(endpoint.state(), EndpointState::Ready);
    assert!(!endpoint.is_mixing());
    assert_eq!(endpoint.mode_counters(), ModeCounters::default());
    assert_eq!(gw.gateway.resources().stats().connections.outstanding, 0);

    // The expiry timer finds nothing left to delete
    let timeout = gw.gateway.config().media.half_open_timeout();
    gw.advance(timeout);
    assert!(gw.take_commands().is_empty());
}
