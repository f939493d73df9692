use libiot_connect::Error;
use libiot_connect::config::ConnectionConfig;
use libiot_connect::network::Interest;
use libiot_connect::network::application::mqtt::{ConnectionState, QoS, codec};
use libiot_connect::network::error::Error as NetError;
use libiot_connect::network::tls::TlsError;

use crate::fake::*;

fn state_is(state: ConnectionState) -> impl Fn(&Ctx) -> bool {
    move |ctx| ctx.connection_state() == state
}

#[test]
fn test_open_reports_opened_and_sends_connect() {
    let ctx = connected_with(settings(), config().with_keepalive(30));

    assert_eq!(ctx.app().states, vec![(ConnectionState::Opened, Ok(()))]);
    let connects = ctx.net().frames_of(codec::CONNECT);
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].keepalive(), 30);
    assert_eq!(ctx.tls().domains, vec!["broker.test".to_string()]);
    assert_eq!(ctx.tls().ca_len, CA_BUNDLE.len());
    assert_eq!(ctx.backoff_attempts(), 0);
}

#[test]
fn test_connect_check_only_after_writable() {
    let mut ctx = context();
    ctx.net_mut().connect_delay_ms = 2_500;
    ctx.open(config(), Some(on_state)).unwrap();

    assert!(run_until(&mut ctx, 50, |c| c.is_connected()));
    assert_eq!(ctx.net().check_calls, 1);
    assert_eq!(ctx.now_ms(), 2_500);
    assert!(ctx.net().selects.iter().all(|(_, timeout)| *timeout <= 1_000));
}

#[test]
fn test_open_while_active_is_rejected() {
    let mut ctx = context();
    ctx.open(config(), Some(on_state)).unwrap();
    assert_eq!(ctx.open(config(), None), Err(Error::AlreadyInProgress));

    assert!(run_until(&mut ctx, 20, |c| c.is_connected()));
    assert_eq!(ctx.open(config(), None), Err(Error::AlreadyInProgress));
}

#[test]
fn test_open_rejects_invalid_config() {
    let mut ctx = context();
    let config = ConnectionConfig::new("broker.test", 0, "device-1").unwrap();
    assert_eq!(ctx.open(config, None), Err(Error::InvalidParameter));
    assert_eq!(ctx.connection_state(), ConnectionState::Uninitialized);
}

#[test]
fn test_connack_refusal_is_not_retried() {
    let mut ctx = context();
    ctx.net_mut().auto.connack = Some(5);
    ctx.open(config(), Some(on_state)).unwrap();

    assert!(run_until(&mut ctx, 20, state_is(ConnectionState::OpenFailed)));
    assert_eq!(
        ctx.app().states,
        vec![(ConnectionState::OpenFailed, Err(Error::NotAuthorized))]
    );
    assert!(!ctx.reconnect_pending());
    assert_eq!(ctx.tls().cleanups, 1);
    assert_eq!(ctx.net().closed.len(), 1);
    assert_eq!(ctx.process_blocking(), Ok(()));
}

#[test]
fn test_open_times_out_without_connack() {
    let mut ctx = context();
    ctx.net_mut().auto.connack = None;
    ctx.open(config(), Some(on_state)).unwrap();

    assert!(run_until(&mut ctx, 100, state_is(ConnectionState::OpenFailed)));
    assert_eq!(ctx.app().states, vec![(ConnectionState::OpenFailed, Err(Error::Timeout))]);
    assert_eq!(ctx.now_ms(), 10_000);
}

#[test]
fn test_missing_ca_bundle_fails_before_tls() {
    let mut ctx = context();
    let config = config().with_ca_certificates("missing.pem").unwrap();
    ctx.open(config, Some(on_state)).unwrap();

    assert!(run_until(&mut ctx, 20, state_is(ConnectionState::OpenFailed)));
    assert_eq!(
        ctx.app().states,
        vec![(ConnectionState::OpenFailed, Err(Error::TlsCertificate))]
    );
    assert_eq!(ctx.tls().inits, 0);
}

#[test]
fn test_handshake_failure_releases_session() {
    let mut ctx = context();
    ctx.tls_mut().handshake.extend([Step::WantWrite, Step::Fail(TlsError::CertError)]);
    ctx.open(config(), Some(on_state)).unwrap();

    assert!(run_until(&mut ctx, 20, state_is(ConnectionState::OpenFailed)));
    assert_eq!(
        ctx.app().states,
        vec![(ConnectionState::OpenFailed, Err(Error::TlsCertificate))]
    );
    assert_eq!(ctx.tls().inits, 1);
    assert_eq!(ctx.tls().cleanups, 1);
    assert_eq!(ctx.net().count(codec::CONNECT), 0);
}

#[test]
fn test_handshake_waits_for_peer_data() {
    let mut ctx = context();
    ctx.tls_mut().handshake.extend([Step::WantWrite, Step::AwaitPeer]);
    ctx.open(config(), Some(on_state)).unwrap();

    for _ in 0..5 {
        ctx.process_tick().unwrap();
    }
    assert_eq!(ctx.connection_state(), ConnectionState::Opening);
    assert_eq!(ctx.net().selects.last().map(|(i, _)| *i), Some(Some(Interest::READ)));

    ctx.net_mut().push(&[0x16]);
    assert!(run_until(&mut ctx, 10, |c| c.is_connected()));
}

#[test]
fn test_graceful_disconnect_flushes_and_voids_in_flight() {
    let mut ctx = connected();
    ctx.net_mut().auto.puback = false;
    let id = ctx
        .publish("devices/1/state", b"bye", QoS::AtLeastOnce, false, Some(on_published))
        .unwrap();

    ctx.disconnect().unwrap();
    assert_eq!(ctx.connection_state(), ConnectionState::Closing);
    assert_eq!(ctx.disconnect(), Err(Error::AlreadyInProgress));

    assert!(run_until(&mut ctx, 10, state_is(ConnectionState::Closed)));
    let kinds: Vec<u8> = ctx.net().frames.iter().map(|f| f.kind()).collect();
    assert_eq!(kinds, vec![codec::CONNECT, codec::PUBLISH, codec::DISCONNECT]);
    assert_eq!(ctx.app().published, vec![(id, Err(Error::ConnectionLost))]);
    assert_eq!(ctx.app().states.last(), Some(&(ConnectionState::Closed, Ok(()))));
    assert!(!ctx.reconnect_pending());
    assert_eq!(ctx.disconnect(), Err(Error::NoActiveConnection));
}

#[test]
fn test_disconnect_logs_the_closing_transition() {
    let mut ctx = connected();
    capture_logs();
    ctx.disconnect().unwrap();

    let lines = logged();
    assert!(lines.iter().any(|line| line == "connection opened -> closing"));
    assert_eq!(ctx.connection_state(), ConnectionState::Closing);
}

#[test]
fn test_disconnect_gives_up_when_socket_stays_blocked() {
    let mut ctx = connected();
    ctx.net_mut().stall_writes = true;
    let start = ctx.now_ms();
    ctx.disconnect().unwrap();

    assert!(run_until(&mut ctx, 20, state_is(ConnectionState::Closed)));
    assert_eq!(ctx.now_ms(), start + 5_000);
    assert_eq!(ctx.net().count(codec::DISCONNECT), 0);
    assert_eq!(ctx.app().states.last(), Some(&(ConnectionState::Closed, Ok(()))));
}

#[test]
fn test_disconnect_while_opening() {
    let mut ctx = context();
    ctx.net_mut().connect_delay_ms = 5_000;
    ctx.open(config(), Some(on_state)).unwrap();
    ctx.process_tick().unwrap();
    ctx.process_tick().unwrap();

    ctx.disconnect().unwrap();
    assert_eq!(ctx.app().states, vec![(ConnectionState::Closed, Ok(()))]);
    assert_eq!(ctx.net().closed.len(), 1);
    assert_eq!(ctx.process_blocking(), Ok(()));
}

#[test]
fn test_disconnect_without_connection() {
    let mut ctx = context();
    assert_eq!(ctx.disconnect(), Err(Error::NoActiveConnection));
}

#[test]
fn test_connection_loss_reconnects_with_backoff() {
    let mut ctx = connected();
    ctx.net_mut().read_error = Some(NetError::ConnectionReset);

    assert!(run_until(&mut ctx, 10, state_is(ConnectionState::Closed)));
    assert!(ctx.reconnect_pending());
    assert_eq!(ctx.backoff_attempts(), 1);
    let lost_at = ctx.now_ms();

    assert!(run_until(&mut ctx, 20, |c| c.is_connected()));
    assert!(ctx.now_ms() >= lost_at + 2_000);
    assert_eq!(
        ctx.app().states,
        vec![
            (ConnectionState::Opened, Ok(())),
            (ConnectionState::Closing, Err(Error::ConnectionReset)),
            (ConnectionState::Closed, Err(Error::ConnectionReset)),
            (ConnectionState::Opening, Ok(())),
            (ConnectionState::Opened, Ok(())),
        ]
    );
    assert_eq!(ctx.backoff_attempts(), 0);
    assert_eq!(ctx.net().connect_calls, 2);
}

#[test]
fn test_reconnect_stops_after_attempt_ceiling() {
    let mut settings = settings();
    settings.backoff.max_attempts = 2;
    let mut ctx = connected_with(settings, config());
    ctx.net_mut().refuse_connect = true;
    ctx.net_mut().read_error = Some(NetError::ConnectionReset);

    assert!(run_until(&mut ctx, 200, |c| {
        c.connection_state() == ConnectionState::OpenFailed && !c.reconnect_pending()
    }));
    assert_eq!(
        ctx.app().states.last(),
        Some(&(ConnectionState::OpenFailed, Err(Error::BackoffTerminal)))
    );
    assert_eq!(ctx.net().connect_calls, 3);
    assert_eq!(ctx.backoff_attempts(), 3);
    assert_eq!(ctx.process_blocking(), Ok(()));
}

#[test]
fn test_reopen_after_failure_is_delayed() {
    let mut ctx = context();
    ctx.net_mut().refuse_connect = true;
    ctx.open(config(), Some(on_state)).unwrap();

    assert!(run_until(&mut ctx, 5, state_is(ConnectionState::OpenFailed)));
    assert_eq!(
        ctx.app().states,
        vec![(ConnectionState::OpenFailed, Err(Error::SocketError))]
    );
    assert!(!ctx.reconnect_pending());
    assert_eq!(ctx.backoff_attempts(), 1);

    ctx.net_mut().refuse_connect = false;
    let retry_at = ctx.now_ms();
    ctx.open(config(), Some(on_state)).unwrap();
    assert!(run_until(&mut ctx, 20, |c| c.is_connected()));
    assert!(ctx.now_ms() >= retry_at + 2_000);
    assert_eq!(ctx.net().connect_calls, 2);
}

#[test]
fn test_disconnect_cancels_pending_reconnect() {
    let mut ctx = connected();
    ctx.net_mut().read_error = Some(NetError::ConnectionReset);
    assert!(run_until(&mut ctx, 10, state_is(ConnectionState::Closed)));
    assert!(ctx.reconnect_pending());

    ctx.disconnect().unwrap();
    assert!(!ctx.reconnect_pending());
    assert_eq!(ctx.process_blocking(), Ok(()));
    assert_eq!(ctx.net().connect_calls, 1);
}

#[test]
fn test_socket_error_is_connection_loss() {
    let mut ctx = connected();
    ctx.net_mut().socket_error = true;

    assert!(run_until(&mut ctx, 5, state_is(ConnectionState::Closed)));
    assert_eq!(
        ctx.app().states.last(),
        Some(&(ConnectionState::Closed, Err(Error::SocketError)))
    );
    assert!(ctx.reconnect_pending());
}

#[test]
fn test_broker_disconnect_is_connection_loss() {
    let mut ctx = connected();
    ctx.net_mut().push(&[codec::DISCONNECT, 0]);

    assert!(run_until(&mut ctx, 5, state_is(ConnectionState::Closed)));
    assert_eq!(
        ctx.app().states.last(),
        Some(&(ConnectionState::Closed, Err(Error::ConnectionReset)))
    );
}

#[test]
fn test_unexpected_packet_before_connack() {
    let mut ctx = context();
    ctx.net_mut().push(&[codec::PINGRESP, 0]);
    ctx.open(config(), Some(on_state)).unwrap();

    assert!(run_until(&mut ctx, 10, state_is(ConnectionState::OpenFailed)));
    assert_eq!(
        ctx.app().states,
        vec![(ConnectionState::OpenFailed, Err(Error::UnexpectedPacket))]
    );
}

#[test]
fn test_partial_writes_are_resumed() {
    let mut ctx = context();
    ctx.net_mut().max_write = 3;
    ctx.open(config(), Some(on_state)).unwrap();
    assert!(run_until(&mut ctx, 20, |c| c.is_connected()));

    ctx.publish("a/b", b"chunked payload", QoS::AtMostOnce, false, None).unwrap();
    assert!(run_until(&mut ctx, 10, |c| c.net().count(codec::PUBLISH) == 1));
    assert_eq!(ctx.net().frames_of(codec::PUBLISH)[0].payload(), b"chunked payload");
}
