use libiot_connect::Error;
use libiot_connect::network::application::mqtt::{ConnectionState, QoS, codec};

use crate::fake::*;

#[test]
fn test_pingreq_after_idle_interval() {
    let mut ctx = connected_with(settings(), config().with_keepalive(30));

    run_until_time(&mut ctx, 29_000);
    assert_eq!(ctx.net().count(codec::PINGREQ), 0);

    run_until_time(&mut ctx, 31_000);
    assert_eq!(ctx.net().count(codec::PINGREQ), 1);
    assert!(ctx.is_connected());

    run_until_time(&mut ctx, 59_000);
    assert_eq!(ctx.net().count(codec::PINGREQ), 1);
    run_until_time(&mut ctx, 61_000);
    assert_eq!(ctx.net().count(codec::PINGREQ), 2);
}

#[test]
fn test_outbound_traffic_defers_ping() {
    let mut ctx = connected_with(settings(), config().with_keepalive(30));

    run_until_time(&mut ctx, 20_000);
    ctx.publish("a/b", b"x", QoS::AtMostOnce, false, None).unwrap();

    run_until_time(&mut ctx, 45_000);
    assert_eq!(ctx.net().count(codec::PINGREQ), 0);
    run_until_time(&mut ctx, 51_000);
    assert_eq!(ctx.net().count(codec::PINGREQ), 1);
}

#[test]
fn test_missing_pingresp_drops_connection() {
    let mut ctx = connected_with(settings(), config().with_keepalive(30));
    ctx.net_mut().auto.pingresp = false;

    assert!(run_until(&mut ctx, 100, |c| {
        c.connection_state() == ConnectionState::Closed
    }));
    assert_eq!(ctx.now_ms(), 40_000);
    assert_eq!(
        ctx.app().states,
        vec![
            (ConnectionState::Opened, Ok(())),
            (ConnectionState::Closing, Err(Error::Timeout)),
            (ConnectionState::Closed, Err(Error::Timeout)),
        ]
    );
    assert!(ctx.reconnect_pending());
}

#[test]
fn test_zero_keepalive_never_pings() {
    let mut ctx = connected_with(settings(), config().with_keepalive(0));
    run_until_time(&mut ctx, 300_000);
    assert_eq!(ctx.net().count(codec::PINGREQ), 0);
    assert!(ctx.is_connected());
}
