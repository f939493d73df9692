use libiot_connect::Error;
use libiot_connect::network::application::mqtt::{QoS, codec};
use libiot_connect::network::error::Error as NetError;

use crate::fake::*;

#[test]
fn test_subscribe_reports_granted_qos() {
    let mut ctx = connected();
    ctx.subscribe_many(
        &[("a/+", QoS::AtLeastOnce), ("b/#", QoS::ExactlyOnce)],
        on_subscription,
    )
    .unwrap();

    assert!(run_until(&mut ctx, 5, |c| c.app().subacks.len() == 2));
    let subscribes = ctx.net().frames_of(codec::SUBSCRIBE);
    assert_eq!(subscribes.len(), 1);
    assert_eq!(
        subscribes[0].filters(),
        vec![("a/+".to_string(), 1), ("b/#".to_string(), 2)]
    );
    assert_eq!(
        ctx.app().subacks,
        vec![
            ("a/+".to_string(), Ok(QoS::AtLeastOnce)),
            ("b/#".to_string(), Ok(QoS::ExactlyOnce)),
        ]
    );
    assert!(ctx.is_subscribed("a/+"));
    assert!(ctx.is_subscribed("b/#"));
}

#[test]
fn test_partial_suback_failure() {
    let mut ctx = connected();
    ctx.net_mut().auto.suback = false;
    let id = ctx
        .subscribe_many(
            &[("a/+", QoS::AtLeastOnce), ("b/#", QoS::ExactlyOnce)],
            on_subscription,
        )
        .unwrap();
    ctx.process_tick().unwrap();
    assert!(!ctx.is_subscribed("a/+"));

    let [hi, lo] = id.to_be_bytes();
    ctx.net_mut().push(&[codec::SUBACK, 4, hi, lo, 0x01, codec::SUBACK_FAILURE]);
    assert!(run_until(&mut ctx, 5, |c| c.app().subacks.len() == 2));
    assert_eq!(
        ctx.app().subacks,
        vec![
            ("a/+".to_string(), Ok(QoS::AtLeastOnce)),
            ("b/#".to_string(), Err(Error::SubscriptionFailed)),
        ]
    );
    assert!(ctx.is_subscribed("a/+"));
    assert!(!ctx.is_subscribed("b/#"));
}

#[test]
fn test_messages_fan_out_to_every_matching_filter() {
    let mut ctx = connected();
    ctx.subscribe("home/#", QoS::AtMostOnce, on_subscription).unwrap();
    ctx.subscribe("home/+/light", QoS::AtMostOnce, on_subscription).unwrap();
    assert!(run_until(&mut ctx, 5, |c| c.app().subacks.len() == 2));

    ctx.net_mut().push_publish("home/hall/light", b"on", QoS::AtMostOnce, None, false);
    ctx.net_mut().push_publish("office/light", b"off", QoS::AtMostOnce, None, false);
    assert!(run_until(&mut ctx, 5, |c| c.net().inbox.is_empty()));

    assert_eq!(ctx.app().messages.len(), 2);
    assert!(ctx.app().messages.iter().all(|(topic, _, _)| topic == "home/hall/light"));
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let mut ctx = connected();
    ctx.subscribe("home/#", QoS::AtMostOnce, on_subscription).unwrap();
    assert!(run_until(&mut ctx, 5, |c| !c.app().subacks.is_empty()));

    let id = ctx.unsubscribe("home/#").unwrap();
    assert!(!ctx.is_subscribed("home/#"));
    assert!(run_until(&mut ctx, 5, |c| c.net().count(codec::UNSUBSCRIBE) == 1));
    let frame = &ctx.net().frames_of(codec::UNSUBSCRIBE)[0];
    assert_eq!(frame.id(), Some(id));
    assert_eq!(frame.filters(), vec![("home/#".to_string(), 0)]);

    ctx.net_mut().push_publish("home/hall", b"x", QoS::AtMostOnce, None, false);
    assert!(run_until(&mut ctx, 5, |c| c.net().inbox.is_empty()));
    assert!(ctx.app().messages.is_empty());
    assert_eq!(ctx.unsubscribe("home/#"), Err(Error::InvalidParameter));
}

#[test]
fn test_subscribe_validation() {
    let mut ctx = context();
    assert_eq!(
        ctx.subscribe("a/b", QoS::AtMostOnce, on_subscription),
        Err(Error::NoActiveConnection)
    );

    let mut ctx = connected();
    assert_eq!(
        ctx.subscribe("a/#/b", QoS::AtMostOnce, on_subscription),
        Err(Error::InvalidParameter)
    );
    assert_eq!(
        ctx.subscribe_many(&[], on_subscription),
        Err(Error::InvalidParameter)
    );
    assert_eq!(ctx.net().count(codec::SUBSCRIBE), 0);
}

#[test]
fn test_packet_ids_are_shared_with_publishes() {
    let mut ctx = connected();
    ctx.net_mut().auto.puback = false;
    let publish = ctx
        .publish("a/b", b"x", QoS::AtLeastOnce, false, None)
        .unwrap();
    let subscribe = ctx.subscribe("a/#", QoS::AtMostOnce, on_subscription).unwrap();
    assert_eq!(publish, Some(1));
    assert_eq!(subscribe, 2);
}

#[test]
fn test_pending_subscription_fails_on_connection_loss() {
    let mut ctx = connected();
    ctx.net_mut().auto.suback = false;
    ctx.subscribe("a/b", QoS::AtLeastOnce, on_subscription).unwrap();
    ctx.process_tick().unwrap();

    ctx.net_mut().read_error = Some(NetError::ConnectionReset);
    assert!(run_until(&mut ctx, 5, |c| !c.app().subacks.is_empty()));
    assert_eq!(
        ctx.app().subacks,
        vec![("a/b".to_string(), Err(Error::ConnectionLost))]
    );
    assert!(!ctx.is_connected());
}
