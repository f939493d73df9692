use core::time::Duration;

use libiot_connect::Error;
use libiot_connect::network::application::mqtt::{ConnectionState, QoS};
use libiot_connect::system::scheduler::TaskHandle;

use crate::fake::*;

const EVEN: u32 = 1;
const ONCE: u32 = 2;

fn every_200(ctx: &mut Ctx, _handle: TaskHandle) {
    let now = ctx.now_ms();
    ctx.app_mut().tasks.push((now, EVEN));
}

fn once_500(ctx: &mut Ctx, _handle: TaskHandle) {
    let now = ctx.now_ms();
    ctx.app_mut().tasks.push((now, ONCE));
}

fn three_times(ctx: &mut Ctx, handle: TaskHandle) {
    let now = ctx.now_ms();
    ctx.app_mut().tasks.push((now, handle.id()));
    if ctx.app().tasks.len() == 3 {
        ctx.cancel_timed_task(handle).unwrap();
    }
}

fn halt(ctx: &mut Ctx, _handle: TaskHandle) {
    ctx.stop();
}

#[test]
fn test_tasks_run_in_deadline_order() {
    let mut ctx = context();
    ctx.schedule_timed_task(every_200, Duration::from_millis(200), true)
        .unwrap();
    ctx.schedule_timed_task(once_500, Duration::from_millis(500), false)
        .unwrap();

    run_until_time(&mut ctx, 1_000);
    assert_eq!(
        ctx.app().tasks,
        vec![
            (200, EVEN),
            (400, EVEN),
            (500, ONCE),
            (600, EVEN),
            (800, EVEN),
            (1_000, EVEN),
        ]
    );
}

#[test]
fn test_repeating_task_can_cancel_itself() {
    let mut ctx = context();
    let handle = ctx
        .schedule_timed_task(three_times, Duration::from_millis(50), true)
        .unwrap();

    assert_eq!(ctx.process_blocking(), Ok(()));
    let runs: Vec<u64> = ctx.app().tasks.iter().map(|(at, _)| *at).collect();
    assert_eq!(runs, vec![50, 100, 150]);
    assert!(ctx.app().tasks.iter().all(|(_, id)| *id == handle.id()));
}

#[test]
fn test_stop_from_task_ends_blocking_loop() {
    let mut ctx = context();
    ctx.schedule_timed_task(every_200, Duration::from_millis(200), true)
        .unwrap();
    ctx.schedule_timed_task(halt, Duration::from_millis(500), false)
        .unwrap();

    assert_eq!(ctx.process_blocking(), Err(Error::EventProcessStopped));
    assert_eq!(ctx.now_ms(), 500);
    assert_eq!(ctx.app().tasks.len(), 2);
    assert_eq!(ctx.process_tick(), Ok(()));
}

#[test]
fn test_stop_before_tick_is_reported_once() {
    let mut ctx = context();
    ctx.stop();
    assert_eq!(ctx.process_tick(), Err(Error::EventProcessStopped));
    assert_eq!(ctx.process_tick(), Ok(()));
}

#[test]
fn test_cancel_twice_is_harmless() {
    let mut ctx = context();
    let handle = ctx
        .schedule_timed_task(once_500, Duration::from_millis(500), false)
        .unwrap();
    assert_eq!(ctx.cancel_timed_task(handle), Ok(()));
    assert_eq!(ctx.cancel_timed_task(handle), Ok(()));

    run_until_time(&mut ctx, 2_000);
    assert!(ctx.app().tasks.is_empty());
}

#[test]
fn test_zero_period_repeat_is_rejected() {
    let mut ctx = context();
    assert_eq!(
        ctx.schedule_timed_task(every_200, Duration::ZERO, true),
        Err(Error::InvalidParameter)
    );
    let handle = ctx
        .schedule_timed_task(once_500, Duration::ZERO, false)
        .unwrap();
    ctx.process_tick().unwrap();
    assert_eq!(ctx.app().tasks, vec![(0, ONCE)]);
    assert_eq!(ctx.cancel_timed_task(handle), Ok(()));
}

#[test]
fn test_idle_blocking_loop_returns() {
    let mut ctx = context();
    assert_eq!(ctx.process_blocking(), Ok(()));
    assert_eq!(ctx.now_ms(), 0);
}

#[test]
fn test_wait_is_bounded_by_next_task() {
    let mut ctx = context();
    ctx.schedule_timed_task(once_500, Duration::from_millis(300), false)
        .unwrap();

    ctx.process_tick().unwrap();
    assert_eq!(ctx.net().selects.last().map(|(_, t)| *t), Some(300));
    assert_eq!(ctx.app().tasks, vec![(300, ONCE)]);
}

#[test]
fn test_shutdown_tears_everything_down() {
    let mut ctx = connected();
    ctx.net_mut().auto.puback = false;
    let socket = ctx.net().socket.unwrap();
    let id = ctx
        .publish("a/b", b"x", QoS::AtLeastOnce, false, Some(on_published))
        .unwrap();
    ctx.schedule_timed_task(every_200, Duration::from_millis(200), true)
        .unwrap();

    ctx.shutdown();
    assert_eq!(ctx.net().closed, vec![socket]);
    assert_eq!(ctx.tls().cleanups, 1);
    assert_eq!(ctx.app().published, vec![(id, Err(Error::ConnectionLost))]);
    assert_eq!(ctx.connection_state(), ConnectionState::Uninitialized);

    assert_eq!(ctx.process_tick(), Err(Error::NotInitialized));
    assert_eq!(ctx.open(config(), None), Err(Error::NotInitialized));
    assert_eq!(
        ctx.schedule_timed_task(every_200, Duration::from_millis(200), true),
        Err(Error::NotInitialized)
    );
    ctx.shutdown();
}
