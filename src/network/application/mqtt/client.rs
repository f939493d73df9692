//! MQTT session manager.
//!
//! A [`Context`] owns the board support package, at most one broker
//! connection, the timed task table and every piece of session state. The
//! application drives it with [`Context::process_tick`] or
//! [`Context::process_blocking`]; every other call returns immediately and
//! reports completion through a callback.
//!
//! # Connection sequence
//!
//! ```text
//!  open() ─► Open timer ─► net.connect ─► select(writable) ─► connection_check
//!                                                                   │ Ok
//!        load CA bundle ─► tls.init ─► advance_handshake ◄─select───┘
//!                                            │ Established
//!                     CONNECT ─► select(readable) ─► CONNACK ─► OPENED
//! ```
//!
//! Every arrow that crosses `select` is a suspension point: the loop waits
//! for the readiness the socket or TLS layer asked for, bounded by the
//! soonest timer. The connection timeout covers the whole sequence.
//!
//! # Failure and reconnection
//!
//! Any I/O error, a missing PINGRESP or a broker DISCONNECT while OPENED moves
//! the connection through CLOSING to CLOSED. In-flight QoS 1/2 publishes and
//! unanswered subscriptions are failed with [`Error::ConnectionLost`], and a
//! reconnect is scheduled with the backoff policy. A CONNACK refusal that
//! retrying cannot fix, or running out of attempts, stops automatic
//! reconnection and is reported with the state change.
//!
//! # Callbacks
//!
//! Callbacks are plain function pointers that receive the context, so they
//! can publish, subscribe, schedule tasks or reach application state through
//! [`Context::app_mut`]. They run on the loop and must return quickly.
//!
//! The connection callback sees every state change except the OPENING
//! entered by [`Context::open`] itself.

use core::fmt;
use core::time::Duration;

use heapless::{String, Vec};

use super::backoff::{Backoff, BackoffClass};
use super::codec::{self, Connect, Packet, Publish};
use super::qos::{Completion, Expiry, PubrecAction, QosTracker, Stage};
use super::session::{Handshake, Progress, TlsSession};
use super::subscription::SubscriptionRegistry;
use super::{
    MAX_CA_CERTIFICATES_LEN, MAX_INBOUND_QOS2, MAX_INFLIGHT, MAX_PAYLOAD_LEN, MAX_SUBSCRIPTIONS, Message,
    MessageId, QoS, RX_BUFFER_LEN, TX_BUFFER_LEN, topic,
};
use crate::config::{ConnectionConfig, SessionConfig, SessionType};
use crate::network::error::Error as NetError;
use crate::network::tls::TlsInitParams;
use crate::network::{Interest, Network, Protocol, SelectEntry, SocketHandle};
use crate::platform::{Bsp, Platform};
use crate::storage;
use crate::system::scheduler::{Scheduler, TaskHandle};
use crate::system::{Clock, Rng};
use crate::{Error, Result};

/// Delay before retrying a socket connect that reported `WouldBlock`.
const CONNECT_RETRY_MS: u64 = 100;
/// Reads per readiness event, so one busy connection cannot starve timers.
const MAX_READS_PER_PASS: usize = 8;

/// Called on connection state changes.
pub type ConnectionCallback<P, A> = fn(&mut Context<P, A>, ConnectionState, Result<()>);

/// Called once per publish: with `Ok` when the broker acknowledged it (or,
/// for QoS 0, when it was handed to the socket layer) and with an error
/// when delivery cannot be guaranteed any more.
pub type PublishCallback<P, A> = fn(&mut Context<P, A>, Option<MessageId>, Result<()>);

/// Called with SUBACK results and with every message matching the filter.
pub type SubscriptionCallback<P, A> = fn(&mut Context<P, A>, SubscriptionEvent<'_>);

/// Called when a timed task is due.
pub type TaskCallback<P, A> = fn(&mut Context<P, A>, TaskHandle);

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// No connection was ever requested.
    Uninitialized,
    /// Socket connect, TLS handshake or CONNECT/CONNACK in progress.
    Opening,
    /// CONNACK accepted; publish and subscribe are available.
    Opened,
    /// Shutting down, gracefully or after a failure.
    Closing,
    /// Closed. A reconnect may be pending.
    Closed,
    /// The last open attempt failed. A reconnect may be pending.
    OpenFailed,
}

impl ConnectionState {
    /// Short lowercase name, for logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Opening => "opening",
            ConnectionState::Opened => "opened",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::OpenFailed => "open failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a subscription callback is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEvent<'a> {
    /// The broker answered the SUBSCRIBE for `filter`, or the connection was
    /// lost before it could.
    Subscribed {
        /// Topic filter.
        filter: &'a str,
        /// Granted QoS or the reason the filter is not active.
        result: Result<QoS>,
    },
    /// A message matching the filter arrived.
    Message(&'a Message),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Open,
    OpenTimeout,
    Keepalive,
    PingTimeout,
    Retransmit,
    CloseTimeout,
    Reconnect,
}

enum Job<P: Platform, A> {
    User(TaskCallback<P, A>),
    Timer(Timer),
    Published {
        callback: PublishCallback<P, A>,
        id: Option<MessageId>,
        result: Result<()>,
    },
}

impl<P: Platform, A> Clone for Job<P, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Platform, A> Copy for Job<P, A> {}

#[derive(Debug, Default, Clone, Copy)]
struct Timers {
    open: Option<TaskHandle>,
    open_timeout: Option<TaskHandle>,
    keepalive: Option<TaskHandle>,
    ping: Option<TaskHandle>,
    retransmit: Option<TaskHandle>,
    close: Option<TaskHandle>,
    reconnect: Option<TaskHandle>,
}

impl Timers {
    fn slot(&mut self, timer: Timer) -> &mut Option<TaskHandle> {
        match timer {
            Timer::Open => &mut self.open,
            Timer::OpenTimeout => &mut self.open_timeout,
            Timer::Keepalive => &mut self.keepalive,
            Timer::PingTimeout => &mut self.ping,
            Timer::Retransmit => &mut self.retransmit,
            Timer::CloseTimeout => &mut self.close,
            Timer::Reconnect => &mut self.reconnect,
        }
    }

    /// Takes every timer bound to the transport. The reconnect timer
    /// outlives the transport and stays.
    fn take_transport(&mut self) -> [Option<TaskHandle>; 6] {
        [
            self.open.take(),
            self.open_timeout.take(),
            self.keepalive.take(),
            self.ping.take(),
            self.retransmit.take(),
            self.close.take(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Handshaking,
    AwaitingConnack,
    Established,
    Draining,
}

impl Phase {
    /// MQTT frames flow in these phases.
    fn is_live(self) -> bool {
        matches!(self, Phase::AwaitingConnack | Phase::Established | Phase::Draining)
    }
}

struct Connection<P: Platform, A> {
    config: ConnectionConfig,
    state: ConnectionState,
    phase: Phase,
    socket: Option<SocketHandle>,
    tls: Option<TlsSession<P::Tls>>,
    interest: Interest,
    blocked: Interest,
    rx: Vec<u8, RX_BUFFER_LEN>,
    tx: Vec<u8, TX_BUFFER_LEN>,
    last_activity: u64,
    attempts: u32,
    last_outcome: Result<()>,
    user_closed: bool,
    auto_reconnect: bool,
    on_state: Option<ConnectionCallback<P, A>>,
    timers: Timers,
    inbound: Vec<MessageId, MAX_INBOUND_QOS2>,
    /// Packet ids whose latest PUBLISH or PUBREL still sits in `tx`, with
    /// the offset just past that frame.
    unsent: Vec<(MessageId, usize), { 2 * MAX_INFLIGHT }>,
}

impl<P: Platform, A> Connection<P, A> {
    fn new(
        config: ConnectionConfig,
        on_state: Option<ConnectionCallback<P, A>>,
        attempts: u32,
        last_outcome: Result<()>,
        now: u64,
    ) -> Self {
        Self {
            config,
            state: ConnectionState::Opening,
            phase: Phase::Idle,
            socket: None,
            tls: None,
            interest: Interest::NONE,
            blocked: Interest::NONE,
            rx: Vec::new(),
            tx: Vec::new(),
            last_activity: now,
            attempts,
            last_outcome,
            user_closed: false,
            auto_reconnect: false,
            on_state,
            timers: Timers::default(),
            inbound: Vec::new(),
            unsent: Vec::new(),
        }
    }

    /// Records that the frame just queued for `id` ends at the tail of `tx`.
    fn mark_unsent(&mut self, id: MessageId) {
        let end = self.tx.len();
        if let Some(entry) = self.unsent.iter_mut().find(|(pending, _)| *pending == id) {
            entry.1 = end;
            return;
        }
        if self.unsent.push((id, end)).is_err() {
            debug!("not tracking queued frame of {}", id);
        }
    }

    /// `true` while the latest frame queued for `id` was not fully written.
    fn is_unsent(&self, id: MessageId) -> bool {
        self.unsent.iter().any(|&(pending, _)| pending == id)
    }

    fn update_interest(&mut self) {
        if !self.phase.is_live() {
            return;
        }
        let mut interest = Interest::READ.or(self.blocked);
        if !self.tx.is_empty() {
            interest = interest.or(Interest::WRITE);
        }
        self.interest = interest;
    }

    fn keepalive_ms(&self) -> u64 {
        u64::from(self.config.keepalive_secs) * 1_000
    }
}

/// Owned copy of a decoded frame, so the receive buffer can be reused
/// before callbacks run.
enum Incoming {
    Connack { session_present: bool, code: u8 },
    Publish(Message),
    /// A PUBLISH whose topic or payload does not fit a [`Message`].
    Oversized { qos: QoS, id: Option<MessageId>, len: usize },
    Puback(MessageId),
    Pubrec(MessageId),
    Pubrel(MessageId),
    Pubcomp(MessageId),
    Suback { id: MessageId, codes: Vec<u8, MAX_SUBSCRIPTIONS> },
    Unsuback(MessageId),
    Pingresp,
    Disconnect,
}

impl TryFrom<Packet<'_>> for Incoming {
    type Error = Error;

    fn try_from(packet: Packet<'_>) -> Result<Self> {
        Ok(match packet {
            Packet::Connack { session_present, code } => Incoming::Connack { session_present, code },
            Packet::Publish(p) => match (String::try_from(p.topic), Vec::from_slice(p.payload)) {
                (Ok(topic), Ok(payload)) => Incoming::Publish(Message {
                    topic,
                    payload,
                    qos: p.qos,
                    retain: p.retain,
                    dup: p.dup,
                    id: p.id,
                }),
                _ => Incoming::Oversized {
                    qos: p.qos,
                    id: p.id,
                    len: p.payload.len(),
                },
            },
            Packet::Puback(id) => Incoming::Puback(id),
            Packet::Pubrec(id) => Incoming::Pubrec(id),
            Packet::Pubrel(id) => Incoming::Pubrel(id),
            Packet::Pubcomp(id) => Incoming::Pubcomp(id),
            Packet::Suback { id, codes } => Incoming::Suback {
                id,
                codes: Vec::from_slice(codes).map_err(|_| Error::MalformedPacket)?,
            },
            Packet::Unsuback(id) => Incoming::Unsuback(id),
            Packet::Pingresp => Incoming::Pingresp,
            Packet::Disconnect => Incoming::Disconnect,
        })
    }
}

fn consume<const N: usize>(buf: &mut Vec<u8, N>, n: usize) {
    let n = n.min(buf.len());
    buf.copy_within(n.., 0);
    buf.truncate(buf.len() - n);
}

/// Shifts queued frame offsets after `n` bytes left `tx`, forgetting the
/// frames that were fully written.
fn written<const N: usize>(unsent: &mut Vec<(MessageId, usize), N>, n: usize) {
    for entry in unsent.iter_mut() {
        entry.1 = entry.1.saturating_sub(n);
    }
    unsent.retain(|&(_, end)| end > 0);
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Session manager for one broker connection.
///
/// `P` names the board support package and `A` is application state that
/// callbacks reach through [`Context::app_mut`].
pub struct Context<P: Platform, A> {
    net: P::Net,
    tls: P::Tls,
    fs: P::Fs,
    clock: P::Clock,
    rng: P::Rng,
    app: A,
    settings: SessionConfig,
    backoff: Backoff,
    scheduler: Scheduler<Job<P, A>>,
    connection: Option<Connection<P, A>>,
    qos: QosTracker<PublishCallback<P, A>>,
    subscriptions: SubscriptionRegistry<SubscriptionCallback<P, A>>,
    stopped: bool,
    initialized: bool,
}

impl<P: Platform, A> fmt::Debug for Context<P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.connection_state())
            .field("attempts", &self.backoff_attempts())
            .field("in_flight", &self.qos.len())
            .field("subscriptions", &self.subscriptions.len())
            .field("tasks", &self.scheduler.len())
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl<P: Platform, A> Context<P, A> {
    /// Creates an initialized context with no connection.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] if `settings` fail validation.
    pub fn new(bsp: Bsp<P>, settings: SessionConfig, app: A) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            net: bsp.net,
            tls: bsp.tls,
            fs: bsp.fs,
            clock: bsp.clock,
            rng: bsp.rng,
            app,
            backoff: Backoff::new(settings.backoff),
            scheduler: Scheduler::new(),
            connection: None,
            qos: QosTracker::new(settings.qos_retry_timeout_ms, settings.qos_max_retries),
            subscriptions: SubscriptionRegistry::new(),
            settings,
            stopped: false,
            initialized: true,
        })
    }

    /// Releases the context and hands back the platform and application
    /// state. Call [`Context::shutdown`] first to close the connection.
    pub fn into_parts(self) -> (Bsp<P>, A) {
        let bsp = Bsp {
            net: self.net,
            tls: self.tls,
            fs: self.fs,
            clock: self.clock,
            rng: self.rng,
        };
        (bsp, self.app)
    }

    /// Application state.
    pub fn app(&self) -> &A {
        &self.app
    }

    /// Mutable application state.
    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// Socket layer.
    pub fn net(&self) -> &P::Net {
        &self.net
    }

    /// Mutable socket layer.
    pub fn net_mut(&mut self) -> &mut P::Net {
        &mut self.net
    }

    /// TLS library.
    pub fn tls(&self) -> &P::Tls {
        &self.tls
    }

    /// Mutable TLS library.
    pub fn tls_mut(&mut self) -> &mut P::Tls {
        &mut self.tls
    }

    /// Resource store.
    pub fn fs_mut(&mut self) -> &mut P::Fs {
        &mut self.fs
    }

    /// Time source.
    pub fn clock(&self) -> &P::Clock {
        &self.clock
    }

    /// Session tunables in effect.
    pub fn settings(&self) -> &SessionConfig {
        &self.settings
    }

    /// Current time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// State of the broker connection.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Uninitialized, |c| c.state)
    }

    /// `true` while publish and subscribe are available.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Opened
    }

    /// Consecutive failed attempts since the last successful CONNACK.
    pub fn backoff_attempts(&self) -> u32 {
        self.connection.as_ref().map_or(0, |c| c.attempts)
    }

    /// `true` while an automatic reconnect is scheduled.
    pub fn reconnect_pending(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.timers.reconnect.is_some())
    }

    /// Outbound QoS 1/2 publishes awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.qos.len()
    }

    /// `true` if `filter` was granted by the broker.
    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.subscriptions
            .get(filter)
            .is_some_and(|e| matches!(e.state, super::subscription::SubscriptionState::Active(_)))
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn ensure_opened(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NoActiveConnection)
        }
    }

    // ----------------------------------------------------------------------
    // Public API
    // ----------------------------------------------------------------------

    /// Starts connecting to the broker described by `config`.
    ///
    /// Returns immediately. `on_state` is called with
    /// [`ConnectionState::Opened`] or [`ConnectionState::OpenFailed`] once
    /// the attempt finishes, and with every later state change. After
    /// earlier failures the attempt is delayed by the backoff policy.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyInProgress`] while OPENING, OPENED or CLOSING
    /// - [`Error::InvalidParameter`] for an unusable configuration
    /// - [`Error::OutOfMemory`] if the timer table is full
    pub fn open(
        &mut self,
        config: ConnectionConfig,
        on_state: Option<ConnectionCallback<P, A>>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        config.validate()?;
        let (attempts, last_outcome) = match self.connection.as_ref() {
            Some(c) if matches!(
                c.state,
                ConnectionState::Opening | ConnectionState::Opened | ConnectionState::Closing
            ) =>
            {
                return Err(Error::AlreadyInProgress);
            }
            Some(c) => (c.attempts, c.last_outcome),
            None => (0, Ok(())),
        };

        let attempt = attempts.min(self.backoff.config().max_attempts);
        let delay = millis(self.backoff.base_delay(attempt));
        let now = self.now_ms();
        let handle = self
            .scheduler
            .schedule(now, delay, None, Job::Timer(Timer::Open))?;

        if let Some(old) = self.connection.as_mut() {
            if let Some(pending) = old.timers.reconnect.take() {
                self.scheduler.cancel(pending);
            }
        }

        let mut connection = Connection::new(config, on_state, attempts, last_outcome, now);
        connection.timers.open = Some(handle);
        info!(
            "opening {}:{} in {} ms",
            connection.config.host.as_str(),
            connection.config.port,
            delay
        );
        self.connection = Some(connection);
        Ok(())
    }

    /// Closes the connection.
    ///
    /// From OPENED this is graceful: DISCONNECT is queued behind any pending
    /// frames and the transport closes once it is flushed or the close
    /// timeout expires. From OPENING the attempt is abandoned at once. From
    /// CLOSED or OPEN_FAILED a pending reconnect is cancelled. CLOSED is
    /// reported with `Ok` through the connection callback.
    ///
    /// # Errors
    ///
    /// - [`Error::NoActiveConnection`] if there is nothing to close
    /// - [`Error::AlreadyInProgress`] while already CLOSING
    pub fn disconnect(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        let Some(conn) = self.connection.as_mut() else {
            return Err(Error::NoActiveConnection);
        };
        match conn.state {
            ConnectionState::Uninitialized => Err(Error::NoActiveConnection),
            ConnectionState::Closing => Err(Error::AlreadyInProgress),
            ConnectionState::Closed | ConnectionState::OpenFailed => {
                let Some(pending) = conn.timers.reconnect.take() else {
                    return Err(Error::NoActiveConnection);
                };
                self.scheduler.cancel(pending);
                conn.auto_reconnect = false;
                info!("pending reconnect cancelled");
                Ok(())
            }
            ConnectionState::Opening => {
                info!("abandoning connection attempt");
                conn.user_closed = true;
                self.release();
                self.set_state(ConnectionState::Closed);
                self.notify(ConnectionState::Closed, Ok(()));
                Ok(())
            }
            ConnectionState::Opened => {
                info!("disconnecting");
                conn.user_closed = true;
                conn.phase = Phase::Draining;
                let queued = codec::encode_disconnect(&mut conn.tx);
                conn.update_interest();
                self.set_state(ConnectionState::Closing);
                self.disarm(Timer::Keepalive);
                self.disarm(Timer::PingTimeout);
                self.disarm(Timer::Retransmit);

                let close_ms = u64::from(self.settings.close_timeout_ms);
                if queued.is_err() || self.arm(Timer::CloseTimeout, close_ms).is_err() {
                    warn!("closing without DISCONNECT");
                    self.finish_close();
                }
                Ok(())
            }
        }
    }

    /// Publishes `payload` on `topic`.
    ///
    /// The frame is written when the socket is writable. For QoS 1/2 the
    /// returned id identifies the message in `callback`; QoS 0 returns
    /// `None`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] for an invalid topic
    /// - [`Error::PayloadTooLarge`] for an oversized payload
    /// - [`Error::NoActiveConnection`] unless OPENED
    /// - [`Error::OutOfMemory`] when the in-flight table or the transmit
    ///   buffer is full
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        callback: Option<PublishCallback<P, A>>,
    ) -> Result<Option<MessageId>> {
        self.ensure_initialized()?;
        topic::validate_topic(topic)?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge);
        }
        self.ensure_opened()?;

        let now = self.now_ms();
        let mut publish = Publish {
            topic,
            payload,
            qos,
            retain,
            dup: false,
            id: None,
        };
        let subscriptions = &self.subscriptions;
        publish.id = self
            .qos
            .track(&publish, callback, now, |id| subscriptions.is_reserved(id))?;

        let Some(conn) = self.connection.as_mut() else {
            return Err(Error::NoActiveConnection);
        };
        if let Err(e) = codec::encode_publish(&mut conn.tx, &publish) {
            if let Some(id) = publish.id {
                self.qos.forget(id);
            }
            return Err(e);
        }
        if let Some(id) = publish.id {
            conn.mark_unsent(id);
        }
        conn.update_interest();
        debug!("PUBLISH {} queued (qos {})", topic, qos as u8);

        match (publish.id, callback) {
            (Some(_), _) => self.rearm_retransmit(),
            (None, Some(callback)) => {
                let job = Job::Published {
                    callback,
                    id: None,
                    result: Ok(()),
                };
                if self.scheduler.schedule(now, 0, None, job).is_err() {
                    warn!("no room to report QoS 0 publish");
                }
            }
            (None, None) => {}
        }
        Ok(publish.id)
    }

    /// Subscribes to one topic filter.
    ///
    /// `callback` receives the SUBACK result and then every matching
    /// message.
    ///
    /// # Errors
    ///
    /// See [`Context::subscribe_many`].
    pub fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        callback: SubscriptionCallback<P, A>,
    ) -> Result<MessageId> {
        self.subscribe_many(&[(filter, qos)], callback)
    }

    /// Subscribes to several filters with one SUBSCRIBE.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] for an empty list or invalid filter
    /// - [`Error::NoActiveConnection`] unless OPENED
    /// - [`Error::OutOfMemory`] when the registry or transmit buffer is full
    pub fn subscribe_many(
        &mut self,
        filters: &[(&str, QoS)],
        callback: SubscriptionCallback<P, A>,
    ) -> Result<MessageId> {
        self.ensure_initialized()?;
        if filters.is_empty() || filters.len() > MAX_SUBSCRIPTIONS {
            return Err(Error::InvalidParameter);
        }
        for (filter, _) in filters {
            topic::validate_filter(filter)?;
        }
        self.ensure_opened()?;

        let subscriptions = &self.subscriptions;
        let id = self.qos.allocate_id(|id| subscriptions.is_reserved(id))?;
        let Some(conn) = self.connection.as_mut() else {
            return Err(Error::NoActiveConnection);
        };
        let mark = conn.tx.len();
        codec::encode_subscribe(&mut conn.tx, id, filters)?;
        if let Err(e) = self.subscriptions.add_pending(filters, id, callback) {
            conn.tx.truncate(mark);
            return Err(e);
        }
        conn.update_interest();
        debug!("SUBSCRIBE {} queued ({} filters)", id, filters.len());
        Ok(id)
    }

    /// Stops dispatching to `filter` and sends UNSUBSCRIBE.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] if the filter is not registered
    /// - [`Error::NoActiveConnection`] unless OPENED
    /// - [`Error::OutOfMemory`] when the transmit buffer is full
    pub fn unsubscribe(&mut self, filter: &str) -> Result<MessageId> {
        self.ensure_initialized()?;
        topic::validate_filter(filter)?;
        self.ensure_opened()?;
        if !self.subscriptions.contains(filter) {
            return Err(Error::InvalidParameter);
        }

        let subscriptions = &self.subscriptions;
        let id = self.qos.allocate_id(|id| subscriptions.is_reserved(id))?;
        let Some(conn) = self.connection.as_mut() else {
            return Err(Error::NoActiveConnection);
        };
        codec::encode_unsubscribe(&mut conn.tx, id, &[filter])?;
        conn.update_interest();
        self.subscriptions.remove(filter)?;
        self.subscriptions.reserve_unsubscribe(id);
        debug!("UNSUBSCRIBE {} queued for {}", id, filter);
        Ok(id)
    }

    /// Runs `callback` after `delay`, and then every `delay` if `repeat`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] for a repeating task with zero delay
    /// - [`Error::OutOfMemory`] when the task table is full
    pub fn schedule_timed_task(
        &mut self,
        callback: TaskCallback<P, A>,
        delay: Duration,
        repeat: bool,
    ) -> Result<TaskHandle> {
        self.ensure_initialized()?;
        let delay = millis(delay);
        let period = if repeat { Some(delay) } else { None };
        let now = self.now_ms();
        self.scheduler.schedule(now, delay, period, Job::User(callback))
    }

    /// Cancels a timed task. Cancelling twice, or after it ran, is a no-op.
    pub fn cancel_timed_task(&mut self, handle: TaskHandle) -> Result<()> {
        self.ensure_initialized()?;
        if matches!(self.scheduler.get(handle), Some(Job::User(_))) {
            self.scheduler.cancel(handle);
        }
        Ok(())
    }

    /// Runs one loop pass: waits for socket readiness or the next timer
    /// (at most `max_idle_ms`), services the connection, then runs every
    /// due task in deadline order.
    ///
    /// # Errors
    ///
    /// - [`Error::EventProcessStopped`] once after [`Context::stop`]
    /// - [`Error::NotInitialized`] after [`Context::shutdown`]
    /// - the mapped socket error if waiting failed with no connection
    pub fn process_tick(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        if self.stopped {
            self.stopped = false;
            return Err(Error::EventProcessStopped);
        }
        let now = self.now_ms();
        let idle = self.settings.max_idle_ms;
        let wait = match self.scheduler.next_deadline() {
            Some(deadline) => deadline
                .saturating_sub(now)
                .min(u64::from(idle)) as u32,
            None => idle,
        };
        self.poll(wait)?;
        self.run_due();
        Ok(())
    }

    /// Runs loop passes until [`Context::stop`] is called or nothing is
    /// left to do: no connection opening, open or closing, and no scheduled
    /// task or reconnect.
    ///
    /// # Errors
    ///
    /// [`Error::EventProcessStopped`] when stopped, or any error from
    /// [`Context::process_tick`].
    pub fn process_blocking(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        loop {
            if self.stopped {
                self.stopped = false;
                return Err(Error::EventProcessStopped);
            }
            if self.is_idle() {
                debug!("event loop idle");
                return Ok(());
            }
            self.process_tick()?;
        }
    }

    /// Makes the running loop return [`Error::EventProcessStopped`] after
    /// the current pass. Safe to call from callbacks.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Tears down the connection, fails everything in flight with
    /// [`Error::ConnectionLost`] and cancels every task. Afterwards every
    /// call returns [`Error::NotInitialized`].
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        info!("shutting down");
        self.initialized = false;
        self.release();
        self.void_in_flight(Error::ConnectionLost);
        self.connection = None;
        self.scheduler.cancel_where(|_| true);
        self.stopped = false;
    }

    fn is_idle(&self) -> bool {
        let active = self.connection.as_ref().is_some_and(|c| {
            matches!(
                c.state,
                ConnectionState::Opening | ConnectionState::Opened | ConnectionState::Closing
            )
        });
        !active && self.scheduler.is_empty()
    }

    // ----------------------------------------------------------------------
    // Event loop
    // ----------------------------------------------------------------------

    fn poll(&mut self, timeout_ms: u32) -> Result<()> {
        let mut entries: Vec<SelectEntry, 1> = Vec::new();
        if let Some(conn) = self.connection.as_ref() {
            if let Some(socket) = conn.socket {
                if !conn.interest.is_empty() {
                    let _ = entries.push(SelectEntry::new(socket, conn.interest));
                }
            }
        }

        if let Err(e) = self.net.select(&mut entries, timeout_ms) {
            error!("select failed: {:?}", e);
            if entries.is_empty() {
                return Err(e.into());
            }
            self.fail(e.into());
            return Ok(());
        }

        let Some(entry) = entries.first().copied() else {
            return Ok(());
        };
        if entry.error {
            error!("socket {} reported an error", entry.socket.0);
            self.fail(Error::SocketError);
        } else if !entry.ready.is_empty() {
            self.on_ready();
        }
        Ok(())
    }

    fn run_due(&mut self) {
        let now = self.now_ms();
        while self.initialized {
            let Some((handle, job)) = self.scheduler.pop_due(now) else {
                break;
            };
            match job {
                Job::User(callback) => {
                    trace!("running task {}", handle.id());
                    callback(self, handle);
                }
                Job::Timer(timer) => self.on_timer(timer, handle),
                Job::Published { callback, id, result } => callback(self, id, result),
            }
        }
    }

    fn on_timer(&mut self, timer: Timer, handle: TaskHandle) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        let slot = conn.timers.slot(timer);
        if *slot != Some(handle) {
            return;
        }
        *slot = None;

        match timer {
            Timer::Open => self.begin_open(),
            Timer::OpenTimeout => {
                warn!("connection attempt timed out");
                self.fail(Error::Timeout);
            }
            Timer::Keepalive => self.keepalive(),
            Timer::PingTimeout => {
                warn!("no PINGRESP within {} ms", self.settings.ping_grace_ms);
                self.fail(Error::Timeout);
            }
            Timer::Retransmit => self.retransmit(),
            Timer::CloseTimeout => {
                warn!("DISCONNECT not flushed in time");
                self.finish_close();
            }
            Timer::Reconnect => self.reconnect(),
        }
    }

    fn arm(&mut self, timer: Timer, delay_ms: u64) -> Result<()> {
        let now = self.now_ms();
        let Some(conn) = self.connection.as_mut() else {
            return Err(Error::NoActiveConnection);
        };
        let slot = conn.timers.slot(timer);
        if let Some(old) = slot.take() {
            self.scheduler.cancel(old);
        }
        *slot = Some(
            self.scheduler
                .schedule(now, delay_ms, None, Job::Timer(timer))?,
        );
        Ok(())
    }

    fn disarm(&mut self, timer: Timer) {
        if let Some(conn) = self.connection.as_mut() {
            if let Some(handle) = conn.timers.slot(timer).take() {
                self.scheduler.cancel(handle);
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if let Some(conn) = self.connection.as_mut() {
            if conn.state != state {
                info!("connection {} -> {}", conn.state, state);
                conn.state = state;
            }
        }
    }

    fn notify(&mut self, state: ConnectionState, result: Result<()>) {
        let callback = self.connection.as_ref().and_then(|c| c.on_state);
        if let Some(callback) = callback {
            callback(self, state, result);
        }
    }

    // ----------------------------------------------------------------------
    // Opening
    // ----------------------------------------------------------------------

    fn begin_open(&mut self) {
        let Some(conn) = self.connection.as_ref() else {
            return;
        };
        if conn.state != ConnectionState::Opening {
            return;
        }
        if conn.timers.open_timeout.is_none() {
            let timeout_ms = u64::from(conn.config.connection_timeout_secs) * 1_000;
            if let Err(e) = self.arm(Timer::OpenTimeout, timeout_ms) {
                self.fail(e);
                return;
            }
        }

        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        debug!(
            "connecting socket to {}:{}",
            conn.config.host.as_str(),
            conn.config.port
        );
        match self
            .net
            .connect(&conn.config.host, conn.config.port, Protocol::Tcp)
        {
            Ok(socket) => {
                conn.socket = Some(socket);
                conn.phase = Phase::Connecting;
                conn.interest = Interest::WRITE;
            }
            Err(NetError::WouldBlock) => {
                if let Err(e) = self.arm(Timer::Open, CONNECT_RETRY_MS) {
                    self.fail(e);
                }
            }
            Err(e) => {
                error!("socket connect failed: {:?}", e);
                self.fail(e.into());
            }
        }
    }

    fn on_ready(&mut self) {
        let Some(phase) = self.connection.as_ref().map(|c| c.phase) else {
            return;
        };
        let result = match phase {
            Phase::Idle => Ok(()),
            Phase::Connecting => self.check_socket(),
            Phase::Handshaking => self.handshake(),
            Phase::AwaitingConnack | Phase::Established | Phase::Draining => self.service(),
        };
        if let Err(e) = result {
            self.fail(e);
        }
    }

    fn check_socket(&mut self) -> Result<()> {
        let Some(conn) = self.connection.as_mut() else {
            return Ok(());
        };
        let Some(socket) = conn.socket else {
            return Err(Error::InternalError);
        };
        match self.net.connection_check(socket) {
            Ok(()) => {}
            Err(NetError::WouldBlock) => {
                conn.interest = Interest::WRITE;
                return Ok(());
            }
            Err(e) => {
                error!("socket connect failed: {:?}", e);
                return Err(e.into());
            }
        }
        debug!("socket connected");

        let mut ca = [0u8; MAX_CA_CERTIFICATES_LEN];
        let len = storage::load_resource(&mut self.fs, &conn.config.ca_certificates, &mut ca)
            .map_err(|e| {
                error!(
                    "cannot load CA certificates from {}: {:?}",
                    conn.config.ca_certificates.as_str(),
                    e
                );
                Error::TlsCertificate
            })?;
        let params = TlsInitParams {
            ca_certificates: &ca[..len],
            domain_name: &conn.config.host,
        };
        conn.tls = Some(TlsSession::new(&mut self.tls, &params)?);
        conn.phase = Phase::Handshaking;
        self.handshake()
    }

    fn handshake(&mut self) -> Result<()> {
        let Some(conn) = self.connection.as_mut() else {
            return Ok(());
        };
        let (Some(socket), Some(session)) = (conn.socket, conn.tls.as_mut()) else {
            return Err(Error::InternalError);
        };
        match session.advance_handshake(&mut self.tls, &mut self.net, socket) {
            Handshake::InProgress(interest) => {
                trace!("handshake waiting");
                conn.interest = interest;
                Ok(())
            }
            Handshake::Failed(e) => Err(e),
            Handshake::Established => {
                info!("tls session established");
                conn.phase = Phase::AwaitingConnack;
                let config = &conn.config;
                let connect = Connect {
                    client_id: &config.client_id,
                    username: config.username.as_deref(),
                    password: config.password.as_deref().map(str::as_bytes),
                    keepalive_secs: config.keepalive_secs,
                    clean_session: config.session == SessionType::Clean,
                };
                codec::encode_connect(&mut conn.tx, &connect)?;
                debug!("CONNECT queued for {}", config.client_id.as_str());
                conn.update_interest();
                self.service()
            }
        }
    }

    fn opened(&mut self, session_present: bool) {
        self.disarm(Timer::OpenTimeout);
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        conn.phase = Phase::Established;
        conn.attempts = 0;
        conn.last_outcome = Ok(());
        conn.auto_reconnect = false;
        conn.user_closed = false;
        debug!("CONNACK accepted, session present: {}", session_present);
        self.qos.reset_ids();
        self.set_state(ConnectionState::Opened);
        self.arm_keepalive();
        self.notify(ConnectionState::Opened, Ok(()));
    }

    fn reconnect(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if !matches!(conn.state, ConnectionState::Closed | ConnectionState::OpenFailed) {
            return;
        }
        conn.user_closed = false;
        info!("reconnecting, attempt {}", conn.attempts);
        self.set_state(ConnectionState::Opening);
        self.notify(ConnectionState::Opening, Ok(()));
        self.begin_open();
    }

    // ----------------------------------------------------------------------
    // Steady state
    // ----------------------------------------------------------------------

    fn service(&mut self) -> Result<()> {
        self.flush()?;
        self.receive()?;
        self.flush()?;

        let drained = self
            .connection
            .as_ref()
            .is_some_and(|c| c.phase == Phase::Draining && c.tx.is_empty());
        if drained {
            self.finish_close();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let now = self.now_ms();
        let Some(conn) = self.connection.as_mut() else {
            return Ok(());
        };
        if !conn.phase.is_live() {
            return Ok(());
        }
        let (Some(socket), Some(session)) = (conn.socket, conn.tls.as_mut()) else {
            return Ok(());
        };

        conn.blocked = Interest::NONE;
        while !conn.tx.is_empty() {
            match session.write(&mut self.tls, &mut self.net, socket, &conn.tx)? {
                Progress::Done(0) => break,
                Progress::Done(n) => {
                    trace!("wrote {} bytes", n);
                    consume(&mut conn.tx, n);
                    written(&mut conn.unsent, n);
                    conn.last_activity = now;
                }
                Progress::Blocked(interest) => {
                    conn.blocked = interest;
                    break;
                }
            }
        }
        conn.update_interest();
        Ok(())
    }

    fn receive(&mut self) -> Result<()> {
        for _ in 0..MAX_READS_PER_PASS {
            let Some(conn) = self.connection.as_mut() else {
                return Ok(());
            };
            if !conn.phase.is_live() {
                return Ok(());
            }
            let (Some(socket), Some(session)) = (conn.socket, conn.tls.as_mut()) else {
                return Ok(());
            };
            if conn.rx.is_full() {
                return Err(Error::PayloadTooLarge);
            }

            let start = conn.rx.len();
            // Growing to capacity cannot fail.
            let _ = conn.rx.resize(RX_BUFFER_LEN, 0);
            let more = match session.read(&mut self.tls, &mut self.net, socket, &mut conn.rx[start..]) {
                Ok(Progress::Done(n)) => {
                    conn.rx.truncate(start + n);
                    trace!("read {} bytes", n);
                    conn.rx.is_full() || session.pending(&self.tls)
                }
                Ok(Progress::Blocked(interest)) => {
                    conn.rx.truncate(start);
                    conn.blocked = conn.blocked.or(interest);
                    conn.update_interest();
                    false
                }
                Err(e) => {
                    conn.rx.truncate(start);
                    return Err(e);
                }
            };
            self.process_frames()?;
            if !more {
                break;
            }
        }
        Ok(())
    }

    fn process_frames(&mut self) -> Result<()> {
        loop {
            let Some(conn) = self.connection.as_mut() else {
                return Ok(());
            };
            if !conn.phase.is_live() {
                return Ok(());
            }
            let Some((packet, used)) = codec::decode(&conn.rx)? else {
                if codec::frame_len(&conn.rx)?.is_some_and(|len| len > RX_BUFFER_LEN) {
                    return Err(Error::PayloadTooLarge);
                }
                return Ok(());
            };
            let incoming = Incoming::try_from(packet)?;
            consume(&mut conn.rx, used);
            self.handle(incoming)?;
        }
    }

    fn handle(&mut self, incoming: Incoming) -> Result<()> {
        let phase = self.connection.as_ref().map_or(Phase::Idle, |c| c.phase);
        if phase == Phase::AwaitingConnack {
            let Incoming::Connack { session_present, code } = incoming else {
                warn!("expected CONNACK");
                return Err(Error::UnexpectedPacket);
            };
            if let Err(e) = Error::from_connack_code(code) {
                warn!("broker refused connection: {:?}", e);
                return Err(e);
            }
            self.opened(session_present);
            return Ok(());
        }

        let now = self.now_ms();
        match incoming {
            Incoming::Connack { .. } => return Err(Error::UnexpectedPacket),
            Incoming::Publish(message) => return self.on_publish(message),
            Incoming::Oversized { qos, id, len } => {
                self.acknowledge(qos, id)?;
                warn!("dropped {} byte message {:?}, too large to deliver", len, id);
                return Ok(());
            }
            Incoming::Puback(id) => match self.qos.on_puback(id) {
                Some(done) => self.complete(done),
                None => debug!("ignoring PUBACK {}", id),
            },
            Incoming::Pubrec(id) => match self.qos.on_pubrec(id, now) {
                PubrecAction::SendPubrel => {
                    self.queue_ack(codec::PUBREL, id)?;
                    if let Some(conn) = self.connection.as_mut() {
                        conn.mark_unsent(id);
                    }
                }
                PubrecAction::Ignore => debug!("ignoring PUBREC {}", id),
            },
            Incoming::Pubcomp(id) => match self.qos.on_pubcomp(id) {
                Some(done) => self.complete(done),
                None => debug!("ignoring PUBCOMP {}", id),
            },
            Incoming::Pubrel(id) => {
                if let Some(conn) = self.connection.as_mut() {
                    conn.inbound.retain(|&pending| pending != id);
                }
                self.queue_ack(codec::PUBCOMP, id)?;
            }
            Incoming::Suback { id, codes } => self.on_suback(id, &codes),
            Incoming::Unsuback(id) => {
                if !self.subscriptions.on_unsuback(id) {
                    debug!("ignoring UNSUBACK {}", id);
                }
            }
            Incoming::Pingresp => {
                trace!("PINGRESP");
                self.disarm(Timer::PingTimeout);
                self.arm_keepalive();
            }
            Incoming::Disconnect => {
                warn!("broker sent DISCONNECT");
                return Err(Error::ConnectionReset);
            }
        }
        self.rearm_retransmit();
        Ok(())
    }

    fn queue_ack(&mut self, header: u8, id: MessageId) -> Result<()> {
        let Some(conn) = self.connection.as_mut() else {
            return Ok(());
        };
        codec::encode_ack(&mut conn.tx, header, id)?;
        conn.update_interest();
        Ok(())
    }

    fn complete(&mut self, done: Completion<PublishCallback<P, A>>) {
        match done.result {
            Ok(()) => debug!("message {} delivered", done.id),
            Err(e) => warn!("message {} failed: {:?}", done.id, e),
        }
        if let Some(callback) = done.callback {
            callback(self, Some(done.id), done.result);
        }
    }

    fn on_publish(&mut self, message: Message) -> Result<()> {
        debug!(
            "PUBLISH on {} (qos {}, {} bytes)",
            message.topic.as_str(),
            message.qos as u8,
            message.payload.len()
        );
        if !self.acknowledge(message.qos, message.id)? {
            return Ok(());
        }

        let handlers = self.subscriptions.matching(&message.topic);
        if handlers.is_empty() {
            debug!("no subscriber for {}", message.topic.as_str());
        }
        for handler in handlers {
            handler(self, SubscriptionEvent::Message(&message));
        }
        Ok(())
    }

    /// Queues the acknowledgment an inbound PUBLISH asks for. Returns
    /// `false` for a QoS 2 message that was already delivered.
    fn acknowledge(&mut self, qos: QoS, id: Option<MessageId>) -> Result<bool> {
        match (qos, id) {
            (QoS::AtMostOnce, _) => Ok(true),
            (QoS::AtLeastOnce, Some(id)) => {
                self.queue_ack(codec::PUBACK, id)?;
                Ok(true)
            }
            (QoS::ExactlyOnce, Some(id)) => {
                self.queue_ack(codec::PUBREC, id)?;
                let Some(conn) = self.connection.as_mut() else {
                    return Ok(false);
                };
                if conn.inbound.contains(&id) {
                    debug!("duplicate QoS 2 message {}", id);
                    return Ok(false);
                }
                if conn.inbound.push(id).is_err() {
                    warn!("inbound QoS 2 table full, {} not deduplicated", id);
                }
                Ok(true)
            }
            _ => Err(Error::MalformedPacket),
        }
    }

    fn on_suback(&mut self, id: MessageId, codes: &[u8]) {
        match self.subscriptions.on_suback(id, codes) {
            Ok(outcomes) => {
                for outcome in outcomes {
                    let event = SubscriptionEvent::Subscribed {
                        filter: &outcome.filter,
                        result: outcome.result,
                    };
                    (outcome.callback)(self, event);
                }
            }
            Err(_) => debug!("ignoring SUBACK {}", id),
        }
    }

    fn arm_keepalive(&mut self) {
        let now = self.now_ms();
        let Some(conn) = self.connection.as_ref() else {
            return;
        };
        if conn.state != ConnectionState::Opened || conn.keepalive_ms() == 0 {
            return;
        }
        let due = conn
            .last_activity
            .saturating_add(conn.keepalive_ms())
            .saturating_sub(now);
        if let Err(e) = self.arm(Timer::Keepalive, due) {
            warn!("cannot arm keep-alive: {:?}", e);
        }
    }

    fn keepalive(&mut self) {
        let now = self.now_ms();
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if conn.state != ConnectionState::Opened || conn.timers.ping.is_some() {
            return;
        }
        if now < conn.last_activity.saturating_add(conn.keepalive_ms()) {
            self.arm_keepalive();
            return;
        }
        if let Err(e) = codec::encode_pingreq(&mut conn.tx) {
            self.fail(e);
            return;
        }
        conn.update_interest();
        debug!("PINGREQ queued");
        let grace = u64::from(self.settings.ping_grace_ms);
        if let Err(e) = self.arm(Timer::PingTimeout, grace) {
            self.fail(e);
        }
    }

    fn rearm_retransmit(&mut self) {
        let now = self.now_ms();
        match self.qos.next_deadline() {
            Some(deadline) if self.is_connected() => {
                if let Err(e) = self.arm(Timer::Retransmit, deadline.saturating_sub(now)) {
                    warn!("cannot arm retransmit timer: {:?}", e);
                }
            }
            _ => self.disarm(Timer::Retransmit),
        }
    }

    fn retransmit(&mut self) {
        let now = self.now_ms();
        if let Some(conn) = self.connection.as_ref() {
            self.qos.hold(now, |id| conn.is_unsent(id));
        }
        while let Some(expiry) = self.qos.next_expired(now) {
            match expiry {
                Expiry::Resend(id) => {
                    if let Err(e) = self.requeue(id) {
                        warn!("retransmit of {} deferred: {:?}", id, e);
                    }
                }
                Expiry::Failed(done) => self.complete(done),
            }
        }
        self.rearm_retransmit();
    }

    fn requeue(&mut self, id: MessageId) -> Result<()> {
        let Some(conn) = self.connection.as_mut() else {
            return Err(Error::NoActiveConnection);
        };
        if conn.state != ConnectionState::Opened {
            return Err(Error::NoActiveConnection);
        }
        let Some(message) = self.qos.get(id) else {
            return Ok(());
        };
        match message.stage {
            Stage::AwaitPubcomp => codec::encode_ack(&mut conn.tx, codec::PUBREL, id)?,
            Stage::AwaitPuback | Stage::AwaitPubrec => codec::encode_publish(&mut conn.tx, &message.publish())?,
        }
        conn.mark_unsent(id);
        conn.update_interest();
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Teardown
    // ----------------------------------------------------------------------

    /// Closes TLS session and socket and cancels transport timers.
    fn release(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if let Some(session) = conn.tls.take() {
            session.close(&mut self.tls);
        }
        if let Some(socket) = conn.socket.take() {
            if let Err(e) = self.net.close(socket) {
                warn!("socket close failed: {:?}", e);
            }
        }
        for handle in conn.timers.take_transport().into_iter().flatten() {
            self.scheduler.cancel(handle);
        }
        conn.phase = Phase::Idle;
        conn.interest = Interest::NONE;
        conn.blocked = Interest::NONE;
        conn.rx.clear();
        conn.tx.clear();
        conn.unsent.clear();
        conn.inbound.clear();
    }

    fn void_in_flight(&mut self, error: Error) {
        let failed = self.qos.fail_all(error);
        let lost = self.subscriptions.clear(error);
        for done in failed {
            self.complete(done);
        }
        for outcome in lost {
            let event = SubscriptionEvent::Subscribed {
                filter: &outcome.filter,
                result: outcome.result,
            };
            (outcome.callback)(self, event);
        }
    }

    fn finish_close(&mut self) {
        if self.connection_state() != ConnectionState::Closing {
            return;
        }
        self.release();
        self.void_in_flight(Error::ConnectionLost);
        self.set_state(ConnectionState::Closed);
        self.notify(ConnectionState::Closed, Ok(()));
    }

    fn fail(&mut self, error: Error) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        match conn.state {
            ConnectionState::Opening => {
                warn!("open failed: {:?}", error);
                self.release();
                self.set_state(ConnectionState::OpenFailed);
                let reported = self.after_failure(error);
                self.notify(ConnectionState::OpenFailed, Err(reported));
            }
            ConnectionState::Opened | ConnectionState::Closing => {
                let user_closed = conn.user_closed;
                if !user_closed {
                    warn!("connection lost: {:?}", error);
                    conn.auto_reconnect = true;
                }
                self.set_state(ConnectionState::Closing);
                self.release();
                self.void_in_flight(Error::ConnectionLost);
                if !user_closed {
                    self.notify(ConnectionState::Closing, Err(error));
                }
                if self.connection_state() != ConnectionState::Closing {
                    return;
                }
                self.set_state(ConnectionState::Closed);
                let report = if user_closed {
                    Ok(())
                } else {
                    Err(self.after_failure(error))
                };
                self.notify(ConnectionState::Closed, report);
            }
            _ => {}
        }
    }

    /// Counts the failure and schedules the next attempt when automatic
    /// reconnection is active. Returns the error to report.
    fn after_failure(&mut self, error: Error) -> Error {
        let Some(conn) = self.connection.as_mut() else {
            return error;
        };
        let class = BackoffClass::classify(Err(error));
        if class != BackoffClass::None {
            conn.attempts = conn.attempts.saturating_add(1);
        }
        conn.last_outcome = Err(error);
        if !conn.auto_reconnect {
            return error;
        }
        if class == BackoffClass::Terminal {
            warn!("not retrying after {:?}", error);
            conn.auto_reconnect = false;
            return error;
        }
        match self.schedule_reconnect() {
            Ok(()) => error,
            Err(e) => {
                warn!("giving up reconnecting: {:?}", e);
                if let Some(conn) = self.connection.as_mut() {
                    conn.auto_reconnect = false;
                }
                e
            }
        }
    }

    fn schedule_reconnect(&mut self) -> Result<()> {
        let random = self.rng.next_u32();
        let Some(conn) = self.connection.as_ref() else {
            return Err(Error::NoActiveConnection);
        };
        let attempts = conn.attempts;
        let delay = millis(self.backoff.next_delay(attempts, conn.last_outcome, random)?);
        warn!("reconnecting in {} ms (attempt {})", delay, attempts);
        self.arm(Timer::Reconnect, delay)
    }
}
