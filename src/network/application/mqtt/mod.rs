//! MQTT 3.1.1 session management for embedded systems.
//!
//! This module turns the platform's non-blocking socket and TLS primitives
//! into a long-lived, self-healing MQTT session. MQTT (Message Queuing
//! Telemetry Transport) is a lightweight publish-subscribe protocol; this
//! implementation targets devices that talk to a cloud broker over TLS and
//! must survive flaky links without an operating system thread per socket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Context (client.rs)                          │
//! │   open/publish/subscribe ──► connection state machine ──► callbacks  │
//! └──────┬───────────────┬──────────────────┬─────────────────┬──────────┘
//!        │               │                  │                 │
//!        ▼               ▼                  ▼                 ▼
//! ┌─────────────┐ ┌─────────────┐  ┌─────────────────┐ ┌─────────────┐
//! │  Scheduler  │ │ TlsSession  │  │   QosTracker    │ │Subscription │
//! │ (timers)    │ │ (session.rs)│  │   (qos.rs)      │ │  Registry   │
//! └─────────────┘ └──────┬──────┘  └─────────────────┘ └─────────────┘
//!                        │ codec.rs frames
//!                        ▼
//!               Platform Tls + Network
//! ```
//!
//! Connection states:
//!
//! ```text
//! UNINITIALIZED ──open──► OPENING ──CONNACK ok──► OPENED ──loss──► CLOSING ──► CLOSED
//!                            │                       │                           │
//!                            └──error──► OPEN_FAILED └──disconnect──► CLOSING    │
//!                                           │                                    │
//!                                           └───────── backoff ◄─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut ctx = Context::new(bsp, SessionConfig::default(), App::default())?;
//! ctx.open(ConnectionConfig::new("mqtt.example.com", 8883, "sensor-7")?, Some(on_state))?;
//! ctx.process_blocking()?;
//!
//! fn on_state(ctx: &mut Context<Board, App>, state: ConnectionState, result: Result<()>) {
//!     if state == ConnectionState::Opened {
//!         ctx.subscribe("devices/sensor-7/commands/#", QoS::AtLeastOnce, on_command).ok();
//!         ctx.publish("devices/sensor-7/state", b"online", QoS::AtLeastOnce, false, None).ok();
//!     }
//! }
//! ```

use heapless::{String, Vec};

/// Reconnection delay policy.
pub mod backoff;

/// Session manager: connection state machine, public API and event loop.
pub mod client;

/// Frame encoding and decoding.
pub mod codec;

/// In-flight outbound QoS 1/2 publishes.
pub mod qos;

/// TLS handshake and record I/O adapter.
pub mod session;

/// Topic filter registry and SUBACK correlation.
pub mod subscription;

/// Topic name and filter rules.
pub mod topic;

pub use client::{
    ConnectionCallback, ConnectionState, Context, PublishCallback, SubscriptionCallback,
    SubscriptionEvent, TaskCallback,
};

/// Longest topic name or filter.
pub const MAX_TOPIC_LEN: usize = 256;
/// Largest publish payload, in either direction.
pub const MAX_PAYLOAD_LEN: usize = 1024;
/// Outbound QoS 1/2 publishes awaiting acknowledgment.
pub const MAX_INFLIGHT: usize = 8;
/// Topic filters tracked at once.
pub const MAX_SUBSCRIPTIONS: usize = 16;
/// Inbound QoS 2 message ids awaiting PUBREL.
pub const MAX_INBOUND_QOS2: usize = 8;
/// Receive buffer; must hold one complete frame.
pub const RX_BUFFER_LEN: usize = 2048;
/// Transmit buffer for frames waiting on socket writability.
pub const TX_BUFFER_LEN: usize = 4096;
/// Largest CA bundle loaded before a handshake.
pub const MAX_CA_CERTIFICATES_LEN: usize = 4096;

/// Packet identifier. Never zero on the wire.
pub type MessageId = u16;

/// Quality of Service levels for MQTT messages.
///
/// QoS defines the guarantee of delivery for a specific message. Higher QoS levels
/// provide stronger delivery guarantees but require more network overhead and
/// client state management.
///
/// # Examples
///
/// ```rust
/// use libiot_connect::network::application::mqtt::QoS;
///
/// assert_eq!(QoS::AtMostOnce as u8, 0);
/// assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
/// assert!(QoS::try_from(3).is_err());
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    /// **QoS 0**: At most once delivery. Fire and forget.
    AtMostOnce = 0,

    /// **QoS 1**: At least once delivery. Retransmitted until PUBACK;
    /// duplicates can occur.
    AtLeastOnce = 1,

    /// **QoS 2**: Exactly once delivery through the PUBREC/PUBREL/PUBCOMP
    /// handshake.
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(crate::Error::MalformedPacket),
        }
    }
}

/// An incoming MQTT publish message.
///
/// This is what subscription callbacks receive. Topic and payload are copied
/// out of the receive buffer so the callback may freely call back into the
/// context.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Message {
    /// The topic on which the message was published.
    pub topic: String<MAX_TOPIC_LEN>,

    /// The message payload data.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,

    /// Delivery guarantee the broker used.
    pub qos: QoS,

    /// Set when the broker delivers a retained message.
    pub retain: bool,

    /// Set when the broker may have delivered this message before.
    pub dup: bool,

    /// Packet identifier for QoS 1/2 messages.
    pub id: Option<MessageId>,
}
