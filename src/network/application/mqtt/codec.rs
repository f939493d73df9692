//! MQTT 3.1.1 control packet encoding and decoding.
//!
//! Encoders append one complete frame to a transmit buffer. If the frame
//! does not fit, the buffer is left exactly as it was and
//! [`Error::OutOfMemory`] is returned, so a partially queued frame can never
//! reach the wire.
//!
//! The decoder works on a receive buffer that may hold a partial frame, one
//! frame or several. It borrows topic and payload from the buffer.
//!
//! ```text
//! ┌────────────┬──────────────────┬─────────────────┬───────────┐
//! │ type|flags │ remaining length │ variable header │  payload  │
//! │   1 byte   │    1..4 bytes    │                 │           │
//! └────────────┴──────────────────┴─────────────────┴───────────┘
//! ```
//!
//! # Examples
//!
//! ```rust
//! use heapless::Vec;
//! use libiot_connect::network::application::mqtt::QoS;
//! use libiot_connect::network::application::mqtt::codec::{self, Packet, Publish};
//!
//! let mut buf: Vec<u8, 64> = Vec::new();
//! let publish = Publish {
//!     topic: "a/b",
//!     payload: b"hi",
//!     qos: QoS::AtLeastOnce,
//!     retain: false,
//!     dup: false,
//!     id: Some(7),
//! };
//! codec::encode_publish(&mut buf, &publish).unwrap();
//!
//! let (packet, used) = codec::decode(&buf).unwrap().unwrap();
//! assert_eq!(used, buf.len());
//! assert_eq!(packet, Packet::Publish(publish));
//! ```

use heapless::Vec;

use super::{MessageId, QoS};
use crate::{Error, Result};

// MQTT Control Packet types - these are the fixed header packet type values
/// MQTT CONNECT packet type identifier.
pub const CONNECT: u8 = 0x10;
/// MQTT CONNACK packet type identifier.
pub const CONNACK: u8 = 0x20;
/// MQTT PUBLISH packet type identifier.
pub const PUBLISH: u8 = 0x30;
/// MQTT PUBACK packet type identifier.
pub const PUBACK: u8 = 0x40;
/// MQTT PUBREC packet type identifier.
pub const PUBREC: u8 = 0x50;
/// MQTT PUBREL packet type identifier, including its mandatory flags.
pub const PUBREL: u8 = 0x62;
/// MQTT PUBCOMP packet type identifier.
pub const PUBCOMP: u8 = 0x70;
/// MQTT SUBSCRIBE packet type identifier, including its mandatory flags.
pub const SUBSCRIBE: u8 = 0x82;
/// MQTT SUBACK packet type identifier.
pub const SUBACK: u8 = 0x90;
/// MQTT UNSUBSCRIBE packet type identifier, including its mandatory flags.
pub const UNSUBSCRIBE: u8 = 0xA2;
/// MQTT UNSUBACK packet type identifier.
pub const UNSUBACK: u8 = 0xB0;
/// MQTT PINGREQ packet type identifier.
pub const PINGREQ: u8 = 0xC0;
/// MQTT PINGRESP packet type identifier.
pub const PINGRESP: u8 = 0xD0;
/// MQTT DISCONNECT packet type identifier.
pub const DISCONNECT: u8 = 0xE0;

/// SUBACK return code for a rejected filter.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Protocol name carried in CONNECT.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;
/// Largest value the remaining length field can carry.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Fields of a CONNECT packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect<'a> {
    /// Client identifier.
    pub client_id: &'a str,
    /// Optional user name.
    pub username: Option<&'a str>,
    /// Optional password. Only sent together with a user name.
    pub password: Option<&'a [u8]>,
    /// Keep-alive interval in seconds.
    pub keepalive_secs: u16,
    /// Clean-session flag.
    pub clean_session: bool,
}

/// A PUBLISH packet, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    /// Topic name.
    pub topic: &'a str,
    /// Application payload.
    pub payload: &'a [u8],
    /// Delivery guarantee.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
    /// Redelivery flag.
    pub dup: bool,
    /// Packet identifier; present exactly when `qos` is above zero.
    pub id: Option<MessageId>,
}

/// A decoded broker-to-client packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    /// Connection acknowledgment.
    Connack {
        /// Broker resumed a stored session.
        session_present: bool,
        /// Return code; zero means accepted.
        code: u8,
    },
    /// Application message.
    Publish(Publish<'a>),
    /// QoS 1 acknowledgment.
    Puback(MessageId),
    /// QoS 2 step one.
    Pubrec(MessageId),
    /// QoS 2 step two.
    Pubrel(MessageId),
    /// QoS 2 step three.
    Pubcomp(MessageId),
    /// Subscription result, one code per requested filter.
    Suback {
        /// Identifier of the SUBSCRIBE being answered.
        id: MessageId,
        /// Granted QoS or [`SUBACK_FAILURE`] per filter.
        codes: &'a [u8],
    },
    /// Unsubscribe acknowledgment.
    Unsuback(MessageId),
    /// Keep-alive response.
    Pingresp,
    /// Broker-initiated disconnect.
    Disconnect,
}

/// Appends the variable-length remaining length field.
pub fn encode_remaining_length<const N: usize>(buf: &mut Vec<u8, N>, mut len: usize) -> Result<()> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::PayloadTooLarge);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte).map_err(|_| Error::OutOfMemory)?;
        if len == 0 {
            return Ok(());
        }
    }
}

/// Reads the remaining length field at the start of `buf`.
///
/// Returns the value and the number of bytes it occupied, or `None` if the
/// field is not complete yet.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(Error::MalformedPacket);
        }
        value += (*byte as usize & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(Error::MalformedPacket);
    }
    Ok(None)
}

/// Total length of the first frame in `buf`, once its header is complete.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>> {
    if buf.is_empty() {
        return Ok(None);
    }
    Ok(decode_remaining_length(&buf[1..])?.map(|(len, used)| 1 + used + len))
}

fn put<const N: usize>(buf: &mut Vec<u8, N>, bytes: &[u8]) -> Result<()> {
    buf.extend_from_slice(bytes).map_err(|_| Error::OutOfMemory)
}

fn put_u8<const N: usize>(buf: &mut Vec<u8, N>, byte: u8) -> Result<()> {
    buf.push(byte).map_err(|_| Error::OutOfMemory)
}

fn put_u16<const N: usize>(buf: &mut Vec<u8, N>, value: u16) -> Result<()> {
    put(buf, &value.to_be_bytes())
}

fn put_str<const N: usize>(buf: &mut Vec<u8, N>, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| Error::PayloadTooLarge)?;
    put_u16(buf, len)?;
    put(buf, bytes)
}

fn str_len(bytes: &[u8]) -> usize {
    2 + bytes.len()
}

/// Runs `write` and rolls the buffer back if it fails part way.
fn atomic<const N: usize>(
    buf: &mut Vec<u8, N>,
    write: impl FnOnce(&mut Vec<u8, N>) -> Result<()>,
) -> Result<()> {
    let start = buf.len();
    let result = write(buf);
    if result.is_err() {
        buf.truncate(start);
    }
    result
}

/// Appends a CONNECT frame.
pub fn encode_connect<const N: usize>(buf: &mut Vec<u8, N>, connect: &Connect<'_>) -> Result<()> {
    // A password without a user name is not allowed in 3.1.1.
    let password = connect.username.and(connect.password);

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= 0x02;
    }
    if password.is_some() {
        flags |= 0x40;
    }
    if connect.username.is_some() {
        flags |= 0x80;
    }

    let mut remaining = str_len(PROTOCOL_NAME) + 1 + 1 + 2 + str_len(connect.client_id.as_bytes());
    if let Some(username) = connect.username {
        remaining += str_len(username.as_bytes());
    }
    if let Some(password) = password {
        remaining += str_len(password);
    }

    atomic(buf, |buf| {
        put_u8(buf, CONNECT)?;
        encode_remaining_length(buf, remaining)?;
        // --- Variable Header ---
        put_str(buf, PROTOCOL_NAME)?;
        put_u8(buf, PROTOCOL_LEVEL)?;
        put_u8(buf, flags)?;
        put_u16(buf, connect.keepalive_secs)?;
        // --- Payload ---
        put_str(buf, connect.client_id.as_bytes())?;
        if let Some(username) = connect.username {
            put_str(buf, username.as_bytes())?;
        }
        if let Some(password) = password {
            put_str(buf, password)?;
        }
        Ok(())
    })
}

/// Appends a PUBLISH frame.
///
/// # Errors
///
/// [`Error::InvalidParameter`] if the packet id is missing for QoS 1/2,
/// present for QoS 0, or zero.
pub fn encode_publish<const N: usize>(buf: &mut Vec<u8, N>, publish: &Publish<'_>) -> Result<()> {
    match (publish.qos, publish.id) {
        (QoS::AtMostOnce, None) => {}
        (QoS::AtLeastOnce | QoS::ExactlyOnce, Some(id)) if id != 0 => {}
        _ => return Err(Error::InvalidParameter),
    }

    let mut header = PUBLISH | ((publish.qos as u8) << 1);
    if publish.dup {
        header |= 0x08;
    }
    if publish.retain {
        header |= 0x01;
    }
    let id_len = if publish.id.is_some() { 2 } else { 0 };
    let remaining = str_len(publish.topic.as_bytes()) + id_len + publish.payload.len();

    atomic(buf, |buf| {
        put_u8(buf, header)?;
        encode_remaining_length(buf, remaining)?;
        put_str(buf, publish.topic.as_bytes())?;
        if let Some(id) = publish.id {
            put_u16(buf, id)?;
        }
        put(buf, publish.payload)
    })
}

/// Appends a SUBSCRIBE frame requesting every `(filter, qos)` pair.
pub fn encode_subscribe<const N: usize>(
    buf: &mut Vec<u8, N>,
    id: MessageId,
    filters: &[(&str, QoS)],
) -> Result<()> {
    if filters.is_empty() || id == 0 {
        return Err(Error::InvalidParameter);
    }
    let remaining = 2 + filters
        .iter()
        .map(|(filter, _)| str_len(filter.as_bytes()) + 1)
        .sum::<usize>();

    atomic(buf, |buf| {
        put_u8(buf, SUBSCRIBE)?;
        encode_remaining_length(buf, remaining)?;
        put_u16(buf, id)?;
        for (filter, qos) in filters {
            put_str(buf, filter.as_bytes())?;
            put_u8(buf, *qos as u8)?;
        }
        Ok(())
    })
}

/// Appends an UNSUBSCRIBE frame.
pub fn encode_unsubscribe<const N: usize>(
    buf: &mut Vec<u8, N>,
    id: MessageId,
    filters: &[&str],
) -> Result<()> {
    if filters.is_empty() || id == 0 {
        return Err(Error::InvalidParameter);
    }
    let remaining = 2 + filters.iter().map(|f| str_len(f.as_bytes())).sum::<usize>();

    atomic(buf, |buf| {
        put_u8(buf, UNSUBSCRIBE)?;
        encode_remaining_length(buf, remaining)?;
        put_u16(buf, id)?;
        for filter in filters {
            put_str(buf, filter.as_bytes())?;
        }
        Ok(())
    })
}

/// Appends a two-byte acknowledgment: PUBACK, PUBREC, PUBREL or PUBCOMP.
pub fn encode_ack<const N: usize>(buf: &mut Vec<u8, N>, header: u8, id: MessageId) -> Result<()> {
    if !matches!(header, PUBACK | PUBREC | PUBREL | PUBCOMP) {
        return Err(Error::InvalidParameter);
    }
    atomic(buf, |buf| {
        put(buf, &[header, 2])?;
        put_u16(buf, id)
    })
}

/// Appends a PINGREQ frame.
pub fn encode_pingreq<const N: usize>(buf: &mut Vec<u8, N>) -> Result<()> {
    atomic(buf, |buf| put(buf, &[PINGREQ, 0]))
}

/// Appends a DISCONNECT frame.
pub fn encode_disconnect<const N: usize>(buf: &mut Vec<u8, N>) -> Result<()> {
    atomic(buf, |buf| put(buf, &[DISCONNECT, 0]))
}

fn read_u16(body: &[u8], at: usize) -> Result<u16> {
    match body.get(at..at + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(Error::MalformedPacket),
    }
}

fn read_id(body: &[u8]) -> Result<MessageId> {
    if body.len() != 2 {
        return Err(Error::MalformedPacket);
    }
    match read_u16(body, 0)? {
        0 => Err(Error::MalformedPacket),
        id => Ok(id),
    }
}

fn decode_publish(flags: u8, body: &[u8]) -> Result<Publish<'_>> {
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let topic_len = read_u16(body, 0)? as usize;
    let topic = body.get(2..2 + topic_len).ok_or(Error::MalformedPacket)?;
    let topic = core::str::from_utf8(topic).map_err(|_| Error::MalformedPacket)?;
    let mut at = 2 + topic_len;

    let id = match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce | QoS::ExactlyOnce => {
            let id = read_u16(body, at)?;
            if id == 0 {
                return Err(Error::MalformedPacket);
            }
            at += 2;
            Some(id)
        }
    };

    Ok(Publish {
        topic,
        payload: &body[at..],
        qos,
        retain: flags & 0x01 != 0,
        dup: flags & 0x08 != 0,
        id,
    })
}

/// Decodes the first frame in `buf`.
///
/// Returns the packet and the number of bytes it used, or `None` when more
/// bytes are needed.
///
/// # Errors
///
/// - [`Error::MalformedPacket`] for a frame that violates 3.1.1 framing
/// - [`Error::UnexpectedPacket`] for packet types only clients send
pub fn decode(buf: &[u8]) -> Result<Option<(Packet<'_>, usize)>> {
    let Some(&header) = buf.first() else {
        return Ok(None);
    };
    let Some((len, used)) = decode_remaining_length(&buf[1..])? else {
        return Ok(None);
    };
    let total = 1 + used + len;
    if buf.len() < total {
        return Ok(None);
    }

    let flags = header & 0x0F;
    let body = &buf[1 + used..total];

    let packet = match header & 0xF0 {
        CONNACK => {
            if flags != 0 || body.len() != 2 || body[0] & 0xFE != 0 {
                return Err(Error::MalformedPacket);
            }
            Packet::Connack {
                session_present: body[0] & 0x01 != 0,
                code: body[1],
            }
        }
        PUBLISH => Packet::Publish(decode_publish(flags, body)?),
        PUBACK if flags == 0 => Packet::Puback(read_id(body)?),
        PUBREC if flags == 0 => Packet::Pubrec(read_id(body)?),
        0x60 if header == PUBREL => Packet::Pubrel(read_id(body)?),
        PUBCOMP if flags == 0 => Packet::Pubcomp(read_id(body)?),
        SUBACK if flags == 0 => {
            if body.len() < 3 {
                return Err(Error::MalformedPacket);
            }
            Packet::Suback {
                id: read_u16(body, 0)?,
                codes: &body[2..],
            }
        }
        UNSUBACK if flags == 0 => Packet::Unsuback(read_id(body)?),
        PINGRESP if flags == 0 && body.is_empty() => Packet::Pingresp,
        DISCONNECT if flags == 0 && body.is_empty() => Packet::Disconnect,
        CONNECT | 0x80 | 0xA0 | PINGREQ => return Err(Error::UnexpectedPacket),
        _ => return Err(Error::MalformedPacket),
    };
    Ok(Some((packet, total)))
}
