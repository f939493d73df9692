//! In-flight outbound publishes.
//!
//! The tracker owns every QoS 1/2 publish from the moment it is queued until
//! the broker completes the acknowledgment flow, the retry ceiling is
//! reached, or the connection is torn down. It also hands out packet
//! identifiers for every frame that needs one.
//!
//! ```text
//! QoS 1:  PUBLISH ──► AwaitPuback ──PUBACK──► done
//! QoS 2:  PUBLISH ──► AwaitPubrec ──PUBREC──► PUBREL ──► AwaitPubcomp ──PUBCOMP──► done
//!
//! timeout: retransmit the current stage (PUBLISH with DUP, or PUBREL)
//!          until `max_retries` retransmits went unanswered, then fail
//! ```
//!
//! The tracker never touches the wire. It tells the caller which frame to
//! send and which callback to complete, and the caller does both.

use heapless::{String, Vec};

use super::codec::Publish;
use super::{MAX_INFLIGHT, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN, MessageId, QoS};
use crate::{Error, Result};

/// Acknowledgment a pending message waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    /// QoS 1, PUBLISH sent.
    AwaitPuback,
    /// QoS 2, PUBLISH sent.
    AwaitPubrec,
    /// QoS 2, PUBREL sent.
    AwaitPubcomp,
}

/// One in-flight QoS 1/2 publish.
#[derive(Debug, Clone)]
pub struct PendingMessage<C> {
    /// Packet identifier.
    pub id: MessageId,
    /// Requested QoS.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
    /// Set once the PUBLISH was retransmitted.
    pub dup: bool,
    /// Retransmits so far.
    pub retries: u8,
    /// Time of the next retransmit.
    pub deadline: u64,
    /// Current acknowledgment stage.
    pub stage: Stage,
    /// Topic, kept for retransmission.
    pub topic: String<MAX_TOPIC_LEN>,
    /// Payload, kept for retransmission.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
    /// Completion callback.
    pub callback: Option<C>,
}

impl<C> PendingMessage<C> {
    /// The PUBLISH frame to (re)send for this message.
    pub fn publish(&self) -> Publish<'_> {
        Publish {
            topic: &self.topic,
            payload: &self.payload,
            qos: self.qos,
            retain: self.retain,
            dup: self.dup,
            id: Some(self.id),
        }
    }
}

/// A finished publish and the callback to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion<C> {
    /// Packet identifier.
    pub id: MessageId,
    /// Callback registered with the publish.
    pub callback: Option<C>,
    /// Final outcome.
    pub result: Result<()>,
}

/// Reaction to a PUBREC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubrecAction {
    /// Send PUBREL for the id.
    SendPubrel,
    /// Unknown id; nothing to do.
    Ignore,
}

/// Result of a retransmit timer check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry<C> {
    /// Re-send the current stage frame of this id.
    Resend(MessageId),
    /// Retry ceiling reached; the message was dropped.
    Failed(Completion<C>),
}

/// Fixed-capacity table of in-flight publishes.
#[derive(Debug)]
pub struct QosTracker<C, const N: usize = MAX_INFLIGHT> {
    pending: Vec<PendingMessage<C>, N>,
    next_id: MessageId,
    retry_timeout_ms: u64,
    max_retries: u8,
}

impl<C: Copy, const N: usize> QosTracker<C, N> {
    /// Creates an empty tracker.
    pub fn new(retry_timeout_ms: u32, max_retries: u8) -> Self {
        Self {
            pending: Vec::new(),
            next_id: 1,
            retry_timeout_ms: u64::from(retry_timeout_ms),
            max_retries,
        }
    }

    /// Restarts id assignment, for a new connection.
    pub fn reset_ids(&mut self) {
        self.next_id = 1;
    }

    /// Assigns the next free packet identifier.
    ///
    /// Ids increase monotonically and wrap from 65535 to 1, skipping any id
    /// that is in flight here or for which `reserved` returns `true`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if every id is taken.
    pub fn allocate_id(&mut self, reserved: impl Fn(MessageId) -> bool) -> Result<MessageId> {
        for _ in 0..u16::MAX {
            let id = self.next_id;
            self.next_id = if id == u16::MAX { 1 } else { id + 1 };
            if !self.contains(id) && !reserved(id) {
                return Ok(id);
            }
        }
        Err(Error::OutOfMemory)
    }

    /// Starts tracking an outbound publish.
    ///
    /// QoS 0 records nothing and returns `Ok(None)`. Otherwise the publish
    /// is copied, given a fresh id and its first retransmit deadline.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfMemory`] when the table or the id space is full
    /// - [`Error::PayloadTooLarge`] if topic or payload exceed their capacity
    pub fn track(
        &mut self,
        publish: &Publish<'_>,
        callback: Option<C>,
        now: u64,
        reserved: impl Fn(MessageId) -> bool,
    ) -> Result<Option<MessageId>> {
        let stage = match publish.qos {
            QoS::AtMostOnce => return Ok(None),
            QoS::AtLeastOnce => Stage::AwaitPuback,
            QoS::ExactlyOnce => Stage::AwaitPubrec,
        };
        if self.pending.is_full() {
            return Err(Error::OutOfMemory);
        }
        let topic = String::try_from(publish.topic).map_err(|_| Error::PayloadTooLarge)?;
        let payload = Vec::from_slice(publish.payload).map_err(|_| Error::PayloadTooLarge)?;
        let id = self.allocate_id(reserved)?;

        let message = PendingMessage {
            id,
            qos: publish.qos,
            retain: publish.retain,
            dup: false,
            retries: 0,
            deadline: now.saturating_add(self.retry_timeout_ms),
            stage,
            topic,
            payload,
            callback,
        };
        self.pending.push(message).map_err(|_| Error::OutOfMemory)?;
        debug!("tracking message {}", id);
        Ok(Some(id))
    }

    /// Drops a message without completing it, when its frame could not be
    /// queued.
    pub fn forget(&mut self, id: MessageId) {
        self.pending.retain(|m| m.id != id);
    }

    /// The pending message with this id.
    pub fn get(&self, id: MessageId) -> Option<&PendingMessage<C>> {
        self.pending.iter().find(|m| m.id == id)
    }

    /// `true` while `id` is in flight.
    pub fn contains(&self, id: MessageId) -> bool {
        self.pending.iter().any(|m| m.id == id)
    }

    fn take(&mut self, id: MessageId, stage: Stage) -> Option<Completion<C>> {
        let index = self
            .pending
            .iter()
            .position(|m| m.id == id && m.stage == stage)?;
        let message = self.pending.swap_remove(index);
        Some(Completion {
            id,
            callback: message.callback,
            result: Ok(()),
        })
    }

    /// Completes a QoS 1 publish. A duplicate or unknown PUBACK is a no-op.
    pub fn on_puback(&mut self, id: MessageId) -> Option<Completion<C>> {
        self.take(id, Stage::AwaitPuback)
    }

    /// Moves a QoS 2 publish to the PUBREL stage.
    ///
    /// A repeated PUBREC for a message already past this stage asks for the
    /// PUBREL to be sent again without touching the retry budget.
    pub fn on_pubrec(&mut self, id: MessageId, now: u64) -> PubrecAction {
        let timeout = self.retry_timeout_ms;
        match self.pending.iter_mut().find(|m| m.id == id) {
            Some(m) if m.stage == Stage::AwaitPubrec => {
                m.stage = Stage::AwaitPubcomp;
                m.retries = 0;
                m.deadline = now.saturating_add(timeout);
                PubrecAction::SendPubrel
            }
            Some(m) if m.stage == Stage::AwaitPubcomp => PubrecAction::SendPubrel,
            _ => PubrecAction::Ignore,
        }
    }

    /// Completes a QoS 2 publish. Only the first PUBCOMP counts.
    pub fn on_pubcomp(&mut self, id: MessageId) -> Option<Completion<C>> {
        self.take(id, Stage::AwaitPubcomp)
    }

    /// Earliest retransmit deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.iter().map(|m| m.deadline).min()
    }

    /// Pushes back every expired deadline for which `unsent` holds, without
    /// charging a retry. Such a message never left the transmit buffer, so
    /// there is nothing to retransmit yet.
    pub fn hold(&mut self, now: u64, unsent: impl Fn(MessageId) -> bool) {
        let timeout = self.retry_timeout_ms;
        for message in self.pending.iter_mut() {
            if message.deadline <= now && unsent(message.id) {
                debug!("message {} still queued, retransmit postponed", message.id);
                message.deadline = now.saturating_add(timeout);
            }
        }
    }

    /// Handles the next message whose deadline passed, if any.
    ///
    /// Call repeatedly until it returns `None`.
    pub fn next_expired(&mut self, now: u64) -> Option<Expiry<C>> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, m)| m.deadline <= now)
            .min_by_key(|(_, m)| m.deadline)
            .map(|(i, _)| i)?;

        let message = &mut self.pending[index];
        if message.retries >= self.max_retries {
            let message = self.pending.swap_remove(index);
            warn!("message {} unacknowledged after {} retries", message.id, message.retries);
            return Some(Expiry::Failed(Completion {
                id: message.id,
                callback: message.callback,
                result: Err(Error::DeliveryFailed),
            }));
        }
        message.retries += 1;
        message.deadline = now.saturating_add(self.retry_timeout_ms);
        if message.stage != Stage::AwaitPubcomp {
            message.dup = true;
        }
        warn!("retransmitting message {} (retry {})", message.id, message.retries);
        Some(Expiry::Resend(message.id))
    }

    /// Voids every pending message with `error`.
    pub fn fail_all(&mut self, error: Error) -> Vec<Completion<C>, N> {
        let mut failed = Vec::new();
        for message in self.pending.iter() {
            // Capacities are equal, so this cannot overflow.
            let _ = failed.push(Completion {
                id: message.id,
                callback: message.callback,
                result: Err(error),
            });
        }
        self.pending.clear();
        failed
    }

    /// Messages in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// `true` when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
