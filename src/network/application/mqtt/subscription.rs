//! Topic filter registry.
//!
//! Entries are kept in request order. A SUBSCRIBE for several filters
//! creates one pending entry per filter, each remembering its position in
//! the request, so that the SUBACK return codes can be matched back even if
//! one of the filters was unsubscribed in the meantime.

use heapless::{String, Vec};

use super::codec::SUBACK_FAILURE;
use super::topic;
use super::{MAX_SUBSCRIPTIONS, MAX_TOPIC_LEN, MessageId, QoS};
use crate::{Error, Result};

/// Where an entry is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubscriptionState {
    /// SUBSCRIBE sent, waiting for SUBACK.
    Pending {
        /// Identifier of the SUBSCRIBE.
        id: MessageId,
        /// Position of this filter in the request.
        index: u8,
    },
    /// Broker granted the filter at this QoS.
    Active(QoS),
}

/// One topic filter and its handler.
#[derive(Debug, Clone)]
pub struct SubscriptionEntry<C> {
    /// Topic filter.
    pub filter: String<MAX_TOPIC_LEN>,
    /// QoS requested by the application.
    pub requested: QoS,
    /// Lifecycle state.
    pub state: SubscriptionState,
    /// Handler for SUBACK results and matching messages.
    pub callback: C,
}

/// Result of a SUBACK or teardown for one pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubackOutcome<C> {
    /// Topic filter.
    pub filter: String<MAX_TOPIC_LEN>,
    /// Handler to notify.
    pub callback: C,
    /// Granted QoS, or why the filter is not active.
    pub result: Result<QoS>,
}

/// Fixed-capacity filter table.
#[derive(Debug)]
pub struct SubscriptionRegistry<C, const N: usize = MAX_SUBSCRIPTIONS> {
    entries: Vec<SubscriptionEntry<C>, N>,
    unsubscribing: Vec<MessageId, N>,
}

impl<C: Copy, const N: usize> Default for SubscriptionRegistry<C, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Copy, const N: usize> SubscriptionRegistry<C, N> {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            unsubscribing: Vec::new(),
        }
    }

    /// Records pending entries for one SUBSCRIBE request.
    ///
    /// A filter that is already registered is re-subscribed: its entry goes
    /// back to pending with the new handler. Nothing is recorded unless every
    /// filter fits.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] for an empty request or invalid filter
    /// - [`Error::OutOfMemory`] if the table cannot hold the new entries
    pub fn add_pending(&mut self, filters: &[(&str, QoS)], id: MessageId, callback: C) -> Result<()> {
        if filters.is_empty() || filters.len() > usize::from(u8::MAX) {
            return Err(Error::InvalidParameter);
        }
        let mut new = 0;
        for (filter, _) in filters {
            topic::validate_filter(filter)?;
            if self.position(filter).is_none() {
                new += 1;
            }
        }
        if self.entries.len() + new > N {
            return Err(Error::OutOfMemory);
        }

        for (index, (filter, qos)) in filters.iter().enumerate() {
            let state = SubscriptionState::Pending {
                id,
                index: index as u8,
            };
            match self.position(filter) {
                Some(at) => {
                    let entry = &mut self.entries[at];
                    entry.requested = *qos;
                    entry.state = state;
                    entry.callback = callback;
                }
                None => {
                    let filter = String::try_from(*filter).map_err(|_| Error::InvalidParameter)?;
                    let entry = SubscriptionEntry {
                        filter,
                        requested: *qos,
                        state,
                        callback,
                    };
                    self.entries.push(entry).map_err(|_| Error::OutOfMemory)?;
                }
            }
        }
        Ok(())
    }

    fn position(&self, filter: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.filter == filter)
    }

    /// Drops the pending entries of a request whose frame was never sent.
    pub fn cancel_pending(&mut self, id: MessageId) {
        self.entries
            .retain(|e| !matches!(e.state, SubscriptionState::Pending { id: pending, .. } if pending == id));
    }

    /// Applies a SUBACK.
    ///
    /// Each pending entry of request `id` takes the code at its request
    /// position: granted entries become active, rejected or unanswered ones
    /// are removed.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMessageId`] if no entry waits for `id`.
    pub fn on_suback(&mut self, id: MessageId, codes: &[u8]) -> Result<Vec<SubackOutcome<C>, N>> {
        let mut outcomes = Vec::new();
        for entry in self.entries.iter_mut() {
            let SubscriptionState::Pending { id: pending, index } = entry.state else {
                continue;
            };
            if pending != id {
                continue;
            }
            let result = match codes.get(usize::from(index)) {
                Some(&SUBACK_FAILURE) => Err(Error::SubscriptionFailed),
                Some(&code) => QoS::try_from(code),
                None => Err(Error::MalformedPacket),
            };
            match result {
                Ok(granted) => {
                    info!("subscribed to {} at {:?}", entry.filter.as_str(), granted);
                    entry.state = SubscriptionState::Active(granted);
                }
                Err(e) => warn!("subscription to {} refused: {:?}", entry.filter.as_str(), e),
            }
            let _ = outcomes.push(SubackOutcome {
                filter: entry.filter.clone(),
                callback: entry.callback,
                result,
            });
        }
        if outcomes.is_empty() {
            return Err(Error::UnknownMessageId);
        }
        self.entries
            .retain(|e| !matches!(e.state, SubscriptionState::Pending { id: pending, .. } if pending == id));
        Ok(outcomes)
    }

    /// Removes a filter so that no further messages reach its handler.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] if the filter is not registered.
    pub fn remove(&mut self, filter: &str) -> Result<()> {
        let at = self.position(filter).ok_or(Error::InvalidParameter)?;
        self.entries.remove(at);
        Ok(())
    }

    /// `true` if the filter is registered, pending or active.
    pub fn contains(&self, filter: &str) -> bool {
        self.position(filter).is_some()
    }

    /// Keeps `id` out of circulation until its UNSUBACK arrives.
    pub fn reserve_unsubscribe(&mut self, id: MessageId) {
        if self.unsubscribing.push(id).is_err() {
            warn!("unsubscribe id {} not reserved", id);
        }
    }

    /// Releases an UNSUBSCRIBE id. Returns `false` for an unknown id.
    pub fn on_unsuback(&mut self, id: MessageId) -> bool {
        match self.unsubscribing.iter().position(|&u| u == id) {
            Some(at) => {
                self.unsubscribing.swap_remove(at);
                true
            }
            None => false,
        }
    }

    /// `true` while a SUBSCRIBE or UNSUBSCRIBE with this id is unanswered.
    pub fn is_reserved(&self, id: MessageId) -> bool {
        self.unsubscribing.contains(&id)
            || self
                .entries
                .iter()
                .any(|e| matches!(e.state, SubscriptionState::Pending { id: pending, .. } if pending == id))
    }

    /// Handlers of every active filter matching `topic`, in registration
    /// order. A handler registered under two matching filters appears twice.
    pub fn matching(&self, topic: &str) -> Vec<C, N> {
        let mut handlers = Vec::new();
        for entry in &self.entries {
            if matches!(entry.state, SubscriptionState::Active(_)) && topic::matches(&entry.filter, topic) {
                let _ = handlers.push(entry.callback);
            }
        }
        handlers
    }

    /// Empties the registry. Entries still waiting for SUBACK are returned
    /// with `error`.
    pub fn clear(&mut self, error: Error) -> Vec<SubackOutcome<C>, N> {
        let mut lost = Vec::new();
        for entry in &self.entries {
            if matches!(entry.state, SubscriptionState::Pending { .. }) {
                let _ = lost.push(SubackOutcome {
                    filter: entry.filter.clone(),
                    callback: entry.callback,
                    result: Err(error),
                });
            }
        }
        self.entries.clear();
        self.unsubscribing.clear();
        lost
    }

    /// Entry for `filter`.
    pub fn get(&self, filter: &str) -> Option<&SubscriptionEntry<C>> {
        self.entries.iter().find(|e| e.filter == filter)
    }

    /// Registered filters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no filter is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
