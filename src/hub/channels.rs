//! Channel numbers to live worker ids, and back.

use std::collections::HashMap;

/// Bidirectional map between channels and the worker currently serving each.
///
/// The two directions are exact inverses after every call.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    by_channel: HashMap<u32, u32>,
    by_worker: HashMap<u32, u32>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `worker` on `channel`. Whatever served the channel before is
    /// unlinked first, and `worker` leaves any channel it held. Returns the
    /// replaced worker.
    pub fn bind(&mut self, channel: u32, worker: u32) -> Option<u32> {
        let previous = self.by_channel.remove(&channel);
        if let Some(old) = previous {
            self.by_worker.remove(&old);
        }
        if let Some(old_channel) = self.by_worker.remove(&worker) {
            self.by_channel.remove(&old_channel);
        }

        self.by_channel.insert(channel, worker);
        self.by_worker.insert(worker, channel);
        previous
    }

    /// Remove a worker. Returns the channel it served.
    pub fn unbind_worker(&mut self, worker: u32) -> Option<u32> {
        let channel = self.by_worker.remove(&worker)?;
        self.by_channel.remove(&channel);
        Some(channel)
    }

    pub fn worker_on(&self, channel: u32) -> Option<u32> {
        self.by_channel.get(&channel).copied()
    }

    pub fn channel_of(&self, worker: u32) -> Option<u32> {
        self.by_worker.get(&worker).copied()
    }

    pub fn len(&self) -> usize {
        self.by_channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_channel.is_empty()
    }

    /// `(channel, worker)` pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.by_channel.iter().map(|(c, w)| (*c, *w))
    }

    pub fn is_consistent(&self) -> bool {
        self.by_channel.len() == self.by_worker.len()
            && self
                .by_channel
                .iter()
                .all(|(c, w)| self.by_worker.get(w) == Some(c))
    }
}
