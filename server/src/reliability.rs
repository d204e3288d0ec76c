//! Sequencing and acknowledgement tracking for outbound packets
//!
//! Every packet that demands an acknowledgement is stamped with a sequence
//! number from the process-wide [`SequenceAllocator`] and tracked in the
//! [`PendingAckTable`] until the recipient acknowledges it. Unacknowledged
//! packets are handed back for retransmission each time their deadline
//! passes, with no retry limit and no backoff.

use log::debug;
use shared::{PlayerId, Sequence, ServerPacket};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Global counter for outbound sequence numbers
///
/// One number is consumed per packet per destination, so ordering is global
/// send order rather than per-link order.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    next: Sequence,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current counter value and advances it
    pub fn next(&mut self) -> Sequence {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// Value the next call to [`SequenceAllocator::next`] will return
    pub fn peek(&self) -> Sequence {
        self.next
    }
}

/// A sent packet waiting for its acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAck {
    pub seq: Sequence,
    /// Exact packet to resend, sequence number included
    pub packet: ServerPacket,
    /// Player the packet was addressed to
    pub player: PlayerId,
    /// Table clock value at which the packet is due again
    deadline: Duration,
}

/// A packet whose deadline passed during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct Retransmit {
    pub seq: Sequence,
    pub player: PlayerId,
    pub packet: ServerPacket,
}

/// Retry engine keyed by sequence number
///
/// Entries carry absolute deadlines on the table's own clock, which advances
/// only through [`PendingAckTable::tick`]. The deadline index is ordered, so a
/// tick touches only the entries that are actually due.
#[derive(Debug)]
pub struct PendingAckTable {
    resend_threshold: Duration,
    clock: Duration,
    entries: HashMap<Sequence, PendingAck>,
    schedule: BTreeSet<(Duration, Sequence)>,
}

impl PendingAckTable {
    pub fn new(resend_threshold: Duration) -> Self {
        Self {
            resend_threshold,
            clock: Duration::ZERO,
            entries: HashMap::new(),
            schedule: BTreeSet::new(),
        }
    }

    pub fn resend_threshold(&self) -> Duration {
        self.resend_threshold
    }

    /// Starts tracking a sent packet
    ///
    /// The packet becomes due one resend threshold from now. Tracking a
    /// sequence number that is already pending replaces the old entry.
    pub fn track(&mut self, seq: Sequence, packet: ServerPacket, player: PlayerId) {
        let deadline = self.clock + self.resend_threshold;
        if let Some(previous) = self.entries.insert(
            seq,
            PendingAck {
                seq,
                packet,
                player,
                deadline,
            },
        ) {
            self.schedule.remove(&(previous.deadline, seq));
        }
        self.schedule.insert((deadline, seq));
    }

    /// Stops tracking a sequence number, returning the entry if it was pending
    pub fn acknowledge(&mut self, seq: Sequence) -> Option<PendingAck> {
        let entry = self.entries.remove(&seq)?;
        self.schedule.remove(&(entry.deadline, seq));
        Some(entry)
    }

    /// Player a pending sequence number was sent to
    pub fn destination(&self, seq: Sequence) -> Option<PlayerId> {
        self.entries.get(&seq).map(|entry| entry.player)
    }

    pub fn get(&self, seq: Sequence) -> Option<&PendingAck> {
        self.entries.get(&seq)
    }

    pub fn contains(&self, seq: Sequence) -> bool {
        self.entries.contains_key(&seq)
    }

    /// Advances the clock and returns every packet whose deadline has passed
    ///
    /// Each returned entry is rescheduled one resend threshold after the new
    /// clock value, so it keeps coming back until it is acknowledged.
    pub fn tick(&mut self, elapsed: Duration) -> Vec<Retransmit> {
        self.clock += elapsed;

        let due: Vec<(Duration, Sequence)> = self
            .schedule
            .range(..=(self.clock, Sequence::MAX))
            .copied()
            .collect();

        let next_deadline = self.clock + self.resend_threshold;
        let mut retransmits = Vec::with_capacity(due.len());

        for key in due {
            self.schedule.remove(&key);
            let (_, seq) = key;

            if let Some(entry) = self.entries.get_mut(&seq) {
                entry.deadline = next_deadline;
                self.schedule.insert((next_deadline, seq));
                retransmits.push(Retransmit {
                    seq,
                    player: entry.player,
                    packet: entry.packet.clone(),
                });
            }
        }

        if !retransmits.is_empty() {
            debug!(
                "{} packet(s) due for retransmission, {} pending",
                retransmits.len(),
                self.entries.len()
            );
        }

        retransmits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
