//! Player admission and address bookkeeping for the relay
//!
//! This module owns the mapping between network endpoints and player ids:
//! - Player id assignment on the first connect from an address
//! - Sender resolution for every non-connect packet
//! - Destination lookup for broadcasts and retransmissions
//!
//! Connections are never removed. A player id stays bound to the address that
//! first claimed it for the lifetime of the process.

use crate::error::{RelayError, Result};
use log::info;
use shared::PlayerId;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// A registered player and the endpoint its packets come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    /// Player identifier assigned by the relay
    pub player: PlayerId,
    /// Address and port used for every send to this player
    pub addr: SocketAddr,
}

/// Registry of admitted players
///
/// Keeps both directions of the address/player mapping so sender resolution
/// and destination lookup are each a single map access. Connections are kept
/// ordered by player id, which makes broadcast fan-out order deterministic.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Registered connections indexed by player id
    connections: BTreeMap<PlayerId, Connection>,
    /// Reverse index used to identify the sender of a datagram
    players_by_addr: HashMap<SocketAddr, PlayerId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an address, or returns the player already bound to it
    ///
    /// The returned flag is true when this call created the connection. New
    /// players receive the lowest id not currently in use.
    pub fn register(&mut self, addr: SocketAddr) -> (PlayerId, bool) {
        if let Some(&player) = self.players_by_addr.get(&addr) {
            return (player, false);
        }

        let player = self.free_player_id();
        self.connections.insert(player, Connection { player, addr });
        self.players_by_addr.insert(addr, player);
        info!("Player {} registered from {}", player, addr);

        (player, true)
    }

    /// Finds the player bound to an address
    pub fn lookup(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.players_by_addr.get(&addr).copied()
    }

    /// Returns the connection for a player id
    pub fn resolve(&self, player: PlayerId) -> Result<Connection> {
        self.connections
            .get(&player)
            .copied()
            .ok_or(RelayError::UnknownPlayer(player))
    }

    /// All connections in player id order
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.values().copied().collect()
    }

    /// All connections except the given player, in player id order
    pub fn others(&self, player: PlayerId) -> Vec<Connection> {
        self.connections
            .values()
            .filter(|connection| connection.player != player)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    // Linear scan from zero so ids freed by a future removal get reused first.
    fn free_player_id(&self) -> PlayerId {
        let mut candidate: PlayerId = 0;
        while self.connections.contains_key(&candidate) {
            candidate += 1;
        }
        candidate
    }
}
