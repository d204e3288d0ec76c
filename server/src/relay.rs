//! Packet routing and fan-out for the relay
//!
//! [`Relay`] owns every piece of relay state and is driven by exactly two
//! inputs: a decoded packet with its source address, and a retry tick. Both
//! return the datagrams to put on the wire, leaving socket I/O to the caller.
//! Because nothing else holds the state, processing of one input can never
//! interleave with another.

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::registry::{Connection, ConnectionRegistry};
use crate::reliability::{PendingAckTable, SequenceAllocator};
use crate::steps::StepAggregator;
use log::{debug, info, warn};
use serde_json::Value;
use shared::{ClientPacket, PlayerId, Sequence, ServerPacket, StepIndex};
use std::net::SocketAddr;
use std::time::Duration;

/// A packet ready to be sent to a player
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub player: PlayerId,
    pub addr: SocketAddr,
    pub packet: ServerPacket,
}

/// Relay state aggregate
pub struct Relay {
    connections: ConnectionRegistry,
    sequences: SequenceAllocator,
    pending: PendingAckTable,
    steps: StepAggregator,
}

impl Relay {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            sequences: SequenceAllocator::new(),
            pending: PendingAckTable::new(config.resend_threshold),
            steps: StepAggregator::new(config.step_history),
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn pending(&self) -> &PendingAckTable {
        &self.pending
    }

    pub fn steps(&self) -> &StepAggregator {
        &self.steps
    }

    pub fn sequences(&self) -> &SequenceAllocator {
        &self.sequences
    }

    /// Dispatches an inbound packet to its handler
    ///
    /// Connect is the only kind accepted from an unregistered address; every
    /// other kind except disconnect fails with [`RelayError::UnknownSender`]
    /// before any state is touched.
    pub fn handle_packet(
        &mut self,
        packet: ClientPacket,
        addr: SocketAddr,
    ) -> Result<Vec<Outgoing>> {
        let mut out = Vec::new();

        match packet {
            ClientPacket::Connect { seq } => {
                self.handle_connect(seq, addr, &mut out);
            }
            ClientPacket::Disconnect => {
                debug!("Disconnect from {} ignored", addr);
            }
            ClientPacket::GameStart { seq } => {
                let player = self.sender(addr)?;
                self.handle_game_start(player, seq, &mut out);
            }
            ClientPacket::Data { data, step, seq } => {
                let player = self.sender(addr)?;
                self.handle_data(player, step, data, seq, &mut out);
            }
            ClientPacket::Ack { ack, seq } => {
                let player = self.sender(addr)?;
                self.handle_ack(player, addr, ack, seq, &mut out);
            }
        }

        Ok(out)
    }

    /// Advances the retry clock and returns the packets to resend
    ///
    /// Destinations are resolved at resend time, not at original send time.
    pub fn tick(&mut self, elapsed: Duration) -> Vec<Outgoing> {
        self.pending
            .tick(elapsed)
            .into_iter()
            .filter_map(|retransmit| match self.connections.resolve(retransmit.player) {
                Ok(connection) => {
                    debug!(
                        "Resending seq {} to player {}",
                        retransmit.seq, retransmit.player
                    );
                    Some(Outgoing {
                        player: connection.player,
                        addr: connection.addr,
                        packet: retransmit.packet,
                    })
                }
                Err(e) => {
                    warn!("Cannot resend seq {}: {}", retransmit.seq, e);
                    None
                }
            })
            .collect()
    }

    fn sender(&self, addr: SocketAddr) -> Result<PlayerId> {
        self.connections
            .lookup(addr)
            .ok_or(RelayError::UnknownSender(addr))
    }

    fn handle_connect(&mut self, seq: Sequence, addr: SocketAddr, out: &mut Vec<Outgoing>) {
        let (player, created) = self.connections.register(addr);
        let players = self.connections.len() as u32;

        out.push(Outgoing {
            player,
            addr,
            packet: ServerPacket::ConnectionAck {
                ack: seq,
                players,
                player,
                seq: None,
            },
        });

        if created {
            info!("Player {} joined ({} players)", player, players);
        } else {
            debug!("Player {} reconnected from {}", player, addr);
        }

        let others = self.connections.others(player);
        self.broadcast(&others, out, |seq, _| ServerPacket::Join {
            player,
            players,
            seq,
        });
    }

    fn handle_game_start(&mut self, requester: PlayerId, seq: Sequence, out: &mut Vec<Outgoing>) {
        info!("Player {} started the game", requester);

        let everyone = self.connections.connections();
        self.broadcast(&everyone, out, |stamped, recipient| ServerPacket::GameStart {
            seq: stamped,
            ack: (recipient == requester).then_some(seq),
        });
    }

    fn handle_data(
        &mut self,
        player: PlayerId,
        step: StepIndex,
        data: Value,
        seq: Sequence,
        out: &mut Vec<Outgoing>,
    ) {
        let received = self.steps.record(step, player, data.clone());
        debug!(
            "Step {} input from player {} ({} received)",
            step, player, received
        );

        let everyone = self.connections.connections();
        self.broadcast(&everyone, out, |stamped, recipient| ServerPacket::Broadcast {
            step,
            data: data.clone(),
            player,
            seq: stamped,
            ack: (recipient == player).then_some(seq),
        });
    }

    fn handle_ack(
        &mut self,
        player: PlayerId,
        addr: SocketAddr,
        ack: Sequence,
        seq: Option<Sequence>,
        out: &mut Vec<Outgoing>,
    ) {
        if self.pending.acknowledge(ack).is_none() {
            debug!("Duplicate or unknown ack {} from player {}", ack, player);
        }

        if let Some(seq) = seq {
            out.push(Outgoing {
                player,
                addr,
                packet: ServerPacket::Ack { ack: seq, seq: None },
            });
        }
    }

    /// Sends one copy of a packet to each recipient
    ///
    /// Every copy gets its own sequence number and its own pending entry, so
    /// each recipient acknowledges independently.
    fn broadcast<F>(&mut self, recipients: &[Connection], out: &mut Vec<Outgoing>, build: F)
    where
        F: Fn(Sequence, PlayerId) -> ServerPacket,
    {
        for recipient in recipients {
            let seq = self.sequences.next();
            let packet = build(seq, recipient.player);

            self.pending.track(seq, packet.clone(), recipient.player);
            out.push(Outgoing {
                player: recipient.player,
                addr: recipient.addr,
                packet,
            });
        }
    }
}
