//! Server network layer handling UDP communications and the relay event loop

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::relay::{Outgoing, Relay};
use log::{debug, error, info, warn};
use shared::{decode_client, encode, ClientPacket, ProtocolError, ServerPacket, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to the main relay loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: ClientPacket,
        addr: SocketAddr,
    },
    Shutdown,
}

/// UDP relay server
///
/// The socket is read and written by dedicated tasks. All relay state lives
/// in [`Relay`] and is only touched by [`Server::run`], which handles inbound
/// packets and retry ticks one at a time.
pub struct Server {
    socket: Arc<UdpSocket>,
    relay: Relay,
    retry_tick: Duration,
    tasks: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<Outgoing>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Outgoing>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let addr = config.bind_addr();
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket: Arc::new(socket),
            relay: Relay::new(&config),
            retry_tick: config.retry_tick,
            tasks: Vec::new(),
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    /// Address the socket is actually bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Channel that can stop a running server with [`ServerMessage::Shutdown`]
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode_client(&buffer[..len]) {
                        Ok(packet) => {
                            debug!("Received {} from {}", packet.flag(), addr);
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(ProtocolError::UnknownKind(flag)) => {
                            debug!("Dropping unknown packet kind `{}` from {}", flag, addr);
                        }
                        Err(e) => {
                            warn!("Dropping datagram from {}: {}", addr, e);
                        }
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let Some(outbound_rx) = self.outbound_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);

        self.tasks
            .push(tokio::spawn(Self::forward_outbound(socket, outbound_rx)));
    }

    /// Drains the outgoing queue onto the socket until every sender is gone
    ///
    /// A failed send is logged and the loop moves on to the next packet.
    async fn forward_outbound(
        socket: Arc<UdpSocket>,
        mut outbound_rx: mpsc::UnboundedReceiver<Outgoing>,
    ) {
        while let Some(outgoing) = outbound_rx.recv().await {
            let Outgoing {
                player,
                addr,
                packet,
            } = outgoing;
            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                error!("Player {}: {}", player, e);
            }
        }
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &ServerPacket,
        addr: SocketAddr,
    ) -> Result<()> {
        let data = encode(packet)?;
        socket
            .send_to(&data, addr)
            .await
            .map_err(|source| RelayError::Send { addr, source })?;
        Ok(())
    }

    /// Queues packets for the sender task without waiting on the socket
    fn dispatch(&self, outgoing: Vec<Outgoing>) {
        for packet in outgoing {
            if let Err(e) = self.outbound_tx.send(packet) {
                error!("Failed to queue packet for sending: {}", e);
            }
        }
    }

    fn handle_packet(&mut self, packet: ClientPacket, addr: SocketAddr) {
        let flag = packet.flag();
        match self.relay.handle_packet(packet, addr) {
            Ok(outgoing) => self.dispatch(outgoing),
            Err(e) => warn!("Dropping {} packet: {}", flag, e),
        }
    }

    /// Main relay loop interleaving inbound packets and retry ticks
    pub async fn run(&mut self) -> Result<()> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut retry_interval = interval(self.retry_tick);
        retry_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = retry_interval.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_tick);
                    last_tick = now;

                    let resends = self.relay.tick(elapsed);
                    self.dispatch(resends);
                },
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::decode_server;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_test::assert_ok;

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_server_message_creation() {
        let packet = ClientPacket::Connect { seq: 1 };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = ServerMessage::PacketReceived {
            packet: packet.clone(),
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(p, packet);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = assert_ok!(Server::new(local_config()).await);
        let addr = assert_ok!(server.local_addr());

        assert_ne!(addr.port(), 0);
        assert!(server.relay().connections().is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let first = Server::new(local_config()).await.unwrap();
        let taken = first.local_addr().unwrap();

        let result = Server::new(ServerConfig {
            port: taken.port(),
            ..local_config()
        })
        .await;

        assert!(matches!(result, Err(RelayError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_bind() {
        let result = Server::new(ServerConfig {
            retry_tick: Duration::ZERO,
            ..local_config()
        })
        .await;

        assert!(matches!(result, Err(RelayError::Config { .. })));
    }

    #[tokio::test]
    async fn test_send_packet_impl_writes_json() {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = ServerPacket::Ack { ack: 12, seq: None };

        Server::send_packet_impl(&sender, &packet, receiver.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 512];
        let (len, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, sender.local_addr().unwrap());
        assert_eq!(decode_server(&buf[..len]).unwrap(), packet);
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_sender() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        // Neither destination is reachable from an IPv4 socket bound to loopback
        let unreachable: [SocketAddr; 2] = [
            "0.0.0.0:0".parse().unwrap(),
            "[::1]:9".parse().unwrap(),
        ];
        for addr in unreachable {
            tx.send(Outgoing {
                player: 0,
                addr,
                packet: ServerPacket::Ack { ack: 1, seq: None },
            })
            .unwrap();
        }
        let delivered = ServerPacket::Ack { ack: 2, seq: None };
        tx.send(Outgoing {
            player: 1,
            addr: receiver.local_addr().unwrap(),
            packet: delivered.clone(),
        })
        .unwrap();
        drop(tx);

        assert_ok!(
            tokio::time::timeout(
                Duration::from_secs(1),
                Server::forward_outbound(socket, rx)
            )
            .await
        );

        let mut buf = [0u8; 512];
        let (len, _) = assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), receiver.recv_from(&mut buf)).await
        )
        .unwrap();
        assert_eq!(decode_server(&buf[..len]).unwrap(), delivered);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut server = Server::new(local_config()).await.unwrap();
        let control = server.control();

        control.send(ServerMessage::Shutdown).unwrap();
        let result = assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), server.run()).await
        );

        assert_ok!(result);
    }
}
