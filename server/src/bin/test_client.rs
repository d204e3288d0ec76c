//! Minimal player that exercises a running relay from the command line

use clap::Parser;
use log::{info, warn};
use serde_json::json;
use shared::{decode_server, encode, ClientPacket, ServerPacket, DEFAULT_PORT, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Number of steps to send input for
    #[arg(short = 'n', long, default_value = "10")]
    steps: u64,

    /// Milliseconds between steps
    #[arg(short = 'i', long, default_value = "100")]
    interval_ms: u64,
}

async fn send(
    socket: &UdpSocket,
    packet: &ClientPacket,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&encode(packet)?, addr).await?;
    Ok(())
}

/// Reads everything the relay sends until `wait` passes without a datagram,
/// acknowledging every sequenced packet.
async fn drain(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    wait: Duration,
) -> Result<Vec<ServerPacket>, Box<dyn std::error::Error>> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut received = Vec::new();

    while let Ok(result) = timeout(wait, socket.recv_from(&mut buf)).await {
        let (len, _) = result?;
        let packet = match decode_server(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Ignoring datagram: {}", e);
                continue;
            }
        };

        if let Some(seq) = packet.seq() {
            send(socket, &ClientPacket::Ack { ack: seq, seq: None }, server_addr).await?;
        }
        received.push(packet);
    }

    Ok(received)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let server_addr: SocketAddr = args.server.parse()?;
    info!("Client socket bound to {}", socket.local_addr()?);

    let mut seq = 0;
    send(&socket, &ClientPacket::Connect { seq }, server_addr).await?;
    seq += 1;

    let wait = Duration::from_millis(args.interval_ms);
    let mut player = None;
    for packet in drain(&socket, server_addr, Duration::from_secs(2)).await? {
        if let ServerPacket::ConnectionAck {
            player: id,
            players,
            ..
        } = packet
        {
            info!("Connected as player {} ({} players)", id, players);
            player = Some(id);
        }
    }
    let Some(player) = player else {
        return Err("no connection acknowledgement from relay".into());
    };

    for step in 0..args.steps {
        let data = json!({ "player": player, "step": step });
        send(&socket, &ClientPacket::Data { data, step, seq }, server_addr).await?;
        seq += 1;

        for packet in drain(&socket, server_addr, wait).await? {
            match packet {
                ServerPacket::Broadcast {
                    step, player, data, ..
                } => info!("Step {} from player {}: {}", step, player, data),
                ServerPacket::Join { player, players, .. } => {
                    info!("Player {} joined ({} players)", player, players)
                }
                other => info!("Received {:?}", other),
            }
        }
        sleep(wait).await;
    }

    send(&socket, &ClientPacket::Disconnect, server_addr).await?;
    info!("Test client finished");

    Ok(())
}
