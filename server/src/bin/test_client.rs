//! Minimal client for poking a running server by hand.
//!
//! Logs in, keeps the connection alive with acks and pongs, says hello in
//! public chat and prints every packet it receives until the time runs out.

use bincode::{deserialize, serialize};
use clap::Parser;
use shared::{ClientPacket, ServerPacket, PROTOCOL_VERSION};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, Duration};

#[derive(Parser, Debug)]
#[clap(about = "Logs in to a dogfight server and prints what comes back")]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:3501")]
    server: SocketAddr,
    /// Player name
    #[clap(short, long, default_value = "tester")]
    name: String,
    /// Seconds to stay connected
    #[clap(short, long, default_value = "10")]
    duration: u64,
}

async fn send(socket: &UdpSocket, server: SocketAddr, packet: &ClientPacket) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&serialize(packet)?, server).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    send(
        &socket,
        args.server,
        &ClientPacket::Login {
            protocol: PROTOCOL_VERSION,
            name: args.name.clone(),
            flag: "XX".to_string(),
            horizon_x: 1000.0,
            horizon_y: 600.0,
        },
    )
    .await?;

    let mut buf = [0u8; 4096];
    let mut acks = interval(Duration::from_secs(2));
    let deadline = sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let mut greeted = false;

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, _) = received?;
                let packet = match deserialize::<ServerPacket>(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        println!("Failed to decode packet: {}", e);
                        continue;
                    }
                };
                println!("<- {:?}", packet);

                match packet {
                    ServerPacket::Ping { num, .. } => {
                        send(&socket, args.server, &ClientPacket::Pong { num }).await?;
                    }
                    ServerPacket::LoginOk { id, .. } if !greeted => {
                        greeted = true;
                        println!("Logged in as player {}", id);
                        send(&socket, args.server, &ClientPacket::Chat { text: "hello".to_string() }).await?;
                    }
                    ServerPacket::Error { kind } => println!("Server error: {:?}", kind),
                    _ => {}
                }
            }
            _ = acks.tick() => {
                send(&socket, args.server, &ClientPacket::Ack).await?;
            }
            _ = &mut deadline => break,
        }
    }

    send(&socket, args.server, &ClientPacket::Close).await?;
    println!("Test client finished");
    Ok(())
}
