use anyhow::{bail, Context};
use castle_shared::{framing, Message};
use clap::Parser;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[clap(about = "Walks through a short session against a running castle server")]
struct Args {
    /// Server address
    #[clap(default_value = "127.0.0.1:12345")]
    addr: String,

    /// Player name sent with Connect
    #[clap(short, long, default_value = "TestPlayer")]
    name: String,
}

// Get current timestamp in milliseconds
fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

async fn send(stream: &mut TcpStream, message: Message) -> anyhow::Result<()> {
    println!("-> {:?}", message);
    framing::write_frame(stream, &message)
        .await
        .context("failed to send message")
}

/// Waits for the next reply, or returns None if the server stays quiet.
async fn receive(stream: &mut TcpStream) -> anyhow::Result<Option<Message>> {
    match timeout(
        Duration::from_secs(2),
        framing::read_frame(stream, framing::MAX_FRAME_LEN),
    )
    .await
    {
        Ok(Ok(Some(message))) => {
            println!("<- {:?}", message);
            Ok(Some(message))
        }
        Ok(Ok(None)) => bail!("server closed the connection"),
        Ok(Err(e)) => Err(e).context("failed to read reply"),
        Err(_) => {
            println!("   (no reply)");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!("Connecting to {}", args.addr);
    let mut stream = TcpStream::connect(&args.addr)
        .await
        .with_context(|| format!("could not connect to {}", args.addr))?;

    send(&mut stream, Message::Connect { name: args.name }).await?;
    match receive(&mut stream).await? {
        Some(Message::ConnectResponse { player_id }) => {
            println!("Connected as player {}", player_id)
        }
        Some(other) => bail!("unexpected reply to Connect: {:?}", other),
        None => bail!("no reply to Connect"),
    }

    send(
        &mut stream,
        Message::Heartbeat {
            timestamp: get_timestamp(),
        },
    )
    .await?;
    receive(&mut stream).await?;

    send(&mut stream, Message::UpgradeListRequest).await?;
    receive(&mut stream).await?;

    send(
        &mut stream,
        Message::RequestUpgrade {
            name: "weapon".to_string(),
        },
    )
    .await?;
    if let Some(Message::UpgradeResponse { success: true, .. }) = receive(&mut stream).await? {
        // Balances follow a successful purchase
        receive(&mut stream).await?;
    }

    send(
        &mut stream,
        Message::Chat {
            team_only: false,
            text: "Hello from the test client".to_string(),
        },
    )
    .await?;
    receive(&mut stream).await?;

    send(&mut stream, Message::Disconnect).await?;
    println!("Done");
    Ok(())
}
