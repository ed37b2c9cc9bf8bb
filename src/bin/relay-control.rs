//! relay-control - CLI control utility for the speech-relay daemon
//!
//! Sends single chat events to the daemon's event gateway, or probes the
//! configured synthesis endpoints directly.

use clap::{Parser, Subcommand};
use serde_json::json;
use speech_relay::config_loader::Settings;
use speech_relay::router::EndpointRouter;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// CLI control utility for the speech-relay daemon
#[derive(Parser)]
#[command(name = "relay-control")]
#[command(author = "StarTuz")]
#[command(version)]
#[command(about = "Control utility for the speech-relay daemon", long_about = None)]
struct Cli {
    /// Gateway address (defaults to the configured gateway)
    #[arg(long)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Who is acting, and where.
#[derive(clap::Args)]
struct Actor {
    /// Guild ID
    #[arg(long)]
    guild: u64,
    /// Text channel ID
    #[arg(long)]
    text_channel: u64,
    /// User ID
    #[arg(long, default_value = "1")]
    user: u64,
    /// Display name of the user
    #[arg(long, default_value = "relay-control")]
    name: String,
    /// Voice channel the user is in
    #[arg(long)]
    voice_channel: Option<u64>,
}

impl Actor {
    fn member(&self) -> serde_json::Value {
        json!({
            "id": self.user,
            "display_name": self.name,
            "voice_channel": self.voice_channel,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start reading a text channel into the user's voice channel
    Join(Actor),

    /// Stop reading and leave the user's voice channel
    Leave(Actor),

    /// Post a message as the user
    Say {
        #[command(flatten)]
        actor: Actor,
        /// Message text
        text: String,
        /// Message ID (defaults to the current time)
        #[arg(long)]
        id: Option<u64>,
    },

    /// Report a voice channel change for a user
    Voice {
        /// Guild ID
        #[arg(long)]
        guild: u64,
        /// User ID
        #[arg(long, default_value = "1")]
        user: u64,
        /// Display name of the user
        #[arg(long, default_value = "relay-control")]
        name: String,
        /// Channel the user left
        #[arg(long)]
        from: Option<u64>,
        /// Channel the user joined
        #[arg(long)]
        to: Option<u64>,
        /// Non-bot members left in the channel the user left
        #[arg(long)]
        remaining: Option<usize>,
    },

    /// Probe every configured synthesis endpoint
    Probe,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::new()?;
    let addr = cli.addr.clone().unwrap_or_else(|| settings.gateway_addr());

    let event = match cli.command {
        Commands::Join(actor) => command_event("join", &actor),
        Commands::Leave(actor) => command_event("leave", &actor),
        Commands::Say { actor, text, id } => {
            let id = id.unwrap_or_else(|| chrono::Utc::now().timestamp_millis() as u64);
            json!({
                "type": "message",
                "id": id,
                "guild_id": actor.guild,
                "channel_id": actor.text_channel,
                "author": actor.member(),
                "content": text,
            })
        }
        Commands::Voice {
            guild,
            user,
            name,
            from,
            to,
            remaining,
        } => json!({
            "type": "voice_state",
            "guild_id": guild,
            "member": { "id": user, "display_name": name, "voice_channel": to },
            "previous_channel": from,
            "new_channel": to,
            "humans_remaining": remaining,
        }),
        Commands::Probe => {
            probe(&settings).await?;
            return Ok(());
        }
    };

    let reply = send_event(&addr, &event.to_string()).await?;
    println!("{}", reply);
    Ok(())
}

fn command_event(command: &str, actor: &Actor) -> serde_json::Value {
    json!({
        "type": "command",
        "command": command,
        "guild_id": actor.guild,
        "channel_id": actor.text_channel,
        "user": actor.member(),
    })
}

async fn send_event(addr: &str, line: &str) -> std::io::Result<String> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut greeting = String::new();
    reader.read_line(&mut greeting).await?;

    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut reply = String::new();
    reader.read_line(&mut reply).await?;
    writer.write_all(b"QUIT\n").await?;
    Ok(reply.trim_end().to_string())
}

async fn probe(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let router = EndpointRouter::http(settings.endpoints.clone(), settings.probe_timeout())?;

    for _ in 0..router.len() {
        router.select_endpoint().await;
    }

    for endpoint in router.snapshot() {
        let status = if endpoint.consecutive_errors == 0 {
            "healthy"
        } else {
            "unreachable"
        };
        println!(
            "{:<40} {:<12} errors={}",
            endpoint.address, status, endpoint.consecutive_errors
        );
    }
    match router.last_healthy() {
        Some(address) => println!("Last healthy: {}", address),
        None => println!("No healthy endpoint"),
    }
    Ok(())
}
