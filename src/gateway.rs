//! Line-oriented TCP gateway that feeds chat events into the relay.
//!
//! Whatever bridges the chat platform connects here and writes one JSON
//! [`ChatEvent`] per line. Every line gets exactly one status line back:
//!
//! ```text
//! 299 speech-relay ready          greeting
//! 200 OK                          message / voice state accepted
//! 210 <reply>                     command succeeded
//! 410 <reply>                     command refused
//! 400 <error>                     line did not parse
//! 451 <error>                     event could not be queued
//! 231 BYE                         after QUIT
//! ```
//!
//! Commands are handled inline, so their replies come back in order.
//! Messages and voice-state updates are acknowledged with `200 OK` as soon as
//! they parse and then handed to a per-connection worker, which processes
//! them in arrival order without holding up the next line.

use crate::chat::ChatEvent;
use crate::relay::{EventOutcome, RelayController};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub async fn start_server(addr: &str, controller: Arc<RelayController>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Event gateway listening on {}", addr);
    serve(listener, controller).await;
    Ok(())
}

pub async fn serve(listener: TcpListener, controller: Arc<RelayController>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!(%peer, "Gateway connection");
                let controller = controller.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, controller).await {
                        warn!(%peer, "Gateway connection error: {}", e);
                    }
                });
            }
            Err(e) => error!("Gateway accept error: {}", e),
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    controller: Arc<RelayController>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Dropping the sender on return lets the worker finish what is queued.
    let (events, mut pending) = mpsc::unbounded_channel::<ChatEvent>();
    let worker = controller.clone();
    tokio::spawn(async move {
        while let Some(event) = pending.recv().await {
            worker.handle_event(event).await;
        }
    });

    writer.write_all(b"299 speech-relay ready\r\n").await?;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("QUIT") {
            writer.write_all(b"231 BYE\r\n").await?;
            return Ok(());
        }

        let status = match serde_json::from_str::<ChatEvent>(trimmed) {
            Ok(event @ ChatEvent::Command(_)) => match controller.handle_event(event).await {
                EventOutcome::Handled => "200 OK".to_string(),
                EventOutcome::Reply(text) => format!("210 {}", text),
                EventOutcome::Rejected(text) => format!("410 {}", text),
            },
            Ok(event) => match events.send(event) {
                Ok(()) => "200 OK".to_string(),
                Err(_) => {
                    error!("Gateway event worker is gone");
                    "451 event worker unavailable".to_string()
                }
            },
            Err(e) => format!("400 {}", e),
        };

        writer.write_all(status.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
    }
    Ok(())
}
