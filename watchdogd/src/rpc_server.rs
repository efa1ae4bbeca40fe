//! Alert RPC listener: newline-delimited envelopes over TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use watchdog_common::rpc::{Envelope, SEND_ALERT};
use watchdog_common::ShutdownListener;

use crate::hub::Hub;

/// Accept agent connections until shutdown. Each connection gets its own
/// task; one broken agent never affects the others.
pub async fn serve_rpc(
    listener: TcpListener,
    hub: Arc<Hub>,
    mut shutdown: ShutdownListener,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                info!("RPC listener stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!("failed to accept RPC connection: {}", err);
                        continue;
                    }
                };
                let hub = hub.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, hub).await {
                        error!(agent = %peer, "RPC connection error: {}", e);
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, hub: Arc<Hub>) -> Result<()> {
    debug!(agent = %peer, "agent connected");
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await? {
            0 => break, // EOF
            _ => {
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                let response = handle_message(raw, &hub);
                writer.write_all(response.to_line()?.as_bytes()).await?;
            }
        }
    }

    debug!(agent = %peer, "agent disconnected");
    Ok(())
}

fn handle_message(raw: &str, hub: &Hub) -> Envelope {
    let envelope = match Envelope::from_line(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("JSON parse error: {}", e);
            return Envelope::error(None, "E_BAD_REQUEST", &e.to_string());
        }
    };

    if envelope.msg_type != SEND_ALERT {
        return Envelope::error(
            Some(&envelope.msg_id),
            "E_UNSUPPORTED",
            &format!("unsupported message type {}", envelope.msg_type),
        );
    }

    let msg_id = envelope.msg_id.clone();
    match envelope.into_alert() {
        Ok(record) => {
            // The fan-out task is detached; the ack does not wait for it.
            let _fanout = hub.receive(record);
            Envelope::ack(&msg_id)
        }
        Err(e) => {
            warn!("rejected malformed alert {}: {}", msg_id, e);
            Envelope::error(Some(&msg_id), "E_BAD_REQUEST", &e.to_string())
        }
    }
}
