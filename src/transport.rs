// SPDX-License-Identifier: AGPL-3.0-or-later

//! The line-delimited JSON transport (§6): one connection per client, addressed by `doc_id`
//! via a `join` message sent first on the connection.
//!
//! HTTP/WebSocket framing is out of scope (§1) and assumed by the original spec to already
//! deliver an ordered, reliable byte stream per connection; this repo carries the same
//! envelope protocol directly over newline-delimited JSON on `tokio` TCP and (on Unix) local
//! sockets, the way the teacher daemon carries its editor protocol over `LinesCodec`-framed
//! sockets in `jsonrpc_forwarder.rs`.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::DocumentRegistry;
use crate::session::{reliable_channel, CursorMailbox};

/// Bind a TCP listener at `addr` and accept one collaboration connection per socket, forever.
pub async fn serve_tcp(addr: SocketAddr, registry: DocumentRegistry) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind TCP listener on {addr}"))?;
    info!(%addr, "listening for TCP connections");
    loop {
        let (stream, peer_addr) = listener.accept().await.context("TCP accept failed")?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer_addr.to_string(), registry).await {
                warn!(peer = %peer_addr, %err, "connection ended with an error");
            }
        });
    }
}

/// Bind a Unix-domain socket at `path` and accept one collaboration connection per socket,
/// forever. Mirrors the teacher's dual TCP/Unix-socket daemon shape (§10.1).
#[cfg(unix)]
pub async fn serve_unix(path: std::path::PathBuf, registry: DocumentRegistry) -> Result<()> {
    use tokio::net::UnixListener;

    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove stale socket at {}", path.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("failed to bind Unix socket at {}", path.display()))?;
    info!(path = %path.display(), "listening for Unix socket connections");
    loop {
        let (stream, _addr) = listener.accept().await.context("Unix socket accept failed")?;
        let registry = registry.clone();
        let peer = format!("unix:{}", path.display());
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer.clone(), registry).await {
                warn!(peer = %peer, %err, "connection ended with an error");
            }
        });
    }
}

/// Drive a single connection end to end: read the `join` handshake, register with the
/// document's actor, then loop reading client messages and writing server messages
/// (including broadcasts fanned in from the actor) until the socket closes.
async fn handle_connection<S>(stream: S, peer: String, registry: DocumentRegistry) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, LinesCodec::new());
    let mut writer = FramedWrite::new(write_half, LinesCodec::new());

    let join = match reader.next().await {
        Some(Ok(line)) => line,
        Some(Err(err)) => return Err(err).context("failed to read join handshake"),
        None => {
            debug!(%peer, "connection closed before handshake");
            return Ok(());
        }
    };
    let (doc_id, user_id, username) = match serde_json::from_str::<ClientMessage>(&join) {
        Ok(ClientMessage::Join {
            doc_id,
            user_id,
            username,
        }) => (
            doc_id,
            user_id.unwrap_or_else(generate_user_id),
            username.unwrap_or_else(generate_username),
        ),
        Ok(_) => {
            send_line(&mut writer, &error_message("first message on a connection must be 'join'"))
                .await?;
            return Ok(());
        }
        Err(err) => {
            send_line(&mut writer, &error_message(&format!("malformed join message: {err}")))
                .await?;
            return Ok(());
        }
    };

    let handle = registry.get_or_create(&doc_id);
    let (reliable_tx, mut reliable_rx) = reliable_channel();
    let cursor_mailbox = CursorMailbox::new();
    let (conn_id, content, version) = handle
        .join(user_id.clone(), username.clone(), reliable_tx, cursor_mailbox.clone())
        .await;
    info!(%peer, doc_id = %doc_id, %user_id, conn_id, "joined document");

    send_line(&mut writer, &ServerMessage::DocumentState { content, version }).await?;

    loop {
        tokio::select! {
            line = reader.next() => {
                match line {
                    Some(Ok(line)) => {
                        if let Err(err) = dispatch_client_message(&handle, conn_id, &line).await {
                            send_line(&mut writer, &error_message(&err)).await?;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%peer, doc_id = %doc_id, conn_id, %err, "read error, disconnecting");
                        break;
                    }
                    None => break,
                }
            }
            msg = reliable_rx.recv() => {
                match msg {
                    Some(msg) => send_line(&mut writer, &msg).await?,
                    None => break, // the document actor dropped this peer (§5 backpressure policy)
                }
            }
            batch = cursor_mailbox.recv_batch() => {
                for (user_id, cursor_position) in batch {
                    send_line(&mut writer, &ServerMessage::CursorUpdate { user_id, cursor_position }).await?;
                }
            }
        }
    }

    handle.disconnect(conn_id).await;
    debug!(%peer, doc_id = %doc_id, conn_id, "connection closed");
    Ok(())
}

/// Parse one client line and forward it to the document actor. Returns `Err(message)` for a
/// malformed envelope; the caller turns that into an `error` reply on this connection only.
async fn dispatch_client_message(
    handle: &crate::session::DocumentActorHandle,
    conn_id: crate::session::ConnId,
    line: &str,
) -> std::result::Result<(), String> {
    let message: ClientMessage =
        serde_json::from_str(line).map_err(|err| format!("malformed message: {err}"))?;
    match message {
        ClientMessage::Join { .. } => {
            return Err("'join' may only be sent once per connection".to_string());
        }
        ClientMessage::Operation { operation, version } => {
            handle.operation(conn_id, operation, version).await;
        }
        ClientMessage::CursorUpdate { cursor_position } => {
            handle.cursor_update(conn_id, cursor_position).await;
        }
        ClientMessage::ContentUpdate { content } => {
            handle.content_update(conn_id, content).await;
        }
        ClientMessage::ChatMessage { message, username } => {
            handle.chat_message(conn_id, message, username).await;
        }
    }
    Ok(())
}

fn error_message(message: &str) -> ServerMessage {
    ServerMessage::Error {
        message: message.to_string(),
        code: "malformed_message".to_string(),
    }
}

async fn send_line<W>(writer: &mut FramedWrite<W, LinesCodec>, msg: &ServerMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(msg).context("failed to serialize server message")?;
    writer.send(json).await.context("failed to write to connection")?;
    Ok(())
}

fn generate_user_id() -> String {
    format!("user-{:06x}", rand::random::<u32>() & 0xff_ffff)
}

fn generate_username() -> String {
    format!("Anonymous-{:04x}", rand::random::<u16>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_nonempty_and_distinct_enough() {
        let a = generate_user_id();
        let b = generate_user_id();
        assert!(a.starts_with("user-"));
        assert_ne!(a, b, "two random ids colliding would be a broken RNG, not a fluke");
    }
}
