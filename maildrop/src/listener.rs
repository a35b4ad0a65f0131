//! Inbound listener: accept loop and per-connection decode tasks.
//!
//! Every accepted connection gets its own [`FrameDecoder`]; completed
//! frames surface as [`MailboxEvent::Message`] on the shared event
//! channel. The wire carries no sender identity, so inbound messages are
//! anonymous at this layer.

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::MailboxError;
use crate::frame::FrameDecoder;
use crate::mailbox::MailboxEvent;

/// Accept inbound connections until shut down.
///
/// Each connection is handled by its own task; shutting down aborts them
/// all, dropping their sockets and decode state.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<MailboxEvent>,
    mut shutdown_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!("accept loop shutting down, dropping {} connections", handles.len());
                for handle in handles.drain(..) {
                    handle.abort();
                }
                return;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!("accepted inbound connection from {}", peer);
                        handles.retain(|handle| !handle.is_finished());
                        handles.push(tokio::task::spawn_local(inbound_connection(
                            stream,
                            peer.to_string(),
                            events.clone(),
                        )));
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        let _ = events.send(MailboxEvent::Error(MailboxError::Listener(
                            e.to_string(),
                        )));
                    }
                }
            }
        }
    }
}

/// Read one accepted connection, decoding frames until close or error.
///
/// A framing error is fatal to this connection only: it is reported and
/// the socket dropped, leaving the listener and every other connection
/// untouched. A close with a partial frame buffered discards the partial
/// silently — an incomplete delivery, not a protocol violation.
async fn inbound_connection(
    mut stream: TcpStream,
    peer: String,
    events: mpsc::UnboundedSender<MailboxEvent>,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; 4096];

    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => {
                if decoder.buffered() > 0 {
                    tracing::debug!(
                        "connection from {} closed with {} bytes of partial frame",
                        peer,
                        decoder.buffered()
                    );
                }
                return;
            }
            Ok(n) => match decoder.feed(&chunk[..n]) {
                Ok(frames) => {
                    for payload in frames {
                        if events.send(MailboxEvent::Message(payload)).is_err() {
                            return; // Embedder dropped the event channel.
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "protocol error on connection from {}: {} - tearing down",
                        peer,
                        e
                    );
                    let _ = events.send(MailboxEvent::Error(MailboxError::Protocol {
                        peer: peer.clone(),
                        source: e,
                    }));
                    return;
                }
            },
            Err(e) => {
                tracing::debug!("read error on connection from {}: {}", peer, e);
                return;
            }
        }
    }
}
