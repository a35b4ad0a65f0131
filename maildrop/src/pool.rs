//! Outbound connection pool.
//!
//! Keeps at most one live connection per destination address. Connection
//! establishment is single-flight: acquires racing on the same address
//! share one connect attempt. Each pooled connection is owned by a
//! background task that serializes writes in submission order and tears
//! the entry down on any socket error or peer close.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::error::ConnectError;

/// Pool of live outbound connections keyed by `host:port`.
///
/// Cloning shares the underlying pool state.
#[derive(Clone)]
pub struct ConnectionPool {
    connect_timeout: Duration,
    state: Rc<RefCell<PoolState>>,
}

#[derive(Default)]
struct PoolState {
    connections: HashMap<String, Rc<PooledConnection>>,
    /// At most one in-flight connect attempt per address; concurrent
    /// acquires share the pending entry and its eventual outcome.
    pending: HashMap<String, Rc<PendingConnect>>,
}

struct PendingConnect {
    done: Notify,
    result: RefCell<Option<Result<Rc<PooledConnection>, ConnectError>>>,
}

/// Handle to a pooled connection.
///
/// Writes are queued to the owning background task and performed in
/// submission order; each write resolves once the socket write completed
/// or the connection died. The pool owns the socket itself — handles
/// never outlive eviction usefully, they only start failing.
pub struct PooledConnection {
    address: String,
    write_tx: mpsc::UnboundedSender<WriteRequest>,
}

struct WriteRequest {
    frame: Vec<u8>,
    completion: oneshot::Sender<Result<(), ConnectError>>,
}

enum Plan {
    Hit(Rc<PooledConnection>),
    Wait(Rc<PendingConnect>),
    Connect(Rc<PendingConnect>),
}

impl PooledConnection {
    /// Destination address of this connection.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Write one already-encoded frame to the peer.
    ///
    /// Resolves when the socket write completed. Writes submitted through
    /// the same connection are performed in call order.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::ConnectionLost`] if the connection was
    /// evicted before or during the write, or the socket-level error that
    /// killed it.
    pub async fn write(&self, frame: Vec<u8>) -> Result<(), ConnectError> {
        let (completion, outcome) = oneshot::channel();
        self.write_tx
            .send(WriteRequest { frame, completion })
            .map_err(|_| ConnectError::ConnectionLost)?;
        outcome.await.map_err(|_| ConnectError::ConnectionLost)?
    }
}

impl ConnectionPool {
    /// Create an empty pool with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            state: Rc::new(RefCell::new(PoolState::default())),
        }
    }

    /// Get the live connection for `address`, establishing one if needed.
    ///
    /// Acquires racing on an unconnected address share a single connect
    /// attempt; on success the connection is registered in the pool
    /// before any caller receives it, on failure nothing is registered
    /// and every waiter gets the error.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Timeout`] or [`ConnectError::Io`] when the
    /// connect attempt fails.
    pub async fn acquire(&self, address: &str) -> Result<Rc<PooledConnection>, ConnectError> {
        let plan = {
            let mut state = self.state.borrow_mut();
            let live = state.connections.get(address).cloned();
            match live {
                Some(connection) => Plan::Hit(connection),
                None => match state.pending.get(address).cloned() {
                    Some(pending) => Plan::Wait(pending),
                    None => {
                        let pending = Rc::new(PendingConnect {
                            done: Notify::new(),
                            result: RefCell::new(None),
                        });
                        state.pending.insert(address.to_string(), pending.clone());
                        Plan::Connect(pending)
                    }
                },
            }
        };

        match plan {
            Plan::Hit(connection) => Ok(connection),
            Plan::Wait(pending) => {
                tracing::debug!("joining in-flight connect to {}", address);
                loop {
                    let notified = pending.done.notified();
                    if let Some(result) = pending.result.borrow().clone() {
                        return result;
                    }
                    notified.await;
                }
            }
            Plan::Connect(pending) => {
                let result = self.connect(address).await;

                self.state.borrow_mut().pending.remove(address);
                *pending.result.borrow_mut() = Some(result.clone());
                pending.done.notify_waiters();
                result
            }
        }
    }

    /// Number of live pooled connections.
    pub fn connection_count(&self) -> usize {
        self.state.borrow().connections.len()
    }

    async fn connect(&self, address: &str) -> Result<Rc<PooledConnection>, ConnectError> {
        tracing::debug!("connecting to {}", address);
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!("connect to {} failed: {}", address, e);
                return Err(ConnectError::Io {
                    address: address.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                tracing::debug!("connect to {} timed out", address);
                return Err(ConnectError::Timeout {
                    address: address.to_string(),
                });
            }
        };

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let connection = Rc::new(PooledConnection {
            address: address.to_string(),
            write_tx,
        });

        // Register before handing the connection to any caller.
        self.state
            .borrow_mut()
            .connections
            .insert(address.to_string(), connection.clone());

        tokio::task::spawn_local(connection_task(
            address.to_string(),
            stream,
            write_rx,
            self.state.clone(),
        ));

        tracing::debug!("connection to {} pooled", address);
        Ok(connection)
    }
}

/// Background task owning one pooled connection's socket.
///
/// Drains the write queue in order, acknowledging each write, while
/// monitoring the read half for peer close or errors. Exits by removing
/// the pool entry first, so no acquire can observe the dead connection;
/// dropping the queue receiver then fails all still-queued writes.
async fn connection_task(
    address: String,
    mut stream: TcpStream,
    mut write_rx: mpsc::UnboundedReceiver<WriteRequest>,
    state: Rc<RefCell<PoolState>>,
) {
    let mut discard = [0u8; 1024];

    loop {
        tokio::select! {
            request = write_rx.recv() => {
                let Some(WriteRequest { frame, completion }) = request else {
                    // Pool handle dropped; nothing can submit writes anymore.
                    break;
                };
                match stream.write_all(&frame).await {
                    Ok(()) => {
                        let _ = completion.send(Ok(()));
                    }
                    Err(e) => {
                        tracing::debug!("write to {} failed: {}", address, e);
                        let _ = completion.send(Err(ConnectError::Io {
                            address: address.clone(),
                            message: e.to_string(),
                        }));
                        break;
                    }
                }
            }

            read = stream.read(&mut discard) => {
                match read {
                    Ok(0) => {
                        tracing::debug!("connection to {} closed by peer", address);
                        break;
                    }
                    Ok(n) => {
                        // Outbound connections carry no inbound protocol.
                        tracing::debug!("discarding {} unexpected bytes from {}", n, address);
                    }
                    Err(e) => {
                        tracing::debug!("read error on connection to {}: {}", address, e);
                        break;
                    }
                }
            }
        }
    }

    // No await between here and task exit: eviction is atomic with
    // respect to acquire.
    state.borrow_mut().connections.remove(&address);
    tracing::debug!("evicted connection to {}", address);
}
