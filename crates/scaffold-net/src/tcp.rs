//! Newline-delimited JSON relay over TCP
//!
//! One TCP stream carries one room membership. The client's first line is a
//! join request; after that it sends payloads and the server streams
//! [`RelayEvent`]s back. The server keeps no document state.
//!
//! A client whose stream drops reports every known peer as left, then
//! redials with exponential backoff and joins again under the same
//! connection id. The relay announces the existing members anew, which
//! restarts the sync handshake with each of them.

use crate::error::TransportError;
use crate::room::{ConnectionId, RoomToken};
use crate::signaling::{EventStream, LocalRelay, Recipient, RelayEvent, Signaling};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const RECONNECT_MIN: Duration = Duration::from_millis(100);
const RECONNECT_MAX: Duration = Duration::from_secs(5);

/// Client-to-server line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientLine {
    Join { room: RoomToken, conn: ConnectionId },
    Send { to: Recipient, payload: String },
    Leave,
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

/// Relay server
#[derive(Debug)]
pub struct TcpRelay {
    listener: TcpListener,
    router: Arc<LocalRelay>,
}

impl TcpRelay {
    /// Bind the listening socket
    ///
    /// # Errors
    /// Returns [`TransportError::Io`] if the address cannot be bound
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            router: Arc::new(LocalRelay::new()),
        })
    }

    /// Bound address
    ///
    /// # Errors
    /// Returns [`TransportError::Io`] if the socket is gone
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Routing table, for inspection
    #[must_use]
    pub fn router(&self) -> Arc<LocalRelay> {
        Arc::clone(&self.router)
    }

    /// Accept clients until the listener fails
    ///
    /// # Errors
    /// Returns [`TransportError::Io`] when accepting fails
    pub async fn serve(self) -> Result<(), TransportError> {
        self.serve_until(std::future::pending()).await
    }

    /// Accept clients until `shutdown` resolves, then close every client
    /// stream
    ///
    /// # Errors
    /// Returns [`TransportError::Io`] when accepting fails
    pub async fn serve_until(
        self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), TransportError> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "relay listening");
        let mut clients = JoinSet::new();
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                () = &mut shutdown => break Ok(()),
                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => break Err(err.into()),
                    };
                    let router = Arc::clone(&self.router);
                    clients.spawn(async move {
                        if let Err(err) = serve_client(router, stream).await {
                            tracing::debug!(remote = %remote, error = %err, "client session ended with error");
                        }
                    });
                }
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
            }
        };

        tracing::info!(clients = clients.len(), "relay shutting down");
        clients.shutdown().await;
        result
    }
}

async fn serve_client(router: Arc<LocalRelay>, stream: TcpStream) -> Result<(), TransportError> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };
    let ClientLine::Join { room, conn } = serde_json::from_str::<ClientLine>(&first)? else {
        tracing::warn!("client spoke before joining");
        return Ok(());
    };
    let mut events = router.join(&room, conn).await?;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break Ok(()) };
                if let Err(err) = write_line(&mut write, &event).await {
                    break Err(err);
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(err.into()),
                };
                match serde_json::from_str::<ClientLine>(&line) {
                    Ok(ClientLine::Send { to, payload }) => {
                        if let Err(err) = router.send(&room, conn, to, payload) {
                            tracing::debug!(room = %room, conn = %conn, error = %err, "route failed");
                        }
                    }
                    Ok(ClientLine::Leave) => break Ok(()),
                    Ok(ClientLine::Join { .. }) => {
                        tracing::warn!(room = %room, conn = %conn, "duplicate join ignored");
                    }
                    Err(err) => tracing::warn!(room = %room, conn = %conn, error = %err, "bad client line"),
                }
            }
        }
    };

    router.leave(&room, conn);
    outcome
}

/// Client side of one joined `(room, connection)` pair
#[derive(Debug)]
struct ClientLink {
    lines: mpsc::UnboundedSender<ClientLine>,
    online: Arc<AtomicBool>,
}

/// Why a relay session stopped
enum Ended {
    /// The stream dropped; dial again
    Lost,
    /// The local side left or stopped listening
    Done,
}

/// Relay client
///
/// Each joined `(room, connection)` pair owns one TCP stream, redialled
/// whenever it drops.
#[derive(Debug)]
pub struct TcpSignaling {
    addr: SocketAddr,
    links: DashMap<(RoomToken, ConnectionId), ClientLink>,
}

impl TcpSignaling {
    /// Client for the relay at `addr`; nothing is dialled until a join
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            links: DashMap::new(),
        }
    }
}

/// Drive one membership: relay lines both ways, and rejoin after drops
async fn run_link(
    addr: SocketAddr,
    room: RoomToken,
    conn: ConnectionId,
    first: TcpStream,
    mut lines_rx: mpsc::UnboundedReceiver<ClientLine>,
    events: mpsc::UnboundedSender<RelayEvent>,
    online: Arc<AtomicBool>,
) {
    let mut stream = Some(first);
    let mut backoff = RECONNECT_MIN;
    loop {
        let current = match stream.take() {
            Some(current) => current,
            None => match TcpStream::connect(addr).await {
                Ok(current) => current,
                Err(err) => {
                    tracing::debug!(room = %room, conn = %conn, relay = %addr, error = %err, "redial failed");
                    if !pause(&events, &mut backoff).await {
                        return;
                    }
                    continue;
                }
            },
        };

        match session(&room, conn, current, &mut lines_rx, &events, &online).await {
            Ended::Done => return,
            Ended::Lost => {
                tracing::warn!(room = %room, conn = %conn, relay = %addr, "relay connection lost, reconnecting");
                backoff = RECONNECT_MIN;
                if !pause(&events, &mut backoff).await {
                    return;
                }
            }
        }
    }
}

/// Sleep out the backoff; `false` when nobody listens for events anymore
async fn pause(events: &mpsc::UnboundedSender<RelayEvent>, backoff: &mut Duration) -> bool {
    let wait = *backoff;
    *backoff = (*backoff * 2).min(RECONNECT_MAX);
    tokio::select! {
        () = tokio::time::sleep(wait) => true,
        () = events.closed() => false,
    }
}

async fn session(
    room: &RoomToken,
    conn: ConnectionId,
    stream: TcpStream,
    lines_rx: &mut mpsc::UnboundedReceiver<ClientLine>,
    events: &mpsc::UnboundedSender<RelayEvent>,
    online: &AtomicBool,
) -> Ended {
    let (read, mut write) = stream.into_split();
    let join = ClientLine::Join {
        room: room.clone(),
        conn,
    };
    if let Err(err) = write_line(&mut write, &join).await {
        tracing::debug!(room = %room, conn = %conn, error = %err, "join write failed");
        return Ended::Lost;
    }
    online.store(true, Ordering::SeqCst);

    let mut reader = BufReader::new(read).lines();
    let mut peers = BTreeSet::new();
    let ended = loop {
        tokio::select! {
            line = lines_rx.recv() => {
                let Some(line) = line else {
                    let _ = write.shutdown().await;
                    break Ended::Done;
                };
                let leaving = line == ClientLine::Leave;
                if let Err(err) = write_line(&mut write, &line).await {
                    tracing::debug!(room = %room, conn = %conn, error = %err, "relay write failed");
                    break if leaving { Ended::Done } else { Ended::Lost };
                }
                if leaving {
                    let _ = write.shutdown().await;
                    break Ended::Done;
                }
            }
            read = reader.next_line() => match read {
                Ok(Some(line)) => match serde_json::from_str::<RelayEvent>(&line) {
                    Ok(event) => {
                        match &event {
                            RelayEvent::PeerJoined { conn } => {
                                peers.insert(*conn);
                            }
                            RelayEvent::PeerLeft { conn } => {
                                peers.remove(conn);
                            }
                            RelayEvent::Message { .. } => {}
                        }
                        if events.send(event).is_err() {
                            break Ended::Done;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "bad relay line"),
                },
                Ok(None) => break Ended::Lost,
                Err(err) => {
                    tracing::debug!(room = %room, conn = %conn, error = %err, "relay read failed");
                    break Ended::Lost;
                }
            },
        }
    };

    online.store(false, Ordering::SeqCst);
    if matches!(ended, Ended::Lost) {
        for peer in peers {
            let _ = events.send(RelayEvent::PeerLeft { conn: peer });
        }
    }
    ended
}

#[async_trait]
impl Signaling for TcpSignaling {
    async fn join(
        &self,
        room: &RoomToken,
        conn: ConnectionId,
    ) -> Result<EventStream, TransportError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|err| TransportError::RelayUnavailable(format!("{}: {err}", self.addr)))?;

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let online = Arc::new(AtomicBool::new(true));

        tokio::spawn(run_link(
            self.addr,
            room.clone(),
            conn,
            stream,
            line_rx,
            event_tx,
            Arc::clone(&online),
        ));

        self.links.insert(
            (room.clone(), conn),
            ClientLink {
                lines: line_tx,
                online,
            },
        );
        tracing::debug!(room = %room, conn = %conn, relay = %self.addr, "joined tcp relay");
        Ok(event_rx)
    }

    fn send(
        &self,
        room: &RoomToken,
        from: ConnectionId,
        to: Recipient,
        payload: String,
    ) -> Result<(), TransportError> {
        let link = self
            .links
            .get(&(room.clone(), from))
            .ok_or_else(|| TransportError::NotJoined {
                room: room.clone(),
                conn: from,
            })?;
        if !link.online.load(Ordering::SeqCst) {
            return Err(TransportError::RelayUnavailable(format!(
                "{}: reconnecting",
                self.addr
            )));
        }
        link.lines
            .send(ClientLine::Send { to, payload })
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn leave(&self, room: &RoomToken, conn: ConnectionId) {
        if let Some((_, link)) = self.links.remove(&(room.clone(), conn)) {
            let _ = link.lines.send(ClientLine::Leave);
        }
    }

    fn is_connected(&self, room: &RoomToken, conn: ConnectionId) -> bool {
        self.links
            .get(&(room.clone(), conn))
            .is_some_and(|link| link.online.load(Ordering::SeqCst))
    }
}
