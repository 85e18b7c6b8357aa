//! Per-connection handle running independent read and write loops
//!
//! A `Connection` owns one TCP stream, split between two spawned tasks: the
//! read loop performs framed reads and delivers complete messages, the write
//! loop drains a FIFO queue into framed writes. Application code never
//! touches the socket directly and never sees loop I/O errors; it polls
//! `is_alive` or watches for a `Closed` event instead.
//!
//! Delivery is either pull (an internal queue drained with `try_read`) or
//! push (a `ConnectionEvent` channel supplied at start). Push delivery is
//! what the server uses: one channel fans in frames from every connection.

use crate::framing::{read_frame, write_frame};
use crate::packet::{Packet, PacketRegistry};
use log::{debug, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// How long `close` waits for a loop task to finish before aborting it.
const CLOSE_JOIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Notifications produced by a push-mode connection's read loop.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// One complete framed message arrived.
    Frame { addr: SocketAddr, bytes: Vec<u8> },
    /// The connection dropped; no further frames will follow.
    Closed { addr: SocketAddr, reason: String },
}

enum Delivery {
    Queue(mpsc::UnboundedSender<Vec<u8>>),
    Push(mpsc::UnboundedSender<ConnectionEvent>),
}

/// Handle to one live socket connection.
///
/// Equality is by peer address, which is what the server's lookup tables
/// key on.
pub struct Connection {
    peer_addr: SocketAddr,
    registry: Arc<PacketRegistry>,
    alive: Arc<AtomicBool>,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    read_rx: Option<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Wraps an established stream and immediately spawns the read and
    /// write loops. With `push` set, inbound frames and the closed
    /// notification go to that channel; otherwise they queue internally for
    /// `try_read`.
    pub fn start(
        stream: TcpStream,
        registry: Arc<PacketRegistry>,
        push: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    ) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let alive = Arc::new(AtomicBool::new(true));

        let (delivery, read_rx) = match push {
            Some(tx) => (Delivery::Push(tx), None),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Delivery::Queue(tx), Some(Mutex::new(rx)))
            }
        };

        let read_task = spawn_read_loop(
            read_half,
            peer_addr,
            delivery,
            Arc::clone(&alive),
            shutdown_rx.clone(),
        );
        let write_task = spawn_write_loop(
            write_half,
            peer_addr,
            write_rx,
            Arc::clone(&alive),
            shutdown_rx,
        );

        Ok(Self {
            peer_addr,
            registry,
            alive,
            write_tx,
            read_rx,
            shutdown_tx,
            tasks: Mutex::new(vec![read_task, write_task]),
        })
    }

    /// Remote address of the underlying socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// False once either loop has hit an I/O error or `close` ran. No
    /// further delivery should be expected after that.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Enqueues raw bytes for the write loop and returns immediately.
    /// Returns false if the connection is no longer alive; the bytes are
    /// dropped in that case.
    pub fn write(&self, bytes: Vec<u8>) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.write_tx.send(bytes).is_ok()
    }

    /// Serializes a packet through the registry and enqueues it.
    pub fn write_packet(&self, packet: &dyn Packet) -> bool {
        match self.registry.encode(packet) {
            Ok(bytes) => self.write(bytes),
            Err(e) => {
                warn!("dropping outbound packet on {}: {}", self.peer_addr, e);
                false
            }
        }
    }

    /// Non-blocking dequeue of one inbound message. Always `None` for a
    /// push-mode connection.
    pub fn try_read(&self) -> Option<Vec<u8>> {
        let queue = self.read_rx.as_ref()?;
        queue.lock().ok()?.try_recv().ok()
    }

    /// Dequeues one inbound message and runs it through the registry.
    pub fn try_read_packet(&self) -> Option<Box<dyn Packet>> {
        self.try_read().map(|bytes| self.registry.decode(&bytes))
    }

    /// Tears the connection down: marks it dead, signals both loops, waits
    /// a bounded interval for each and aborts stragglers. Idempotent.
    pub async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for mut handle in handles {
            if timeout(CLOSE_JOIN_TIMEOUT, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.peer_addr == other.peer_addr
    }
}

impl Eq for Connection {}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn spawn_read_loop(
    mut read_half: OwnedReadHalf,
    addr: SocketAddr,
    delivery: Delivery,
    alive: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = read_frame(&mut read_half) => match result {
                    Ok(bytes) => {
                        let delivered = match &delivery {
                            Delivery::Push(tx) => {
                                tx.send(ConnectionEvent::Frame { addr, bytes }).is_ok()
                            }
                            Delivery::Queue(tx) => tx.send(bytes).is_ok(),
                        };
                        if !delivered {
                            // Receiver gone; nobody is listening anymore.
                            alive.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    Err(e) => {
                        alive.store(false, Ordering::SeqCst);
                        debug!("read loop on {} ended: {}", addr, e);
                        if let Delivery::Push(tx) = &delivery {
                            let _ = tx.send(ConnectionEvent::Closed {
                                addr,
                                reason: e.to_string(),
                            });
                        }
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

fn spawn_write_loop(
    mut write_half: OwnedWriteHalf,
    addr: SocketAddr,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    alive: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = write_rx.recv() => match message {
                    Some(bytes) => {
                        if let Err(e) = write_frame(&mut write_half, &bytes).await {
                            alive.store(false, Ordering::SeqCst);
                            debug!("write loop on {} ended: {}", addr, e);
                            break;
                        }
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}
