//! Listening server: accept loop, client tables, lifecycle events, broadcast
//!
//! One accept task feeds per-accept one-shot tasks that register new
//! connections, so a slow registration never stalls the accept path. Every
//! connection runs in push mode into a single inbound channel that `run`
//! drains, decoding frames through the registry and dispatching them to the
//! [`PacketHandler`](crate::handler::PacketHandler) hook.
//!
//! While the server is not running, the client-facing operations
//! (`connect`, `disconnect`, `authenticate`, `send_packet`) are debug-logged
//! no-ops. `stop` keeps per-client state so `start` can resume; `shutdown`
//! is terminal.

use crate::events::{EventArgs, ServerEvent};
use crate::handler::PacketHandler;
use crate::table::ClientTable;
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::connection::ConnectionEvent;
use shared::packet::is_empty_packet;
use shared::{Connection, Packet, PacketRegistry, PROTOCOL_VERSION};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Length of the random alphanumeric client identifier.
const CLIENT_ID_LEN: usize = 12;

/// How long `stop` waits for the accept task before aborting it.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(250);

struct Inner {
    bind_addr: String,
    registry: Arc<PacketRegistry>,
    running: AtomicBool,
    shut_down: AtomicBool,
    local_addr: StdMutex<Option<SocketAddr>>,
    table: RwLock<ClientTable>,
    subscribers: StdMutex<Vec<mpsc::UnboundedSender<ServerEvent>>>,
    inbound_tx: mpsc::UnboundedSender<ConnectionEvent>,
    inbound_rx: StdMutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the server state. Clones share everything.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    pub fn new(bind_addr: impl Into<String>, registry: Arc<PacketRegistry>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                bind_addr: bind_addr.into(),
                registry,
                running: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                local_addr: StdMutex::new(None),
                table: RwLock::new(ClientTable::new()),
                subscribers: StdMutex::new(Vec::new()),
                inbound_tx,
                inbound_rx: StdMutex::new(Some(inbound_rx)),
                shutdown_tx,
                accept_task: StdMutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once started. Useful when binding
    /// to port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.lock().ok().and_then(|guard| *guard)
    }

    /// Registers a lifecycle-event subscriber. Dropped receivers are pruned
    /// on the next emit.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn emit(&self, event: ServerEvent) {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Binds the listener and spawns the accept task. Discards any previous
    /// listener first; a no-op after `shutdown`.
    pub async fn start(&self) -> io::Result<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            warn!("start ignored: server has been shut down");
            return Ok(());
        }
        if self.is_running() {
            self.stop().await;
        }

        let listener = TcpListener::bind(&self.inner.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        if let Ok(mut guard) = self.inner.local_addr.lock() {
            *guard = Some(local_addr);
        }

        let _ = self.inner.shutdown_tx.send(false);
        let accept_task = self.spawn_accept_loop(listener);
        if let Ok(mut guard) = self.inner.accept_task.lock() {
            *guard = Some(accept_task);
        }

        self.inner.running.store(true, Ordering::SeqCst);
        info!(
            "server listening on {} (protocol v{})",
            local_addr, PROTOCOL_VERSION
        );
        self.emit(ServerEvent::Started {
            args: EventArgs::new(true).with_param("addr", local_addr.to_string()),
        });
        Ok(())
    }

    fn spawn_accept_loop(&self, listener: TcpListener) -> JoinHandle<()> {
        let server = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, addr)) => {
                            debug!("accepted connection from {}", addr);
                            // Registration runs off the accept path so a
                            // slow connect never stalls later accepts.
                            let server = server.clone();
                            tokio::spawn(async move {
                                server.connect(stream).await;
                            });
                        }
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            sleep(Duration::from_millis(10)).await;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Registers an accepted stream: wraps it in a push-mode connection,
    /// assigns a unique identifier, and fires `Connected`.
    pub async fn connect(&self, stream: TcpStream) {
        if !self.is_running() {
            debug!("connect ignored: server not running");
            return;
        }

        // The table lock is held across the read-loop spawn, so a frame
        // arriving before the insert lands blocks in dispatch until the
        // client is tracked instead of being dropped as untracked.
        let (id, addr) = {
            let mut table = self.inner.table.write().await;
            let connection = match Connection::start(
                stream,
                Arc::clone(&self.inner.registry),
                Some(self.inner.inbound_tx.clone()),
            ) {
                Ok(connection) => Arc::new(connection),
                Err(e) => {
                    warn!("failed to adopt connection: {}", e);
                    return;
                }
            };

            let addr = connection.peer_addr();
            let mut id = random_client_id();
            while table.contains(&id) {
                id = random_client_id();
            }
            table.insert(id.clone(), Arc::clone(&connection));
            (id, addr)
        };

        self.emit(ServerEvent::Connected {
            client_id: id,
            args: EventArgs::new(true).with_param("ip", addr.to_string()),
        });
    }

    /// Removes a client from the tables and closes its connection. The
    /// event's success flag reflects whether the id was actually tracked.
    pub async fn disconnect(&self, client_id: &str, reason: Option<&str>) {
        if !self.is_running() {
            debug!("disconnect ignored: server not running");
            return;
        }
        self.drop_client(client_id, reason).await;
    }

    async fn drop_client(&self, client_id: &str, reason: Option<&str>) {
        let removed = {
            let mut table = self.inner.table.write().await;
            table.remove(client_id)
        };

        let found = removed.is_some();
        if let Some(connection) = removed {
            connection.close().await;
        } else {
            debug!("disconnect of untracked client {}", client_id);
        }

        let mut args = EventArgs::new(found);
        if let Some(reason) = reason {
            args = args.with_param("reason", reason);
        }
        self.emit(ServerEvent::Disconnected {
            client_id: client_id.to_string(),
            args,
        });
    }

    /// Records the authentication flag for a tracked client. Authentication
    /// is only ever granted explicitly; a fresh client starts out denied.
    pub async fn authenticate(&self, client_id: &str, success: bool) {
        if !self.is_running() {
            debug!("authenticate ignored: server not running");
            return;
        }

        let known = {
            let mut table = self.inner.table.write().await;
            table.set_authenticated(client_id, success)
        };
        if known && success {
            info!("client {} authenticated", client_id);
        }

        self.emit(ServerEvent::Authenticated {
            client_id: client_id.to_string(),
            args: EventArgs::new(success && known),
        });
    }

    /// Delivers a packet to the given clients, or to every tracked client
    /// when `targets` is `None`. Only authenticated, live connections
    /// receive it; a failed target is disconnected with a reason and the
    /// rest still get the packet.
    pub async fn send_packet(&self, packet: &dyn Packet, targets: Option<&[String]>) {
        if !self.is_running() {
            debug!("send_packet ignored: server not running");
            return;
        }

        let recipients: Vec<(String, Option<Arc<Connection>>, bool)> = {
            let table = self.inner.table.read().await;
            let ids = match targets {
                Some(ids) => ids.to_vec(),
                None => table.ids(),
            };
            ids.into_iter()
                .map(|id| {
                    let connection = table.get(&id);
                    let authenticated = table.is_authenticated(&id);
                    (id, connection, authenticated)
                })
                .collect()
        };

        let mut failed = Vec::new();
        for (id, connection, authenticated) in recipients {
            let Some(connection) = connection else {
                debug!("send skipped: {} is not tracked", id);
                continue;
            };
            if !authenticated {
                debug!("send skipped: {} is not authenticated", id);
                continue;
            }
            if !connection.is_alive() || !connection.write_packet(packet) {
                failed.push(id);
            }
        }

        for id in failed {
            warn!("send to {} failed, disconnecting", id);
            self.disconnect(&id, Some("packet write failed")).await;
        }
    }

    pub async fn get_client(&self, client_id: &str) -> Option<Arc<Connection>> {
        self.inner.table.read().await.get(client_id)
    }

    pub async fn client_id_for_addr(&self, addr: SocketAddr) -> Option<String> {
        self.inner.table.read().await.id_for_addr(addr)
    }

    pub async fn client_ids(&self) -> Vec<String> {
        self.inner.table.read().await.ids()
    }

    pub async fn is_authenticated(&self, client_id: &str) -> bool {
        self.inner.table.read().await.is_authenticated(client_id)
    }

    /// Stops listening without touching per-client state. `start` may be
    /// called again afterwards.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.inner.shutdown_tx.send(true);
        let handle = self
            .inner
            .accept_task
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(mut handle) = handle {
            if timeout(STOP_JOIN_TIMEOUT, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        if let Ok(mut guard) = self.inner.local_addr.lock() {
            *guard = None;
        }

        info!("server stopped listening");
        self.emit(ServerEvent::Stopped {
            args: EventArgs::new(true),
        });
    }

    /// Terminal teardown: disconnects every tracked client, stops the
    /// listener, and forbids restart.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let ids = self.client_ids().await;
        for id in ids {
            self.drop_client(&id, Some("server shutting down")).await;
        }
        self.stop().await;

        info!("server shut down");
        self.emit(ServerEvent::Shutdown {
            args: EventArgs::new(true),
        });
    }

    /// Drains inbound connection events, dispatching decoded packets to the
    /// handler and routing connection losses to `disconnect`. Returns when
    /// the server shuts down. May only be called once per server.
    pub async fn run(&self, handler: Arc<dyn PacketHandler>) {
        let receiver = self
            .inner
            .inbound_rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        let Some(mut inbound) = receiver else {
            warn!("run called twice; inbound receiver already taken");
            return;
        };

        let mut shutdown = self.inner.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(ConnectionEvent::Frame { addr, bytes }) => {
                        self.dispatch_frame(addr, &bytes, handler.as_ref()).await;
                    }
                    Some(ConnectionEvent::Closed { addr, reason }) => {
                        let id = self.client_id_for_addr(addr).await;
                        if let Some(id) = id {
                            info!("connection to {} lost: {}", id, reason);
                            self.disconnect(&id, Some(&reason)).await;
                        }
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    if self.inner.shut_down.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch_frame(&self, addr: SocketAddr, bytes: &[u8], handler: &dyn PacketHandler) {
        if !self.is_running() {
            return;
        }
        let Some(id) = self.client_id_for_addr(addr).await else {
            debug!("frame from untracked address {}", addr);
            return;
        };

        let packet = self.inner.registry.decode(bytes);
        if is_empty_packet(packet.as_ref()) {
            debug!("skipping empty/unknown packet from {}", id);
            return;
        }
        handler.receive_packet(self, &id, packet).await;
    }
}

fn random_client_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_LEN)
        .map(char::from)
        .collect()
}
