//! Host side of the peer sync protocol.
//!
//! The session actor is the single writer of the authoritative
//! [`MessageQueue`] and [`OscSettings`]. Every accepted client first
//! receives a fresh settings snapshot and queue snapshot before any
//! incremental envelope; local mutations are broadcast to all connected
//! clients; client commands are surfaced to the application through an
//! event channel.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LumenError;
use crate::model::{Message, MessageQueue, OscSettings};
use crate::peer::envelope::{Envelope, EnvelopeCodec, EnvelopeKind, PeerCommand, SentNotice};

const COMMAND_BUFFER: usize = 64;
const CLIENT_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;
const ACCEPT_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

/// Client activity surfaced to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A client connected and was brought up to date.
    ClientConnected(SocketAddr),
    /// A client session ended.
    ClientDisconnected(SocketAddr),
    /// A client asked for the identified message to go to the wall.
    SendRequested(Uuid),
    /// A client asked for the wall to be cleared.
    ClearRequested,
}

enum HostCommand {
    Register {
        addr: SocketAddr,
        tx: mpsc::Sender<Envelope>,
    },
    Deregister(SocketAddr),
    Inbound(SocketAddr, Envelope),
    Push(Message, oneshot::Sender<()>),
    Insert(usize, Message, oneshot::Sender<()>),
    Remove(usize, oneshot::Sender<Option<Message>>),
    Move(usize, usize, oneshot::Sender<bool>),
    SetCurrent(Option<usize>, oneshot::Sender<bool>),
    MarkSent(Uuid, DateTime<Utc>, oneshot::Sender<bool>),
    UpdateSettings(OscSettings, oneshot::Sender<Result<(), LumenError>>),
}

// ── Handle ───────────────────────────────────────────────────────

/// Handle to a running host session.
#[derive(Debug, Clone)]
pub struct HostSession {
    tx: mpsc::Sender<HostCommand>,
    queue: watch::Receiver<Arc<MessageQueue>>,
    settings: watch::Receiver<OscSettings>,
}

impl HostSession {
    /// Bind the session listener and spawn the actor. Returns the handle,
    /// the bound address (useful with port 0) and the event stream.
    pub async fn bind(
        listen: SocketAddr,
        settings: OscSettings,
        queue: MessageQueue,
    ) -> Result<(Self, SocketAddr, mpsc::Receiver<HostEvent>), LumenError> {
        settings.validate()?;
        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (queue_tx, queue_rx) = watch::channel(Arc::new(queue.clone()));
        let (settings_tx, settings_rx) = watch::channel(settings.clone());

        tokio::spawn(accept_loop(listener, tx.clone()));
        tokio::spawn(
            Actor {
                queue,
                settings,
                clients: Vec::new(),
                events: event_tx,
                queue_tx,
                settings_tx,
            }
            .run(rx),
        );

        info!(%local_addr, "host session listening");
        Ok((
            Self {
                tx,
                queue: queue_rx,
                settings: settings_rx,
            },
            local_addr,
            event_rx,
        ))
    }

    /// Immutable snapshot of the authoritative queue.
    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.borrow().clone()
    }

    /// Subscribe to queue snapshots.
    pub fn subscribe_queue(&self) -> watch::Receiver<Arc<MessageQueue>> {
        self.queue.clone()
    }

    /// Copy of the authoritative settings.
    pub fn settings(&self) -> OscSettings {
        self.settings.borrow().clone()
    }

    pub async fn push_message(&self, message: Message) -> Result<(), LumenError> {
        self.roundtrip(|ack| HostCommand::Push(message, ack)).await
    }

    pub async fn insert_message(&self, index: usize, message: Message) -> Result<(), LumenError> {
        self.roundtrip(|ack| HostCommand::Insert(index, message, ack))
            .await
    }

    pub async fn remove_message(&self, index: usize) -> Result<Option<Message>, LumenError> {
        self.roundtrip(|ack| HostCommand::Remove(index, ack)).await
    }

    pub async fn move_message(&self, from: usize, to: usize) -> Result<bool, LumenError> {
        self.roundtrip(|ack| HostCommand::Move(from, to, ack)).await
    }

    pub async fn set_current(&self, index: Option<usize>) -> Result<bool, LumenError> {
        self.roundtrip(|ack| HostCommand::SetCurrent(index, ack))
            .await
    }

    /// Record a dispatch and broadcast the incremental notice.
    pub async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, LumenError> {
        self.roundtrip(|ack| HostCommand::MarkSent(id, at, ack))
            .await
    }

    /// Replace the settings and broadcast the new snapshot.
    pub async fn update_settings(&self, settings: OscSettings) -> Result<(), LumenError> {
        self.roundtrip(|ack| HostCommand::UpdateSettings(settings, ack))
            .await?
    }

    async fn roundtrip<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HostCommand,
    ) -> Result<T, LumenError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(make(ack_tx)).await?;
        Ok(ack_rx.await?)
    }
}

// ── Accept loop and per-client tasks ─────────────────────────────

async fn accept_loop(listener: TcpListener, actor: mpsc::Sender<HostCommand>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "client accepted");
                tokio::spawn(serve_client(stream, addr, actor.clone()));
            }
            // Accept errors are transient (fd exhaustion, aborted
            // handshakes); keep admitting clients.
            Err(e) => {
                warn!(error = %e, "accept failed, retrying");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                if actor.is_closed() {
                    break;
                }
            }
        }
    }
}

async fn serve_client(stream: TcpStream, addr: SocketAddr, actor: mpsc::Sender<HostCommand>) {
    let (mut sink, mut source) = Framed::new(stream, EnvelopeCodec).split();
    let (tx, mut rx) = mpsc::channel::<Envelope>(CLIENT_BUFFER);

    if actor
        .send(HostCommand::Register { addr, tx })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = sink.send(envelope).await {
                debug!(%addr, error = %e, "client write failed");
                break;
            }
        }
    });

    while let Some(result) = source.next().await {
        match result {
            Ok(envelope) => {
                if actor
                    .send(HostCommand::Inbound(addr, envelope))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            // A bad envelope was consumed by the codec; the session
            // itself is still healthy.
            Err(e) if e.is_recoverable_envelope_error() => {
                warn!(%addr, error = %e, "dropping bad envelope");
            }
            Err(e) => {
                debug!(%addr, error = %e, "client read failed");
                break;
            }
        }
    }

    writer.abort();
    let _ = actor.send(HostCommand::Deregister(addr)).await;
}

// ── Actor ────────────────────────────────────────────────────────

struct Client {
    addr: SocketAddr,
    tx: mpsc::Sender<Envelope>,
}

struct Actor {
    queue: MessageQueue,
    settings: OscSettings,
    clients: Vec<Client>,
    events: mpsc::Sender<HostEvent>,
    queue_tx: watch::Sender<Arc<MessageQueue>>,
    settings_tx: watch::Sender<OscSettings>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<HostCommand>) {
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd).await;
        }
    }

    async fn handle(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::Register { addr, tx } => {
                let client = Client { addr, tx };
                // Snapshots first, before any incremental envelope.
                self.send_snapshots(&client).await;
                self.clients.push(client);
                self.emit(HostEvent::ClientConnected(addr)).await;
            }
            HostCommand::Deregister(addr) => {
                self.clients.retain(|c| c.addr != addr);
                self.emit(HostEvent::ClientDisconnected(addr)).await;
            }
            HostCommand::Inbound(addr, envelope) => {
                self.apply_inbound(addr, envelope).await;
            }
            HostCommand::Push(message, ack) => {
                self.queue.push(message);
                self.publish_queue();
                let _ = ack.send(());
            }
            HostCommand::Insert(index, message, ack) => {
                self.queue.insert(index, message);
                self.publish_queue();
                let _ = ack.send(());
            }
            HostCommand::Remove(index, ack) => {
                let removed = self.queue.remove(index);
                if removed.is_some() {
                    self.publish_queue();
                }
                let _ = ack.send(removed);
            }
            HostCommand::Move(from, to, ack) => {
                let moved = self.queue.move_message(from, to);
                if moved {
                    self.publish_queue();
                }
                let _ = ack.send(moved);
            }
            HostCommand::SetCurrent(index, ack) => {
                let changed = self.queue.set_current(index);
                if changed {
                    self.publish_queue();
                }
                let _ = ack.send(changed);
            }
            HostCommand::MarkSent(id, at, ack) => {
                let marked = self.queue.mark_sent(&id, at);
                if marked {
                    self.queue_tx.send_replace(Arc::new(self.queue.clone()));
                    self.broadcast_notice(SentNotice { id, sent_at: at });
                }
                let _ = ack.send(marked);
            }
            HostCommand::UpdateSettings(settings, ack) => {
                let result = self.update_settings(settings);
                let _ = ack.send(result);
            }
        }
    }

    fn update_settings(&mut self, settings: OscSettings) -> Result<(), LumenError> {
        settings.validate()?;
        self.settings = settings;
        self.settings_tx.send_replace(self.settings.clone());
        match Envelope::settings_snapshot(&self.settings) {
            Ok(envelope) => self.broadcast(envelope),
            Err(e) => warn!(error = %e, "settings snapshot encode failed"),
        }
        Ok(())
    }

    async fn apply_inbound(&mut self, addr: SocketAddr, envelope: Envelope) {
        match envelope.kind {
            EnvelopeKind::Command => match envelope.decode_command() {
                Ok(PeerCommand::RequestRefresh) => {
                    if let Some(client) = self.clients.iter().find(|c| c.addr == addr) {
                        debug!(%addr, "refresh requested");
                        self.send_snapshots(client).await;
                    }
                }
                Ok(PeerCommand::ClearCurrent) => {
                    self.emit(HostEvent::ClearRequested).await;
                }
                Ok(PeerCommand::SendMessage(id)) => {
                    self.emit(HostEvent::SendRequested(id)).await;
                }
                Err(e) => warn!(%addr, error = %e, "dropping bad command"),
            },
            // Clients never carry authority over host state.
            other => {
                warn!(%addr, kind = other.name(), "ignoring state push from client");
            }
        }
    }

    async fn send_snapshots(&self, client: &Client) {
        for envelope in [
            Envelope::settings_snapshot(&self.settings),
            Envelope::queue_snapshot(&self.queue),
        ] {
            match envelope {
                Ok(envelope) => {
                    if client.tx.send(envelope).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "snapshot encode failed"),
            }
        }
    }

    fn publish_queue(&mut self) {
        self.queue_tx.send_replace(Arc::new(self.queue.clone()));
        match Envelope::queue_snapshot(&self.queue) {
            Ok(envelope) => self.broadcast(envelope),
            Err(e) => warn!(error = %e, "queue snapshot encode failed"),
        }
    }

    fn broadcast_notice(&mut self, notice: SentNotice) {
        match Envelope::message_sent(&notice) {
            Ok(envelope) => self.broadcast(envelope),
            Err(e) => warn!(error = %e, "notice encode failed"),
        }
    }

    /// A slow client is dropped rather than allowed to stall the actor.
    fn broadcast(&mut self, envelope: Envelope) {
        self.clients.retain(|client| {
            match client.tx.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(addr = %client.addr, "client outbox full, dropping client");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    async fn emit(&self, event: HostEvent) {
        if self.events.send(event).await.is_err() {
            debug!("host event receiver dropped");
        }
    }
}
