//! Client side of the peer sync protocol.
//!
//! A `ClientSession` mirrors one host's queue and settings. On every
//! (re)connect it asks for a refresh and distrusts incremental notices
//! until the first full queue snapshot arrives, so redelivered or stale
//! envelopes from before a drop can never corrupt the cache. Lost
//! connections are retried with the same jittered backoff the engine
//! link uses.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::engine::link::backoff_delay;
use crate::engine::state::LinkState;
use crate::error::LumenError;
use crate::model::{MessageQueue, OscSettings};
use crate::peer::envelope::{Envelope, EnvelopeCodec, EnvelopeKind, PeerCommand};

const COMMAND_BUFFER: usize = 32;
/// Reconnect attempts before the session settles in terminal `Failed`.
const MAX_ATTEMPTS: u32 = 8;

enum ClientCommand {
    Request(PeerCommand, oneshot::Sender<Result<(), LumenError>>),
    Shutdown(oneshot::Sender<()>),
}

// ── Handle ───────────────────────────────────────────────────────

/// Handle to a running client session.
#[derive(Debug, Clone)]
pub struct ClientSession {
    tx: mpsc::Sender<ClientCommand>,
    status: watch::Receiver<LinkState>,
    queue: watch::Receiver<Option<Arc<MessageQueue>>>,
    settings: watch::Receiver<Option<OscSettings>>,
}

impl ClientSession {
    /// Spawn a session towards `host`. Connection establishment happens
    /// in the background; observe progress via [`status`](Self::status).
    pub fn spawn(host: SocketAddr) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(LinkState::default());
        let (queue_tx, queue_rx) = watch::channel(None);
        let (settings_tx, settings_rx) = watch::channel(None);

        tokio::spawn(
            Driver {
                host,
                rx,
                status: status_tx,
                queue: queue_tx,
                settings: settings_tx,
                synced: false,
            }
            .run(),
        );

        Self {
            tx,
            status: status_rx,
            queue: queue_rx,
            settings: settings_rx,
        }
    }

    /// Current connection status.
    pub fn status(&self) -> LinkState {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<LinkState> {
        self.status.clone()
    }

    /// The mirrored queue; `None` until the first snapshot arrives.
    pub fn queue(&self) -> Option<Arc<MessageQueue>> {
        self.queue.borrow().clone()
    }

    /// Subscribe to mirrored queue updates.
    pub fn subscribe_queue(&self) -> watch::Receiver<Option<Arc<MessageQueue>>> {
        self.queue.clone()
    }

    /// The mirrored settings; `None` until the first snapshot arrives.
    pub fn settings(&self) -> Option<OscSettings> {
        self.settings.borrow().clone()
    }

    /// Submit a command upstream to the host.
    pub async fn request(&self, command: PeerCommand) -> Result<(), LumenError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ClientCommand::Request(command, reply_tx))
            .await?;
        reply_rx.await?
    }

    /// Close the session. Resolves once the driver has shut down.
    pub async fn shutdown(&self) -> Result<(), LumenError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(ClientCommand::Shutdown(reply_tx)).await?;
        reply_rx.await?;
        Ok(())
    }
}

// ── Driver ───────────────────────────────────────────────────────

struct Driver {
    host: SocketAddr,
    rx: mpsc::Receiver<ClientCommand>,
    status: watch::Sender<LinkState>,
    queue: watch::Sender<Option<Arc<MessageQueue>>>,
    settings: watch::Sender<Option<OscSettings>>,
    /// Incremental notices are only trusted after the first queue
    /// snapshot of the current connection.
    synced: bool,
}

enum SessionEnd {
    /// Transport dropped; retry with backoff.
    Lost(String),
    /// Shutdown was requested; stop for good.
    Shutdown,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            self.set_status(LinkState::Connecting);
            match TcpStream::connect(self.host).await {
                Ok(stream) => {
                    info!(host = %self.host, "peer session established");
                    attempt = 0;
                    self.set_status(LinkState::Connected {
                        since: std::time::Instant::now(),
                    });
                    match self.serve(stream).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            warn!(host = %self.host, %reason, "peer session lost");
                            self.set_status(LinkState::Failed { reason });
                        }
                    }
                }
                Err(e) => {
                    debug!(host = %self.host, error = %e, "peer connect failed");
                    self.set_status(LinkState::Failed {
                        reason: format!("connect {}: {e}", self.host),
                    });
                }
            }

            attempt += 1;
            if attempt >= MAX_ATTEMPTS {
                warn!(host = %self.host, attempts = attempt, "peer session giving up");
                break;
            }
            let delay = backoff_delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(ClientCommand::Shutdown(ack)) => {
                            self.set_status(LinkState::Disconnected);
                            let _ = ack.send(());
                            return;
                        }
                        Some(ClientCommand::Request(_, reply)) => {
                            let _ = reply.send(Err(LumenError::NotConnected));
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// One connected session. Returns how it ended.
    async fn serve(&mut self, stream: TcpStream) -> SessionEnd {
        let mut framed = Framed::new(stream, EnvelopeCodec);
        self.synced = false;

        // Full resync before trusting anything incremental.
        match Envelope::command(PeerCommand::RequestRefresh) {
            Ok(refresh) => {
                if let Err(e) = framed.send(refresh).await {
                    return SessionEnd::Lost(format!("refresh request: {e}"));
                }
            }
            Err(e) => return SessionEnd::Lost(format!("refresh encode: {e}")),
        }

        loop {
            tokio::select! {
                inbound = framed.next() => {
                    match inbound {
                        Some(Ok(envelope)) => self.apply(envelope),
                        Some(Err(e)) if e.is_recoverable_envelope_error() => {
                            warn!(error = %e, "dropping bad envelope");
                        }
                        Some(Err(e)) => return SessionEnd::Lost(format!("read: {e}")),
                        None => return SessionEnd::Lost("connection closed by host".to_string()),
                    }
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(ClientCommand::Request(command, reply)) => {
                            let result = send_command(&mut framed, command).await;
                            let failed = result.is_err();
                            let _ = reply.send(result);
                            if failed {
                                return SessionEnd::Lost("write failed".to_string());
                            }
                        }
                        Some(ClientCommand::Shutdown(ack)) => {
                            self.set_status(LinkState::Disconnected);
                            let _ = ack.send(());
                            return SessionEnd::Shutdown;
                        }
                        None => return SessionEnd::Shutdown,
                    }
                }
            }
        }
    }

    /// Apply one inbound envelope to the mirrored state, in arrival order.
    fn apply(&mut self, envelope: Envelope) {
        match envelope.kind {
            EnvelopeKind::SettingsSnapshot => match envelope.decode_settings() {
                Ok(settings) => {
                    self.settings.send_replace(Some(settings));
                }
                Err(e) => warn!(error = %e, "dropping bad settings snapshot"),
            },
            EnvelopeKind::QueueSnapshot => match envelope.decode_queue() {
                Ok(queue) => {
                    self.synced = true;
                    self.queue.send_replace(Some(Arc::new(queue)));
                }
                Err(e) => warn!(error = %e, "dropping bad queue snapshot"),
            },
            EnvelopeKind::MessageSent => {
                if !self.synced {
                    debug!("ignoring notice before first snapshot");
                    return;
                }
                match envelope.decode_notice() {
                    Ok(notice) => {
                        self.queue.send_if_modified(|slot| {
                            let Some(current) = slot.as_ref() else {
                                return false;
                            };
                            // Redelivered notices are no-ops.
                            let already = current
                                .find(&notice.id)
                                .is_some_and(|m| m.sent && m.last_sent == Some(notice.sent_at));
                            if already || current.find(&notice.id).is_none() {
                                return false;
                            }
                            let mut queue = MessageQueue::clone(current);
                            queue.mark_sent(&notice.id, notice.sent_at);
                            *slot = Some(Arc::new(queue));
                            true
                        });
                    }
                    Err(e) => warn!(error = %e, "dropping bad sent notice"),
                }
            }
            EnvelopeKind::Command => {
                warn!("ignoring command envelope from host");
            }
        }
    }

    fn set_status(&self, state: LinkState) {
        self.status.send_replace(state);
    }
}

async fn send_command(
    framed: &mut Framed<TcpStream, EnvelopeCodec>,
    command: PeerCommand,
) -> Result<(), LumenError> {
    framed.send(Envelope::command(command)?).await
}
