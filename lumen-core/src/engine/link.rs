//! UDP link to the visual engine.
//!
//! `EngineLink` is a cheap cloneable handle; a single driver task owns the
//! socket and the [`LinkState`] machine, so every send goes out in the
//! order it was issued. Commands travel over an mpsc channel, state comes
//! back over a `watch` channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::engine::state::LinkState;
use crate::error::LumenError;
use crate::osc::{self, OscMessage};

/// First retry delay after a failed attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
/// Retry delays double up to this cap.
const MAX_BACKOFF: Duration = Duration::from_secs(5);
/// Attempts before the link settles in terminal `Failed`.
const MAX_ATTEMPTS: u32 = 8;
/// How long a ping waits for any reply datagram.
const PING_TIMEOUT: Duration = Duration::from_millis(300);

const COMMAND_BUFFER: usize = 64;

/// What a [`EngineLink::ping`] produced.
///
/// Over UDP "success" means the local send succeeded; a missing reply is
/// an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// A reply datagram came back within the window.
    Acknowledged(Duration),
    /// The probe left this machine but nothing came back.
    SentUnacknowledged,
}

enum LinkCommand {
    Connect(String, oneshot::Sender<Result<(), LumenError>>),
    Disconnect(oneshot::Sender<()>),
    Send(Vec<u8>, oneshot::Sender<Result<(), LumenError>>),
    Ping(oneshot::Sender<Result<PingOutcome, LumenError>>),
}

// ── Handle ───────────────────────────────────────────────────────

/// Handle to the link driver task.
#[derive(Debug, Clone)]
pub struct EngineLink {
    tx: mpsc::Sender<LinkCommand>,
    state: watch::Receiver<LinkState>,
}

impl EngineLink {
    /// Spawn the driver task and return its handle. The link starts
    /// `Disconnected`.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(LinkState::default());
        tokio::spawn(drive(rx, state_tx));
        Self {
            tx,
            state: state_rx,
        }
    }

    /// Connect to `endpoint` (`host:port`). Resolves once the first
    /// attempt finishes; a failed first attempt still leaves backoff
    /// retries running in the background.
    ///
    /// Connecting to the endpoint the link is already connected to is a
    /// no-op; a different endpoint tears the old socket down first.
    pub async fn connect(&self, endpoint: impl Into<String>) -> Result<(), LumenError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LinkCommand::Connect(endpoint.into(), reply_tx))
            .await?;
        reply_rx.await?
    }

    /// Tear the link down and cancel any pending retry. Resolves once the
    /// driver has settled in `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), LumenError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(LinkCommand::Disconnect(reply_tx)).await?;
        reply_rx.await?;
        Ok(())
    }

    /// Send a raw datagram. Valid only while `Connected`; a transport
    /// error is returned to the caller and faults the link (backoff
    /// reconnects take over, the datagram is not resent).
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), LumenError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(LinkCommand::Send(bytes, reply_tx)).await?;
        reply_rx.await?
    }

    /// Probe the engine with the reserved ping address.
    ///
    /// The reply wait does not occupy the driver; a concurrent
    /// [`disconnect`](Self::disconnect) resolves an in-flight ping with
    /// `NotConnected` instead of waiting the window out.
    pub async fn ping(&self) -> Result<PingOutcome, LumenError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(LinkCommand::Ping(reply_tx)).await?;
        reply_rx.await?
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }
}

// ── Driver ───────────────────────────────────────────────────────

struct Driver {
    state: LinkState,
    state_tx: watch::Sender<LinkState>,
    socket: Option<Arc<UdpSocket>>,
    endpoint: Option<String>,
    retry_at: Option<Instant>,
    attempt: u32,
    // Cancellation handles for in-flight ping waits.
    ping_cancels: Vec<oneshot::Sender<()>>,
}

async fn drive(mut rx: mpsc::Receiver<LinkCommand>, state_tx: watch::Sender<LinkState>) {
    let mut driver = Driver {
        state: LinkState::default(),
        state_tx,
        socket: None,
        endpoint: None,
        retry_at: None,
        attempt: 0,
        ping_cancels: Vec::new(),
    };

    loop {
        let retry_deadline = driver.retry_at.map(tokio::time::Instant::from_std);
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                driver.handle(cmd).await;
            }
            _ = sleep_until_opt(retry_deadline), if retry_deadline.is_some() => {
                driver.retry_at = None;
                driver.reconnect().await;
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn handle(&mut self, cmd: LinkCommand) {
        match cmd {
            LinkCommand::Connect(endpoint, reply) => {
                let result = self.connect(endpoint).await;
                let _ = reply.send(result);
            }
            LinkCommand::Disconnect(reply) => {
                self.teardown();
                let _ = reply.send(());
            }
            LinkCommand::Send(bytes, reply) => {
                let result = self.send(&bytes).await;
                let _ = reply.send(result);
            }
            LinkCommand::Ping(reply) => {
                self.ping(reply).await;
            }
        }
    }

    async fn connect(&mut self, endpoint: String) -> Result<(), LumenError> {
        if self.state.is_connected() && self.endpoint.as_deref() == Some(endpoint.as_str()) {
            return Ok(());
        }
        if !self.state.is_disconnected() {
            self.teardown();
        }
        self.endpoint = Some(endpoint);
        self.attempt = 0;
        self.attempt_connect().await
    }

    /// One attempt against the stored endpoint. Schedules the next retry
    /// on failure, up to the attempt cap.
    async fn attempt_connect(&mut self) -> Result<(), LumenError> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Err(LumenError::NotConnected);
        };
        self.transition(|s| s.begin_connect())?;

        match open_socket(&endpoint).await {
            Ok(socket) => {
                debug!(%endpoint, "engine link up");
                self.socket = Some(Arc::new(socket));
                self.attempt = 0;
                self.transition(|s| s.mark_connected())?;
                Ok(())
            }
            Err(e) => {
                let reason = format!("connect {endpoint}: {e}");
                self.transition(|s| s.mark_failed(&reason))?;
                self.schedule_retry(&reason);
                Err(LumenError::Transport(e))
            }
        }
    }

    async fn reconnect(&mut self) {
        // Disconnect during the backoff wait cancels the retry.
        if !self.state.is_failed() {
            return;
        }
        if let Err(e) = self.attempt_connect().await {
            debug!(attempt = self.attempt, error = %e, "reconnect attempt failed");
        }
    }

    fn schedule_retry(&mut self, reason: &str) {
        self.attempt += 1;
        if self.attempt >= MAX_ATTEMPTS {
            warn!(attempts = self.attempt, %reason, "engine link giving up");
            self.retry_at = None;
            return;
        }
        let delay = backoff_delay(self.attempt);
        debug!(attempt = self.attempt, ?delay, %reason, "engine link retry scheduled");
        self.retry_at = Some(Instant::now() + delay);
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), LumenError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(LumenError::NotConnected);
        };
        match socket.send(bytes).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let reason = format!("send: {e}");
                warn!(%reason, "engine link faulted");
                self.socket = None;
                self.cancel_pings();
                self.transition(|s| s.mark_failed(&reason))?;
                self.schedule_retry(&reason);
                Err(LumenError::Transport(e))
            }
        }
    }

    /// Send the probe, then hand the reply wait to its own task so the
    /// driver keeps serving commands while the window runs.
    async fn ping(&mut self, reply: oneshot::Sender<Result<PingOutcome, LumenError>>) {
        let probe = match OscMessage::new(osc::address::PING).encode() {
            Ok(probe) => probe,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        let started = Instant::now();
        if let Err(e) = self.send(&probe).await {
            let _ = reply.send(Err(e));
            return;
        }
        let Some(socket) = self.socket.clone() else {
            let _ = reply.send(Err(LumenError::NotConnected));
            return;
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.ping_cancels.retain(|c| !c.is_closed());
        self.ping_cancels.push(cancel_tx);

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let result = tokio::select! {
                cancelled = cancel_rx => match cancelled {
                    Ok(()) => Err(LumenError::NotConnected),
                    Err(_) => Err(LumenError::ChannelClosed),
                },
                recv = tokio::time::timeout(PING_TIMEOUT, socket.recv(&mut buf)) => {
                    Ok(match recv {
                        Ok(Ok(_)) => PingOutcome::Acknowledged(started.elapsed()),
                        Ok(Err(e)) => {
                            // Recv errors here usually mean ICMP
                            // port-unreachable from a closed port; the
                            // send itself went out.
                            debug!(error = %e, "ping recv error");
                            PingOutcome::SentUnacknowledged
                        }
                        Err(_) => PingOutcome::SentUnacknowledged,
                    })
                }
            };
            let _ = reply.send(result);
        });
    }

    fn cancel_pings(&mut self) {
        for cancel in self.ping_cancels.drain(..) {
            let _ = cancel.send(());
        }
    }

    fn teardown(&mut self) {
        self.socket = None;
        self.retry_at = None;
        self.attempt = 0;
        self.cancel_pings();
        self.state.close();
        self.publish();
    }

    fn transition(
        &mut self,
        f: impl FnOnce(&mut LinkState) -> Result<(), LumenError>,
    ) -> Result<(), LumenError> {
        f(&mut self.state)?;
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

async fn open_socket(endpoint: &str) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(endpoint).await?;
    Ok(socket)
}

/// Exponential backoff with ±25% jitter: `attempt` 1 waits ~250ms, each
/// further attempt doubles, capped at 5s. Shared with the peer client's
/// reconnect loop.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = base_backoff(attempt);
    let jitter = rand::rng().random_range(0.75..=1.25);
    base.mul_f64(jitter)
}

fn base_backoff(attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    (INITIAL_BACKOFF * 2u32.pow(doublings)).min(MAX_BACKOFF)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn fake_engine() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    #[tokio::test]
    async fn connect_then_send_reaches_engine() {
        let (engine, addr) = fake_engine().await;
        let link = EngineLink::spawn();

        link.connect(&addr).await.unwrap();
        assert!(link.state().is_connected());

        link.send(b"/test\0\0\0,\0\0\0".to_vec()).await.unwrap();

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(1), engine.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"/test\0\0\0,\0\0\0");
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected() {
        let link = EngineLink::spawn();
        let err = link.send(vec![0u8; 8]).await.unwrap_err();
        assert!(matches!(err, LumenError::NotConnected));
    }

    #[tokio::test]
    async fn connect_is_idempotent_for_same_endpoint() {
        let (_engine, addr) = fake_engine().await;
        let link = EngineLink::spawn();

        link.connect(&addr).await.unwrap();
        let since = match link.state() {
            LinkState::Connected { since } => since,
            other => panic!("unexpected state {other}"),
        };

        link.connect(&addr).await.unwrap();
        match link.state() {
            LinkState::Connected { since: again } => assert_eq!(since, again),
            other => panic!("unexpected state {other}"),
        }
    }

    #[tokio::test]
    async fn disconnect_settles_in_disconnected() {
        let (_engine, addr) = fake_engine().await;
        let link = EngineLink::spawn();

        link.connect(&addr).await.unwrap();
        link.disconnect().await.unwrap();
        assert!(link.state().is_disconnected());

        let err = link.send(vec![0u8; 8]).await.unwrap_err();
        assert!(matches!(err, LumenError::NotConnected));
    }

    #[tokio::test]
    async fn unresolvable_endpoint_faults_the_link() {
        let link = EngineLink::spawn();
        let err = link
            .connect("this-host-does-not-exist.invalid:2269")
            .await
            .unwrap_err();
        assert!(matches!(err, LumenError::Transport(_)));
        assert!(link.state().is_failed());
    }

    #[tokio::test]
    async fn ping_acknowledged_by_echoing_engine() {
        let (engine, addr) = fake_engine().await;
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((n, from)) = engine.recv_from(&mut buf).await else {
                    break;
                };
                let _ = engine.send_to(&buf[..n], from).await;
            }
        });

        let link = EngineLink::spawn();
        link.connect(&addr).await.unwrap();
        match link.ping().await.unwrap() {
            PingOutcome::Acknowledged(rtt) => assert!(rtt < PING_TIMEOUT),
            PingOutcome::SentUnacknowledged => panic!("echo server should acknowledge"),
        }
    }

    #[tokio::test]
    async fn disconnect_cancels_an_inflight_ping() {
        // The fake engine stays silent, so the ping would otherwise run
        // out its full window.
        let (_engine, addr) = fake_engine().await;
        let link = EngineLink::spawn();
        link.connect(&addr).await.unwrap();

        let pinger = link.clone();
        let inflight = tokio::spawn(async move { pinger.ping().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        link.disconnect().await.unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "disconnect must not wait out the ping window"
        );
        assert!(link.state().is_disconnected());

        let err = inflight.await.unwrap().unwrap_err();
        assert!(matches!(err, LumenError::NotConnected));
    }

    #[tokio::test]
    async fn ping_without_reply_is_unacknowledged() {
        let (_engine, addr) = fake_engine().await;
        let link = EngineLink::spawn();
        link.connect(&addr).await.unwrap();
        // The fake engine never replies.
        assert_eq!(
            link.ping().await.unwrap(),
            PingOutcome::SentUnacknowledged
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(base_backoff(1), Duration::from_millis(250));
        assert_eq!(base_backoff(2), Duration::from_millis(500));
        assert_eq!(base_backoff(3), Duration::from_secs(1));
        assert_eq!(base_backoff(6), Duration::from_secs(5));
        assert_eq!(base_backoff(60), Duration::from_secs(5));
    }

    #[test]
    fn backoff_jitter_stays_in_band() {
        for attempt in 1..=8 {
            let base = base_backoff(attempt);
            for _ in 0..32 {
                let d = backoff_delay(attempt);
                assert!(d >= base.mul_f64(0.75), "attempt {attempt}: {d:?}");
                assert!(d <= base.mul_f64(1.25), "attempt {attempt}: {d:?}");
            }
        }
    }
}
