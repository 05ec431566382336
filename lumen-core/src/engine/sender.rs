//! High-level dispatch to the wall: rotation, dedupe, rate limiting and
//! auto-clear composed over an [`EngineLink`].
//!
//! `WallSender` is the surface the host application talks to. Internally
//! every outbound datagram goes through one bounded FIFO queue drained by
//! a single task holding the token bucket, so per-target ordering is
//! preserved end to end. A full queue rejects with `RateLimited` rather
//! than dropping silently.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::link::{EngineLink, PingOutcome};
use crate::engine::rotation::ClipRotation;
use crate::engine::state::LinkState;
use crate::engine::throttle::{DedupeCache, SendOutcome, TokenBucket};
use crate::error::LumenError;
use crate::model::{Message, OscSettings};
use crate::osc::{OscMessage, address};

/// Sustained outbound rate towards the engine, datagrams per second.
const RATE_LIMIT_PER_SEC: f64 = 20.0;
/// Burst allowance above the sustained rate.
const RATE_LIMIT_BURST: u32 = 8;
/// Dispatch queue depth; overflow surfaces as `RateLimited`.
const DISPATCH_QUEUE_DEPTH: usize = 64;

struct Dispatch {
    datagrams: Vec<Vec<u8>>,
    reply: Option<oneshot::Sender<Result<(), LumenError>>>,
}

struct Inner {
    settings: OscSettings,
    rotation: ClipRotation,
    dedupe: DedupeCache,
    auto_clear: Option<JoinHandle<()>>,
}

/// Cloneable handle over the engine-facing dispatch pipeline.
#[derive(Clone)]
pub struct WallSender {
    link: EngineLink,
    dispatch_tx: mpsc::Sender<Dispatch>,
    inner: Arc<Mutex<Inner>>,
}

impl WallSender {
    /// Build a sender over `link` with validated `settings`. Spawns the
    /// dispatch drain task; the link is not connected yet.
    pub fn new(link: EngineLink, settings: OscSettings) -> Result<Self, LumenError> {
        settings.validate()?;
        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_QUEUE_DEPTH);
        tokio::spawn(drain(dispatch_rx, link.clone()));

        let rotation = ClipRotation::new(settings.clip, settings.rotation_count);
        Ok(Self {
            link,
            dispatch_tx,
            inner: Arc::new(Mutex::new(Inner {
                settings,
                rotation,
                dedupe: DedupeCache::default(),
                auto_clear: None,
            })),
        })
    }

    /// Override the duplicate-suppression window (builder style).
    pub fn with_dedupe_window(self, window: Duration) -> Self {
        self.lock().dedupe = DedupeCache::new(window);
        self
    }

    /// Connect the underlying link to the configured endpoint.
    pub async fn connect(&self) -> Result<(), LumenError> {
        let endpoint = self.lock().settings.endpoint();
        self.link.connect(endpoint).await
    }

    /// Tear the link down.
    pub async fn disconnect(&self) -> Result<(), LumenError> {
        self.link.disconnect().await
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    /// Subscribe to link state changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    /// Display `message` on the wall: set its text on the next rotated
    /// clip slot, then trigger that slot. When auto-clear is enabled a
    /// delayed clear is scheduled, replacing any previously pending one.
    ///
    /// Returns `SkippedDuplicate` without triggering when the identical
    /// text was just sent to the same slot.
    pub async fn send_message(&self, message: &Message) -> Result<SendOutcome, LumenError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let auto_clear;
        let text_addr;
        {
            let mut inner = self.lock();
            let layer = inner.settings.layer;
            let slot = inner.rotation.next_slot();

            text_addr = address::clip_text(layer, slot);
            let set_text = OscMessage::new(&text_addr)
                .with_arg(message.text.as_str())
                .encode()?;
            if inner.dedupe.is_duplicate(&text_addr, &set_text) {
                debug!(%text_addr, "duplicate text send suppressed");
                return Ok(SendOutcome::SkippedDuplicate);
            }
            let trigger = OscMessage::new(address::clip_connect(layer, slot)).encode()?;

            if let Err(e) = self.enqueue_locked(Dispatch {
                datagrams: vec![set_text, trigger],
                reply: Some(reply_tx),
            }) {
                inner.dedupe.forget(&text_addr);
                return Err(e);
            }

            auto_clear = inner
                .settings
                .auto_clear
                .then(|| (inner.settings.auto_clear_delay, layer, inner.settings.clear_clip));
        }

        self.await_dispatch(reply_rx, &text_addr).await?;
        if let Some((delay, layer, clear_clip)) = auto_clear {
            self.schedule_auto_clear(delay, layer, clear_clip)?;
        }
        Ok(SendOutcome::Sent)
    }

    /// Blank the wall by triggering the dedicated clear clip. Cancels any
    /// pending auto-clear. Rapid repeat clears are deduped.
    pub async fn clear_current(&self) -> Result<SendOutcome, LumenError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let addr;
        {
            let mut inner = self.lock();
            if let Some(pending) = inner.auto_clear.take() {
                pending.abort();
            }

            addr = address::clip_connect(inner.settings.layer, inner.settings.clear_clip);
            let clear = OscMessage::new(&addr).encode()?;
            if inner.dedupe.is_duplicate(&addr, &clear) {
                return Ok(SendOutcome::SkippedDuplicate);
            }
            if let Err(e) = self.enqueue_locked(Dispatch {
                datagrams: vec![clear],
                reply: Some(reply_tx),
            }) {
                inner.dedupe.forget(&addr);
                return Err(e);
            }
        }
        self.await_dispatch(reply_rx, &addr).await?;
        Ok(SendOutcome::Sent)
    }

    /// Probe the engine. Bypasses the dedupe and rate-limit gates.
    pub async fn test_connection(&self) -> Result<PingOutcome, LumenError> {
        self.link.ping().await
    }

    /// Adopt new settings: the rotation restarts when base clip or count
    /// changed, and the link reconnects when the endpoint changed.
    pub async fn apply_settings(&self, settings: OscSettings) -> Result<(), LumenError> {
        settings.validate()?;
        let endpoint_changed;
        {
            let mut inner = self.lock();
            endpoint_changed = inner.settings.endpoint() != settings.endpoint();
            inner
                .rotation
                .reconfigure(settings.clip, settings.rotation_count);
            inner.settings = settings;
        }
        if endpoint_changed && !self.link.state().is_disconnected() {
            let endpoint = self.lock().settings.endpoint();
            self.link.connect(endpoint).await?;
        }
        Ok(())
    }

    /// Copy of the active settings.
    pub fn settings(&self) -> OscSettings {
        self.lock().settings.clone()
    }

    fn schedule_auto_clear(
        &self,
        delay_secs: f32,
        layer: u32,
        clear_clip: u32,
    ) -> Result<(), LumenError> {
        let clear = OscMessage::new(address::clip_connect(layer, clear_clip)).encode()?;
        let dispatch_tx = self.dispatch_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f32(delay_secs.max(0.0))).await;
            let job = Dispatch {
                datagrams: vec![clear],
                reply: None,
            };
            if dispatch_tx.try_send(job).is_err() {
                warn!("auto-clear dropped: dispatch queue unavailable");
            }
        });

        let mut inner = self.lock();
        if let Some(previous) = inner.auto_clear.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Wait for the drain task's verdict. A dispatch that never reached
    /// the transport is not the last send for its address, so the
    /// fingerprint recorded at the gate is rolled back on failure.
    async fn await_dispatch(
        &self,
        reply_rx: oneshot::Receiver<Result<(), LumenError>>,
        dedupe_key: &str,
    ) -> Result<(), LumenError> {
        let result = reply_rx.await.unwrap_or(Err(LumenError::ChannelClosed));
        if let Err(e) = result {
            self.lock().dedupe.forget(dedupe_key);
            return Err(e);
        }
        Ok(())
    }

    // try_send under the lock keeps rotation order and queue order in
    // step across concurrent callers.
    fn enqueue_locked(&self, job: Dispatch) -> Result<(), LumenError> {
        use mpsc::error::TrySendError;
        self.dispatch_tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => LumenError::RateLimited,
            TrySendError::Closed(_) => LumenError::ChannelClosed,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Single drain task: pulls jobs FIFO, paces them through the token
/// bucket, and pushes each datagram over the link in order.
async fn drain(mut rx: mpsc::Receiver<Dispatch>, link: EngineLink) {
    let mut bucket = TokenBucket::new(RATE_LIMIT_BURST, RATE_LIMIT_PER_SEC);
    while let Some(job) = rx.recv().await {
        let mut result = Ok(());
        for datagram in job.datagrams {
            while let Some(wait) = bucket.try_acquire() {
                tokio::time::sleep(wait).await;
            }
            if let Err(e) = link.send(datagram).await {
                result = Err(e);
                break;
            }
        }
        match job.reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!(error = %e, "unattended dispatch failed");
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
