//! LAN host discovery over UDP beacons.
//!
//! A host periodically broadcasts a small text beacon carrying the
//! service identifier, its session TCP port and its display name. Clients
//! listen for a bounded window and return every distinct host heard.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::LumenError;

/// Service identifier carried in every beacon.
pub const SERVICE_ID: &str = "lumen._sync";
/// Well-known UDP port beacons are sent to.
pub const DISCOVERY_PORT: u16 = 2270;
/// Interval between beacons.
const BEACON_INTERVAL: Duration = Duration::from_secs(2);

/// One host heard on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAnnouncement {
    /// Display name the host advertises.
    pub name: String,
    /// Where the host accepts peer sessions.
    pub addr: SocketAddr,
}

fn beacon(name: &str, session_port: u16) -> String {
    format!("{SERVICE_ID} {session_port} {name}")
}

/// Parse a beacon datagram received from `src`.
///
/// The advertised address combines the sender's IP with the TCP port
/// named in the beacon. Anything that is not a well-formed beacon for
/// this service is ignored.
fn parse_beacon(data: &[u8], src: SocketAddr) -> Option<HostAnnouncement> {
    let text = std::str::from_utf8(data).ok()?;
    let mut parts = text.splitn(3, ' ');
    if parts.next()? != SERVICE_ID {
        return None;
    }
    let port: u16 = parts.next()?.parse().ok()?;
    let name = parts.next()?.trim();
    if port == 0 || name.is_empty() {
        return None;
    }
    Some(HostAnnouncement {
        name: name.to_string(),
        addr: SocketAddr::new(src.ip(), port),
    })
}

// ── Advertiser ───────────────────────────────────────────────────

/// Background task broadcasting this host's beacon until dropped.
#[derive(Debug)]
pub struct Advertiser {
    task: JoinHandle<()>,
}

impl Advertiser {
    /// Advertise on the local broadcast address and well-known port.
    pub async fn spawn(name: impl Into<String>, session_port: u16) -> Result<Self, LumenError> {
        let target = SocketAddr::new(Ipv4Addr::BROADCAST.into(), DISCOVERY_PORT);
        Self::spawn_to(name, session_port, target).await
    }

    /// Advertise to an explicit target address. Used directly in tests
    /// and on networks where broadcast is filtered.
    pub async fn spawn_to(
        name: impl Into<String>,
        session_port: u16,
        target: SocketAddr,
    ) -> Result<Self, LumenError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        let payload = beacon(&name.into(), session_port);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(BEACON_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = socket.send_to(payload.as_bytes(), target).await {
                    warn!(error = %e, %target, "beacon send failed");
                }
            }
        });
        Ok(Self { task })
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Browse ───────────────────────────────────────────────────────

/// Listen on the well-known discovery port for `window`, returning every
/// distinct host heard.
pub async fn browse(window: Duration) -> Result<Vec<HostAnnouncement>, LumenError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)).await?;
    Ok(collect(&socket, window).await)
}

async fn collect(socket: &UdpSocket, window: Duration) -> Vec<HostAnnouncement> {
    let deadline = tokio::time::Instant::now() + window;
    let mut found: Vec<HostAnnouncement> = Vec::new();
    let mut buf = [0u8; 512];

    loop {
        let received = tokio::select! {
            r = socket.recv_from(&mut buf) => r,
            _ = tokio::time::sleep_until(deadline) => break,
        };
        match received {
            Ok((n, src)) => {
                if let Some(host) = parse_beacon(&buf[..n], src) {
                    if !found.contains(&host) {
                        debug!(name = %host.name, addr = %host.addr, "host discovered");
                        found.push(host);
                    }
                } else {
                    debug!(%src, "ignoring malformed beacon");
                }
            }
            Err(e) => {
                warn!(error = %e, "discovery recv failed");
                break;
            }
        }
    }
    found
}

// ── Tests ────────────────────────────────────────────────────────
