//! Lumen host: drives the LED wall over OSC and serves remote clients.
//!
//! The host owns the authoritative message queue and settings. A small
//! line console stands in for a front-end: type `help` for the commands.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use lumen_core::{
    EngineLink, HostEvent, HostSession, Message, MessageQueue, OscSettings, PingOutcome,
    SendOutcome, WallSender, peer::Advertiser,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "lumen-host", about = "LED-wall message dispatcher, host role")]
struct Args {
    /// Path to a JSON settings file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// TCP port to serve peer sessions on (0 picks a free port).
    #[arg(long, default_value_t = 2271)]
    listen_port: u16,

    /// Name advertised to browsing clients.
    #[arg(long, default_value = "Lumen Host")]
    name: String,

    /// Skip LAN advertisement.
    #[arg(long)]
    no_advertise: bool,
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<OscSettings> {
    let Some(path) = path else {
        return Ok(OscSettings::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    let settings: OscSettings =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    settings.validate().context("validating settings")?;
    Ok(settings)
}

struct HostApp {
    sender: WallSender,
    session: HostSession,
}

impl HostApp {
    async fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::ClientConnected(addr) => info!(%addr, "client connected"),
            HostEvent::ClientDisconnected(addr) => info!(%addr, "client disconnected"),
            HostEvent::SendRequested(id) => {
                if let Err(e) = self.dispatch(id).await {
                    warn!(%id, error = %e, "remote send request failed");
                }
            }
            HostEvent::ClearRequested => {
                if let Err(e) = self.sender.clear_current().await {
                    warn!(error = %e, "remote clear request failed");
                }
            }
        }
    }

    /// Send the identified queue message to the wall and record it.
    async fn dispatch(&self, id: Uuid) -> anyhow::Result<()> {
        let queue = self.session.queue();
        let message = queue
            .find(&id)
            .with_context(|| format!("no message {id} in queue"))?;

        match self.sender.send_message(message).await? {
            SendOutcome::Sent => {
                self.session.mark_sent(id, Utc::now()).await?;
                println!("sent: {}", message.text);
            }
            SendOutcome::SkippedDuplicate => println!("skipped duplicate: {}", message.text),
        }
        Ok(())
    }

    /// Returns `false` when the console asked to quit.
    async fn handle_line(&self, line: &str) -> bool {
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };

        let result = match command {
            "" => Ok(()),
            "help" => {
                println!(
                    "commands: add <text> | list | send [index] | clear | test | state | quit"
                );
                Ok(())
            }
            "add" if !rest.is_empty() => {
                self.session
                    .push_message(Message::new(rest))
                    .await
                    .map(|_| println!("queued: {rest}"))
                    .map_err(anyhow::Error::from)
            }
            "list" => {
                let queue = self.session.queue();
                for (i, message) in queue.messages().iter().enumerate() {
                    let marker = if queue.current_index() == Some(i) { ">" } else { " " };
                    let sent = if message.sent { "sent" } else { "    " };
                    println!("{marker} [{i}] {sent} {}", message.text);
                }
                Ok(())
            }
            "send" => self.send_by_index(rest).await,
            "clear" => match self.sender.clear_current().await {
                Ok(SendOutcome::Sent) => {
                    println!("cleared");
                    Ok(())
                }
                Ok(SendOutcome::SkippedDuplicate) => {
                    println!("already clearing");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            "test" => match self.sender.test_connection().await {
                Ok(PingOutcome::Acknowledged(rtt)) => {
                    println!("engine replied in {rtt:?}");
                    Ok(())
                }
                Ok(PingOutcome::SentUnacknowledged) => {
                    println!("probe sent, no reply (normal for UDP engines)");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            "state" => {
                println!(
                    "link: {} | queue: {} messages",
                    self.sender.state(),
                    self.session.queue().len()
                );
                Ok(())
            }
            "quit" | "exit" => return false,
            other => {
                println!("unknown command {other:?}, try `help`");
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("error: {e:#}");
        }
        true
    }

    async fn send_by_index(&self, rest: &str) -> anyhow::Result<()> {
        let queue = self.session.queue();
        let index = if rest.is_empty() {
            queue.current_index().unwrap_or(0)
        } else {
            rest.parse().context("send takes a queue index")?
        };
        let message = queue
            .get(index)
            .with_context(|| format!("no message at index {index}"))?;
        self.dispatch(message.id).await
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings = load_settings(args.config.as_deref())?;
    info!(endpoint = %settings.endpoint(), "engine target");

    let link = EngineLink::spawn();
    let sender = WallSender::new(link, settings.clone())?;
    if let Err(e) = sender.connect().await {
        // Backoff retries keep running in the background.
        warn!(error = %e, "initial engine connect failed");
    }

    let listen = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), args.listen_port);
    let (session, local_addr, mut events) =
        HostSession::bind(listen, settings, MessageQueue::new(&args.name)).await?;

    let _advertiser = if args.no_advertise {
        None
    } else {
        Some(Advertiser::spawn(&args.name, local_addr.port()).await?)
    };

    let app = HostApp { sender, session };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("lumen-host on {local_addr}; type `help` for commands");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => app.handle_event(event).await,
                    None => break,
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !app.handle_line(&line).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    app.sender.disconnect().await.ok();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    run(Args::parse()).await
}
