//! Lumen client: mirrors a host's queue and submits commands upstream.
//!
//! Without `--host` the client browses the LAN for advertised hosts and
//! connects to the first one heard.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use lumen_core::{ClientSession, PeerCommand, peer::discovery};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lumen-client", about = "LED-wall message dispatcher, client role")]
struct Args {
    /// Host session address; discovered on the LAN when omitted.
    #[arg(long)]
    host: Option<SocketAddr>,

    /// How long to browse for hosts, in seconds.
    #[arg(long, default_value_t = 5)]
    browse_secs: u64,
}

async fn pick_host(args: &Args) -> anyhow::Result<SocketAddr> {
    if let Some(addr) = args.host {
        return Ok(addr);
    }
    info!(secs = args.browse_secs, "browsing for hosts");
    let hosts = discovery::browse(Duration::from_secs(args.browse_secs)).await?;
    match hosts.first() {
        Some(host) => {
            info!(name = %host.name, addr = %host.addr, "host discovered");
            Ok(host.addr)
        }
        None => bail!("no hosts heard on the network; try --host <addr>"),
    }
}

fn print_queue(session: &ClientSession) {
    match session.queue() {
        Some(queue) => {
            println!("queue {:?} ({} messages):", queue.name, queue.len());
            for (i, message) in queue.messages().iter().enumerate() {
                let marker = if queue.current_index() == Some(i) { ">" } else { " " };
                let sent = if message.sent { "sent" } else { "    " };
                println!("{marker} [{i}] {sent} {}", message.text);
            }
        }
        None => println!("no snapshot received yet"),
    }
}

/// Returns `false` when the console asked to quit.
async fn handle_line(session: &ClientSession, line: &str) -> bool {
    let line = line.trim();
    let (command, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };

    let result = match command {
        "" => Ok(()),
        "help" => {
            println!("commands: list | send <index> | clear | refresh | state | quit");
            Ok(())
        }
        "list" => {
            print_queue(session);
            Ok(())
        }
        "send" => match rest.parse::<usize>() {
            Ok(index) => match session.queue().as_deref().and_then(|q| q.get(index)).map(|m| m.id) {
                Some(id) => session.request(PeerCommand::SendMessage(id)).await,
                None => {
                    println!("no message at index {index}");
                    Ok(())
                }
            },
            Err(_) => {
                println!("send takes a queue index");
                Ok(())
            }
        },
        "clear" => session.request(PeerCommand::ClearCurrent).await,
        "refresh" => session.request(PeerCommand::RequestRefresh).await,
        "state" => {
            println!("session: {}", session.status());
            Ok(())
        }
        "quit" | "exit" => return false,
        other => {
            println!("unknown command {other:?}, try `help`");
            Ok(())
        }
    };
    if let Err(e) = result {
        println!("error: {e}");
    }
    true
}

async fn run(args: Args) -> anyhow::Result<()> {
    let host = pick_host(&args).await?;
    let session = ClientSession::spawn(host);
    let mut queue_rx = session.subscribe_queue();
    let mut status_rx = session.subscribe_status();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("lumen-client -> {host}; type `help` for commands");

    loop {
        tokio::select! {
            changed = queue_rx.changed() => {
                changed.context("session ended")?;
                print_queue(&session);
            }
            changed = status_rx.changed() => {
                changed.context("session ended")?;
                println!("session: {}", status_rx.borrow().clone());
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(&session, &line).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    session.shutdown().await.ok();
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
