//! Interactive relay simulator.
//!
//! Seeds a small simulated mesh, then reads commands from stdin:
//!
//!   <target> <message>   relay a message (target is a shortname or !hex id)
//!   /heard <target>      mark a node as heard and re-deliver its backlog
//!   /optout <target>     opt a node out of relays
//!   /optin <target>      opt it back in
//!   /stats               print counters

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use meshrelay::{
    LinkBehaviour, NodeId, NodeInfo, NodeTable, RelayConfig, RelayCore, SimulatedRadio,
    SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const SENDER: NodeId = NodeId(0x0000_0001);

fn seed_nodes(table: &NodeTable, radio: &SimulatedRadio) {
    let now = Utc::now();
    let nodes = [
        (SENDER, "Base", now, LinkBehaviour::confirm()),
        (
            NodeId(0xa1b2_c3d4),
            "SnMo",
            now,
            LinkBehaviour::Confirm {
                delay: Duration::from_millis(300),
            },
        ),
        (
            NodeId(0x0bad_cafe),
            "Ridg",
            now,
            LinkBehaviour::Lossy {
                loss_rate: 0.3,
                delay: Duration::from_millis(500),
            },
        ),
        (
            NodeId(0x00c0_ffee),
            "Camp",
            now - ChronoDuration::hours(2),
            LinkBehaviour::Silent,
        ),
        (NodeId(0x0000_dead), "Qrtz", now, LinkBehaviour::Unavailable),
    ];

    for (node_id, name, heard, link) in nodes {
        table.upsert(
            NodeInfo::new(node_id, name)
                .heard_at(heard)
                .with_signal(5.5, 1),
        );
        radio.set_link(node_id, link);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = RelayConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RelayConfig::default()
    });
    if std::env::var("MESHRELAY_DB").is_err() {
        config.storage.database_url = "sqlite::memory:".to_string();
    }

    let table = Arc::new(NodeTable::new());
    let (radio, acks) = SimulatedRadio::new();
    seed_nodes(&table, &radio);

    let (core, mut notices) = RelayCore::start(
        config,
        table.clone(),
        radio.clone(),
        acks,
        Arc::new(SystemClock),
    )
    .await
    .context("failed to start relay core")?;

    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            println!("[to {}] {}", notice.sender_id, notice.text);
        }
    });

    println!("meshrelay simulator: nodes Base, SnMo, Ridg, Camp (offline), Qrtz (broken radio)");
    println!("type `<target> <message>` or /heard, /optout, /optin, /stats");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if let Err(e) = handle_line(&core, &table, line.trim()).await {
                    println!("error: {e:#}");
                }
            }
        }
    }

    core.shutdown().await;
    Ok(())
}

async fn handle_line(core: &RelayCore, table: &NodeTable, line: &str) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }

    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match head {
        "/stats" => println!("{}", core.stats().await),
        "/heard" | "/optout" | "/optin" => {
            let node_id = core
                .directory()
                .resolve_target(rest)
                .with_context(|| format!("unknown node '{rest}'"))?;
            match head {
                "/heard" => {
                    table.mark_heard(node_id, Utc::now());
                    // Rebuilding re-delivers to nodes that just became active
                    let revived = core.refresh_directory_now().await;
                    if !revived.contains(&node_id) {
                        let report = core.observe_node_heard(node_id).await;
                        println!("{} queued relay(s) resubmitted", report.resubmitted.len());
                    } else {
                        println!("{node_id} is active again");
                    }
                }
                "/optout" => {
                    core.opt_out(node_id).await?;
                    println!("{node_id} opted out");
                }
                _ => {
                    core.opt_in(node_id).await?;
                    println!("{node_id} opted in");
                }
            }
        }
        target => match core.submit_relay(SENDER.to_string(), target, rest) {
            Ok(accepted) => println!(
                "relay {} accepted for {}",
                accepted.request_id, accepted.recipient
            ),
            Err(rejection) => println!("{rejection}"),
        },
    }
    Ok(())
}
