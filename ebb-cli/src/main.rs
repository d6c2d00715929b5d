//! `ebbctl` - operator tool for Ebb node shutdowns.
//!
//! Loads a cluster state from a TOML fixture, applies a shutdown command
//! through the cluster coordinator and prints the result as JSON.
//!
//! ```bash
//! # Status of every node with a shutdown record
//! ebbctl --state cluster.toml status
//!
//! # Replace node a by the node named node-b
//! ebbctl --state cluster.toml put --node a --type replace --target node-b --reason "hardware refresh"
//!
//! # Restart with a 10 minute allocation delay
//! ebbctl --state cluster.toml --limits limits.toml put --node a --type restart \
//!     --reason "kernel upgrade" --allocation-delay-secs 600
//!
//! # Cancel
//! ebbctl --state cluster.toml delete --node a
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod fixture;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use ebb_cluster::{spawn_cluster_coordinator, ShutdownType};
use ebb_core::{Limits, NodeId, NodeName};
use ebb_shutdown::{
    DeleteShutdownRequest, GetShutdownStatusRequest, PutShutdownRequest, ShutdownService,
};
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::fixture::ClusterFixture;

/// Shutdown type accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ShutdownKind {
    /// Leave the cluster for good.
    Remove,
    /// Restart and keep data.
    Restart,
    /// Hand all data to a named successor.
    Replace,
}

impl From<ShutdownKind> for ShutdownType {
    fn from(kind: ShutdownKind) -> Self {
        match kind {
            ShutdownKind::Remove => Self::Remove,
            ShutdownKind::Restart => Self::Restart,
            ShutdownKind::Replace => Self::Replace,
        }
    }
}

/// Commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Show shutdown records and their migration status.
    Status {
        /// Only this node.
        #[arg(long)]
        node: Option<String>,
    },
    /// Register or replace a shutdown record.
    Put {
        /// Node to shut down.
        #[arg(long)]
        node: String,
        /// Kind of shutdown.
        #[arg(long = "type", value_enum)]
        kind: ShutdownKind,
        /// Why the node is shutting down.
        #[arg(long)]
        reason: String,
        /// Name of the replacement node (replace only).
        #[arg(long)]
        target: Option<String>,
        /// Allocation delay in seconds (restart only).
        #[arg(long)]
        allocation_delay_secs: Option<u64>,
    },
    /// Delete a shutdown record.
    Delete {
        /// Node whose record is deleted.
        #[arg(long)]
        node: String,
    },
}

/// Ebb node shutdown tool.
#[derive(Parser, Debug)]
#[command(name = "ebbctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cluster state fixture (TOML).
    #[arg(long)]
    state: PathBuf,

    /// Limits file (TOML). Defaults apply when omitted.
    #[arg(long)]
    limits: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Command to run.
    #[command(subcommand)]
    command: Command,
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays valid JSON.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let limits = match &args.limits {
        Some(path) => Limits::from_file(path)?,
        None => Limits::new(),
    };
    let state = ClusterFixture::from_file(&args.state)?.into_state(&limits)?;
    info!(
        state = %args.state.display(),
        nodes = state.nodes().len(),
        shard_copies = state.routing().len(),
        shutdowns = state.shutdowns().len(),
        "Loaded cluster state"
    );

    let cluster = spawn_cluster_coordinator(state, &limits);
    let service = ShutdownService::new(cluster.clone(), limits);

    let output = match args.command {
        Command::Status { node } => {
            let request = GetShutdownStatusRequest {
                node_id: node.map(NodeId::new),
            };
            serde_json::to_value(service.get_status(&request))?
        }
        Command::Put {
            node,
            kind,
            reason,
            target,
            allocation_delay_secs,
        } => {
            let request = PutShutdownRequest {
                node_id: NodeId::new(node.as_str()),
                shutdown_type: kind.into(),
                reason,
                allocation_delay_us: allocation_delay_secs.map(|s| s.saturating_mul(1_000_000)),
                target_node_name: target.map(NodeName::new),
            };
            let ack = service.put_shutdown(request, now_us()).await?;
            let status = service.get_status(&GetShutdownStatusRequest::node(node));
            json!({ "acknowledged": ack.acknowledged, "status": status })
        }
        Command::Delete { node } => {
            let ack = service.delete_shutdown(DeleteShutdownRequest::new(node.as_str())).await?;
            let status = service.get_status(&GetShutdownStatusRequest::all());
            json!({ "acknowledged": ack.acknowledged, "status": status })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    cluster.shutdown().await;
    Ok(())
}
