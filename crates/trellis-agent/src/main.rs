//! Trellis connection-manager daemon.
//!
//! Wires the CM core to the host:
//! - seeds the in-process configuration store from the bootstrap config
//! - provides the system collaborators (prober, udhcpc dry-runs, tcpdump,
//!   watchdog, restart hook)
//! - runs the core's worker thread until SIGINT
//! - in `--simulate` mode, stands in for the cloud so the full bring-up
//!   chain can run on a dev box

mod config;
mod platform;
mod prober;
mod sim;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trellis_cm::caps::Prober;
use trellis_cm::context::CoreCaps;
use trellis_cm::resolve::ThreadResolver;
use trellis_cm::CmRuntime;
use trellis_common::rows::AwlanNode;

use crate::config::AgentConfig;
use crate::platform::SystemPlatform;
use crate::prober::{CommandProber, SimProber, SystemProber};
use crate::store::MemStore;

/// Trellis connection-manager daemon.
#[derive(Parser, Debug)]
#[command(name = "trellisd", about = "Trellis connection manager")]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the state snapshot directory.
    #[arg(long)]
    state_dir: Option<String>,

    /// Run with fake connectivity and a stand-in cloud.
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Snapshot log interval in seconds.
    #[arg(long, default_value_t = 30)]
    snapshot_interval: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = AgentConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.state_dir {
        cfg.cm.state_dir = dir;
    }

    info!(
        simulate = cli.simulate,
        redirector = %cfg.bootstrap.redirector_addr,
        uplinks = cfg.bootstrap.uplinks.len(),
        "trellisd starting"
    );

    // ── Store, seeded from the bootstrap rows ───────────────────
    let store = Arc::new(MemStore::new());
    store.seed_awlan(AwlanNode {
        redirector_addr: cfg.bootstrap.redirector_addr.clone(),
        manager_addr: cfg.bootstrap.manager_addr.clone(),
        min_backoff: cfg.bootstrap.min_backoff,
        max_backoff: cfg.bootstrap.max_backoff,
        device_mode: cfg.bootstrap.device_mode.clone(),
    });
    for u in &cfg.bootstrap.uplinks {
        store.seed_uplink(u.to_row());
        store.seed_inet_state(u.to_inet_state());
    }

    // ── Collaborators ───────────────────────────────────────────
    let prober: Arc<dyn Prober> = if cli.simulate {
        Arc::new(SimProber)
    } else if let Some(cmd) = &cfg.platform.probe_command {
        Arc::new(CommandProber::new(cmd))
    } else {
        Arc::new(SystemProber::new(&cfg.platform.internet_probe_addr))
    };
    let caps = CoreCaps {
        store: Arc::clone(&store) as _,
        prober,
        resolver: Arc::new(ThreadResolver::default()),
        platform: Arc::new(SystemPlatform::new(cfg.platform.clone())),
    };

    // ── Core runtime ────────────────────────────────────────────
    let mut runtime = CmRuntime::new(cfg.cm.clone(), caps);
    store.set_events(runtime.events());

    // Replay the seeded rows through the watch path so the core sees the
    // same initial observations the real store would deliver.
    runtime.awlan_row(store.awlan_row());
    runtime.manager_row(store.manager_row());
    for row in store.uplink_rows() {
        runtime.uplink_row(row);
    }
    for u in &cfg.bootstrap.uplinks {
        runtime.inet_state_row(u.to_inet_state());
    }

    let sim = cli.simulate.then(|| sim::spawn(Arc::clone(&store)));

    // ── Run until SIGINT ────────────────────────────────────────
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    loop {
        match stop_rx.recv_timeout(Duration::from_secs(cli.snapshot_interval.max(1))) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let s = runtime.snapshot();
                info!(
                    state = %s.state,
                    dest = %s.dest,
                    connected = s.connected,
                    stable = s.stable,
                    disconnects = s.disconnects,
                    target = %s.target,
                    "cm status"
                );
            }
        }
    }

    info!("trellisd stopping");
    if let Some(sim) = sim {
        sim.stop();
    }
    runtime.shutdown();
    Ok(())
}
