//! The runtime driver: a single worker thread owning the [`CoreContext`]
//! and serializing every event and timer through it.
//!
//! All public methods on [`CmRuntime`] are non-blocking and communicate
//! with the worker via a bounded channel. Dropping the runtime triggers a
//! graceful shutdown of the worker thread.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use quanta::Clock;
use tracing::warn;

use trellis_common::check::CheckMask;
use trellis_common::rows::{AwlanNode, InetStateRow, ManagerRow, UplinkRow};
use trellis_common::types::{Destination, IfType, Reason};

use crate::config::CmConfig;
use crate::context::{CoreCaps, CoreContext};

/// Completion of an async DNS resolution.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Resolved {
        ipv6: Vec<Ipv6Addr>,
        ipv4: Vec<Ipv4Addr>,
    },
    Failed {
        /// Transient failures re-arm the retry path; permanent ones do not.
        transient: bool,
        error: String,
    },
}

/// Completion of an async connectivity probe. `mask` is the encoded
/// [`trellis_common::check::CheckResult`] (the worker's exit status).
#[derive(Debug, Clone)]
pub struct ProbeDone {
    pub uname: String,
    pub utype: IfType,
    pub clink: String,
    pub opts: CheckMask,
    pub db_update: bool,
    pub repeat: bool,
    pub mask: u8,
}

/// Everything that can wake the core up.
#[derive(Debug, Clone)]
pub enum Event {
    /// Schedule one FSM iteration on the next tick. Idempotent; the most
    /// recent reason wins.
    Trigger(Reason),
    AwlanRow(AwlanNode),
    ManagerRow(ManagerRow),
    UplinkRow(UplinkRow),
    UplinkRemoved(String),
    InetStateRow(InetStateRow),
    SetVtag(u16),
    ResolveDone {
        dest: Destination,
        outcome: ResolveOutcome,
    },
    ProbeDone(ProbeDone),
    DryrunDone {
        if_name: String,
        if_type: IfType,
        ok: bool,
        cnt: u32,
    },
    EthUpdateExpired {
        if_name: String,
    },
    Shutdown,
}

/// Observable state for operators and tests.
#[derive(Debug, Clone, Default)]
pub struct CmSnapshot {
    pub state: String,
    pub dest: String,
    pub connected: bool,
    pub stable: bool,
    pub disconnects: u32,
    pub target: String,
}

/// Thread-safe handle to the connection-manager worker.
pub struct CmRuntime {
    tx: Sender<Event>,
    snapshot: Arc<Mutex<CmSnapshot>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CmRuntime {
    pub fn new(cfg: CmConfig, caps: CoreCaps) -> Self {
        let (tx, rx) = bounded::<Event>(256);
        let snapshot = Arc::new(Mutex::new(CmSnapshot::default()));
        let snapshot_clone = Arc::clone(&snapshot);
        let worker_tx = tx.clone();

        let handle = thread::Builder::new()
            .name("cm-worker".into())
            .spawn(move || runtime_worker(rx, worker_tx, cfg, caps, snapshot_clone))
            .expect("failed to spawn cm runtime worker");

        CmRuntime {
            tx,
            snapshot,
            handle: Some(handle),
        }
    }

    /// Sender side of the event channel, for collaborators that report
    /// completions (resolver, probe and dry-run workers).
    pub fn events(&self) -> Sender<Event> {
        self.tx.clone()
    }

    pub fn trigger_update(&self, reason: Reason) {
        let _ = self.tx.send(Event::Trigger(reason));
    }

    pub fn awlan_row(&self, row: AwlanNode) {
        let _ = self.tx.send(Event::AwlanRow(row));
    }

    pub fn manager_row(&self, row: ManagerRow) {
        let _ = self.tx.send(Event::ManagerRow(row));
    }

    pub fn uplink_row(&self, row: UplinkRow) {
        let _ = self.tx.send(Event::UplinkRow(row));
    }

    pub fn uplink_removed(&self, if_name: &str) {
        let _ = self.tx.send(Event::UplinkRemoved(if_name.to_string()));
    }

    pub fn inet_state_row(&self, row: InetStateRow) {
        let _ = self.tx.send(Event::InetStateRow(row));
    }

    pub fn set_vtag(&self, tag: u16) {
        let _ = self.tx.send(Event::SetVtag(tag));
    }

    /// Snapshot of the supervisor's current conclusions.
    pub fn snapshot(&self) -> CmSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Gracefully shuts down the worker thread. Idempotent.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(Event::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CmRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stability_interval(ctx: &CoreContext) -> Duration {
    // Short cadence while re-converging, normal once connected.
    let secs = if ctx.connected {
        ctx.cfg.stability_interval_s
    } else {
        ctx.cfg.stability_short_interval_s
    };
    Duration::from_secs(secs)
}

fn runtime_worker(
    rx: Receiver<Event>,
    tx: Sender<Event>,
    cfg: CmConfig,
    caps: CoreCaps,
    snapshot: Arc<Mutex<CmSnapshot>>,
) {
    let clock = Clock::new();
    let wdt_enabled = cfg.wdt_enabled;
    let wdt_interval = Duration::from_secs(cfg.wdt_interval_s);
    let uplinks_interval = Duration::from_secs(cfg.uplinks_timer_s);
    let tick = Duration::from_secs(1);

    let mut ctx = CoreContext::new(cfg, caps, clock, tx);
    let mut pending_reason: Option<Reason> = None;

    let mut next_tick = Instant::now() + tick;
    let mut next_stability = Instant::now() + stability_interval(&ctx);
    let mut next_uplinks = Instant::now() + uplinks_interval;
    let mut next_wdt = Instant::now() + wdt_interval;

    loop {
        let now = Instant::now();
        let mut deadline = next_tick.min(next_stability).min(next_uplinks);
        if wdt_enabled {
            deadline = deadline.min(next_wdt);
        }
        let wait = deadline.saturating_duration_since(now);

        match rx.recv_timeout(wait) {
            Ok(Event::Shutdown) => break,
            Ok(ev) => handle_event(&mut ctx, &mut pending_reason, ev),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if now >= next_tick {
            let reason = pending_reason.take().unwrap_or(Reason::Timer);
            ctx.update_state(reason);
            next_tick = now + tick;
        }
        if now >= next_stability {
            ctx.stability_tick();
            next_stability = now + stability_interval(&ctx);
        }
        if now >= next_uplinks {
            ctx.uplinks_tick();
            next_uplinks = now + uplinks_interval;
        }
        if wdt_enabled && now >= next_wdt {
            if !ctx.platform.wdt_ping() {
                warn!("wdt ping failed");
            }
            next_wdt = now + wdt_interval;
        }

        update_snapshot(&snapshot, &ctx);
    }
}

fn handle_event(ctx: &mut CoreContext, pending: &mut Option<Reason>, ev: Event) {
    let reason = match ev {
        Event::Trigger(r) => {
            // STATE_CHANGE is reserved for internal fixed-point re-entry
            // and must never displace a pending external reason.
            if r != Reason::StateChange {
                *pending = Some(r);
            }
            None
        }
        Event::AwlanRow(row) => ctx.on_awlan_row(&row),
        Event::ManagerRow(row) => ctx.on_manager_row(&row),
        Event::UplinkRow(row) => ctx.on_uplink_row(&row),
        Event::UplinkRemoved(name) => ctx.on_uplink_removed(&name),
        Event::InetStateRow(row) => ctx.on_inet_state_row(&row),
        Event::SetVtag(tag) => ctx.on_set_vtag(tag),
        Event::ResolveDone { dest, outcome } => ctx.on_resolve_done(dest, outcome),
        Event::ProbeDone(p) => ctx.on_probe_done(p),
        Event::DryrunDone {
            if_name,
            if_type,
            ok,
            cnt,
        } => ctx.on_dryrun_done(&if_name, if_type, ok, cnt),
        Event::EthUpdateExpired { if_name } => ctx.on_eth_update_expired(&if_name),
        Event::Shutdown => None,
    };
    if let Some(r) = reason {
        ctx.update_state(r);
    }
}

fn update_snapshot(snapshot: &Arc<Mutex<CmSnapshot>>, ctx: &CoreContext) {
    if let Ok(mut s) = snapshot.lock() {
        s.state = ctx.state.name().to_string();
        s.dest = ctx.dest.name().to_string();
        s.connected = ctx.connected;
        s.stable = ctx.is_con_stable;
        s.disconnects = ctx.disconnects;
        s.target = ctx.get_connection_target().to_string();
    }
}
