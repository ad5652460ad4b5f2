//! Shared mock collaborators and a driving harness for scenario tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use quanta::Clock;

use trellis_cm::caps::{CounterKind, IpFamily, Platform, Prober, Resolver, RestoreMask, Store};
use trellis_cm::config::CmConfig;
use trellis_cm::context::{CoreCaps, CoreContext};
use trellis_cm::runtime::{Event, ResolveOutcome};
use trellis_common::check::{CheckMask, CheckResult};
use trellis_common::error::StoreError;
use trellis_common::rows::{AwlanNode, InetStateRow, ManagerRow, UplinkRow};
use trellis_common::types::{Destination, IfType, Reason, UplinkState};

// ─── Mock store ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockStoreState {
    pub targets: Vec<String>,
    pub manager_addr_writes: Vec<String>,
    pub counters: Vec<(String, String, i32)>,
    pub ip_states: Vec<(String, String, UplinkState)>,
    pub ntp_writes: Vec<(String, bool)>,
    pub loop_writes: Vec<(String, bool)>,
    pub used_writes: Vec<(String, bool)>,
    pub network_toggles: Vec<(String, bool)>,
    pub iface_toggles: Vec<(String, bool)>,
    pub dhcp_refreshes: Vec<String>,
    pub port_tags: Vec<(String, u16, bool)>,
    pub port_trunks: Vec<(String, Vec<u16>)>,
    pub bridge_ports: BTreeMap<String, String>,
    pub inet: BTreeMap<String, InetStateRow>,
    pub ipv6_global: BTreeSet<String>,
    pub route_metrics: Vec<(String, u32)>,
    pub ble_payloads: Vec<u8>,
    pub ble_connectable: Vec<bool>,
    pub gw_offline_enabled: bool,
    pub gw_offline_ready: bool,
    pub gw_offline_active: bool,
    pub gw_enable_calls: u32,
    pub gw_disable_calls: u32,
    pub fail_writes: bool,
}

#[derive(Default)]
pub struct MockStore {
    pub state: Mutex<MockStoreState>,
}

impl MockStore {
    pub fn new() -> Arc<MockStore> {
        Arc::new(MockStore::default())
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, MockStoreState> {
        self.state.lock().unwrap()
    }

    pub fn seed_inet(&self, row: InetStateRow) {
        self.lock().inet.insert(row.if_name.clone(), row);
    }

    pub fn targets(&self) -> Vec<String> {
        self.lock().targets.clone()
    }

    pub fn nonempty_targets(&self) -> Vec<String> {
        self.lock()
            .targets
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect()
    }

    pub fn dhcp_refresh_count(&self) -> usize {
        self.lock().dhcp_refreshes.len()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.lock().fail_writes {
            Err(StoreError::Unavailable("mock store failing writes".into()))
        } else {
            Ok(())
        }
    }
}

impl Store for MockStore {
    fn set_manager_target(&self, target: &str) -> Result<(), StoreError> {
        self.check_write()?;
        self.lock().targets.push(target.to_string());
        Ok(())
    }

    fn set_awlan_manager_addr(&self, addr: &str) -> Result<(), StoreError> {
        self.check_write()?;
        self.lock().manager_addr_writes.push(addr.to_string());
        Ok(())
    }

    fn update_unreachable_counter(
        &self,
        if_name: &str,
        kind: CounterKind,
        value: i32,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.lock()
            .counters
            .push((if_name.to_string(), kind.name().to_string(), value));
        Ok(())
    }

    fn update_ntp_state(&self, if_name: &str, state: bool) -> Result<(), StoreError> {
        self.lock().ntp_writes.push((if_name.to_string(), state));
        Ok(())
    }

    fn update_loop_state(&self, if_name: &str, state: bool) -> Result<(), StoreError> {
        self.lock().loop_writes.push((if_name.to_string(), state));
        Ok(())
    }

    fn set_uplink_ip_state(
        &self,
        if_name: &str,
        family: IpFamily,
        state: UplinkState,
    ) -> Result<(), StoreError> {
        self.lock()
            .ip_states
            .push((if_name.to_string(), family.name().to_string(), state));
        Ok(())
    }

    fn set_uplink_used(&self, if_name: &str, used: bool) -> Result<(), StoreError> {
        self.check_write()?;
        self.lock().used_writes.push((if_name.to_string(), used));
        Ok(())
    }

    fn set_network_enabled(&self, if_name: &str, enabled: bool) -> Result<(), StoreError> {
        self.lock()
            .network_toggles
            .push((if_name.to_string(), enabled));
        Ok(())
    }

    fn set_interface_enabled(&self, if_name: &str, enabled: bool) -> Result<(), StoreError> {
        self.lock()
            .iface_toggles
            .push((if_name.to_string(), enabled));
        Ok(())
    }

    fn refresh_dhcp(&self, if_name: &str) -> Result<(), StoreError> {
        self.lock().dhcp_refreshes.push(if_name.to_string());
        Ok(())
    }

    fn update_port_tag(&self, port: &str, tag: u16, set: bool) -> Result<(), StoreError> {
        self.lock().port_tags.push((port.to_string(), tag, set));
        Ok(())
    }

    fn update_port_trunks(&self, port: &str, trunks: &[u16]) -> Result<(), StoreError> {
        self.lock()
            .port_trunks
            .push((port.to_string(), trunks.to_vec()));
        Ok(())
    }

    fn validate_bridge_port(&self, bridge: &str, port: &str) -> bool {
        self.lock().bridge_ports.get(port).map(String::as_str) == Some(bridge)
    }

    fn is_iface_in_bridge(&self, bridge: &str, port: &str) -> bool {
        self.validate_bridge_port(bridge, port)
    }

    fn manage_bridge_port(
        &self,
        bridge: &str,
        port: &str,
        want_in: bool,
    ) -> Result<(), StoreError> {
        let mut s = self.lock();
        if want_in {
            s.bridge_ports.insert(port.to_string(), bridge.to_string());
        } else {
            s.bridge_ports.remove(port);
        }
        Ok(())
    }

    fn set_default_wan_bridge(&self, _if_name: &str, _if_type: IfType) -> Result<(), StoreError> {
        Ok(())
    }

    fn update_mac_reporting(&self, _port: &str, _enabled: bool) -> Result<(), StoreError> {
        Ok(())
    }

    fn get_inet_state(&self, if_name: &str) -> Option<InetStateRow> {
        self.lock().inet.get(if_name).cloned()
    }

    fn is_ipv6_global_link(&self, if_name: &str) -> bool {
        self.lock().ipv6_global.contains(if_name)
    }

    fn update_route_metric(&self, if_name: &str, metric: u32) -> Result<(), StoreError> {
        self.lock()
            .route_metrics
            .push((if_name.to_string(), metric));
        Ok(())
    }

    fn update_ble_config(&self, status: u8) -> Result<(), StoreError> {
        self.lock().ble_payloads.push(status);
        Ok(())
    }

    fn set_ble_connectable(&self, connectable: bool) -> Result<(), StoreError> {
        self.lock().ble_connectable.push(connectable);
        Ok(())
    }

    fn gw_offline_enabled(&self) -> bool {
        self.lock().gw_offline_enabled
    }

    fn gw_offline_ready(&self) -> bool {
        self.lock().gw_offline_ready
    }

    fn gw_offline_active(&self) -> bool {
        self.lock().gw_offline_active
    }

    fn enable_gw_offline(&self) -> Result<(), StoreError> {
        let mut s = self.lock();
        s.gw_enable_calls += 1;
        s.gw_offline_active = true;
        Ok(())
    }

    fn disable_gw_offline(&self) -> Result<(), StoreError> {
        let mut s = self.lock();
        s.gw_disable_calls += 1;
        s.gw_offline_active = false;
        Ok(())
    }
}

// ─── Mock prober ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockProber {
    pub default_result: Mutex<CheckResult>,
    pub script: Mutex<VecDeque<CheckResult>>,
    pub calls: Mutex<Vec<(String, u8)>>,
}

impl MockProber {
    pub fn new() -> Arc<MockProber> {
        let p = MockProber::default();
        *p.default_result.lock().unwrap() = CheckResult::all_ok();
        Arc::new(p)
    }

    pub fn set_default(&self, result: CheckResult) {
        *self.default_result.lock().unwrap() = result;
    }

    pub fn push(&self, result: CheckResult) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Prober for MockProber {
    fn check(&self, clink: &str, opts: CheckMask) -> CheckResult {
        self.calls.lock().unwrap().push((clink.to_string(), opts.0));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*self.default_result.lock().unwrap())
    }
}

// ─── Mock resolver ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum MockResolveMode {
    Answer {
        v6: Vec<Ipv6Addr>,
        v4: Vec<Ipv4Addr>,
    },
    Fail,
    RefuseStart,
    Silent,
}

pub struct MockResolver {
    pub mode: Mutex<MockResolveMode>,
    pub calls: AtomicU32,
    pub cancels: AtomicU32,
}

impl MockResolver {
    pub fn answering(v6: &[&str], v4: &[&str]) -> Arc<MockResolver> {
        Arc::new(MockResolver {
            mode: Mutex::new(MockResolveMode::Answer {
                v6: v6.iter().map(|s| s.parse().unwrap()).collect(),
                v4: v4.iter().map(|s| s.parse().unwrap()).collect(),
            }),
            calls: AtomicU32::new(0),
            cancels: AtomicU32::new(0),
        })
    }

    pub fn with_mode(mode: MockResolveMode) -> Arc<MockResolver> {
        Arc::new(MockResolver {
            mode: Mutex::new(mode),
            calls: AtomicU32::new(0),
            cancels: AtomicU32::new(0),
        })
    }

    pub fn set_mode(&self, mode: MockResolveMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Resolver for MockResolver {
    fn resolve(&self, dest: Destination, _hostname: &str, events: Sender<Event>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode.lock().unwrap().clone() {
            MockResolveMode::Answer { v6, v4 } => {
                let _ = events.send(Event::ResolveDone {
                    dest,
                    outcome: ResolveOutcome::Resolved { ipv6: v6, ipv4: v4 },
                });
                true
            }
            MockResolveMode::Fail => {
                let _ = events.send(Event::ResolveDone {
                    dest,
                    outcome: ResolveOutcome::Failed {
                        transient: true,
                        error: "mock dns failure".to_string(),
                    },
                });
                true
            }
            MockResolveMode::RefuseStart => false,
            MockResolveMode::Silent => true,
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

// ─── Mock platform ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockPlatform {
    pub restarts: AtomicU32,
    pub wdt_pings: AtomicU32,
    pub tcpdump_starts: Mutex<Vec<String>>,
    pub tcpdump_stops: Mutex<Vec<String>>,
    pub switch_restores: Mutex<Vec<u8>>,
    pub dryruns: Mutex<Vec<(String, u32)>>,
    pub load: Mutex<Option<f64>>,
}

impl MockPlatform {
    pub fn new() -> Arc<MockPlatform> {
        Arc::new(MockPlatform::default())
    }

    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl Platform for MockPlatform {
    fn wdt_ping(&self) -> bool {
        self.wdt_pings.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn restart_managers(&self) -> bool {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn tcpdump_start(&self, if_name: &str) {
        self.tcpdump_starts.lock().unwrap().push(if_name.to_string());
    }

    fn tcpdump_stop(&self, if_name: &str) {
        self.tcpdump_stops.lock().unwrap().push(if_name.to_string());
    }

    fn restore_switch_cfg(&self, opts: RestoreMask, _gateway_hwaddr: &str) {
        self.switch_restores.lock().unwrap().push(opts.0);
    }

    fn load_average_1m(&self) -> Option<f64> {
        *self.load.lock().unwrap()
    }

    fn start_dhcp_dryrun(
        &self,
        if_name: &str,
        _if_type: IfType,
        cnt: u32,
        _events: Sender<Event>,
    ) {
        self.dryruns.lock().unwrap().push((if_name.to_string(), cnt));
    }

    fn stop_dhcp_dryrun(&self, _if_name: &str) {}
}

// ─── Harness ────────────────────────────────────────────────────────────

pub struct Harness {
    pub ctx: CoreContext,
    pub rx: Receiver<Event>,
    pub store: Arc<MockStore>,
    pub prober: Arc<MockProber>,
    pub resolver: Arc<MockResolver>,
    pub platform: Arc<MockPlatform>,
    pub clock: Arc<quanta::Mock>,
}

impl Harness {
    pub fn new(cfg: CmConfig) -> Harness {
        Self::with_resolver(cfg, MockResolver::answering(&[], &["192.0.2.10"]))
    }

    pub fn with_resolver(cfg: CmConfig, resolver: Arc<MockResolver>) -> Harness {
        let store = MockStore::new();
        let prober = MockProber::new();
        let platform = MockPlatform::new();
        let (clock, mock) = Clock::mock();
        let (tx, rx) = unbounded();
        let caps = CoreCaps {
            store: store.clone(),
            prober: prober.clone(),
            resolver: resolver.clone(),
            platform: platform.clone(),
        };
        let mut cfg = cfg;
        // scenario tests never want to touch the real filesystem root
        if cfg.state_dir == CmConfig::default().state_dir {
            cfg.state_dir = std::env::temp_dir()
                .join(format!("trellis-test-{}", std::process::id()))
                .to_string_lossy()
                .into_owned();
        }
        let ctx = CoreContext::new(cfg, caps, clock, tx);
        Harness {
            ctx,
            rx,
            store,
            prober,
            resolver,
            platform,
            clock: mock,
        }
    }

    /// Route queued completion events into the context, as the runtime
    /// worker would.
    pub fn drain(&mut self) {
        while let Ok(ev) = self.rx.try_recv() {
            let reason = match ev {
                Event::ResolveDone { dest, outcome } => self.ctx.on_resolve_done(dest, outcome),
                Event::ProbeDone(p) => self.ctx.on_probe_done(p),
                Event::DryrunDone {
                    if_name,
                    if_type,
                    ok,
                    cnt,
                } => self.ctx.on_dryrun_done(&if_name, if_type, ok, cnt),
                Event::EthUpdateExpired { if_name } => self.ctx.on_eth_update_expired(&if_name),
                Event::UplinkRow(row) => self.ctx.on_uplink_row(&row),
                Event::ManagerRow(row) => self.ctx.on_manager_row(&row),
                _ => None,
            };
            if let Some(r) = reason {
                self.ctx.update_state(r);
            }
        }
    }

    /// One timer tick: drain completions, then run the FSM.
    pub fn tick(&mut self) {
        self.drain();
        self.ctx.update_state(Reason::Timer);
    }

    pub fn advance(&mut self, secs: u64) {
        self.clock.increment(Duration::from_secs(secs));
    }

    /// Advance and tick until the state matches or the budget runs out.
    pub fn run_until(&mut self, state: trellis_cm::CmState, step_s: u64, max_steps: u32) -> bool {
        for _ in 0..max_steps {
            if self.ctx.state == state {
                return true;
            }
            self.advance(step_s);
            self.tick();
        }
        self.ctx.state == state
    }
}

// ─── Row builders ───────────────────────────────────────────────────────

pub fn awlan(redirector: &str) -> AwlanNode {
    AwlanNode {
        redirector_addr: redirector.to_string(),
        manager_addr: String::new(),
        min_backoff: 30,
        max_backoff: 60,
        device_mode: String::new(),
    }
}

pub fn awlan_with_manager(redirector: &str, manager: &str) -> AwlanNode {
    AwlanNode {
        manager_addr: manager.to_string(),
        ..awlan(redirector)
    }
}

pub fn manager_connected(connected: bool) -> ManagerRow {
    ManagerRow {
        target: String::new(),
        is_connected: connected,
    }
}

pub fn eth_uplink(if_name: &str, priority: i32) -> UplinkRow {
    let mut row = UplinkRow::new(if_name, "eth");
    row.has_l2 = true;
    row.priority = priority;
    row.ipv4 = Some(UplinkState::Ready);
    row
}

pub fn inet_v4(if_name: &str, addr: &str, gateway: &str) -> InetStateRow {
    InetStateRow {
        if_name: if_name.to_string(),
        enabled: true,
        network: true,
        ip_assign_scheme: "dhcp".to_string(),
        inet_addr: addr.to_string(),
        ipv6_addr: String::new(),
        gateway: gateway.to_string(),
        dhcpc: true,
    }
}

/// Bring a fresh harness to the CONNECTED state through the cold
/// bring-up chain (S1 trajectory).
pub fn bring_up(h: &mut Harness) {
    if let Some(r) = h.ctx.on_awlan_row(&awlan("ssl:redir.example.com:443")) {
        h.ctx.update_state(r);
    }
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(false)) {
        h.ctx.update_state(r);
    }
    h.store.seed_inet(inet_v4("eth0", "192.168.1.2", "192.168.1.1"));
    if let Some(r) = h.ctx.on_uplink_row(&eth_uplink("eth0", 3)) {
        h.ctx.update_state(r);
    }
    // resolver completion lands as an event
    h.tick();
    // manager session comes up
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(true)) {
        h.ctx.update_state(r);
    }
}
