//! The process-wide connection-manager state, owned by the runtime worker
//! and passed by reference through every component.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;
use quanta::{Clock, Instant};
use tracing::{info, warn};

use trellis_common::rows::{AwlanNode, InetStateRow, ManagerRow};
use trellis_common::types::{AssignScheme, BleBit, Destination, DeviceType, Reason};

use crate::ble::BleStatus;
use crate::caps::{CounterKind, Platform, Prober, Resolver, Store};
use crate::config::CmConfig;
use crate::link::MainLink;
use crate::resolve::AddrTarget;
use crate::runtime::Event;
use crate::statefile;
use crate::supervisor::CmState;
use crate::uplink::UplinkRegistry;

/// Retry and escalation counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryCounters {
    pub ovs_resolve: u32,
    pub ovs_resolve_fail: u32,
    pub ovs_con: u32,
    pub skip_restart: u32,
    pub gw_offline: u32,
}

/// Injected collaborator capabilities.
#[derive(Clone)]
pub struct CoreCaps {
    pub store: Arc<dyn Store>,
    pub prober: Arc<dyn Prober>,
    pub resolver: Arc<dyn Resolver>,
    pub platform: Arc<dyn Platform>,
}

/// All supervisor-owned state plus the collaborator handles.
pub struct CoreContext {
    pub cfg: CmConfig,
    clock: Clock,
    pub(crate) events_tx: Sender<Event>,

    pub state: CmState,
    pub dest: Destination,
    state_changed: bool,
    pub connected: bool,
    pub is_con_stable: bool,
    pub ipv6_manager_con: bool,
    timestamp: Instant,
    restart_timestamp: Instant,
    /// Monotonic instant the manager connection last came up; cleared on
    /// every disconnect so the stable-period check measures real uptime.
    pub(crate) connected_since: Option<Instant>,
    pub disconnects: u32,

    pub addr_redirector: AddrTarget,
    pub addr_manager: AddrTarget,
    pub link: MainLink,
    pub registry: UplinkRegistry,
    pub ble: BleStatus,

    pub have_awlan: bool,
    pub have_manager: bool,
    pub extender: bool,
    pub min_backoff: u32,
    pub max_backoff: u32,
    pub fast_backoff: bool,
    pub fast_reconnect: bool,
    pub connected_at_least_once: bool,
    pub resolve_retry: bool,
    pub ntp_ok: bool,
    pub cnts: RetryCounters,
    pub dev_type: DeviceType,
    /// Manager target string currently applied to the store.
    pub target: String,
    pub(crate) quiesce_timeout_s: u64,

    pub run_stability: bool,
    pub(crate) stability_cnts: u32,
    /// In-flight async probes, keyed by (uplink, option mask). At most one
    /// per key.
    pub(crate) pending_probes: HashSet<(String, u8)>,

    pub state_dir: PathBuf,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) prober: Arc<dyn Prober>,
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) platform: Arc<dyn Platform>,
}

impl CoreContext {
    pub fn new(cfg: CmConfig, caps: CoreCaps, clock: Clock, events_tx: Sender<Event>) -> Self {
        let now = clock.now();
        let state_dir = PathBuf::from(&cfg.state_dir);
        let min_backoff = cfg.min_backoff_s;
        let max_backoff = cfg.max_backoff_s;
        CoreContext {
            cfg,
            clock,
            events_tx,
            state: CmState::Init,
            dest: Destination::Redirector,
            state_changed: false,
            connected: false,
            is_con_stable: false,
            ipv6_manager_con: false,
            timestamp: now,
            restart_timestamp: now,
            connected_since: None,
            disconnects: 0,
            addr_redirector: AddrTarget::default(),
            addr_manager: AddrTarget::default(),
            link: MainLink {
                priority: -1,
                ..MainLink::default()
            },
            registry: UplinkRegistry::new(),
            ble: BleStatus::new(),
            have_awlan: false,
            have_manager: false,
            extender: true,
            min_backoff,
            max_backoff,
            fast_backoff: false,
            fast_reconnect: false,
            connected_at_least_once: false,
            resolve_retry: false,
            ntp_ok: false,
            cnts: RetryCounters::default(),
            dev_type: DeviceType::None,
            target: String::new(),
            quiesce_timeout_s: 60,
            run_stability: false,
            stability_cnts: 0,
            pending_probes: HashSet::new(),
            state_dir,
            store: caps.store,
            prober: caps.prober,
            resolver: caps.resolver,
            platform: caps.platform,
        }
    }

    // ─── Time ───────────────────────────────────────────────────────────

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub(crate) fn reset_time(&mut self) {
        self.timestamp = self.clock.now();
    }

    /// Seconds spent in the current state.
    pub fn elapsed_s(&self) -> u64 {
        self.clock.now().duration_since(self.timestamp).as_secs()
    }

    pub(crate) fn reset_restart_time(&mut self) {
        self.restart_timestamp = self.clock.now();
    }

    /// Seconds since the last restart-escalation window opened.
    pub fn restart_elapsed_s(&self) -> u64 {
        self.clock
            .now()
            .duration_since(self.restart_timestamp)
            .as_secs()
    }

    /// Uptime of the manager connection since the last disconnect.
    pub fn connected_uptime_s(&self) -> u64 {
        match self.connected_since {
            Some(since) => self.clock.now().duration_since(since).as_secs(),
            None => 0,
        }
    }

    // ─── State bookkeeping ──────────────────────────────────────────────

    pub(crate) fn set_state(&mut self, success: bool, state: CmState) {
        if self.state == state {
            return;
        }
        if success {
            info!("State {} ok -> {}", self.state.name(), state.name());
        } else {
            warn!("State {} failed -> {}", self.state.name(), state.name());
        }
        self.state = state;
        self.reset_time();
        self.state_changed = true;
    }

    /// True exactly once after each transition ("first iteration" check).
    pub(crate) fn take_state_changed(&mut self) -> bool {
        std::mem::take(&mut self.state_changed)
    }

    pub fn is_connected_to(&self, dest: Destination) -> bool {
        self.state == CmState::Connected && self.dest == dest
    }

    /// Timeout of the current state, if it has one.
    pub fn state_timeout_s(&self) -> Option<u64> {
        self.state.timeout_s(&self.cfg, self.quiesce_timeout_s)
    }

    /// Whether the current state's timeout has elapsed. Unexpected timeouts
    /// are logged.
    pub(crate) fn timeout(&self, expected: bool) -> bool {
        let Some(seconds) = self.state_timeout_s() else {
            return false;
        };
        let delta = self.elapsed_s();
        if delta >= seconds {
            if !expected {
                warn!(
                    "State {} timeout: {} >= {}",
                    self.state.name(),
                    delta,
                    seconds
                );
            }
            return true;
        }
        false
    }

    // ─── Address targets ────────────────────────────────────────────────

    pub fn get_addr(&self, dest: Destination) -> &AddrTarget {
        match dest {
            Destination::Redirector => &self.addr_redirector,
            Destination::Manager => &self.addr_manager,
        }
    }

    pub fn get_addr_mut(&mut self, dest: Destination) -> &mut AddrTarget {
        match dest {
            Destination::Redirector => &mut self.addr_redirector,
            Destination::Manager => &mut self.addr_manager,
        }
    }

    pub fn curr_addr(&self) -> &AddrTarget {
        self.get_addr(self.dest)
    }

    pub fn curr_addr_mut(&mut self) -> &mut AddrTarget {
        let dest = self.dest;
        self.get_addr_mut(dest)
    }

    /// Currently applied manager target string.
    pub fn get_connection_target(&self) -> &str {
        &self.target
    }

    /// Back-off drawn for the current quiesce window, in seconds.
    pub fn quiesce_backoff_s(&self) -> u64 {
        self.quiesce_timeout_s
    }

    /// Push a route metric for an uplink to the routing surface.
    pub fn update_route_metric(&mut self, if_name: &str, metric: u32) {
        if let Err(e) = self.store.update_route_metric(if_name, metric) {
            warn!(if_name, metric, error = %e, "route metric update failed");
        }
    }

    // ─── Main link ──────────────────────────────────────────────────────

    /// The interface connectivity flows over (bridge when bridged).
    pub fn uplink_name(&self) -> String {
        self.link.uplink_name().to_string()
    }

    /// Refresh the main link's per-family IP info from the inet state rows.
    pub(crate) fn update_main_link_ip(&mut self) -> bool {
        let name = self.uplink_name();
        if name.is_empty() {
            return false;
        }
        let Some(row) = self.store.get_inet_state(&name) else {
            return false;
        };
        self.apply_inet_state(&row);
        true
    }

    pub(crate) fn apply_inet_state(&mut self, row: &InetStateRow) {
        self.link.ipv4.is_ip = !row.inet_addr.is_empty() && row.inet_addr != "0.0.0.0";
        self.link.ipv6.is_ip = !row.ipv6_addr.is_empty();
        self.link.ipv4.assign_scheme = match row.ip_assign_scheme.as_str() {
            "static" => AssignScheme::Static,
            "dhcp" => AssignScheme::V4Dhcp,
            "none" => AssignScheme::None,
            _ => AssignScheme::NotSet,
        };
        if self.link.ipv6.is_ip {
            self.link.ipv6.assign_scheme = AssignScheme::V6Dhcp;
        }
    }

    pub(crate) fn update_device_type(&mut self) {
        self.dev_type = if self.link.if_type.is_wifi() {
            DeviceType::Leaf
        } else if self.link.is_bridge() {
            DeviceType::Bridge
        } else {
            DeviceType::Router
        };
        info!(dev_type = ?self.dev_type, "device type");
    }

    // ─── Counters ───────────────────────────────────────────────────────

    /// Write an unreachable counter to the store and mirror it locally.
    pub(crate) fn set_unreachable_counter(&mut self, if_name: &str, kind: CounterKind, value: i32) {
        if let Some(u) = self.registry.get_mut(if_name) {
            match kind {
                CounterKind::Link => u.unreachable_link_counter = value,
                CounterKind::Router => u.unreachable_router_counter = value,
                CounterKind::Internet => u.unreachable_internet_counter = value,
                CounterKind::Cloud => u.unreachable_cloud_counter = value,
            }
        }
        if let Err(e) = self.store.update_unreachable_counter(if_name, kind, value) {
            warn!(if_name, kind = kind.name(), error = %e, "counter update failed");
        }
    }

    /// Zero all four unreachable counters on an uplink.
    pub fn clean_link_counters(&mut self, if_name: &str) {
        for kind in [
            CounterKind::Link,
            CounterKind::Router,
            CounterKind::Internet,
            CounterKind::Cloud,
        ] {
            self.set_unreachable_counter(if_name, kind, 0);
        }
    }

    // ─── BLE onboarding bits ────────────────────────────────────────────

    /// Push the bitmap to the beacon row if it changed.
    pub(crate) fn apply_ble(&mut self) {
        if let Some(bits) = self.ble.take_dirty() {
            if let Err(e) = self.store.update_ble_config(bits) {
                warn!(error = %e, "BLE config update failed");
            }
        }
    }

    pub(crate) fn set_ble_state(&mut self, state: bool, bit: BleBit) {
        self.ble.set(bit, state);
        info!(bits = format_args!("{:#04x}", self.ble.bits()), "BT status");
        self.apply_ble();
    }

    /// Rewrite the bitmap for the freshly selected backhaul.
    pub(crate) fn set_backhaul_update_ble_state(&mut self) {
        self.ble.clear();
        if self.link.if_type.is_eth() {
            self.ble.set(BleBit::EthernetLink, true);
            self.ble.set(BleBit::EthernetBackhaul, true);
        } else {
            self.ble.set(BleBit::WifiLink, true);
            self.ble.set(BleBit::WifiBackhaul, true);
        }
        self.apply_ble();
    }

    /// Re-derive the phy-link bits from the registry's L2 state.
    pub(crate) fn update_ble_phy_link(&mut self) {
        let (eth, wifi) = self.registry.l2_family_counts();
        self.ble.set(BleBit::EthernetLink, eth > 0);
        self.ble.set(BleBit::WifiLink, wifi > 0);
        self.apply_ble();
    }

    /// L2 up/down on a candidate link while not yet connected.
    pub(crate) fn set_ble_onboarding_link_state(
        &mut self,
        state: bool,
        if_type: trellis_common::types::IfType,
    ) {
        if self.connected {
            return;
        }
        if if_type.is_eth() {
            self.ble.set(BleBit::EthernetLink, state);
        } else if if_type.is_wifi() {
            self.ble.set(BleBit::WifiLink, state);
        }
        self.apply_ble();
    }

    // ─── Event ingestion ────────────────────────────────────────────────

    /// Ingest an AWLAN row. Returns the wake-up reason to run, if any.
    pub fn on_awlan_row(&mut self, row: &AwlanNode) -> Option<Reason> {
        self.have_awlan = true;
        if row.min_backoff > 0 {
            self.min_backoff = row.min_backoff;
        }
        if row.max_backoff > 0 {
            self.max_backoff = row.max_backoff;
        }
        // Anything but an explicit monitor mode onboards as an extender.
        self.extender = row.device_mode.is_empty() || row.device_mode == "extender";

        if row.redirector_addr != self.addr_redirector.resource {
            if let Err(e) = self.addr_redirector.set_resource(&row.redirector_addr) {
                warn!(error = %e, "invalid redirector resource");
            }
        }
        if row.manager_addr != self.addr_manager.resource {
            if let Err(e) = self.addr_manager.set_resource(&row.manager_addr) {
                warn!(error = %e, "invalid manager resource");
            }
        }
        Some(Reason::ConfigChange)
    }

    /// Ingest a Manager row (`is_connected` flips here).
    pub fn on_manager_row(&mut self, row: &ManagerRow) -> Option<Reason> {
        self.have_manager = true;
        let was = self.connected;
        self.connected = row.is_connected;
        if self.connected && !was {
            self.connected_since = Some(self.now());
            self.connected_at_least_once = true;
        } else if !self.connected {
            self.connected_since = None;
        }
        Some(Reason::ManagerChange)
    }

    /// Ingest an inet-state row for the active uplink.
    pub fn on_inet_state_row(&mut self, row: &InetStateRow) -> Option<Reason> {
        if row.if_name == self.uplink_name() {
            self.apply_inet_state(row);
        }
        None
    }

    /// Stage a new VLAN tag for the uplink port.
    pub fn on_set_vtag(&mut self, tag: u16) -> Option<Reason> {
        self.link.vtag.tag = tag;
        Some(Reason::SetNewVtag)
    }

    // ─── State snapshot file ────────────────────────────────────────────

    pub(crate) fn dump_state(&self, reason: Reason) {
        let timeout = self
            .state_timeout_s()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let body = format!(
            "{}\ns: {} to: {}\nr: {} t: {} o: {} dis: {}\nredir:   u:{} v:{} r:{} '{}'\nmanager: u:{} v:{} r:{} '{}'\n",
            chrono::Local::now().format("%d %b %H:%M:%S %Z"),
            self.state.name(),
            self.dest.name(),
            reason.name(),
            self.elapsed_s(),
            timeout,
            self.disconnects,
            self.addr_redirector.updated as u8,
            self.addr_redirector.valid as u8,
            self.addr_redirector.resolved as u8,
            self.addr_redirector.resource,
            self.addr_manager.updated as u8,
            self.addr_manager.valid as u8,
            self.addr_manager.resolved as u8,
            self.addr_manager.resource,
        );
        if let Err(e) = statefile::dump(&self.state_dir, &body) {
            warn!(error = %e, "state dump failed");
        }
    }
}
