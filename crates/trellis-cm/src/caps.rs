//! Capability interfaces the core invokes.
//!
//! The configuration store, the connectivity prober, the DNS resolver and
//! the platform hooks are all external collaborators; the core only ever
//! talks to them through these traits. The daemon provides system-backed
//! implementations, tests provide mocks.

use crossbeam_channel::Sender;

use trellis_common::check::{CheckMask, CheckResult};
use trellis_common::error::StoreError;
use trellis_common::rows::InetStateRow;
use trellis_common::types::{Destination, IfType, UplinkState};

use crate::runtime::Event;

/// Address family selector for per-family uplink state writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn name(&self) -> &'static str {
        match self {
            IpFamily::V4 => "ipv4",
            IpFamily::V6 => "ipv6",
        }
    }
}

/// Which unreachable counter a stability write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Link,
    Router,
    Internet,
    Cloud,
}

impl CounterKind {
    pub fn name(&self) -> &'static str {
        match self {
            CounterKind::Link => "link",
            CounterKind::Router => "router",
            CounterKind::Internet => "internet",
            CounterKind::Cloud => "cloud",
        }
    }
}

/// Switch-level restore actions folded into the counter ladders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreMask(pub u8);

impl RestoreMask {
    pub const IP: RestoreMask = RestoreMask(1 << 0);
    pub const MAIN_LINK: RestoreMask = RestoreMask(1 << 1);
    pub const SWITCH_FIX_PORT_MAP: RestoreMask = RestoreMask(1 << 2);
    pub const SWITCH_DUMP_DATA: RestoreMask = RestoreMask(1 << 3);
    pub const SWITCH_FIX_AUTON: RestoreMask = RestoreMask(1 << 4);

    pub fn contains(&self, other: RestoreMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RestoreMask) {
        self.0 |= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Only the switch-level bits, if any.
    pub fn switch_bits(&self) -> RestoreMask {
        RestoreMask(
            self.0
                & (Self::SWITCH_FIX_PORT_MAP.0 | Self::SWITCH_DUMP_DATA.0 | Self::SWITCH_FIX_AUTON.0),
        )
    }
}

/// The abstract key/value table store with row-level watchers.
///
/// Writes are eventually consistent: the store confirms them through a
/// follow-up row observation, never through the return value. Callers treat
/// `Err` as "log and retry on the next tick".
pub trait Store: Send + Sync {
    /// Write the manager target URL (`proto:addr:port`); empty disconnects.
    fn set_manager_target(&self, target: &str) -> Result<(), StoreError>;
    /// Write the AWLAN manager address; empty clears the hand-off.
    fn set_awlan_manager_addr(&self, addr: &str) -> Result<(), StoreError>;

    fn update_unreachable_counter(
        &self,
        if_name: &str,
        kind: CounterKind,
        value: i32,
    ) -> Result<(), StoreError>;
    fn update_ntp_state(&self, if_name: &str, state: bool) -> Result<(), StoreError>;
    fn update_loop_state(&self, if_name: &str, state: bool) -> Result<(), StoreError>;
    fn set_uplink_ip_state(
        &self,
        if_name: &str,
        family: IpFamily,
        state: UplinkState,
    ) -> Result<(), StoreError>;
    fn set_uplink_used(&self, if_name: &str, used: bool) -> Result<(), StoreError>;

    /// Enable/disable the network on an interface (`Wifi_Inet_Config.network`).
    fn set_network_enabled(&self, if_name: &str, enabled: bool) -> Result<(), StoreError>;
    /// Administratively enable/disable an interface.
    fn set_interface_enabled(&self, if_name: &str, enabled: bool) -> Result<(), StoreError>;
    /// Ask the DHCP client on the interface to renew its lease.
    fn refresh_dhcp(&self, if_name: &str) -> Result<(), StoreError>;

    fn update_port_tag(&self, port: &str, tag: u16, set: bool) -> Result<(), StoreError>;
    fn update_port_trunks(&self, port: &str, trunks: &[u16]) -> Result<(), StoreError>;
    /// Whether the port is correctly configured under the bridge.
    fn validate_bridge_port(&self, bridge: &str, port: &str) -> bool;
    fn is_iface_in_bridge(&self, bridge: &str, port: &str) -> bool;
    /// Add (`true`) or remove (`false`) the port from the bridge.
    fn manage_bridge_port(&self, bridge: &str, port: &str, want_in: bool)
        -> Result<(), StoreError>;
    fn set_default_wan_bridge(&self, if_name: &str, if_type: IfType) -> Result<(), StoreError>;
    fn update_mac_reporting(&self, port: &str, enabled: bool) -> Result<(), StoreError>;

    fn get_inet_state(&self, if_name: &str) -> Option<InetStateRow>;
    fn is_ipv6_global_link(&self, if_name: &str) -> bool;

    fn update_route_metric(&self, if_name: &str, metric: u32) -> Result<(), StoreError>;

    fn update_ble_config(&self, status: u8) -> Result<(), StoreError>;
    fn set_ble_connectable(&self, connectable: bool) -> Result<(), StoreError>;

    fn gw_offline_enabled(&self) -> bool;
    fn gw_offline_ready(&self) -> bool;
    fn gw_offline_active(&self) -> bool;
    fn enable_gw_offline(&self) -> Result<(), StoreError>;
    fn disable_gw_offline(&self) -> Result<(), StoreError>;
}

/// One connectivity check against a link. Blocking call; the monitor runs
/// it on worker threads (or the daemon escapes to a subprocess whose exit
/// status is the encoded [`CheckResult`]).
pub trait Prober: Send + Sync {
    fn check(&self, clink: &str, opts: CheckMask) -> CheckResult;
}

/// DNS resolution backend.
///
/// `resolve` kicks off resolution of the hostname for both address families
/// and reports completion as an [`Event::ResolveDone`] on the supplied
/// channel. Returns `false` when resolution could not be started. `cancel`
/// tears down any in-flight resolution; results arriving after a cancel are
/// dropped silently.
pub trait Resolver: Send + Sync {
    fn resolve(&self, dest: Destination, hostname: &str, events: Sender<Event>) -> bool;
    fn cancel(&self);
}

/// Platform escape hatches: watchdog, process supervisor, capture and
/// dry-run tooling.
pub trait Platform: Send + Sync {
    fn wdt_ping(&self) -> bool;
    /// Terminal escalation: ask the process supervisor to restart all
    /// managers.
    fn restart_managers(&self) -> bool;

    fn tcpdump_start(&self, if_name: &str);
    fn tcpdump_stop(&self, if_name: &str);

    /// Run the switch-level restore scripts selected by the mask.
    fn restore_switch_cfg(&self, opts: RestoreMask, gateway_hwaddr: &str);

    /// 1-minute load average, if the platform can report one.
    fn load_average_1m(&self) -> Option<f64>;

    /// Launch a `udhcpc` dry-run on the interface. No-op while a previous
    /// dry-run for the same interface is still alive (pidfile check).
    fn start_dhcp_dryrun(&self, if_name: &str, if_type: IfType, cnt: u32, events: Sender<Event>);
    fn stop_dhcp_dryrun(&self, if_name: &str);
}
