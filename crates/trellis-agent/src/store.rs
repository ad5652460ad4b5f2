//! In-process configuration store.
//!
//! Holds the row tables the core reads and writes and echoes every row
//! mutation back through the runtime's event channel, which gives the core
//! the same eventually-consistent write-then-observe semantics the
//! device's real table store provides.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crossbeam_channel::Sender;
use tracing::{debug, info};

use trellis_cm::caps::{CounterKind, IpFamily, Store};
use trellis_cm::Event;
use trellis_common::error::StoreError;
use trellis_common::rows::{AwlanNode, BluetoothRow, InetStateRow, ManagerRow, UplinkRow};
use trellis_common::types::{IfType, UplinkState};

#[derive(Default)]
struct Inner {
    awlan: AwlanNode,
    manager: ManagerRow,
    uplinks: BTreeMap<String, UplinkRow>,
    inet: BTreeMap<String, InetStateRow>,
    bluetooth: BluetoothRow,
    /// Port name -> (tag, trunks).
    ports: BTreeMap<String, (Option<u16>, Vec<u16>)>,
    /// Port name -> bridge.
    bridge_ports: BTreeMap<String, String>,
    route_metrics: BTreeMap<String, u32>,
    gw_offline_enabled: bool,
    gw_offline_ready: bool,
    gw_offline_active: bool,
    events: Option<Sender<Event>>,
}

pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Wire the runtime's event channel so writes echo back as row events.
    pub fn set_events(&self, tx: Sender<Event>) {
        self.lock().events = Some(tx);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn echo_uplink(inner: &Inner, if_name: &str) {
        if let (Some(tx), Some(row)) = (&inner.events, inner.uplinks.get(if_name)) {
            let _ = tx.send(Event::UplinkRow(row.clone()));
        }
    }

    // ─── Seeding and inspection (daemon side) ───────────────────────────

    pub fn seed_awlan(&self, row: AwlanNode) {
        self.lock().awlan = row;
    }

    pub fn seed_uplink(&self, row: UplinkRow) {
        let mut inner = self.lock();
        inner.uplinks.insert(row.if_name.clone(), row);
    }

    pub fn seed_inet_state(&self, row: InetStateRow) {
        let mut inner = self.lock();
        inner.inet.insert(row.if_name.clone(), row);
    }

    pub fn manager_row(&self) -> ManagerRow {
        self.lock().manager.clone()
    }

    pub fn awlan_row(&self) -> AwlanNode {
        self.lock().awlan.clone()
    }

    pub fn bluetooth_row(&self) -> BluetoothRow {
        self.lock().bluetooth.clone()
    }

    pub fn uplink_rows(&self) -> Vec<UplinkRow> {
        self.lock().uplinks.values().cloned().collect()
    }

    /// Flip the manager connection state, as the store-side client would on
    /// (dis)connect, and notify watchers.
    pub fn set_connected(&self, connected: bool) {
        let mut inner = self.lock();
        inner.manager.is_connected = connected;
        let row = inner.manager.clone();
        if let Some(tx) = &inner.events {
            let _ = tx.send(Event::ManagerRow(row));
        }
    }

    pub fn set_gw_offline_flags(&self, enabled: bool, ready: bool, active: bool) {
        let mut inner = self.lock();
        inner.gw_offline_enabled = enabled;
        inner.gw_offline_ready = ready;
        inner.gw_offline_active = active;
    }

    fn with_uplink<F>(&self, if_name: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut UplinkRow),
    {
        let mut inner = self.lock();
        match inner.uplinks.get_mut(if_name) {
            Some(row) => {
                f(row);
                Self::echo_uplink(&inner, if_name);
                Ok(())
            }
            None => Err(StoreError::not_found("Connection_Manager_Uplink", if_name)),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemStore {
    fn set_manager_target(&self, target: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        info!(target, "Manager.target");
        inner.manager.target = target.to_string();
        if target.is_empty() {
            // The store-side client drops the session with the target.
            inner.manager.is_connected = false;
            let row = inner.manager.clone();
            if let Some(tx) = &inner.events {
                let _ = tx.send(Event::ManagerRow(row));
            }
        }
        Ok(())
    }

    fn set_awlan_manager_addr(&self, addr: &str) -> Result<(), StoreError> {
        self.lock().awlan.manager_addr = addr.to_string();
        Ok(())
    }

    fn update_unreachable_counter(
        &self,
        if_name: &str,
        kind: CounterKind,
        value: i32,
    ) -> Result<(), StoreError> {
        self.with_uplink(if_name, |row| match kind {
            CounterKind::Link => row.unreachable_link_counter = value,
            CounterKind::Router => row.unreachable_router_counter = value,
            CounterKind::Internet => row.unreachable_internet_counter = value,
            CounterKind::Cloud => row.unreachable_cloud_counter = value,
        })
    }

    fn update_ntp_state(&self, if_name: &str, state: bool) -> Result<(), StoreError> {
        self.with_uplink(if_name, |row| row.ntp_state = state)
    }

    fn update_loop_state(&self, if_name: &str, state: bool) -> Result<(), StoreError> {
        self.with_uplink(if_name, |row| row.loop_state = state)
    }

    fn set_uplink_ip_state(
        &self,
        if_name: &str,
        family: IpFamily,
        state: UplinkState,
    ) -> Result<(), StoreError> {
        self.with_uplink(if_name, |row| match family {
            IpFamily::V4 => row.ipv4 = Some(state),
            IpFamily::V6 => row.ipv6 = Some(state),
        })
    }

    fn set_uplink_used(&self, if_name: &str, used: bool) -> Result<(), StoreError> {
        self.with_uplink(if_name, |row| row.is_used = used)
    }

    fn set_network_enabled(&self, if_name: &str, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.inet.get_mut(if_name) {
            Some(row) => {
                row.network = enabled;
                Ok(())
            }
            None => Err(StoreError::not_found("Wifi_Inet_Config", if_name)),
        }
    }

    fn set_interface_enabled(&self, if_name: &str, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.inet.get_mut(if_name) {
            Some(row) => {
                row.enabled = enabled;
                Ok(())
            }
            None => Err(StoreError::not_found("Wifi_Inet_Config", if_name)),
        }
    }

    fn refresh_dhcp(&self, if_name: &str) -> Result<(), StoreError> {
        info!(if_name, "dhcp renew requested");
        Ok(())
    }

    fn update_port_tag(&self, port: &str, tag: u16, set: bool) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let entry = inner.ports.entry(port.to_string()).or_default();
        entry.0 = if set { Some(tag) } else { None };
        debug!(port, tag, set, "Port.tag");
        Ok(())
    }

    fn update_port_trunks(&self, port: &str, trunks: &[u16]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let entry = inner.ports.entry(port.to_string()).or_default();
        entry.1 = trunks.to_vec();
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
        let mut inner = self.lock();
        if want_in {
            inner
                .bridge_ports
                .insert(port.to_string(), bridge.to_string());
        } else {
            inner.bridge_ports.remove(port);
        }
        Ok(())
    }

    fn set_default_wan_bridge(&self, if_name: &str, if_type: IfType) -> Result<(), StoreError> {
        debug!(if_name, if_type = if_type.as_str(), "default wan bridge");
        Ok(())
    }

    fn update_mac_reporting(&self, port: &str, enabled: bool) -> Result<(), StoreError> {
        debug!(port, enabled, "mac reporting");
        Ok(())
    }

    fn get_inet_state(&self, if_name: &str) -> Option<InetStateRow> {
        self.lock().inet.get(if_name).cloned()
    }

    fn is_ipv6_global_link(&self, if_name: &str) -> bool {
        self.lock()
            .inet
            .get(if_name)
            .map(|row| {
                row.ipv6_addr
                    .parse::<std::net::Ipv6Addr>()
                    .map(|a| (a.segments()[0] & 0xe000) == 0x2000)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn update_route_metric(&self, if_name: &str, metric: u32) -> Result<(), StoreError> {
        info!(if_name, metric, "route metric");
        self.lock()
            .route_metrics
            .insert(if_name.to_string(), metric);
        Ok(())
    }

    fn update_ble_config(&self, status: u8) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let connectable = inner.bluetooth.connectable;
        inner.bluetooth = BluetoothRow {
            connectable,
            ..BluetoothRow::onboarding(status)
        };
        Ok(())
    }

    fn set_ble_connectable(&self, connectable: bool) -> Result<(), StoreError> {
        self.lock().bluetooth.connectable = connectable;
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
        self.lock().gw_offline_active = true;
        Ok(())
    }

    fn disable_gw_offline(&self) -> Result<(), StoreError> {
        self.lock().gw_offline_active = false;
        Ok(())
    }
}
