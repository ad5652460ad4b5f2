//! Serde models of the configuration-store rows the manager consumes
//! and produces.
//!
//! The store itself is an external collaborator; these structs are the
//! row snapshots its watchers deliver.

use serde::{Deserialize, Serialize};

use crate::types::UplinkState;

/// Single-row device table: redirector endpoint, manager endpoint assigned
/// by the cloud, back-off window and device mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwlanNode {
    pub redirector_addr: String,
    pub manager_addr: String,
    pub min_backoff: u32,
    pub max_backoff: u32,
    /// `"monitor"` and friends disable extender onboarding; empty means
    /// a regular extender.
    pub device_mode: String,
}

/// Single-row manager table. The core writes `target`; the store-side
/// client owns `is_connected`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerRow {
    pub target: String,
    pub is_connected: bool,
}

/// One row per candidate uplink, keyed by `if_name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkRow {
    pub if_name: String,
    pub if_type: String,
    pub bridge: Option<String>,
    pub has_l2: bool,
    pub is_used: bool,
    pub priority: i32,
    /// Interface is looping and needs delayed re-evaluation.
    pub loop_state: bool,
    pub ipv4: Option<UplinkState>,
    pub ipv6: Option<UplinkState>,
    pub unreachable_link_counter: i32,
    pub unreachable_router_counter: i32,
    pub unreachable_internet_counter: i32,
    pub unreachable_cloud_counter: i32,
    pub ntp_state: bool,
}

impl UplinkRow {
    pub fn new(if_name: &str, if_type: &str) -> UplinkRow {
        UplinkRow {
            if_name: if_name.to_string(),
            if_type: if_type.to_string(),
            unreachable_link_counter: -1,
            unreachable_router_counter: -1,
            unreachable_internet_counter: -1,
            unreachable_cloud_counter: -1,
            ..Default::default()
        }
    }
}

/// Per-interface IP state as reported by `Wifi_Inet_State`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InetStateRow {
    pub if_name: String,
    pub enabled: bool,
    pub network: bool,
    pub ip_assign_scheme: String,
    pub inet_addr: String,
    pub ipv6_addr: String,
    pub gateway: String,
    pub dhcpc: bool,
}

/// Bluetooth beacon configuration row pushed for onboarding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothRow {
    pub mode: String,
    pub command: String,
    pub payload: String,
    pub interval_millis: u32,
    pub txpower: u32,
    pub connectable: bool,
}

impl BluetoothRow {
    pub const MODE_ON: &'static str = "on";
    pub const MODE_OFF: &'static str = "off";
    pub const CMD_ONBOARDING: &'static str = "on_boarding";

    /// Onboarding beacon row for the given status byte. Payload format is
    /// the status byte followed by five zero octets.
    pub fn onboarding(status: u8) -> BluetoothRow {
        BluetoothRow {
            mode: Self::MODE_ON.to_string(),
            command: Self::CMD_ONBOARDING.to_string(),
            payload: format!("{:02x}:00:00:00:00:00", status),
            interval_millis: 0,
            txpower: 0,
            connectable: false,
        }
    }
}

/// TLS material row watched and propagated to downstream clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslRow {
    pub certificate: String,
    pub private_key: String,
    pub ca_cert: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uplink_row_counters_start_unset() {
        let row = UplinkRow::new("eth0", "eth");
        assert_eq!(row.unreachable_link_counter, -1);
        assert_eq!(row.unreachable_cloud_counter, -1);
        assert!(!row.is_used);
        assert!(row.ipv4.is_none());
    }

    #[test]
    fn uplink_row_json_roundtrip() {
        let mut row = UplinkRow::new("wwan0", "lte");
        row.has_l2 = true;
        row.ipv4 = Some(UplinkState::Active);
        let json = serde_json::to_string(&row).unwrap();
        let back: UplinkRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn onboarding_payload_format() {
        let row = BluetoothRow::onboarding(0x45);
        assert_eq!(row.payload, "45:00:00:00:00:00");
        assert_eq!(row.mode, "on");
        assert_eq!(row.command, "on_boarding");
    }
}
