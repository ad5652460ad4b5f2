//! Core enums shared across the connection manager.

use serde::{Deserialize, Serialize};

/// Physical or logical class of an uplink interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfType {
    Vif,
    #[default]
    Eth,
    Vlan,
    Lte,
    Pppoe,
    Gre,
    Bridge,
}

impl IfType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IfType::Vif => "vif",
            IfType::Eth => "eth",
            IfType::Vlan => "vlan",
            IfType::Lte => "lte",
            IfType::Pppoe => "pppoe",
            IfType::Gre => "gre",
            IfType::Bridge => "bridge",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<IfType> {
        match s {
            "vif" => Some(IfType::Vif),
            "eth" => Some(IfType::Eth),
            "vlan" => Some(IfType::Vlan),
            "lte" => Some(IfType::Lte),
            "pppoe" => Some(IfType::Pppoe),
            "gre" => Some(IfType::Gre),
            "bridge" => Some(IfType::Bridge),
            _ => None,
        }
    }

    /// Wired classes: carried over copper, including tagged and PPPoE links.
    pub fn is_eth(&self) -> bool {
        matches!(self, IfType::Eth | IfType::Vlan | IfType::Pppoe)
    }

    /// Wireless backhaul classes. GRE counts as Wi-Fi since the extender
    /// tunnels its backhaul over the radio.
    pub fn is_wifi(&self) -> bool {
        matches!(self, IfType::Vif | IfType::Gre)
    }

    pub fn is_lte(&self) -> bool {
        matches!(self, IfType::Lte)
    }
}

/// Per-address-family lifecycle of an uplink.
///
/// ```text
/// None/Ready → Active ⇄ Inactive → Blocked → Unblocking → Active
/// ```
///
/// `Unblocking` is a probe-before-promotion state entered by the supervisor
/// when a previously blocked family is re-tried; a successful probe promotes
/// it back to `Active` and restores the default route metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UplinkState {
    #[default]
    None,
    Ready,
    Inactive,
    Active,
    Blocked,
    Unblocking,
}

impl UplinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UplinkState::None => "none",
            UplinkState::Ready => "ready",
            UplinkState::Inactive => "inactive",
            UplinkState::Active => "active",
            UplinkState::Blocked => "blocked",
            UplinkState::Unblocking => "unblocking",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<UplinkState> {
        match s {
            "none" => Some(UplinkState::None),
            "ready" => Some(UplinkState::Ready),
            "inactive" => Some(UplinkState::Inactive),
            "active" => Some(UplinkState::Active),
            "blocked" => Some(UplinkState::Blocked),
            "unblocking" => Some(UplinkState::Unblocking),
            _ => None,
        }
    }
}

/// IP assignment scheme reported by `Wifi_Inet_State`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignScheme {
    #[default]
    NotSet,
    None,
    Static,
    V4Dhcp,
    V6Dhcp,
}

/// Lifecycle of a VLAN tag applied to the uplink port.
///
/// A pending tag is promoted to `Used` only after the cloud connection has
/// stayed up for the stable period; repeated stability failures roll it back
/// to `Blocked` with the tag recorded so it is not re-tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VtagState {
    #[default]
    NotUsed,
    Pending,
    Used,
    Blocked,
}

/// Device role inferred from the uplink family once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    #[default]
    None,
    Router,
    Bridge,
    Leaf,
}

/// Which of the two configured endpoints the current connection attempt
/// is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Redirector,
    Manager,
}

impl Destination {
    pub fn name(&self) -> &'static str {
        match self {
            Destination::Redirector => "redirector",
            Destination::Manager => "manager",
        }
    }
}

/// Why the supervisor is being woken up for an FSM iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Timer,
    ConfigChange,
    ManagerChange,
    StateChange,
    LinkUsed,
    LinkNotUsed,
    SetNewVtag,
    BlockVtag,
    OvsInit,
}

impl Reason {
    pub fn name(&self) -> &'static str {
        match self {
            Reason::Timer => "timer",
            Reason::ConfigChange => "config-change",
            Reason::ManagerChange => "manager-change",
            Reason::StateChange => "state-change",
            Reason::LinkUsed => "link-used",
            Reason::LinkNotUsed => "link-not-used",
            Reason::SetNewVtag => "set-new-vtag",
            Reason::BlockVtag => "block-vtag",
            Reason::OvsInit => "ovs-init",
        }
    }
}

/// Bit positions of the BLE onboarding status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BleBit {
    EthernetLink = 0,
    WifiLink = 1,
    EthernetBackhaul = 2,
    WifiBackhaul = 3,
    RouterOk = 4,
    InternetOk = 5,
    CloudOk = 6,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_type_roundtrip() {
        for t in [
            IfType::Vif,
            IfType::Eth,
            IfType::Vlan,
            IfType::Lte,
            IfType::Pppoe,
            IfType::Gre,
            IfType::Bridge,
        ] {
            assert_eq!(IfType::from_str_opt(t.as_str()), Some(t));
        }
        assert_eq!(IfType::from_str_opt("tun"), None);
    }

    #[test]
    fn if_type_families() {
        assert!(IfType::Eth.is_eth());
        assert!(IfType::Vlan.is_eth());
        assert!(IfType::Pppoe.is_eth());
        assert!(!IfType::Vif.is_eth());
        assert!(IfType::Vif.is_wifi());
        assert!(IfType::Gre.is_wifi());
        assert!(!IfType::Lte.is_wifi());
        assert!(IfType::Lte.is_lte());
    }

    #[test]
    fn uplink_state_roundtrip() {
        for s in [
            UplinkState::None,
            UplinkState::Ready,
            UplinkState::Inactive,
            UplinkState::Active,
            UplinkState::Blocked,
            UplinkState::Unblocking,
        ] {
            assert_eq!(UplinkState::from_str_opt(s.as_str()), Some(s));
        }
        assert_eq!(UplinkState::from_str_opt(""), None);
    }

    #[test]
    fn ble_bit_positions_match_payload_layout() {
        assert_eq!(BleBit::EthernetLink as u8, 0);
        assert_eq!(BleBit::CloudOk as u8, 6);
    }
}
