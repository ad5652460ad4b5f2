//! The main-link record: the uplink currently carrying controller traffic.

use trellis_common::types::{AssignScheme, IfType, VtagState};

/// Per-family IP bookkeeping on the main link.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpCfg {
    pub assign_scheme: AssignScheme,
    pub is_ip: bool,
    pub resolve_retry: bool,
    pub blocked: bool,
}

/// VLAN tag state of the uplink port.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vtag {
    pub state: VtagState,
    pub tag: u16,
    pub blocked_tag: u16,
    pub failure: u32,
}

/// The currently "used" uplink. Mirrors exactly one registry row by name;
/// `is_used_echoed` records the store's acknowledgment of the selection.
#[derive(Debug, Clone, Default)]
pub struct MainLink {
    pub if_name: String,
    pub if_type: IfType,
    pub bridge_name: String,
    pub is_used: bool,
    pub is_used_echoed: bool,
    pub blocked: bool,
    pub restart_pending: bool,
    pub priority: i32,
    pub ipv4: IpCfg,
    pub ipv6: IpCfg,
    pub gateway_hwaddr: String,
    pub vtag: Vtag,
}

impl MainLink {
    pub fn reset(&mut self) {
        *self = MainLink {
            priority: -1,
            ..MainLink::default()
        };
    }

    pub fn is_bridge(&self) -> bool {
        !self.bridge_name.is_empty()
    }

    /// The interface name connectivity flows over: the bridge when the link
    /// sits behind one, the interface itself otherwise.
    pub fn uplink_name(&self) -> &str {
        if self.is_bridge() {
            &self.bridge_name
        } else {
            &self.if_name
        }
    }

    pub fn has_ip(&self) -> bool {
        self.ipv4.is_ip || self.ipv6.is_ip
    }
}
