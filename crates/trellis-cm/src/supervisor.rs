//! The supervisor FSM.
//!
//! Basic logic:
//!
//! Start by connecting to the configured redirector. Extenders first walk
//! the onboarding chain — link selection, WAN IP, NTP — then resolve the
//! redirector, connect, and hand over to whatever manager the cloud
//! assigns. Every connect attempt sweeps all resolved addresses. A dropped
//! manager connection quiesces for a randomized back-off and fast
//! reconnects to the same manager; too many disconnects fall back to the
//! redirector.
//!
//! The FSM runs to a fixed point: whenever a dispatch changes the state,
//! the loop re-enters with the `state-change` reason until the state is
//! stable. Exceeding a state's timeout is a first-class transition, not an
//! error.

use rand::Rng;
use tracing::{debug, error, info, warn};

use trellis_common::types::{BleBit, Destination, DeviceType, Reason, VtagState};

use crate::config::CmConfig;
use crate::context::CoreContext;
use crate::resolve::ResolvedAddr;
use crate::runtime::ResolveOutcome;
use trellis_common::check::CheckMask;
use trellis_common::types::AssignScheme;

/// Supervisor states. The onboarding chain (`LinkSel` through `NtpCheck`,
/// plus the fast-reconnect pair) only runs on extenders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmState {
    Init,
    LinkSel,
    WanIp,
    NtpCheck,
    OvsInit,
    TryResolve,
    ReConnect,
    TryConnect,
    FastReconnect,
    FastReconnectWait,
    Connected,
    QuiesceOvs,
    /// Legacy probe state; re-enters the chain like `Init`.
    Internet,
}

impl CmState {
    pub fn name(&self) -> &'static str {
        match self {
            CmState::Init => "INIT",
            CmState::LinkSel => "LINK_SEL",
            CmState::WanIp => "WAN_IP",
            CmState::NtpCheck => "NTP_CHECK",
            CmState::OvsInit => "OVS_INIT",
            CmState::TryResolve => "TRY_RESOLVE",
            CmState::ReConnect => "RE_CONNECT",
            CmState::TryConnect => "TRY_CONNECT",
            CmState::FastReconnect => "FAST_RECONNECT",
            CmState::FastReconnectWait => "FAST_RECONNECT_WAIT",
            CmState::Connected => "CONNECTED",
            CmState::QuiesceOvs => "QUIESCE_OVS",
            CmState::Internet => "INTERNET",
        }
    }

    /// Per-state timeout in seconds; `None` means no timeout. The quiesce
    /// timeout is the back-off computed on entry.
    pub fn timeout_s(&self, cfg: &CmConfig, quiesce_s: u64) -> Option<u64> {
        match self {
            CmState::Init | CmState::OvsInit | CmState::Connected => None,
            CmState::LinkSel => Some(cfg.link_sel_timeout_s),
            CmState::WanIp | CmState::NtpCheck | CmState::Internet => Some(cfg.default_timeout_s),
            CmState::TryResolve => Some(cfg.resolve_timeout_s),
            CmState::ReConnect | CmState::TryConnect => Some(cfg.connect_timeout_s),
            CmState::FastReconnect | CmState::FastReconnectWait => {
                Some(cfg.fast_reconnect_timeout_s)
            }
            CmState::QuiesceOvs => Some(quiesce_s),
        }
    }
}

impl CoreContext {
    /// One (fixed-point) supervisor iteration.
    pub fn update_state(&mut self, reason: Reason) {
        let mut reason = reason;
        loop {
            debug!(
                "=== update s: {} r: {} t: {}",
                self.state.name(),
                reason.name(),
                self.elapsed_s()
            );
            self.dump_state(reason);
            let old_state = self.state;

            if !self.have_awlan || !self.have_manager {
                return;
            }

            let link_sel = matches!(
                self.state,
                CmState::Init | CmState::LinkSel | CmState::WanIp | CmState::NtpCheck
            );
            let uplink = self.uplink_name();

            // Reason-driven side transitions.
            match reason {
                Reason::LinkNotUsed => {
                    self.set_state(true, CmState::LinkSel);
                }
                Reason::LinkUsed => {
                    if !self.update_main_link_ip() {
                        warn!(uplink = %uplink, "failed to get ip info");
                    }
                    self.set_backhaul_update_ble_state();

                    if self.link.is_bridge() {
                        let bridge = self.link.bridge_name.clone();
                        let port = self.link.if_name.clone();
                        self.update_bridge_cfg(&bridge, &port, true, Some(false));
                    } else {
                        let if_name = self.link.if_name.clone();
                        let if_type = self.link.if_type;
                        if let Err(e) = self.store.set_default_wan_bridge(&if_name, if_type) {
                            warn!(error = %e, "default wan bridge setup failed");
                        }
                    }

                    let if_name = self.link.if_name.clone();
                    self.clean_link_counters(&if_name);
                    self.req_stability_check_main(CheckMask::LINK, false);
                    self.set_state(true, CmState::WanIp);
                }
                Reason::SetNewVtag => {
                    info!(tag = self.link.vtag.tag, "vtag: creating");
                    if self.set_new_vtag() {
                        if let Err(e) = self.store.refresh_dhcp(&uplink) {
                            warn!(error = %e, "dhcp refresh failed");
                        }
                        self.set_state(true, CmState::WanIp);
                    }
                }
                Reason::BlockVtag => {
                    info!(tag = self.link.vtag.tag, "vtag: blocking");
                    if self.block_vtag() {
                        if let Err(e) = self.store.refresh_dhcp(&uplink) {
                            warn!(error = %e, "dhcp refresh failed");
                        }
                        self.set_state(true, CmState::WanIp);
                    }
                }
                Reason::OvsInit => {
                    if self.state != CmState::WanIp && !link_sel {
                        info!("async re-init of the controller connection");
                        self.clear_manager_target();
                        self.connected = false;
                        self.fast_reconnect = false;
                        self.set_state(true, CmState::WanIp);
                    }
                }
                _ => {}
            }

            // A new redirector address restarts the whole chain; a new
            // manager address only re-targets if we are not already
            // connected to a manager.
            if !matches!(self.state, CmState::OvsInit | CmState::TryResolve)
                && !link_sel
                && self.addr_redirector.updated
                && self.addr_redirector.valid
            {
                info!("received new redirector address");
                self.set_state(true, CmState::OvsInit);
                self.addr_redirector.updated = false;
            } else if !self.is_connected_to(Destination::Manager)
                && self.addr_manager.updated
                && self.addr_manager.valid
            {
                info!("received manager address");
                self.set_state(true, CmState::TryResolve);
                self.dest = Destination::Manager;
            }

            match self.state {
                CmState::Init | CmState::Internet => {
                    if !self.extender {
                        debug!("skip onboarding process");
                        self.set_state(true, CmState::OvsInit);
                    } else {
                        self.extender_init_state();
                        self.resolve_retry = false;
                        self.cnts.ovs_resolve_fail = 0;
                        self.set_state(true, CmState::LinkSel);
                    }
                }

                CmState::LinkSel => {
                    if self.take_state_changed() {
                        info!("waiting for link selection to finish");
                        self.run_stability = false;
                        self.fast_reconnect = self.connected;
                        if self.fast_reconnect {
                            self.fast_backoff = true;
                        }
                        self.clear_manager_target();
                        self.connected = false;
                        self.ble.clear();
                        self.update_ble_phy_link();
                    }
                    if self.link.is_used {
                        self.req_stability_check_main(CheckMask::LINK, false);
                        self.set_backhaul_update_ble_state();
                        self.set_state(true, CmState::WanIp);
                    } else if self.timeout(false) {
                        self.trigger_restart_managers();
                    }
                }

                CmState::WanIp => {
                    if self.take_state_changed() {
                        info!("waiting for WAN IP");
                    }
                    if !self.update_main_link_ip() {
                        warn!(uplink = %uplink, "failed to get ip info");
                    }
                    let mut ok = false;
                    if self.link.has_ip() {
                        ok = self.req_stability_check_main(CheckMask::ROUTER, false);
                        self.set_ble_state(ok, BleBit::RouterOk);
                    }
                    if ok {
                        self.set_state(true, CmState::NtpCheck);
                    } else if self.timeout(false) {
                        self.trigger_restart_managers();
                    } else {
                        self.clear_manager_target();
                    }
                }

                CmState::NtpCheck => {
                    if self.take_state_changed() {
                        info!("waiting for NTP sync");
                    }
                    if self.req_stability_check_main(CheckMask::INTERNET | CheckMask::NTP, true) {
                        self.set_ble_state(true, BleBit::InternetOk);
                        let next = if self.fast_reconnect {
                            CmState::FastReconnect
                        } else {
                            CmState::OvsInit
                        };
                        self.set_state(true, next);
                    } else if self.timeout(false) {
                        self.trigger_restart_managers();
                    }
                }

                CmState::OvsInit => {
                    if self.extender && !self.link.is_used {
                        info!("main link is not used, move to link selection");
                        self.set_state(false, CmState::LinkSel);
                    } else {
                        self.connected = false;
                        self.is_con_stable = false;
                        if self.addr_redirector.valid {
                            self.clear_manager_addr();
                            self.dest = Destination::Redirector;
                            self.set_state(true, CmState::TryResolve);
                            self.disconnects = 0;
                        }
                    }
                }

                CmState::TryResolve => {
                    if self.take_state_changed() || self.resolve_retry {
                        if self.store.is_ipv6_global_link(&uplink) {
                            self.link.ipv6.assign_scheme = AssignScheme::V6Dhcp;
                            self.link.ipv6.is_ip = true;
                        }
                        if self.extender {
                            self.req_stability_check_main(
                                CheckMask::LINK | CheckMask::ROUTER | CheckMask::INTERNET,
                                false,
                            );
                        }
                        if self.resolve_retry {
                            info!(
                                "retry resolving, cnt: {}/{}",
                                self.cnts.ovs_resolve, self.cfg.resolve_retry_threshold
                            );
                            self.resolve_retry = false;
                        }
                        info!(
                            "trying to resolve {}: {}",
                            self.dest.name(),
                            self.curr_addr().hostname
                        );
                        if !self.resolve(self.dest) {
                            self.cnts.ovs_resolve_fail += 1;
                            self.restart_ovs_connection(true);
                            return;
                        }
                    }
                    if self.curr_addr().resolved {
                        info!("address {} resolved", self.curr_addr().hostname);
                        self.cnts.ovs_resolve = 0;
                        self.cnts.ovs_resolve_fail = 0;
                        self.set_state(true, CmState::ReConnect);
                    } else if self.timeout(false)
                        || self.cnts.ovs_resolve > self.cfg.resolve_retry_threshold
                    {
                        info!(
                            "resolve threshold exceeded or timed out [{}/{}]",
                            self.cnts.ovs_resolve, self.cfg.resolve_retry_threshold
                        );
                        self.cnts.ovs_resolve = 0;
                        self.resolver.cancel();
                        if let Err(e) = self.store.refresh_dhcp(&uplink) {
                            warn!(error = %e, "dhcp refresh failed");
                        }
                        self.cnts.ovs_resolve_fail += 1;
                        self.restart_ovs_connection(false);
                        return;
                    }
                }

                CmState::ReConnect => {
                    if self.take_state_changed() {
                        self.connected = false;
                        self.clear_manager_target();
                    }
                    if !self.connected {
                        self.set_state(true, CmState::TryConnect);
                    } else if self.timeout(false) {
                        self.cnts.ovs_con += 1;
                        self.restart_ovs_connection(false);
                        return;
                    }
                }

                CmState::TryConnect => {
                    if self.extender {
                        let if_name = self.link.if_name.clone();
                        self.set_unreachable_counter(
                            &if_name,
                            crate::caps::CounterKind::Cloud,
                            -1,
                        );
                    }
                    if self.curr_addr().updated {
                        // address changed mid-attempt, go resolve the new one
                        self.set_state(true, CmState::TryResolve);
                    } else {
                        if self.take_state_changed() && !self.write_current_target_addr() {
                            self.cnts.ovs_con += 1;
                            self.restart_ovs_connection(false);
                            return;
                        }
                        if self.connected {
                            self.set_state(true, CmState::Connected);
                        } else if self.timeout(false) {
                            if self.write_next_target_addr() {
                                self.reset_time();
                            } else {
                                self.cnts.ovs_con += 1;
                                self.restart_ovs_connection(false);
                                return;
                            }
                        }
                    }
                }

                CmState::FastReconnect => {
                    if self.take_state_changed() {
                        self.connected = false;
                        self.clear_manager_target();
                        self.write_current_target_addr();
                    }
                    if self.connected {
                        self.set_state(true, CmState::Connected);
                    }
                    if self.timeout(false) {
                        self.set_state(true, CmState::QuiesceOvs);
                    }
                }

                CmState::FastReconnectWait => {
                    if self.connected {
                        self.set_state(true, CmState::Connected);
                    }
                    if self.timeout(false) {
                        self.set_state(true, CmState::QuiesceOvs);
                    }
                }

                CmState::Connected => {
                    if self.take_state_changed() {
                        info!("===== connected to: {}", self.dest.name());
                        if self.connected_since.is_none() {
                            self.connected_since = Some(self.now());
                        }
                        if self.extender {
                            self.req_stability_check_main(
                                CheckMask::LINK | CheckMask::ROUTER | CheckMask::INTERNET,
                                true,
                            );
                            self.set_ble_state(true, BleBit::CloudOk);
                            self.update_device_type();
                            self.cnts.skip_restart = 0;
                            self.cnts.ovs_con = 0;
                            self.run_stability = true;
                            let if_name = self.link.if_name.clone();
                            self.set_unreachable_counter(
                                &if_name,
                                crate::caps::CounterKind::Cloud,
                                0,
                            );
                            self.disable_gw_offline_state();
                        }
                    }
                    if self.connected {
                        if !self.is_con_stable
                            && self.connected_uptime_s() > self.cfg.stable_period_s
                        {
                            info!(
                                "connection stable for {} s, disconnects: {}",
                                self.cfg.stable_period_s, self.disconnects
                            );
                            self.is_con_stable = true;
                            self.disconnects = 0;
                            self.fast_backoff = false;
                            if self.cfg.ble_config_enabled {
                                if let Err(e) = self.store.set_ble_connectable(false) {
                                    warn!(error = %e, "BLE connectable update failed");
                                }
                            }
                            if self.link.vtag.state == VtagState::Pending {
                                info!(tag = self.link.vtag.tag, "vtag: set as used");
                                self.link.vtag.state = VtagState::Used;
                            }
                        }
                    } else {
                        self.set_state(true, CmState::QuiesceOvs);
                        self.is_con_stable = false;
                    }
                }

                CmState::QuiesceOvs => {
                    if self.take_state_changed() {
                        self.clear_manager_target();
                        self.disconnects += 1;
                        self.set_ble_state(false, BleBit::CloudOk);
                        if self.extender {
                            let if_name = self.link.if_name.clone();
                            let dis = self.disconnects as i32;
                            self.set_unreachable_counter(
                                &if_name,
                                crate::caps::CounterKind::Cloud,
                                dis,
                            );
                        }
                        self.compute_backoff();
                        info!(
                            "===== quiescing connection to: {} for {} seconds",
                            self.dest.name(),
                            self.quiesce_timeout_s
                        );
                    }
                    if self.connected {
                        self.set_state(true, CmState::Connected);
                    }
                    if self.timeout(true) {
                        self.disconnects += 1;
                        if self.extender {
                            let if_name = self.link.if_name.clone();
                            let dis = self.disconnects as i32;
                            self.set_unreachable_counter(
                                &if_name,
                                crate::caps::CounterKind::Cloud,
                                dis,
                            );
                        }
                        if self.disconnects > self.cfg.max_disconnects {
                            error!(
                                "too many disconnects ({}/{}), back to redirector",
                                self.disconnects, self.cfg.max_disconnects
                            );
                            self.fast_backoff = false;
                            self.restart_ovs_connection(false);
                            return;
                        }
                        self.set_state(true, CmState::FastReconnect);
                    }
                }
            }

            if self.timeout(false) {
                error!("unhandled timeout in {}", self.state.name());
                if self.extender {
                    self.trigger_restart_managers();
                }
                self.set_state(false, CmState::Init);
            }

            if old_state != self.state {
                reason = Reason::StateChange;
                continue;
            }
            debug!("<== update s: {}", self.state.name());
            return;
        }
    }

    // ─── Resolver operations ────────────────────────────────────────────

    /// Kick off resolution of the destination's hostname. Returns `false`
    /// when it could not be started (invalid target, backend refused).
    pub(crate) fn resolve(&mut self, dest: Destination) -> bool {
        let events = self.events_tx.clone();
        let addr = self.get_addr_mut(dest);
        addr.updated = false;
        addr.resolved = false;
        if !addr.valid {
            return false;
        }
        addr.clear_addrs();
        let hostname = addr.hostname.clone();
        self.resolver.resolve(dest, &hostname, events)
    }

    /// Resolution completed (either backend).
    pub fn on_resolve_done(&mut self, dest: Destination, outcome: ResolveOutcome) -> Option<Reason> {
        match outcome {
            ResolveOutcome::Resolved { ipv6, ipv4 } => {
                let prefer_v6 = self.link.ipv6.assign_scheme == AssignScheme::V6Dhcp;
                let addr = self.get_addr_mut(dest);
                addr.apply_resolved(ipv6, ipv4);
                addr.set_ipv6_pref(prefer_v6);
                Some(Reason::Timer)
            }
            ResolveOutcome::Failed { transient, error } => {
                warn!(dest = dest.name(), %error, "resolution failed");
                if transient {
                    self.resolve_retry = true;
                    self.cnts.ovs_resolve += 1;
                    self.cnts.ovs_resolve_fail += 1;
                }
                Some(Reason::Timer)
            }
        }
    }

    fn write_target_addr(&mut self, candidate: Option<ResolvedAddr>) -> bool {
        let Some(addr) = candidate else {
            info!("no more addresses left");
            return false;
        };
        let target = self.curr_addr().format_target(addr);
        match self.store.set_manager_target(&target) {
            Ok(()) => {
                info!("trying to connect to {}: {}", self.dest.name(), target);
                self.target = target;
                self.ipv6_manager_con = addr.is_v6();
                true
            }
            Err(e) => {
                warn!(error = %e, "manager target write failed");
                false
            }
        }
    }

    /// Push the cursor's current address as the manager target.
    pub fn write_current_target_addr(&mut self) -> bool {
        let cur = self.curr_addr().current();
        self.write_target_addr(cur)
    }

    /// Advance the cursor and push the next address.
    pub fn write_next_target_addr(&mut self) -> bool {
        let next = self.curr_addr_mut().advance();
        self.write_target_addr(next)
    }

    /// Drop the manager hand-off: clears both the store row and the local
    /// manager target.
    pub(crate) fn clear_manager_addr(&mut self) {
        if let Err(e) = self.store.set_awlan_manager_addr("") {
            warn!(error = %e, "manager addr clear failed");
        }
        let _ = self.addr_manager.set_resource("");
    }

    /// Disconnect from the controller (empty target).
    pub(crate) fn clear_manager_target(&mut self) {
        if let Err(e) = self.store.set_manager_target("") {
            warn!(error = %e, "manager target clear failed");
        }
        self.target.clear();
    }

    // ─── Escalation ─────────────────────────────────────────────────────

    /// Restart the controller connection. Extenders below the fatal
    /// thresholds restart from link selection; beyond them the managers
    /// get restarted. Non-extenders re-enter `OVS_INIT`.
    pub(crate) fn restart_ovs_connection(&mut self, state_ok: bool) {
        if self.extender {
            if self.cnts.ovs_resolve_fail < self.cfg.resolve_fatal_threshold
                && self.cnts.ovs_con < self.cfg.connect_fatal_threshold
            {
                self.set_state(state_ok, CmState::LinkSel);
            } else {
                self.trigger_restart_managers();
            }
        } else {
            self.set_state(state_ok, CmState::OvsInit);
        }
    }

    fn restart_skip(&mut self) -> bool {
        if self.link.if_type.is_wifi() {
            return false;
        }
        if !self.vtag_stability_check() {
            info!("vtag pending, skip restart managers");
            return true;
        }
        let mut skip = false;
        if self.cfg.ble_config_enabled && self.dev_type == DeviceType::None {
            info!("enable two-way BLE communication, skip restart managers");
            if let Err(e) = self.store.set_ble_connectable(true) {
                warn!(error = %e, "BLE connectable update failed");
            }
            skip = true;
        }
        if self.dev_type == DeviceType::Router {
            info!("device in router mode, skip restart managers");
            return true;
        }
        if self.store.gw_offline_enabled() {
            if self.store.gw_offline_active() {
                info!("gateway-offline active, skip restart managers");
                return skip;
            }
            info!(
                "waiting to apply gateway-offline config [{}/{}]",
                self.cnts.gw_offline, self.cfg.gw_offline_retry_threshold
            );
            skip = true;
            if self.cnts.gw_offline < self.cfg.gw_offline_retry_threshold {
                self.cnts.gw_offline += 1;
            }
            if self.cnts.gw_offline != self.cfg.gw_offline_retry_threshold {
                return true;
            }
            if self.store.gw_offline_ready() {
                match self.store.enable_gw_offline() {
                    Ok(()) => info!("gateway-offline configuration enabled"),
                    Err(e) => {
                        warn!(error = %e, "enabling gateway-offline configuration failed");
                        self.cnts.gw_offline -= 1;
                    }
                }
            } else {
                warn!("gateway-offline configuration not ready, restart managers");
                skip = false;
            }
            return skip;
        }
        skip
    }

    /// Terminal escalation with back-pressure: restarts all managers unless
    /// a skip condition holds and the skip budget is not yet exhausted.
    pub(crate) fn trigger_restart_managers(&mut self) {
        let skip = self.restart_skip();
        if skip {
            let seen = self.cnts.skip_restart;
            self.cnts.skip_restart += 1;
            if seen < self.cfg.skip_restart_threshold {
                info!(
                    "skip restart managers [{}/{}]",
                    self.cnts.skip_restart, self.cfg.skip_restart_threshold
                );
                self.reset_time();
                return;
            }
        }
        if !self.platform.wdt_ping() {
            warn!("wdt ping failed");
        }
        warn!("trigger restart managers");
        self.reset_restart_time();
        if !self.platform.restart_managers() {
            warn!("restart managers failed");
        }
    }

    // ─── VLAN tag handling ──────────────────────────────────────────────

    fn set_new_vtag(&mut self) -> bool {
        let vtag = self.link.vtag;
        if vtag.state == VtagState::Blocked && vtag.tag == vtag.blocked_tag {
            info!(
                tag = vtag.tag,
                "vtag: skipping set due to earlier connectivity problem"
            );
            return false;
        }
        if self.link.if_type.is_eth() {
            let if_name = self.link.if_name.clone();
            if let Err(e) = self.store.update_port_trunks(&if_name, &[vtag.tag]) {
                warn!(tag = vtag.tag, error = %e, "vtag: trunk update failed");
                return false;
            }
        }
        let uplink = self.uplink_name();
        if let Err(e) = self.store.update_port_tag(&uplink, vtag.tag, true) {
            warn!(tag = vtag.tag, error = %e, "vtag: tag update failed");
            return false;
        }
        self.link.vtag.state = VtagState::Pending;
        self.link.vtag.failure = 0;
        true
    }

    fn block_vtag(&mut self) -> bool {
        self.link.vtag.state = VtagState::Blocked;
        self.link.vtag.failure = 0;
        self.link.vtag.blocked_tag = self.link.vtag.tag;
        let uplink = self.uplink_name();
        let tag = self.link.vtag.tag;
        if let Err(e) = self.store.update_port_tag(&uplink, tag, false) {
            warn!(tag, error = %e, "vtag: tag removal failed");
            return false;
        }
        true
    }

    /// Account a stability failure against a pending vtag; rolls the tag
    /// back once the failure budget is spent. Returns `true` when no vtag
    /// is pending.
    pub(crate) fn vtag_stability_check(&mut self) -> bool {
        if self.link.vtag.state == VtagState::Pending {
            self.link.vtag.failure += 1;
            info!(
                tag = self.link.vtag.tag,
                "vtag connectivity failed: {} out of {} retries",
                self.link.vtag.failure,
                self.cfg.thresh_vtag
            );
            if self.link.vtag.failure > self.cfg.thresh_vtag {
                info!(tag = self.link.vtag.tag, "vtag: trigger rollback");
                self.update_state(Reason::BlockVtag);
            }
            return false;
        }
        true
    }

    // ─── Gateway-offline mode ───────────────────────────────────────────

    fn disable_gw_offline_state(&mut self) {
        if self.cnts.gw_offline != self.cfg.gw_offline_retry_threshold
            || !self.store.gw_offline_active()
        {
            return;
        }
        match self.store.disable_gw_offline() {
            Ok(()) => {
                self.cnts.gw_offline = 0;
                info!("gateway-offline configuration disabled");
            }
            Err(e) => warn!(error = %e, "disabling gateway-offline configuration failed"),
        }
    }

    // ─── Misc ───────────────────────────────────────────────────────────

    fn extender_init_state(&mut self) {
        // The vtag record survives re-init: a blocked tag must stay blocked
        // or the next SET_NEW_VTAG would re-try a tag that broke
        // connectivity.
        let vtag = self.link.vtag;
        self.link.reset();
        self.link.vtag = vtag;
        if let Some(u) = self.registry.used() {
            debug!(if_name = %u.if_name, "link already marked as used");
            self.link.is_used = true;
            self.link.if_name = u.if_name.clone();
            self.link.if_type = u.if_type;
            self.link.bridge_name = u.bridge.clone().unwrap_or_default();
            self.link.priority = u.priority;
        }
        self.fast_backoff = true;
        self.dev_type = DeviceType::None;
    }

    /// Reconcile bridge membership of the uplink port and refresh the
    /// bridge's IP info.
    pub(crate) fn update_bridge_cfg(
        &mut self,
        bridge: &str,
        port: &str,
        want_in: bool,
        mac_reporting: Option<bool>,
    ) {
        if !self.link.ipv4.blocked && !bridge.is_empty() {
            if let Some(row) = self.store.get_inet_state(bridge) {
                self.apply_inet_state(&row);
            }
        }
        if let Some(state) = mac_reporting {
            if let Err(e) = self.store.update_mac_reporting(port, state) {
                warn!(port, error = %e, "mac reporting update failed");
            }
        }
        let in_bridge = self.store.is_iface_in_bridge(bridge, port);
        debug!(bridge, port, want_in, in_bridge, "bridge cfg");
        if in_bridge != want_in {
            if let Err(e) = self.store.manage_bridge_port(bridge, port, want_in) {
                info!(port, bridge, error = %e, "bridge port update failed");
            }
        }
    }

    /// Draw the quiesce back-off: uniform in `[min_backoff, max_backoff)`
    /// unless fast back-off is in effect, which uses the short fixed value.
    pub(crate) fn compute_backoff(&mut self) {
        self.quiesce_timeout_s = if self.fast_backoff {
            self.cfg.short_backoff_s
        } else if self.max_backoff > self.min_backoff {
            rand::rng().random_range(self.min_backoff..self.max_backoff) as u64
        } else {
            self.max_backoff.max(self.min_backoff) as u64
        };
    }
}
