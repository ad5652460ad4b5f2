//! The stability monitor.
//!
//! Periodically probes connectivity on the active uplink (and, on a slower
//! cadence, every candidate uplink), translates probe results into counter
//! updates and per-family uplink state transitions, and applies the
//! escalation ladder: DHCP refresh, interface restart, switch-level fixes,
//! capture hooks, and finally a managers restart.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use trellis_common::check::{CheckMask, CheckResult};
use trellis_common::types::{IfType, Reason, UplinkState};

use crate::caps::{CounterKind, IpFamily, RestoreMask};
use crate::config::{METRIC_UPLINK_BLOCKED, METRIC_UPLINK_DEFAULT};
use crate::context::CoreContext;
use crate::runtime::{Event, ProbeDone};
use crate::uplink::Uplink;

impl CoreContext {
    // ─── Synchronous checks (supervisor path) ───────────────────────────

    /// Run a connectivity check for the main link on the calling thread.
    pub(crate) fn req_stability_check_main(&mut self, opts: CheckMask, db_update: bool) -> bool {
        let uname = self.link.if_name.clone();
        let utype = self.link.if_type;
        let clink = self.uplink_name();
        self.req_stability_check(&uname, utype, &clink, opts, db_update)
    }

    /// Run a connectivity check for an arbitrary uplink on the calling
    /// thread and route the result through [`Self::process_result`].
    pub fn req_stability_check(
        &mut self,
        uname: &str,
        utype: IfType,
        clink: &str,
        opts: CheckMask,
        db_update: bool,
    ) -> bool {
        if !self.extender {
            return true;
        }
        let mut opts = opts;
        self.set_ip_opts(uname, utype, &mut opts);
        // Feed the watchdog before a potentially slow platform call.
        if !self.platform.wdt_ping() {
            warn!("wdt ping failed");
        }
        let cstate = self.prober.check(clink, opts);
        self.process_result(uname, opts, db_update, cstate.ok, &cstate)
    }

    // ─── Asynchronous checks ────────────────────────────────────────────

    /// Schedule a connectivity check on a worker thread. At most one probe
    /// per (uplink, option-mask) is in flight at a time; completion arrives
    /// as [`Event::ProbeDone`].
    pub fn spawn_stability_check(
        &mut self,
        uname: &str,
        utype: IfType,
        clink: &str,
        opts: CheckMask,
        db_update: bool,
        repeat: bool,
    ) {
        if !self.extender {
            return;
        }
        let mut opts = opts;
        self.set_ip_opts(uname, utype, &mut opts);
        if opts.is_empty() {
            debug!("stability: nothing to do anymore");
            return;
        }
        let key = (uname.to_string(), opts.0);
        if !self.pending_probes.insert(key) {
            debug!(uname, "stability check already in flight, skipping");
            return;
        }
        info!(
            uname,
            clink,
            opts = %opts,
            db_update,
            repeat,
            "stability: scheduling check"
        );
        let prober = std::sync::Arc::clone(&self.prober);
        let tx = self.events_tx.clone();
        let done = ProbeDone {
            uname: uname.to_string(),
            utype,
            clink: clink.to_string(),
            opts,
            db_update,
            repeat,
            mask: 0,
        };
        thread::Builder::new()
            .name("cm-probe".into())
            .spawn(move || {
                let res = prober.check(&done.clink, done.opts);
                let _ = tx.send(Event::ProbeDone(ProbeDone {
                    mask: res.to_mask(),
                    ..done
                }));
            })
            .map(|_| ())
            .unwrap_or_else(|e| warn!(error = %e, "failed to spawn probe worker"));
    }

    /// Probe worker completed.
    pub fn on_probe_done(&mut self, p: ProbeDone) -> Option<Reason> {
        self.pending_probes.remove(&(p.uname.clone(), p.opts.0));
        let cstate = CheckResult::from_mask(p.mask);
        let ok = cstate.ok;
        debug!(
            uname = %p.uname,
            clink = %p.clink,
            mask = format_args!("{:#04x}", p.mask),
            ok,
            "stability: check completed"
        );

        let mut db_update = p.db_update;
        let mut repeat = p.repeat;
        // Link no longer matches what was probed: stop repeating.
        if !self.check_uplink_state(&p.uname, &p.clink) && !ok {
            info!("force clean repeat and update state");
            repeat = false;
            db_update = false;
        }

        self.process_result(&p.uname, p.opts, db_update, ok, &cstate);

        if repeat && !ok {
            let mut opts = p.opts;
            let mut dbu = db_update;
            if !self.connected {
                dbu = true;
                opts.insert(CheckMask::FAST);
            }
            self.spawn_stability_check(&p.uname, p.utype, &p.clink, opts, dbu, repeat);
        }
        None
    }

    /// Whether the probed pairing of uplink row and carrier link is still
    /// current.
    fn check_uplink_state(&self, if_name: &str, up_name: &str) -> bool {
        let Some(con) = self.registry.get(if_name) else {
            info!(if_name, "does not exist on uplinks list");
            return false;
        };
        let blocked_v4 = con.ipv4.map_or(true, |s| s == UplinkState::Blocked);
        let blocked_v6 = con.ipv6.map_or(true, |s| s == UplinkState::Blocked);
        if blocked_v4 && blocked_v6 {
            info!(if_name, "IP on uplink not available");
            return false;
        }
        if let Some(bridge) = &con.bridge {
            if bridge != up_name {
                info!(up_name, bridge = %bridge, "uplink/bridge mismatch");
                return false;
            }
        } else if con.if_name != up_name {
            info!(up_name, if_name, "uplink/ifname mismatch");
            return false;
        }
        true
    }

    // ─── Option derivation ──────────────────────────────────────────────

    /// Fold the uplink's per-family states into the check options.
    fn set_ip_opts(&self, uname: &str, utype: IfType, opts: &mut CheckMask) {
        let Some(u) = self.registry.get(uname) else {
            warn!(uname, "IP state not available");
            return;
        };
        let v4 = u.ipv4.unwrap_or(UplinkState::None);
        let v6 = u.ipv6.unwrap_or(UplinkState::None);

        if v4 == UplinkState::Unblocking || v6 == UplinkState::Unblocking {
            opts.insert(CheckMask::ROUTER | CheckMask::INTERNET);
        }

        if v4 != UplinkState::Blocked && v4 != UplinkState::None {
            opts.insert(CheckMask::IPV4);
        } else {
            opts.remove(CheckMask::IPV4);
        }
        if v6 != UplinkState::Blocked && v6 != UplinkState::None {
            opts.insert(CheckMask::IPV6);
        } else {
            opts.remove(CheckMask::IPV6);
        }

        if v4 != UplinkState::Inactive && v6 == UplinkState::None {
            opts.insert(CheckMask::IPV4);
        }
        if v6 != UplinkState::Inactive && v4 == UplinkState::None {
            opts.insert(CheckMask::IPV6);
        }

        if !opts.contains(CheckMask::IPV4) && !opts.contains(CheckMask::IPV6) {
            info!("unexpected IP configuration, forcing IPv4");
            opts.insert(CheckMask::IPV4);
        }

        if v4 == UplinkState::Inactive || v6 == UplinkState::Inactive {
            opts.insert(CheckMask::FAST);
        }

        // Router checks are meaningless on LTE uplinks.
        if utype.is_lte() {
            opts.remove(CheckMask::ROUTER);
        }
    }

    // ─── Result processing ──────────────────────────────────────────────

    /// Translate a probe result into counter updates, per-family state
    /// transitions and remediation. Returns the (possibly overridden)
    /// probe verdict.
    pub fn process_result(
        &mut self,
        uname: &str,
        opts: CheckMask,
        db_update: bool,
        status: bool,
        cstate: &CheckResult,
    ) -> bool {
        if !self.link.is_used {
            info!("waiting for new active link");
            self.ble.clear();
            self.update_ble_phy_link();
            return false;
        }

        let Some(con) = self.registry.get(uname).cloned() else {
            warn!(uname, "interface does not exist");
            return false;
        };

        info!(uname, status, opts = %opts, "params to check");
        debug!(
            uname,
            counters = ?[
                con.unreachable_link_counter,
                con.unreachable_router_counter,
                con.unreachable_internet_counter,
                con.unreachable_cloud_counter
            ],
            "stability counters"
        );

        let is_main = uname == self.link.if_name;
        let muplink: Option<String> = if is_main {
            Some(
                con.bridge
                    .clone()
                    .unwrap_or_else(|| self.link.if_name.clone()),
            )
        } else {
            None
        };

        self.update_uplink_ip_state(&con, opts, cstate);

        if opts.contains(CheckMask::NTP) {
            self.ntp_ok = cstate.ntp;
        }

        if !db_update {
            return status;
        }

        let mut ropt = RestoreMask::default();

        // Expected bridge membership broken on the main link counts as a
        // link failure.
        if muplink.is_some()
            && self.link.is_bridge()
            && con.bridge.as_deref() == Some(self.link.bridge_name.as_str())
            && !self
                .store
                .validate_bridge_port(&self.link.bridge_name, &self.link.if_name)
        {
            warn!(uname, bridge = %self.link.bridge_name, "main link no longer in its bridge");
            let counter = if con.unreachable_link_counter < 0 {
                1
            } else {
                con.unreachable_link_counter + 1
            };
            info!(counter, "detected broken link");
            if counter == self.cfg.thresh_link {
                let if_name = self.link.if_name.clone();
                if let Err(e) = self.store.set_network_enabled(&if_name, false) {
                    warn!(error = %e, "force disable of main uplink failed");
                } else {
                    self.link.restart_pending = true;
                }
                if let Err(e) = self.store.set_network_enabled(&if_name, true) {
                    warn!(error = %e, "re-enable of main uplink failed");
                }
                if counter + 1 > self.cfg.thresh_fatal {
                    self.handle_fatal_state(counter);
                }
            }
            self.set_unreachable_counter(uname, CounterKind::Link, counter);
            return false;
        }

        if opts.contains(CheckMask::LINK) {
            let mut counter = 0;
            if !cstate.link {
                counter = if con.unreachable_link_counter < 0 {
                    1
                } else {
                    con.unreachable_link_counter + 1
                };
                info!(counter, "detected broken link");
                if counter == self.cfg.thresh_link {
                    let if_name = self.link.if_name.clone();
                    if let Err(e) = self.store.set_network_enabled(&if_name, false) {
                        warn!(error = %e, "force disable of main uplink failed");
                    } else {
                        self.link.restart_pending = true;
                    }
                    if let Err(e) = self.store.set_network_enabled(&if_name, true) {
                        warn!(error = %e, "re-enable of main uplink failed");
                    }
                }
                if con.is_used {
                    self.handle_fatal_state(con.unreachable_link_counter);
                }
            }
            self.set_unreachable_counter(uname, CounterKind::Link, counter);
        }

        if opts.contains(CheckMask::ROUTER) {
            let mut counter = 0;
            let failed = (opts.contains(CheckMask::IPV4) && !cstate.router_ipv4)
                || (opts.contains(CheckMask::IPV6) && !cstate.router_ipv6)
                || (!opts.contains(CheckMask::IPV4) && !opts.contains(CheckMask::IPV6));
            if failed {
                counter = if con.unreachable_router_counter < 0 {
                    1
                } else {
                    con.unreachable_router_counter + 1
                };
                info!(counter, "detected broken router");
                self.restore_switch_cfg_params(counter, self.cfg.thresh_router + 2, &mut ropt);
                if counter % self.cfg.thresh_router == 0 {
                    ropt.insert(RestoreMask::IP);
                }
                if counter > self.cfg.thresh_router && counter % self.cfg.thresh_router == 1 {
                    ropt.insert(RestoreMask::MAIN_LINK);
                }
            } else if let Some(mu) = &muplink {
                if self.cfg.tcpdump_enabled
                    && con.unreachable_router_counter >= self.cfg.thresh_tcpdump
                {
                    self.platform.tcpdump_stop(mu);
                }
            }

            self.set_unreachable_counter(uname, CounterKind::Router, counter);

            if let Some(mu) = &muplink {
                if self.cfg.tcpdump_enabled
                    && counter == self.cfg.thresh_tcpdump
                    && self.link.if_type.is_eth()
                {
                    self.platform.tcpdump_start(mu);
                }
                if con.unreachable_router_counter + 1 == self.cfg.thresh_fatal {
                    self.platform.tcpdump_stop(mu);
                }
            }

            if con.is_used {
                self.handle_fatal_state(con.unreachable_router_counter);
            }
        }

        if opts.contains(CheckMask::INTERNET) {
            let mut counter = 0;
            let failed = (opts.contains(CheckMask::IPV4) && !cstate.internet_ipv4)
                || (opts.contains(CheckMask::IPV6) && !cstate.internet_ipv6)
                || (!opts.contains(CheckMask::IPV4) && !opts.contains(CheckMask::IPV6));
            if failed {
                counter = if con.unreachable_internet_counter < 0 {
                    1
                } else {
                    con.unreachable_internet_counter + 1
                };
                info!(counter, "detected broken internet");
                self.restore_switch_cfg_params(counter, self.cfg.thresh_internet + 2, &mut ropt);
                if counter % self.cfg.thresh_internet == 0 {
                    ropt.insert(RestoreMask::IP);
                }
                if counter > self.cfg.thresh_internet && counter % self.cfg.thresh_internet == 1 {
                    ropt.insert(RestoreMask::MAIN_LINK);
                }
            }
            self.set_unreachable_counter(uname, CounterKind::Internet, counter);
        }

        if opts.contains(CheckMask::NTP) {
            if let Some(u) = self.registry.get_mut(uname) {
                u.ntp_state = cstate.ntp;
            }
            if let Err(e) = self.store.update_ntp_state(uname, cstate.ntp) {
                warn!(error = %e, "ntp state update failed");
            }
        }

        self.restore_connection(ropt);
        status
    }

    /// Per-family uplink state transitions driven by the probe result.
    fn update_uplink_ip_state(&mut self, con: &Uplink, opts: CheckMask, cstate: &CheckResult) {
        if let Some(s) = con.ipv4 {
            self.updating_ip(con, opts, cstate, false, s);
        }
        if let Some(s) = con.ipv6 {
            self.updating_ip(con, opts, cstate, true, s);
        }
    }

    fn updating_ip(
        &mut self,
        con: &Uplink,
        opts: CheckMask,
        cstate: &CheckResult,
        ipv6: bool,
        s: UplinkState,
    ) {
        let (family_check, family, router_ok, internet_ok) = if ipv6 {
            (CheckMask::IPV6, IpFamily::V6, cstate.router_ipv6, cstate.internet_ipv6)
        } else {
            (CheckMask::IPV4, IpFamily::V4, cstate.router_ipv4, cstate.internet_ipv4)
        };

        if con.is_used && s != UplinkState::Blocked {
            if ipv6 {
                self.link.ipv6.blocked = false;
            } else {
                self.link.ipv4.blocked = false;
            }
        }

        if !opts.contains(family_check) {
            return;
        }
        let rc = opts.contains(CheckMask::ROUTER);
        let ic = opts.contains(CheckMask::INTERNET);
        if !rc && !ic {
            return;
        }

        let con_ok = (((ic && internet_ok) || (con.unreachable_internet_counter <= 0 && !ic))
            && ((rc && router_ok) || (con.unreachable_router_counter <= 0 && !rc)))
            || (con.is_used && self.connected && ipv6 == self.ipv6_manager_con);

        let next = match s {
            UplinkState::Blocked => {
                if con.is_used {
                    if ipv6 {
                        self.link.ipv6.blocked = true;
                    } else {
                        self.link.ipv4.blocked = true;
                    }
                }
                None
            }
            UplinkState::None | UplinkState::Ready => Some(if con_ok {
                UplinkState::Active
            } else {
                UplinkState::Inactive
            }),
            UplinkState::Inactive => {
                if con_ok {
                    Some(UplinkState::Active)
                } else if con.unreachable_router_counter >= self.cfg.blocking_threshold
                    || con.unreachable_internet_counter >= self.cfg.blocking_threshold
                {
                    Some(UplinkState::Blocked)
                } else {
                    None
                }
            }
            UplinkState::Active => {
                if con_ok {
                    None
                } else {
                    Some(UplinkState::Inactive)
                }
            }
            UplinkState::Unblocking => {
                if con_ok {
                    if let Err(e) = self
                        .store
                        .update_route_metric(&con.if_name, METRIC_UPLINK_DEFAULT)
                    {
                        warn!(error = %e, "route metric restore failed");
                    }
                    Some(UplinkState::Active)
                } else {
                    Some(UplinkState::Blocked)
                }
            }
        };

        if let Some(ns) = next {
            self.set_uplink_ip_state(&con.if_name, family, ns);
        }
    }

    /// Write a per-family uplink state to the store and the registry.
    /// Entering `Blocked` bumps the route metric so routing stops
    /// preferring the link.
    pub fn set_uplink_ip_state(&mut self, if_name: &str, family: IpFamily, ns: UplinkState) {
        if let Some(u) = self.registry.get_mut(if_name) {
            match family {
                IpFamily::V4 => u.ipv4 = Some(ns),
                IpFamily::V6 => u.ipv6 = Some(ns),
            }
        }
        if let Err(e) = self.store.set_uplink_ip_state(if_name, family, ns) {
            warn!(if_name, family = family.name(), error = %e, "ip state update failed");
        }
        if ns == UplinkState::Blocked {
            if let Err(e) = self.store.update_route_metric(if_name, METRIC_UPLINK_BLOCKED) {
                warn!(if_name, error = %e, "route metric update failed");
            }
        }
    }

    // ─── Remediation ────────────────────────────────────────────────────

    fn handle_fatal_state(&mut self, counter: i32) {
        if counter == 0 {
            self.reset_restart_time();
        }
        if counter + 1 > self.cfg.thresh_fatal {
            warn!("restart managers: fatal stability failure threshold exceeded");
            let if_name = self.link.if_name.clone();
            if self.cfg.tcpdump_enabled {
                self.platform.tcpdump_stop(&if_name);
            }
            self.trigger_restart_managers();
        }
    }

    fn restore_switch_cfg_params(&self, counter: i32, thresh: i32, ropt: &mut RestoreMask) {
        if !self.cfg.switch_restore_enabled {
            return;
        }
        ropt.insert(RestoreMask::SWITCH_FIX_PORT_MAP);
        if thresh > 0 && counter % thresh == 0 {
            ropt.insert(RestoreMask::SWITCH_DUMP_DATA);
            if !self.skip_restore_switch_fix_auton() {
                ropt.insert(RestoreMask::SWITCH_FIX_AUTON);
            }
        }
    }

    fn skip_restore_switch_fix_auton(&self) -> bool {
        if self.dev_type == trellis_common::types::DeviceType::Bridge
            && self.store.gw_offline_enabled()
            && (self.store.gw_offline_active() || self.store.gw_offline_ready())
        {
            info!("gateway-offline: skip switch autoneg fix");
            return true;
        }
        false
    }

    fn restore_connection(&mut self, ropt: RestoreMask) {
        if ropt.is_empty() {
            return;
        }
        if self.connected {
            return;
        }
        if !self.link.if_type.is_eth() {
            return;
        }
        let uplink = self.uplink_name();
        if ropt.contains(RestoreMask::IP) {
            if let Err(e) = self.store.refresh_dhcp(&uplink) {
                warn!(error = %e, "dhcp refresh failed");
            }
        } else if ropt.contains(RestoreMask::MAIN_LINK) {
            self.restart_iface(&uplink);
        } else {
            let hwaddr = self.link.gateway_hwaddr.clone();
            self.platform.restore_switch_cfg(ropt.switch_bits(), &hwaddr);
        }
    }

    fn restart_iface(&mut self, if_name: &str) {
        if let Err(e) = self.store.set_interface_enabled(if_name, false) {
            warn!(if_name, error = %e, "interface disable failed");
        }
        if let Err(e) = self.store.set_interface_enabled(if_name, true) {
            warn!(if_name, error = %e, "interface enable failed");
        }
    }

    // ─── Periodic ticks ─────────────────────────────────────────────────

    /// Stability timer fired.
    pub fn stability_tick(&mut self) {
        if self.run_stability {
            self.connection_stability_check();
        }
    }

    /// Uplink re-evaluation timer fired.
    pub fn uplinks_tick(&mut self) {
        self.recalc_links(false);
    }

    fn cpu_is_low_loadavg(&self) -> bool {
        let Some(thresh) = self.cfg.cpu_threshold() else {
            return true;
        };
        let Some(load) = self.platform.load_average_1m() else {
            return true;
        };
        if load > thresh {
            info!(load, "skip stability check due to high CPU usage");
            return false;
        }
        true
    }

    fn carrier_link_of(&self, u: &Uplink) -> String {
        match (&u.bridge, u.is_used) {
            (Some(b), true) => b.clone(),
            _ => u.if_name.clone(),
        }
    }

    fn connection_stability_check(&mut self) {
        let base = CheckMask::LINK | CheckMask::ROUTER | CheckMask::NTP | CheckMask::INTERNET;

        // Unblocking families get probed before anything else so a blocked
        // link can be promoted back quickly.
        for v6 in [false, true] {
            for name in self.registry.unblocking(v6) {
                let Some(u) = self.registry.get(&name).cloned() else {
                    continue;
                };
                let clink = self.carrier_link_of(&u);
                self.spawn_stability_check(
                    &name,
                    u.if_type,
                    &clink,
                    base | CheckMask::FAST,
                    true,
                    false,
                );
            }
        }

        let active = self.registry.active_uplinks();

        if self.stability_cnts > self.cfg.uplinks_all_threshold {
            self.stability_cnts = 0;
            info!(count = active.len(), "checking all active links");
            for name in active {
                let Some(u) = self.registry.get(&name).cloned() else {
                    continue;
                };
                let clink = self.carrier_link_of(&u);
                self.spawn_stability_check(&name, u.if_type, &clink, base, true, false);
            }
            return;
        }

        self.stability_cnts += 1;
        if self.connected
            && !self.link.ipv4.blocked
            && !self.link.ipv6.blocked
            && !self.cpu_is_low_loadavg()
        {
            return;
        }

        let mut opts = base;
        if self.connected {
            opts.remove(CheckMask::INTERNET);
        } else if active.len() > 1 {
            opts.insert(CheckMask::FAST);
        }
        let uname = self.link.if_name.clone();
        let utype = self.link.if_type;
        let clink = self.uplink_name();
        self.spawn_stability_check(&uname, utype, &clink, opts, true, false);
    }

    // ─── DHCP dry-run supervision ───────────────────────────────────────

    /// A `udhcpc` dry-run worker exited.
    pub fn on_dryrun_done(
        &mut self,
        if_name: &str,
        if_type: IfType,
        ok: bool,
        cnt: u32,
    ) -> Option<Reason> {
        let Some(con) = self.registry.get(if_name).cloned() else {
            debug!(if_name, "dryrun: interface does not exist");
            return None;
        };
        debug!(if_name, ok, cnt, "dryrun result");

        if if_type.is_eth() && self.store.is_iface_in_bridge(&self.cfg.lan_bridge, if_name) {
            info!(if_name, "skip new dryrun, iface in lan bridge");
            return None;
        }

        if !ok && con.has_l2 {
            if self.link.is_used && cnt > self.cfg.dryrun_tries_threshold {
                info!(
                    if_name,
                    threshold = self.cfg.dryrun_tries_threshold,
                    "stop dryruns, threshold exceeded"
                );
                return None;
            }
            if if_type.is_eth() && self.link.is_used && self.link.if_type.is_wifi() {
                info!(if_name, connected = self.connected, "leaf with plugged ethernet");
                let delay = if self.connected {
                    self.cfg.eth_update_short_delay_s
                } else {
                    self.cfg.eth_update_long_delay_s
                };
                self.schedule_delayed_eth_update(if_name, delay);
            }
            self.platform
                .start_dhcp_dryrun(if_name, if_type, cnt + 1, self.events_tx.clone());
            return None;
        }

        if ok && con.ipv4.is_none() {
            // DHCP is obtainable here; surface the family so selection can
            // consider the link.
            self.set_uplink_ip_state(if_name, IpFamily::V4, UplinkState::Ready);
        }
        None
    }

    /// Mark the interface as looping and arm a timer to clear the flag.
    fn schedule_delayed_eth_update(&mut self, if_name: &str, delay_s: u64) {
        let already_looping = self
            .registry
            .get(if_name)
            .map(|u| u.loop_state)
            .unwrap_or(false);
        if !already_looping {
            if let Some(u) = self.registry.get_mut(if_name) {
                u.loop_state = true;
            }
            if let Err(e) = self.store.update_loop_state(if_name, true) {
                warn!(if_name, error = %e, "loop state update failed");
            }
        }
        info!(if_name, delay_s, "scheduling delayed eth update");
        let tx = self.events_tx.clone();
        let name = if_name.to_string();
        thread::Builder::new()
            .name("cm-eth-delay".into())
            .spawn(move || {
                thread::sleep(Duration::from_secs(delay_s));
                let _ = tx.send(Event::EthUpdateExpired { if_name: name });
            })
            .map(|_| ())
            .unwrap_or_else(|e| warn!(error = %e, "failed to spawn eth-update timer"));
    }

    /// Delayed ethernet re-evaluation timer fired.
    pub fn on_eth_update_expired(&mut self, if_name: &str) -> Option<Reason> {
        info!(if_name, "delayed eth update");
        if let Some(u) = self.registry.get_mut(if_name) {
            u.loop_state = false;
        }
        if let Err(e) = self.store.update_loop_state(if_name, false) {
            warn!(if_name, error = %e, "loop state update failed");
        }
        None
    }
}
