//! End-to-end supervisor scenarios, driven through the context with mock
//! collaborators and a mocked clock.

mod common;

use common::*;
use trellis_cm::config::CmConfig;
use trellis_cm::CmState;
use trellis_common::check::CheckResult;
use trellis_common::types::{Destination, VtagState};

// ─── S1: cold bring-up ──────────────────────────────────────────────────

#[test]
fn cold_bring_up_reaches_connected() {
    let mut h = Harness::new(CmConfig::default());
    bring_up(&mut h);

    assert_eq!(h.ctx.state, CmState::Connected);
    assert_eq!(h.ctx.dest, Destination::Redirector);
    assert!(h.ctx.link.is_used);
    assert_eq!(h.ctx.link.if_name, "eth0");

    // exactly one non-empty Manager.target write, carrying the resolved ip
    let targets = h.store.nonempty_targets();
    assert_eq!(targets, vec!["ssl:192.0.2.10:443".to_string()]);
    assert_eq!(h.ctx.get_connection_target(), "ssl:192.0.2.10:443");
}

#[test]
fn bring_up_without_awlan_row_stays_in_init() {
    let mut h = Harness::new(CmConfig::default());
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(false)) {
        h.ctx.update_state(r);
    }
    h.tick();
    assert_eq!(h.ctx.state, CmState::Init);
    assert!(h.store.targets().is_empty());
}

#[test]
fn non_extender_skips_onboarding() {
    let mut h = Harness::new(CmConfig::default());
    let mut row = awlan("ssl:redir.example.com:443");
    row.device_mode = "monitor".to_string();
    if let Some(r) = h.ctx.on_awlan_row(&row) {
        h.ctx.update_state(r);
    }
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(false)) {
        h.ctx.update_state(r);
    }
    h.tick();
    // no link selection chain: straight through resolve toward the
    // redirector
    assert!(matches!(
        h.ctx.state,
        CmState::TryResolve | CmState::ReConnect | CmState::TryConnect
    ));
    assert_eq!(h.ctx.dest, Destination::Redirector);
}

// ─── S2: manager hand-off ───────────────────────────────────────────────

#[test]
fn manager_handoff_reconnects_to_manager() {
    let mut h = Harness::new(CmConfig::default());
    bring_up(&mut h);
    assert_eq!(h.ctx.dest, Destination::Redirector);

    let disconnects_before = h
        .store
        .targets()
        .iter()
        .filter(|t| t.is_empty())
        .count();

    // cloud hands over the manager endpoint
    h.resolver.set_mode(MockResolveMode::Answer {
        v6: vec![],
        v4: vec!["198.51.100.7".parse().unwrap()],
    });
    if let Some(r) = h.ctx.on_awlan_row(&awlan_with_manager(
        "ssl:redir.example.com:443",
        "ssl:mgr.example.com:443",
    )) {
        h.ctx.update_state(r);
    }
    assert_eq!(h.ctx.dest, Destination::Manager);

    h.tick();
    // session to the manager comes up
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(true)) {
        h.ctx.update_state(r);
    }

    assert_eq!(h.ctx.state, CmState::Connected);
    assert_eq!(h.ctx.dest, Destination::Manager);
    assert_eq!(
        h.store.nonempty_targets().last().unwrap(),
        "ssl:198.51.100.7:443"
    );

    // at most one disconnect during the hand-off
    let disconnects_after = h
        .store
        .targets()
        .iter()
        .filter(|t| t.is_empty())
        .count();
    assert!(disconnects_after - disconnects_before <= 1);
}

// ─── S3: manager flaps below the disconnect budget ──────────────────────

#[test]
fn five_flaps_stay_on_manager() {
    let mut h = Harness::new(CmConfig::default());
    bring_up(&mut h);

    // let the connection stabilize so fast back-off is retired and the
    // disconnect budget starts from zero
    h.advance(301);
    h.tick();
    assert!(h.ctx.is_con_stable);

    let manager_clears_before = h.store.lock().manager_addr_writes.len();

    for _ in 0..5 {
        if let Some(r) = h.ctx.on_manager_row(&manager_connected(false)) {
            h.ctx.update_state(r);
        }
        assert_eq!(h.ctx.state, CmState::QuiesceOvs);
        let backoff = h.ctx.quiesce_backoff_s();
        assert!(
            (30..60).contains(&backoff),
            "backoff {} outside [min,max)",
            backoff
        );
        if let Some(r) = h.ctx.on_manager_row(&manager_connected(true)) {
            h.ctx.update_state(r);
        }
        assert_eq!(h.ctx.state, CmState::Connected);
    }

    assert_eq!(h.ctx.disconnects, 5);
    // no fall-back through the redirector: OVS_INIT would clear the
    // manager address
    assert_eq!(
        h.store.lock().manager_addr_writes.len(),
        manager_clears_before
    );
}

#[test]
fn stable_period_resets_disconnects() {
    let mut h = Harness::new(CmConfig::default());
    bring_up(&mut h);

    // one flap
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(false)) {
        h.ctx.update_state(r);
    }
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(true)) {
        h.ctx.update_state(r);
    }
    assert_eq!(h.ctx.disconnects, 1);
    assert!(!h.ctx.is_con_stable);

    // hold the connection past the stable period
    h.advance(301);
    h.tick();
    assert!(h.ctx.is_con_stable);
    assert_eq!(h.ctx.disconnects, 0);
}

#[test]
fn fast_backoff_uses_short_fixed_backoff() {
    let mut h = Harness::new(CmConfig::default());
    bring_up(&mut h);
    h.ctx.fast_backoff = true;
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(false)) {
        h.ctx.update_state(r);
    }
    assert_eq!(h.ctx.state, CmState::QuiesceOvs);
    assert_eq!(h.ctx.quiesce_backoff_s(), 8);
}

// ─── Redirector fall-back past the disconnect budget ────────────────────

#[test]
fn exceeding_max_disconnects_falls_back_to_redirector() {
    let mut h = Harness::new(CmConfig::default());
    bring_up(&mut h);

    // hand off to the manager first
    h.resolver.set_mode(MockResolveMode::Answer {
        v6: vec![],
        v4: vec!["198.51.100.7".parse().unwrap()],
    });
    if let Some(r) = h.ctx.on_awlan_row(&awlan_with_manager(
        "ssl:redir.example.com:443",
        "ssl:mgr.example.com:443",
    )) {
        h.ctx.update_state(r);
    }
    h.tick();
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(true)) {
        h.ctx.update_state(r);
    }
    assert_eq!(h.ctx.dest, Destination::Manager);

    // drop the session and never let it come back; every quiesce window
    // expires and the disconnect counter climbs
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(false)) {
        h.ctx.update_state(r);
    }
    for _ in 0..40 {
        if h.ctx.dest == Destination::Redirector {
            break;
        }
        let step = h.ctx.quiesce_backoff_s().max(20) + 1;
        h.advance(step);
        h.tick();
    }

    // the chain restarted through OVS_INIT → TRY_RESOLVE(redirector)
    assert_eq!(h.ctx.dest, Destination::Redirector);
    assert_eq!(h.ctx.disconnects, 0, "OVS_INIT resets the budget");
    assert!(!h.store.lock().manager_addr_writes.is_empty());
}

// ─── S4: resolver failure storm ─────────────────────────────────────────

#[test]
fn resolver_storm_refreshes_dhcp_then_restarts_managers() {
    let resolver = MockResolver::with_mode(MockResolveMode::Fail);
    let mut h = Harness::with_resolver(CmConfig::default(), resolver);

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
    assert_eq!(h.ctx.state, CmState::TryResolve);

    for _ in 0..20 {
        if h.platform.restart_count() > 0 {
            break;
        }
        h.tick();
    }

    assert!(h.resolver.call_count() >= 11);
    assert_eq!(h.store.dhcp_refresh_count(), 1, "one DHCP refresh");
    assert!(h.platform.restart_count() >= 1, "managers restarted");
    assert!(h.ctx.cnts.ovs_resolve_fail >= 5);
}

#[test]
fn single_resolve_failure_retries_without_restart() {
    let resolver = MockResolver::with_mode(MockResolveMode::Fail);
    let mut h = Harness::with_resolver(CmConfig::default(), resolver);

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

    // one failure, then answers
    h.drain();
    h.resolver.set_mode(MockResolveMode::Answer {
        v6: vec![],
        v4: vec!["192.0.2.10".parse().unwrap()],
    });
    h.tick();
    h.tick();

    assert!(matches!(
        h.ctx.state,
        CmState::TryConnect | CmState::ReConnect
    ));
    assert_eq!(h.platform.restart_count(), 0);
    assert_eq!(h.ctx.cnts.ovs_resolve_fail, 0, "success resets the counter");
}

// ─── S5: vtag rollback ──────────────────────────────────────────────────

#[test]
fn pending_vtag_rolls_back_after_stability_failures() {
    let mut h = Harness::new(CmConfig::default());
    bring_up(&mut h);

    if let Some(r) = h.ctx.on_set_vtag(42) {
        h.ctx.update_state(r);
    }
    assert_eq!(h.ctx.link.vtag.state, VtagState::Pending);
    // tag and trunk pushed to the port
    assert!(h
        .store
        .lock()
        .port_tags
        .contains(&("eth0".to_string(), 42, true)));

    // WAN never comes back: every timeout hits the restart path, which
    // charges the pending vtag
    h.prober.set_default(CheckResult::all_fail());
    for _ in 0..10 {
        if h.ctx.link.vtag.state == VtagState::Blocked {
            break;
        }
        h.advance(61);
        h.tick();
    }

    assert_eq!(h.ctx.link.vtag.state, VtagState::Blocked);
    assert_eq!(h.ctx.link.vtag.blocked_tag, 42);
    assert!(
        h.store
            .lock()
            .port_tags
            .contains(&("eth0".to_string(), 42, false)),
        "tag removed from the port"
    );
}

#[test]
fn stable_connection_promotes_pending_vtag() {
    let mut h = Harness::new(CmConfig::default());
    bring_up(&mut h);

    if let Some(r) = h.ctx.on_set_vtag(7) {
        h.ctx.update_state(r);
    }
    assert_eq!(h.ctx.link.vtag.state, VtagState::Pending);

    // reconnect and hold stable
    h.tick();
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(true)) {
        h.ctx.update_state(r);
    }
    assert_eq!(h.ctx.state, CmState::Connected);
    h.advance(301);
    h.tick();

    assert_eq!(h.ctx.link.vtag.state, VtagState::Used);
}

// ─── Timeouts and escalation ────────────────────────────────────────────

#[test]
fn link_sel_timeout_restarts_managers() {
    let mut h = Harness::new(CmConfig::default());
    if let Some(r) = h.ctx.on_awlan_row(&awlan("ssl:redir.example.com:443")) {
        h.ctx.update_state(r);
    }
    if let Some(r) = h.ctx.on_manager_row(&manager_connected(false)) {
        h.ctx.update_state(r);
    }
    // no uplink ever appears
    h.tick();
    assert_eq!(h.ctx.state, CmState::LinkSel);
    h.advance(121);
    h.tick();
    assert!(h.platform.restart_count() >= 1);
}

#[test]
fn connect_timeout_walks_the_address_list() {
    let resolver = MockResolver::with_mode(MockResolveMode::Answer {
        v6: vec![],
        v4: vec![
            "192.0.2.1".parse().unwrap(),
            "192.0.2.2".parse().unwrap(),
        ],
    });
    let mut h = Harness::with_resolver(CmConfig::default(), resolver);

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
    h.tick();
    assert_eq!(h.ctx.state, CmState::TryConnect);
    assert_eq!(h.store.nonempty_targets(), vec!["ssl:192.0.2.1:443"]);

    // first address times out, cursor moves on
    h.advance(31);
    h.tick();
    assert_eq!(h.ctx.state, CmState::TryConnect);
    assert_eq!(
        h.store.nonempty_targets(),
        vec!["ssl:192.0.2.1:443", "ssl:192.0.2.2:443"]
    );
}
