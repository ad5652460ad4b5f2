//! End-to-end tests of the channel-driven runtime worker.

mod common;

use std::time::{Duration, Instant};

use common::*;
use trellis_cm::config::CmConfig;
use trellis_cm::context::CoreCaps;
use trellis_cm::runtime::CmRuntime;
use trellis_common::types::Reason;

fn test_cfg() -> CmConfig {
    let mut cfg = CmConfig::default();
    cfg.state_dir = std::env::temp_dir()
        .join(format!("trellis-rt-{}", std::process::id()))
        .to_string_lossy()
        .into_owned();
    cfg
}

fn build_runtime() -> (CmRuntime, std::sync::Arc<MockStore>) {
    let store = MockStore::new();
    let caps = CoreCaps {
        store: store.clone(),
        prober: MockProber::new(),
        resolver: MockResolver::answering(&[], &["192.0.2.10"]),
        platform: MockPlatform::new(),
    };
    (CmRuntime::new(test_cfg(), caps), store)
}

fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    cond()
}

#[test]
fn runtime_drives_cold_bring_up_to_connected() {
    let (runtime, store) = build_runtime();

    runtime.awlan_row(awlan("ssl:redir.example.com:443"));
    runtime.manager_row(manager_connected(false));
    store.seed_inet(inet_v4("eth0", "192.168.1.2", "192.168.1.1"));
    runtime.uplink_row(eth_uplink("eth0", 3));

    assert!(
        wait_for(
            || !store.nonempty_targets().is_empty(),
            Duration::from_secs(10)
        ),
        "manager target written"
    );
    assert_eq!(store.nonempty_targets(), vec!["ssl:192.0.2.10:443"]);

    runtime.manager_row(manager_connected(true));
    assert!(
        wait_for(
            || runtime.snapshot().state == "CONNECTED",
            Duration::from_secs(10)
        ),
        "reached CONNECTED, snapshot: {:?}",
        runtime.snapshot()
    );
    let snap = runtime.snapshot();
    assert!(snap.connected);
    assert_eq!(snap.dest, "redirector");
    assert_eq!(snap.target, "ssl:192.0.2.10:443");
}

#[test]
fn trigger_update_is_coalesced_on_the_next_tick() {
    let (runtime, _store) = build_runtime();
    // several triggers before the first tick; the worker must survive the
    // burst and settle on the latest reason
    for _ in 0..5 {
        runtime.trigger_update(Reason::Timer);
        runtime.trigger_update(Reason::ConfigChange);
    }
    assert!(wait_for(
        || !runtime.snapshot().state.is_empty(),
        Duration::from_secs(5)
    ));
}

#[test]
fn shutdown_is_idempotent() {
    let (mut runtime, _store) = build_runtime();
    runtime.shutdown();
    runtime.shutdown();
}

#[test]
fn drop_triggers_shutdown() {
    let (runtime, _store) = build_runtime();
    drop(runtime);
}

#[test]
fn snapshot_reflects_disconnect_accounting() {
    let (runtime, store) = build_runtime();

    runtime.awlan_row(awlan("ssl:redir.example.com:443"));
    runtime.manager_row(manager_connected(false));
    store.seed_inet(inet_v4("eth0", "192.168.1.2", "192.168.1.1"));
    runtime.uplink_row(eth_uplink("eth0", 3));
    assert!(wait_for(
        || !store.nonempty_targets().is_empty(),
        Duration::from_secs(10)
    ));
    runtime.manager_row(manager_connected(true));
    assert!(wait_for(
        || runtime.snapshot().connected,
        Duration::from_secs(10)
    ));

    runtime.manager_row(manager_connected(false));
    assert!(
        wait_for(
            || runtime.snapshot().state == "QUIESCE_OVS",
            Duration::from_secs(10)
        ),
        "quiesce after drop, snapshot: {:?}",
        runtime.snapshot()
    );
    assert_eq!(runtime.snapshot().disconnects, 1);
}
