//! Core configuration: thresholds, intervals and timeouts.
//!
//! Parsed from TOML as a sparse [`CmConfigInput`] and resolved against the
//! built-in defaults into a concrete [`CmConfig`].

use serde::Deserialize;

/// Route metric pushed for a blocked uplink so Linux routing will not
/// prefer it.
pub const METRIC_UPLINK_BLOCKED: u32 = 999;
/// Default route metric for a healthy uplink.
pub const METRIC_UPLINK_DEFAULT: u32 = 0;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CmConfigInput {
    /// Per-state timeout overrides (seconds).
    pub default_timeout_s: Option<u64>,
    pub link_sel_timeout_s: Option<u64>,
    pub resolve_timeout_s: Option<u64>,
    pub connect_timeout_s: Option<u64>,
    pub fast_reconnect_timeout_s: Option<u64>,

    /// Back-off window used when AWLAN does not supply one.
    pub min_backoff_s: Option<u32>,
    pub max_backoff_s: Option<u32>,
    /// Fixed back-off used while `fast_backoff` is in effect.
    pub short_backoff_s: Option<u64>,

    pub max_disconnects: Option<u32>,
    pub stable_period_s: Option<u64>,
    pub resolve_retry_threshold: Option<u32>,
    pub resolve_fatal_threshold: Option<u32>,
    pub connect_fatal_threshold: Option<u32>,
    pub gw_offline_retry_threshold: Option<u32>,
    pub skip_restart_threshold: Option<u32>,

    pub stability_interval_s: Option<u64>,
    pub stability_short_interval_s: Option<u64>,
    pub uplinks_timer_s: Option<u64>,
    pub uplinks_all_threshold: Option<u32>,
    pub wdt_enabled: Option<bool>,
    pub wdt_interval_s: Option<u64>,

    pub thresh_link: Option<i32>,
    pub thresh_router: Option<i32>,
    pub thresh_internet: Option<i32>,
    pub thresh_fatal: Option<i32>,
    pub thresh_tcpdump: Option<i32>,
    pub thresh_vtag: Option<u32>,
    pub blocking_threshold: Option<i32>,
    /// 1-minute load average above which the periodic probe is skipped.
    pub thresh_cpu: Option<String>,

    pub dryrun_tries_threshold: Option<u32>,
    pub eth_update_short_delay_s: Option<u64>,
    pub eth_update_long_delay_s: Option<u64>,

    pub lan_bridge: Option<String>,
    pub state_dir: Option<String>,
    pub ble_config_enabled: Option<bool>,
    pub switch_restore_enabled: Option<bool>,
    pub tcpdump_enabled: Option<bool>,
}

/// Resolved core configuration.
#[derive(Debug, Clone)]
pub struct CmConfig {
    pub default_timeout_s: u64,
    pub link_sel_timeout_s: u64,
    pub resolve_timeout_s: u64,
    pub connect_timeout_s: u64,
    pub fast_reconnect_timeout_s: u64,

    pub min_backoff_s: u32,
    pub max_backoff_s: u32,
    pub short_backoff_s: u64,

    pub max_disconnects: u32,
    pub stable_period_s: u64,
    pub resolve_retry_threshold: u32,
    pub resolve_fatal_threshold: u32,
    pub connect_fatal_threshold: u32,
    pub gw_offline_retry_threshold: u32,
    pub skip_restart_threshold: u32,

    pub stability_interval_s: u64,
    pub stability_short_interval_s: u64,
    pub uplinks_timer_s: u64,
    pub uplinks_all_threshold: u32,
    pub wdt_enabled: bool,
    pub wdt_interval_s: u64,

    pub thresh_link: i32,
    pub thresh_router: i32,
    pub thresh_internet: i32,
    pub thresh_fatal: i32,
    pub thresh_tcpdump: i32,
    pub thresh_vtag: u32,
    pub blocking_threshold: i32,
    pub thresh_cpu: String,

    pub dryrun_tries_threshold: u32,
    pub eth_update_short_delay_s: u64,
    pub eth_update_long_delay_s: u64,

    pub lan_bridge: String,
    pub state_dir: String,
    pub ble_config_enabled: bool,
    pub switch_restore_enabled: bool,
    pub tcpdump_enabled: bool,
}

impl Default for CmConfig {
    fn default() -> Self {
        CmConfig {
            default_timeout_s: 60,
            link_sel_timeout_s: 120,
            resolve_timeout_s: 180,
            connect_timeout_s: 30,
            fast_reconnect_timeout_s: 20,

            min_backoff_s: 30,
            max_backoff_s: 60,
            short_backoff_s: 8,

            max_disconnects: 10,
            stable_period_s: 300,
            resolve_retry_threshold: 10,
            resolve_fatal_threshold: 5,
            connect_fatal_threshold: 10,
            gw_offline_retry_threshold: 3,
            skip_restart_threshold: 360,

            stability_interval_s: 10,
            stability_short_interval_s: 5,
            uplinks_timer_s: 120,
            uplinks_all_threshold: 60,
            wdt_enabled: true,
            wdt_interval_s: 10,

            thresh_link: 6,
            thresh_router: 10,
            thresh_internet: 10,
            thresh_fatal: 30,
            thresh_tcpdump: 20,
            thresh_vtag: 4,
            blocking_threshold: 2,
            thresh_cpu: "2.5".to_string(),

            dryrun_tries_threshold: 120,
            eth_update_short_delay_s: 5,
            eth_update_long_delay_s: 60,

            lan_bridge: "br-home".to_string(),
            state_dir: "/tmp/trellis".to_string(),
            ble_config_enabled: false,
            switch_restore_enabled: false,
            tcpdump_enabled: false,
        }
    }
}

impl CmConfigInput {
    pub fn resolve(self) -> CmConfig {
        let d = CmConfig::default();
        CmConfig {
            default_timeout_s: self.default_timeout_s.unwrap_or(d.default_timeout_s),
            link_sel_timeout_s: self.link_sel_timeout_s.unwrap_or(d.link_sel_timeout_s),
            resolve_timeout_s: self.resolve_timeout_s.unwrap_or(d.resolve_timeout_s),
            connect_timeout_s: self.connect_timeout_s.unwrap_or(d.connect_timeout_s),
            fast_reconnect_timeout_s: self
                .fast_reconnect_timeout_s
                .unwrap_or(d.fast_reconnect_timeout_s),

            min_backoff_s: self.min_backoff_s.unwrap_or(d.min_backoff_s),
            max_backoff_s: self.max_backoff_s.unwrap_or(d.max_backoff_s),
            short_backoff_s: self.short_backoff_s.unwrap_or(d.short_backoff_s),

            max_disconnects: self.max_disconnects.unwrap_or(d.max_disconnects),
            stable_period_s: self.stable_period_s.unwrap_or(d.stable_period_s),
            resolve_retry_threshold: self
                .resolve_retry_threshold
                .unwrap_or(d.resolve_retry_threshold),
            resolve_fatal_threshold: self
                .resolve_fatal_threshold
                .unwrap_or(d.resolve_fatal_threshold),
            connect_fatal_threshold: self
                .connect_fatal_threshold
                .unwrap_or(d.connect_fatal_threshold),
            gw_offline_retry_threshold: self
                .gw_offline_retry_threshold
                .unwrap_or(d.gw_offline_retry_threshold),
            skip_restart_threshold: self
                .skip_restart_threshold
                .unwrap_or(d.skip_restart_threshold),

            stability_interval_s: self
                .stability_interval_s
                .unwrap_or(d.stability_interval_s)
                .max(1),
            stability_short_interval_s: self
                .stability_short_interval_s
                .unwrap_or(d.stability_short_interval_s)
                .max(1),
            uplinks_timer_s: self.uplinks_timer_s.unwrap_or(d.uplinks_timer_s).max(1),
            uplinks_all_threshold: self
                .uplinks_all_threshold
                .unwrap_or(d.uplinks_all_threshold)
                .max(1),
            wdt_enabled: self.wdt_enabled.unwrap_or(d.wdt_enabled),
            wdt_interval_s: self.wdt_interval_s.unwrap_or(d.wdt_interval_s).max(1),

            thresh_link: self.thresh_link.unwrap_or(d.thresh_link).max(1),
            thresh_router: self.thresh_router.unwrap_or(d.thresh_router).max(1),
            thresh_internet: self.thresh_internet.unwrap_or(d.thresh_internet).max(1),
            thresh_fatal: self.thresh_fatal.unwrap_or(d.thresh_fatal).max(1),
            thresh_tcpdump: self.thresh_tcpdump.unwrap_or(d.thresh_tcpdump).max(1),
            thresh_vtag: self.thresh_vtag.unwrap_or(d.thresh_vtag).max(1),
            blocking_threshold: self
                .blocking_threshold
                .unwrap_or(d.blocking_threshold)
                .max(1),
            thresh_cpu: self.thresh_cpu.unwrap_or(d.thresh_cpu),

            dryrun_tries_threshold: self
                .dryrun_tries_threshold
                .unwrap_or(d.dryrun_tries_threshold),
            eth_update_short_delay_s: self
                .eth_update_short_delay_s
                .unwrap_or(d.eth_update_short_delay_s),
            eth_update_long_delay_s: self
                .eth_update_long_delay_s
                .unwrap_or(d.eth_update_long_delay_s),

            lan_bridge: self.lan_bridge.unwrap_or(d.lan_bridge),
            state_dir: self.state_dir.unwrap_or(d.state_dir),
            ble_config_enabled: self.ble_config_enabled.unwrap_or(d.ble_config_enabled),
            switch_restore_enabled: self
                .switch_restore_enabled
                .unwrap_or(d.switch_restore_enabled),
            tcpdump_enabled: self.tcpdump_enabled.unwrap_or(d.tcpdump_enabled),
        }
    }
}

impl CmConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(CmConfig::default());
        }
        let parsed: CmConfigInput =
            toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))?;
        Ok(parsed.resolve())
    }

    /// Parsed CPU gate threshold; `None` disables the gate.
    pub fn cpu_threshold(&self) -> Option<f64> {
        self.thresh_cpu.parse::<f64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = CmConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.max_disconnects, 10);
        assert_eq!(cfg.stable_period_s, 300);
        assert_eq!(cfg.resolve_retry_threshold, 10);
        assert_eq!(cfg.resolve_fatal_threshold, 5);
        assert_eq!(cfg.connect_fatal_threshold, 10);
        assert_eq!(cfg.link_sel_timeout_s, 120);
        assert_eq!(cfg.resolve_timeout_s, 180);
        assert_eq!(cfg.connect_timeout_s, 30);
        assert_eq!(cfg.blocking_threshold, 2);
        assert_eq!(cfg.uplinks_timer_s, 120);
        assert_eq!(cfg.uplinks_all_threshold, 60);
    }

    #[test]
    fn partial_toml_overrides() {
        let cfg = CmConfig::from_toml_str(
            r#"
            max_disconnects = 3
            stable_period_s = 30
            thresh_cpu = "4.0"
            state_dir = "/run/cm"
        "#,
        )
        .unwrap();
        assert_eq!(cfg.max_disconnects, 3);
        assert_eq!(cfg.stable_period_s, 30);
        assert_eq!(cfg.cpu_threshold(), Some(4.0));
        assert_eq!(cfg.state_dir, "/run/cm");
        // untouched fields fall back
        assert_eq!(cfg.resolve_retry_threshold, 10);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(CmConfig::from_toml_str("max_disconnects = {").is_err());
    }

    #[test]
    fn cpu_threshold_garbage_disables_gate() {
        let cfg = CmConfig::from_toml_str(r#"thresh_cpu = "lots""#).unwrap();
        assert_eq!(cfg.cpu_threshold(), None);
    }

    #[test]
    fn intervals_clamped_to_one_second() {
        let cfg = CmConfig::from_toml_str("stability_interval_s = 0").unwrap();
        assert_eq!(cfg.stability_interval_s, 1);
    }
}
