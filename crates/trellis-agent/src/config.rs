//! Daemon configuration file.
//!
//! One TOML file carries the core tuning (`[cm]`), the bootstrap rows the
//! local store is seeded with (`[bootstrap]`), and the platform tool paths
//! (`[platform]`).

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use trellis_cm::config::{CmConfig, CmConfigInput};
use trellis_common::rows::{InetStateRow, UplinkRow};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfigInput {
    pub cm: CmConfigInput,
    pub bootstrap: BootstrapConfig,
    pub platform: PlatformConfig,
}

/// Rows the in-process store starts with. On a production build these come
/// from the device's configuration store instead.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub redirector_addr: String,
    pub manager_addr: String,
    pub min_backoff: u32,
    pub max_backoff: u32,
    pub device_mode: String,
    pub uplinks: Vec<BootstrapUplink>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BootstrapUplink {
    pub if_name: String,
    pub if_type: String,
    pub bridge: Option<String>,
    pub priority: i32,
    pub has_l2: bool,
    pub inet_addr: String,
    pub ipv6_addr: String,
    pub gateway: String,
}

impl BootstrapUplink {
    pub fn to_row(&self) -> UplinkRow {
        let mut row = UplinkRow::new(&self.if_name, &self.if_type);
        row.bridge = self.bridge.clone();
        row.priority = self.priority;
        row.has_l2 = self.has_l2;
        row
    }

    pub fn to_inet_state(&self) -> InetStateRow {
        InetStateRow {
            if_name: self.if_name.clone(),
            enabled: true,
            network: true,
            ip_assign_scheme: "dhcp".to_string(),
            inet_addr: self.inet_addr.clone(),
            ipv6_addr: self.ipv6_addr.clone(),
            gateway: self.gateway.clone(),
            dhcpc: true,
        }
    }
}

/// Paths and knobs for the system collaborators.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// External connectivity-check binary; exit status encodes the result
    /// mask. When unset the built-in prober is used.
    pub probe_command: Option<String>,
    /// Internet reachability target for the built-in prober.
    pub internet_probe_addr: String,
    pub udhcpc_path: String,
    pub udhcpc_script: String,
    pub udhcpc_vendor_classid: Option<String>,
    pub tcpdump_path: String,
    pub capture_dir: String,
    pub run_dir: String,
    pub switch_restore_script: Option<String>,
    pub watchdog_device: Option<String>,
    pub restart_command: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            probe_command: None,
            internet_probe_addr: "1.1.1.1:53".to_string(),
            udhcpc_path: "/sbin/udhcpc".to_string(),
            udhcpc_script: "/usr/bin/udhcpc-dryrun.sh".to_string(),
            udhcpc_vendor_classid: None,
            tcpdump_path: "/usr/sbin/tcpdump".to_string(),
            capture_dir: "/var/trellis".to_string(),
            run_dir: "/var/run".to_string(),
            switch_restore_script: None,
            watchdog_device: None,
            restart_command: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub cm: CmConfig,
    pub bootstrap: BootstrapConfig,
    pub platform: PlatformConfig,
}

impl AgentConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<AgentConfig> {
        let input: AgentConfigInput = match path {
            Some(p) => {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing config {}", p.display()))?
            }
            None => AgentConfigInput::default(),
        };
        Ok(AgentConfig {
            cm: input.cm.resolve(),
            bootstrap: input.bootstrap,
            platform: input.platform,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_full_config() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
            [cm]
            max_disconnects = 4
            state_dir = "/tmp/trellis-test"

            [bootstrap]
            redirector_addr = "ssl:redir.example.com:443"
            min_backoff = 10
            max_backoff = 20

            [[bootstrap.uplinks]]
            if_name = "eth0"
            if_type = "eth"
            priority = 3
            has_l2 = true
            inet_addr = "192.168.1.2"
            gateway = "192.168.1.1"

            [platform]
            internet_probe_addr = "9.9.9.9:53"
        "#
        )
        .unwrap();

        let cfg = AgentConfig::load(Some(f.path())).unwrap();
        assert_eq!(cfg.cm.max_disconnects, 4);
        assert_eq!(cfg.cm.state_dir, "/tmp/trellis-test");
        assert_eq!(cfg.bootstrap.redirector_addr, "ssl:redir.example.com:443");
        assert_eq!(cfg.bootstrap.uplinks.len(), 1);
        let row = cfg.bootstrap.uplinks[0].to_row();
        assert_eq!(row.if_name, "eth0");
        assert_eq!(row.priority, 3);
        assert!(row.has_l2);
        assert_eq!(cfg.platform.internet_probe_addr, "9.9.9.9:53");
    }

    #[test]
    fn missing_file_is_error() {
        assert!(AgentConfig::load(Some(Path::new("/nonexistent/cm.toml"))).is_err());
    }

    #[test]
    fn no_file_yields_defaults() {
        let cfg = AgentConfig::load(None).unwrap();
        assert_eq!(cfg.cm.max_disconnects, 10);
        assert!(cfg.bootstrap.uplinks.is_empty());
        assert_eq!(cfg.platform.udhcpc_path, "/sbin/udhcpc");
    }
}
