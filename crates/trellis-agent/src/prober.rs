//! Connectivity probers.
//!
//! [`SystemProber`] answers the check mask from the host itself: operstate
//! for the link, the default gateway for the router check, a configured
//! anchor for the Internet check. [`CommandProber`] escapes to an external
//! binary whose exit status is the encoded result mask, for platforms
//! where the probe is a separate tool.

use std::fs;
use std::net::{SocketAddr, TcpStream};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use trellis_cm::caps::Prober;
use trellis_common::addr::is_private_ip;
use trellis_common::check::{CheckMask, CheckResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const FAST_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct SystemProber {
    internet_addr: String,
}

impl SystemProber {
    pub fn new(internet_addr: &str) -> SystemProber {
        SystemProber {
            internet_addr: internet_addr.to_string(),
        }
    }

    fn link_up(if_name: &str) -> bool {
        fs::read_to_string(format!("/sys/class/net/{}/operstate", if_name))
            .map(|s| {
                let s = s.trim();
                // loopback and some virtual links report "unknown" while up
                s == "up" || s == "unknown"
            })
            .unwrap_or(false)
    }

    /// Default IPv4 gateway from `/proc/net/route`: destination 0.0.0.0
    /// with the gateway field in little-endian hex.
    fn default_gateway_v4() -> Option<std::net::Ipv4Addr> {
        let table = fs::read_to_string("/proc/net/route").ok()?;
        for line in table.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 || fields[1] != "00000000" {
                continue;
            }
            let gw = u32::from_str_radix(fields[2], 16).ok()?;
            let ip = std::net::Ipv4Addr::from(gw.swap_bytes());
            if !ip.is_unspecified() {
                return Some(ip);
            }
        }
        None
    }

    fn tcp_reachable(addr: &SocketAddr, timeout: Duration) -> bool {
        TcpStream::connect_timeout(addr, timeout).is_ok()
    }

    fn router_reachable(timeout: Duration) -> bool {
        let Some(gw) = Self::default_gateway_v4() else {
            return false;
        };
        let gw_ip = std::net::IpAddr::V4(gw);
        if !is_private_ip(&gw_ip) {
            debug!(%gw, "default gateway is not a private address");
        }
        // DNS port first, then DHCP-adjacent web UI as a fallback.
        Self::tcp_reachable(&SocketAddr::new(gw_ip, 53), timeout)
            || Self::tcp_reachable(&SocketAddr::new(gw_ip, 80), timeout)
    }

    fn clock_synced() -> bool {
        // A device that has synced NTP at least once will not sit in the
        // build epoch.
        chrono::Utc::now().timestamp() > 1_600_000_000
    }
}

impl Prober for SystemProber {
    fn check(&self, clink: &str, opts: CheckMask) -> CheckResult {
        let timeout = if opts.contains(CheckMask::FAST) {
            FAST_PROBE_TIMEOUT
        } else {
            PROBE_TIMEOUT
        };

        let mut res = CheckResult::default();
        let mut ok = true;

        if opts.contains(CheckMask::LINK) {
            res.link = Self::link_up(clink);
            ok &= res.link;
        }
        if opts.contains(CheckMask::ROUTER) && opts.contains(CheckMask::IPV4) {
            res.router_ipv4 = Self::router_reachable(timeout);
            ok &= res.router_ipv4;
        }
        if opts.contains(CheckMask::INTERNET) {
            let reachable = self
                .internet_addr
                .parse::<SocketAddr>()
                .map(|a| Self::tcp_reachable(&a, timeout))
                .unwrap_or(false);
            if opts.contains(CheckMask::IPV4) {
                res.internet_ipv4 = reachable;
                ok &= reachable;
            }
            res.internet = reachable;
        }
        if opts.contains(CheckMask::NTP) {
            res.ntp = Self::clock_synced();
            ok &= res.ntp;
        }

        res.ok = ok;
        debug!(clink, opts = %opts, mask = format_args!("{:#04x}", res.to_mask()), "probe");
        res
    }
}

/// Probe via an external binary: `<command> <clink> <opts-mask>`, exit
/// status encodes the result mask.
pub struct CommandProber {
    command: String,
}

impl CommandProber {
    pub fn new(command: &str) -> CommandProber {
        CommandProber {
            command: command.to_string(),
        }
    }
}

impl Prober for CommandProber {
    fn check(&self, clink: &str, opts: CheckMask) -> CheckResult {
        match Command::new(&self.command)
            .arg(clink)
            .arg(opts.0.to_string())
            .status()
        {
            Ok(status) => {
                let mask = status.code().unwrap_or(0) as u8;
                CheckResult::from_mask(mask)
            }
            Err(e) => {
                warn!(command = %self.command, error = %e, "probe command failed to run");
                CheckResult::all_fail()
            }
        }
    }
}

/// Always-green prober for `--simulate` runs.
pub struct SimProber;

impl Prober for SimProber {
    fn check(&self, _clink: &str, _opts: CheckMask) -> CheckResult {
        CheckResult::all_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_link_is_up() {
        assert!(SystemProber::link_up("lo"));
    }

    #[test]
    fn missing_interface_link_is_down() {
        assert!(!SystemProber::link_up("does_not_exist_xyz99"));
    }

    #[test]
    fn sim_prober_is_always_green() {
        let r = SimProber.check("eth0", CheckMask::LINK | CheckMask::ROUTER);
        assert!(r.ok);
        assert!(r.ntp);
    }

    #[test]
    fn command_prober_missing_binary_fails_closed() {
        let missing = CommandProber::new("/nonexistent/probe");
        let r = missing.check("eth0", CheckMask::LINK);
        assert!(!r.ok);
        assert_eq!(r.to_mask(), 0);
    }

    #[test]
    fn command_prober_decodes_exit_status() {
        // `true` exits 0 → all-fail mask; proves the status is read, not
        // the spawn result
        let p = CommandProber::new("/bin/true");
        let r = p.check("eth0", CheckMask::LINK);
        assert_eq!(r.to_mask(), 0);
    }

    #[test]
    fn clock_is_synced_on_test_host() {
        assert!(SystemProber::clock_synced());
    }
}
