//! System-backed platform collaborators: watchdog, process restart,
//! tcpdump capture, switch restore scripts, load average, and `udhcpc`
//! dry-runs.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use trellis_cm::caps::{Platform, RestoreMask};
use trellis_cm::Event;
use trellis_common::types::IfType;

use crate::config::PlatformConfig;

const DRYRUN_PIDFILE_PREFIX: &str = "udhcpc-cmdryrun";
const TCPDUMP_PIDFILE_PREFIX: &str = "tcpdump";

pub struct SystemPlatform {
    cfg: PlatformConfig,
}

impl SystemPlatform {
    pub fn new(cfg: PlatformConfig) -> SystemPlatform {
        SystemPlatform { cfg }
    }

    fn pidfile(&self, prefix: &str, if_name: &str) -> PathBuf {
        PathBuf::from(&self.cfg.run_dir).join(format!("{}-{}.pid", prefix, if_name))
    }

    /// PID recorded in the pidfile, if that process is still alive.
    fn live_pid(&self, prefix: &str, if_name: &str) -> Option<i32> {
        let path = self.pidfile(prefix, if_name);
        let pid: i32 = fs::read_to_string(&path).ok()?.trim().parse().ok()?;
        // Signal 0 only checks for existence.
        if unsafe { libc::kill(pid, 0) } == 0 {
            Some(pid)
        } else {
            let _ = fs::remove_file(&path);
            None
        }
    }

    fn write_pidfile(&self, prefix: &str, if_name: &str, pid: u32) {
        let path = self.pidfile(prefix, if_name);
        let _ = fs::create_dir_all(&self.cfg.run_dir);
        match fs::File::create(&path) {
            Ok(mut f) => {
                let _ = writeln!(f, "{}", pid);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "pidfile write failed"),
        }
    }

    fn kill_by_pidfile(&self, prefix: &str, if_name: &str) {
        let Some(pid) = self.live_pid(prefix, if_name) else {
            debug!(if_name, prefix, "no live process to stop");
            return;
        };
        info!(if_name, pid, "stopping");
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
        let _ = fs::remove_file(self.pidfile(prefix, if_name));
    }
}

impl Platform for SystemPlatform {
    fn wdt_ping(&self) -> bool {
        let Some(device) = &self.cfg.watchdog_device else {
            return true;
        };
        match fs::OpenOptions::new().write(true).open(device) {
            Ok(mut f) => f.write_all(b"\0").is_ok(),
            Err(e) => {
                warn!(device, error = %e, "watchdog ping failed");
                false
            }
        }
    }

    fn restart_managers(&self) -> bool {
        match &self.cfg.restart_command {
            Some(cmd) => {
                warn!(cmd, "restarting managers");
                Command::new("sh")
                    .arg("-c")
                    .arg(cmd)
                    .status()
                    .map(|s| s.success())
                    .unwrap_or(false)
            }
            None => {
                warn!("no restart command configured, restart skipped");
                true
            }
        }
    }

    fn tcpdump_start(&self, if_name: &str) {
        if self.live_pid(TCPDUMP_PIDFILE_PREFIX, if_name).is_some() {
            info!(if_name, "tcpdump: already running, skip new request");
            return;
        }
        let _ = fs::create_dir_all(&self.cfg.capture_dir);
        let pckfile = PathBuf::from(&self.cfg.capture_dir).join(format!(
            "{}-tcpdump-{}.pcap",
            chrono::Local::now().format("%F_%H-%M"),
            if_name
        ));
        info!(if_name, pckfile = %pckfile.display(), "tcpdump: starting");
        match Command::new(&self.cfg.tcpdump_path)
            .args(["-i", if_name, "-c", "3000", "-s", "200", "-w"])
            .arg(&pckfile)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => self.write_pidfile(TCPDUMP_PIDFILE_PREFIX, if_name, child.id()),
            Err(e) => warn!(if_name, error = %e, "tcpdump: exec failed"),
        }
    }

    fn tcpdump_stop(&self, if_name: &str) {
        self.kill_by_pidfile(TCPDUMP_PIDFILE_PREFIX, if_name);
    }

    fn restore_switch_cfg(&self, opts: RestoreMask, gateway_hwaddr: &str) {
        let Some(script) = &self.cfg.switch_restore_script else {
            debug!("no switch restore script configured");
            return;
        };
        let mut runs: Vec<Vec<String>> = Vec::new();
        if opts.contains(RestoreMask::SWITCH_DUMP_DATA) {
            runs.push(vec!["2".to_string()]);
        }
        if opts.contains(RestoreMask::SWITCH_FIX_PORT_MAP) {
            runs.push(vec!["3".to_string(), gateway_hwaddr.to_string()]);
        }
        if opts.contains(RestoreMask::SWITCH_FIX_AUTON) {
            runs.push(vec!["4".to_string()]);
        }
        for args in runs {
            info!(script, ?args, "switch restore");
            let ok = Command::new("sh")
                .arg(script)
                .args(&args)
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            if !ok {
                warn!(script, ?args, "switch restore script failed");
            }
        }
    }

    fn load_average_1m(&self) -> Option<f64> {
        let load = sysinfo::System::load_average();
        if load.one >= 0.0 {
            Some(load.one)
        } else {
            None
        }
    }

    fn start_dhcp_dryrun(&self, if_name: &str, if_type: IfType, cnt: u32, events: Sender<Event>) {
        if self.live_pid(DRYRUN_PIDFILE_PREFIX, if_name).is_some() {
            info!(if_name, "dhcp dryrun already running");
            return;
        }
        debug!(if_name, cnt, "starting dhcp dryrun");

        let pidfile = self.pidfile(DRYRUN_PIDFILE_PREFIX, if_name);
        let _ = fs::create_dir_all(&self.cfg.run_dir);

        let mut cmd = Command::new(&self.cfg.udhcpc_path);
        cmd.arg("-p")
            .arg(&pidfile)
            .args(["-n", "-t", "5", "-T", "1", "-A", "2", "-f", "-i"])
            .arg(if_name)
            .arg("-s")
            .arg(&self.cfg.udhcpc_script)
            .args(["-C", "-S"]);
        if let Some(vendor) = &self.cfg.udhcpc_vendor_classid {
            cmd.arg("-V").arg(vendor);
        }
        cmd.arg("-q").stdout(Stdio::null()).stderr(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(if_name, error = %e, "failed to exec dhcp dryrun");
                // Treated as a failed probe on that interface.
                let _ = events.send(Event::DryrunDone {
                    if_name: if_name.to_string(),
                    if_type,
                    ok: false,
                    cnt,
                });
                return;
            }
        };
        self.write_pidfile(DRYRUN_PIDFILE_PREFIX, if_name, child.id());

        let if_name = if_name.to_string();
        let pidfile = pidfile.clone();
        thread::Builder::new()
            .name("cm-dryrun".into())
            .spawn(move || {
                let ok = child.wait().map(|s| s.success()).unwrap_or(false);
                let _ = fs::remove_file(&pidfile);
                let _ = events.send(Event::DryrunDone {
                    if_name,
                    if_type,
                    ok,
                    cnt,
                });
            })
            .map(|_| ())
            .unwrap_or_else(|e| warn!(error = %e, "failed to spawn dryrun waiter"));
    }

    fn stop_dhcp_dryrun(&self, if_name: &str) {
        self.kill_by_pidfile(DRYRUN_PIDFILE_PREFIX, if_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform_with_run_dir(dir: &std::path::Path) -> SystemPlatform {
        SystemPlatform::new(PlatformConfig {
            run_dir: dir.to_string_lossy().into_owned(),
            ..PlatformConfig::default()
        })
    }

    #[test]
    fn pidfile_paths_are_per_interface() {
        let dir = tempfile::tempdir().unwrap();
        let p = platform_with_run_dir(dir.path());
        assert_ne!(
            p.pidfile(DRYRUN_PIDFILE_PREFIX, "eth0"),
            p.pidfile(DRYRUN_PIDFILE_PREFIX, "eth1")
        );
        assert!(p
            .pidfile(DRYRUN_PIDFILE_PREFIX, "eth0")
            .to_string_lossy()
            .contains("udhcpc-cmdryrun-eth0.pid"));
    }

    #[test]
    fn stale_pidfile_is_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let p = platform_with_run_dir(dir.path());
        let path = p.pidfile(DRYRUN_PIDFILE_PREFIX, "eth0");
        // PID that can't exist
        fs::write(&path, "999999999\n").unwrap();
        assert!(p.live_pid(DRYRUN_PIDFILE_PREFIX, "eth0").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn live_pid_detects_this_process() {
        let dir = tempfile::tempdir().unwrap();
        let p = platform_with_run_dir(dir.path());
        let path = p.pidfile(TCPDUMP_PIDFILE_PREFIX, "eth0");
        fs::write(&path, format!("{}\n", std::process::id())).unwrap();
        assert_eq!(
            p.live_pid(TCPDUMP_PIDFILE_PREFIX, "eth0"),
            Some(std::process::id() as i32)
        );
    }

    #[test]
    fn wdt_ping_without_device_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let p = platform_with_run_dir(dir.path());
        assert!(p.wdt_ping());
    }

    #[test]
    fn failed_dryrun_exec_reports_failed_probe() {
        let dir = tempfile::tempdir().unwrap();
        let p = SystemPlatform::new(PlatformConfig {
            run_dir: dir.path().to_string_lossy().into_owned(),
            udhcpc_path: "/nonexistent/udhcpc".to_string(),
            ..PlatformConfig::default()
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        p.start_dhcp_dryrun("eth0", IfType::Eth, 0, tx);
        match rx.try_recv().unwrap() {
            Event::DryrunDone { if_name, ok, .. } => {
                assert_eq!(if_name, "eth0");
                assert!(!ok);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
