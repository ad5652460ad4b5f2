//! Connectivity-check option and result encodings.
//!
//! Probe workers may run out of process; the result travels back as a single
//! byte (the worker's exit status), so both the option set and the result
//! carry stable bit encodings.

use serde::{Deserialize, Serialize};

/// Which probes a connectivity check should run. Composable bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckMask(pub u8);

impl CheckMask {
    pub const LINK: CheckMask = CheckMask(1 << 0);
    pub const ROUTER: CheckMask = CheckMask(1 << 1);
    pub const INTERNET: CheckMask = CheckMask(1 << 2);
    pub const NTP: CheckMask = CheckMask(1 << 3);
    pub const IPV4: CheckMask = CheckMask(1 << 4);
    pub const IPV6: CheckMask = CheckMask(1 << 5);
    /// Short timeouts; used while actively re-converging.
    pub const FAST: CheckMask = CheckMask(1 << 6);

    pub const NONE: CheckMask = CheckMask(0);

    pub fn contains(&self, other: CheckMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CheckMask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CheckMask) {
        self.0 &= !other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: CheckMask) -> CheckMask {
        CheckMask(self.0 | other.0)
    }
}

impl std::ops::BitOr for CheckMask {
    type Output = CheckMask;
    fn bitor(self, rhs: CheckMask) -> CheckMask {
        self.union(rhs)
    }
}

impl std::fmt::Display for CheckMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let yn = |b: bool| if b { "yes" } else { "no" };
        write!(
            f,
            "link:{} router:{} internet:{} ntp:{} ipv4:{} ipv6:{} fast:{}",
            yn(self.contains(CheckMask::LINK)),
            yn(self.contains(CheckMask::ROUTER)),
            yn(self.contains(CheckMask::INTERNET)),
            yn(self.contains(CheckMask::NTP)),
            yn(self.contains(CheckMask::IPV4)),
            yn(self.contains(CheckMask::IPV6)),
            yn(self.contains(CheckMask::FAST)),
        )
    }
}

/// Outcome of one connectivity check, one flag per probed surface.
///
/// `ok` is the prober's overall verdict for the masked set, not the AND of
/// the individual flags — a check that skipped a surface leaves its flag
/// false without failing the whole probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckResult {
    pub ok: bool,
    pub link: bool,
    pub router_ipv4: bool,
    pub router_ipv6: bool,
    pub internet_ipv4: bool,
    pub internet_ipv6: bool,
    pub internet: bool,
    pub ntp: bool,
}

impl CheckResult {
    /// Encode as the worker exit-status byte.
    pub fn to_mask(&self) -> u8 {
        (self.ok as u8)
            | (self.link as u8) << 1
            | (self.router_ipv4 as u8) << 2
            | (self.router_ipv6 as u8) << 3
            | (self.internet_ipv4 as u8) << 4
            | (self.internet_ipv6 as u8) << 5
            | (self.internet as u8) << 6
            | (self.ntp as u8) << 7
    }

    /// Decode the worker exit-status byte.
    pub fn from_mask(mask: u8) -> CheckResult {
        CheckResult {
            ok: mask & (1 << 0) != 0,
            link: mask & (1 << 1) != 0,
            router_ipv4: mask & (1 << 2) != 0,
            router_ipv6: mask & (1 << 3) != 0,
            internet_ipv4: mask & (1 << 4) != 0,
            internet_ipv6: mask & (1 << 5) != 0,
            internet: mask & (1 << 6) != 0,
            ntp: mask & (1 << 7) != 0,
        }
    }

    /// An all-surfaces pass.
    pub fn all_ok() -> CheckResult {
        CheckResult {
            ok: true,
            link: true,
            router_ipv4: true,
            router_ipv6: true,
            internet_ipv4: true,
            internet_ipv6: true,
            internet: true,
            ntp: true,
        }
    }

    /// An all-surfaces fail.
    pub fn all_fail() -> CheckResult {
        CheckResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_ops() {
        let mut m = CheckMask::LINK | CheckMask::ROUTER;
        assert!(m.contains(CheckMask::LINK));
        assert!(!m.contains(CheckMask::NTP));
        m.insert(CheckMask::NTP);
        assert!(m.contains(CheckMask::NTP));
        m.remove(CheckMask::LINK);
        assert!(!m.contains(CheckMask::LINK));
        assert!(!m.is_empty());
    }

    #[test]
    fn result_mask_roundtrip() {
        let r = CheckResult {
            ok: true,
            link: true,
            router_ipv4: false,
            router_ipv6: true,
            internet_ipv4: true,
            internet_ipv6: false,
            internet: true,
            ntp: false,
        };
        assert_eq!(CheckResult::from_mask(r.to_mask()), r);
    }

    #[test]
    fn all_ok_sets_every_bit() {
        assert_eq!(CheckResult::all_ok().to_mask(), 0xff);
        assert_eq!(CheckResult::all_fail().to_mask(), 0x00);
    }
}
