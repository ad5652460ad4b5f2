//! Address targets and DNS resolution.
//!
//! Each destination (redirector, manager) owns an [`AddrTarget`]: the
//! configured `proto:host:port` resource plus the resolved address lists.
//! Connection attempts walk the lists with an interleaving cursor — v6, v4,
//! v6, v4 — falling through to whichever family still has entries once the
//! other is exhausted, so a broken family never starves the sweep.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use trellis_common::error::UriError;
use trellis_common::types::Destination;

use crate::caps::Resolver;
use crate::runtime::{Event, ResolveOutcome};

/// Longest accepted resource string.
pub const RESOURCE_MAX: usize = 512;

/// One resolved candidate address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedAddr {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl ResolvedAddr {
    pub fn is_v6(&self) -> bool {
        matches!(self, ResolvedAddr::V6(_))
    }
}

/// Parse a `proto:host:port` resource. The host may be a bracketed IPv6
/// literal.
pub fn parse_resource(resource: &str) -> Result<(String, String, u16), UriError> {
    if resource.is_empty() {
        return Err(UriError::Empty);
    }
    if resource.len() > RESOURCE_MAX {
        return Err(UriError::TooLong { max: RESOURCE_MAX });
    }
    let (proto, rest) = resource
        .split_once(':')
        .ok_or_else(|| UriError::MissingProto(resource.to_string()))?;
    if proto.is_empty() {
        return Err(UriError::MissingProto(resource.to_string()));
    }

    let (host, port_str) = if let Some(stripped) = rest.strip_prefix('[') {
        let (host, tail) = stripped
            .split_once(']')
            .ok_or_else(|| UriError::MissingPort(resource.to_string()))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| UriError::MissingPort(resource.to_string()))?;
        (host, port)
    } else {
        rest.rsplit_once(':')
            .ok_or_else(|| UriError::MissingPort(resource.to_string()))?
    };

    if host.is_empty() {
        return Err(UriError::EmptyHost(resource.to_string()));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| UriError::InvalidPort(port_str.to_string()))?;

    Ok((proto.to_string(), host.to_string(), port))
}

/// Address target for one destination.
#[derive(Debug, Clone, Default)]
pub struct AddrTarget {
    pub resource: String,
    pub proto: String,
    pub hostname: String,
    pub port: u16,
    /// Resource parsed successfully. When false the hostname and the lists
    /// are empty.
    pub valid: bool,
    /// Resource string changed since last consumption.
    pub updated: bool,
    /// Resolution completed with at least one usable address.
    pub resolved: bool,

    pub ipv6_addrs: Vec<Ipv6Addr>,
    pub ipv4_addrs: Vec<Ipv4Addr>,
    pub ipv6_idx: usize,
    pub ipv4_idx: usize,
    /// Which family the *current* candidate comes from; flips on every
    /// advance so attempts interleave.
    pub ipv6_pref: bool,
}

impl AddrTarget {
    /// Store and parse a new resource. An empty resource clears the target.
    /// On parse failure the target is cleared and the error returned.
    pub fn set_resource(&mut self, resource: &str) -> Result<(), UriError> {
        self.resolved = false;
        self.updated = false;
        self.clear_addrs();
        if resource.is_empty() {
            self.clear();
            return Ok(());
        }
        self.resource = resource.to_string();
        match parse_resource(resource) {
            Ok((proto, host, port)) => {
                self.proto = proto;
                self.hostname = host;
                self.port = port;
                self.valid = true;
                self.updated = true;
                Ok(())
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    pub fn clear(&mut self) {
        self.resource.clear();
        self.proto.clear();
        self.hostname.clear();
        self.port = 0;
        self.valid = false;
        self.resolved = false;
        self.updated = false;
        self.clear_addrs();
    }

    pub fn clear_addrs(&mut self) {
        self.ipv6_addrs.clear();
        self.ipv4_addrs.clear();
        self.ipv6_idx = 0;
        self.ipv4_idx = 0;
    }

    /// Install resolved address lists and rewind the cursor.
    pub fn apply_resolved(&mut self, ipv6: Vec<Ipv6Addr>, ipv4: Vec<Ipv4Addr>) {
        self.ipv6_addrs = ipv6;
        self.ipv4_addrs = ipv4;
        self.ipv6_idx = 0;
        self.ipv4_idx = 0;
        self.resolved = !self.ipv6_addrs.is_empty() || !self.ipv4_addrs.is_empty();
    }

    pub fn set_ipv6_pref(&mut self, prefer_v6: bool) {
        self.ipv6_pref = prefer_v6;
    }

    /// The candidate the cursor points at, falling back to the other family
    /// when the preferred one has nothing at its index.
    pub fn current(&self) -> Option<ResolvedAddr> {
        let v6 = self.ipv6_addrs.get(self.ipv6_idx).copied().map(ResolvedAddr::V6);
        let v4 = self.ipv4_addrs.get(self.ipv4_idx).copied().map(ResolvedAddr::V4);
        if self.ipv6_pref {
            v6.or(v4)
        } else {
            v4.or(v6)
        }
    }

    /// Consume the current candidate and move to the next one, alternating
    /// families. Returns `None` when both lists are exhausted.
    pub fn advance(&mut self) -> Option<ResolvedAddr> {
        if self.ipv6_pref {
            if self.ipv6_idx < self.ipv6_addrs.len() {
                self.ipv6_idx += 1;
            }
        } else if self.ipv4_idx < self.ipv4_addrs.len() {
            self.ipv4_idx += 1;
        }
        self.ipv6_pref = !self.ipv6_pref;

        let have_v6 = self.ipv6_idx < self.ipv6_addrs.len();
        let have_v4 = self.ipv4_idx < self.ipv4_addrs.len();
        if self.ipv6_pref && have_v6 {
            Some(ResolvedAddr::V6(self.ipv6_addrs[self.ipv6_idx]))
        } else if !self.ipv6_pref && have_v4 {
            Some(ResolvedAddr::V4(self.ipv4_addrs[self.ipv4_idx]))
        } else if have_v4 {
            self.ipv6_pref = false;
            Some(ResolvedAddr::V4(self.ipv4_addrs[self.ipv4_idx]))
        } else if have_v6 {
            self.ipv6_pref = true;
            Some(ResolvedAddr::V6(self.ipv6_addrs[self.ipv6_idx]))
        } else {
            None
        }
    }

    /// Serialize a candidate as the store target string:
    /// `proto:a.b.c.d:port` or `proto:[v6]:port`.
    pub fn format_target(&self, addr: ResolvedAddr) -> String {
        match addr {
            ResolvedAddr::V4(ip) => format!("{}:{}:{}", self.proto, ip, self.port),
            ResolvedAddr::V6(ip) => format!("{}:[{}]:{}", self.proto, ip, self.port),
        }
    }
}

// ─── Resolver backends ──────────────────────────────────────────────────

/// Blocking `getaddrinfo` resolver. Resolution happens inline on the
/// calling thread; completion is still reported through the event channel
/// so callers observe the same contract as the asynchronous backend.
#[derive(Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    fn lookup(hostname: &str) -> Result<(Vec<Ipv6Addr>, Vec<Ipv4Addr>), String> {
        // Port is irrelevant for the lookup; addresses come back deduplicated
        // per family in resolver order.
        let addrs = (hostname, 0u16)
            .to_socket_addrs()
            .map_err(|e| e.to_string())?;
        let mut v6 = Vec::new();
        let mut v4 = Vec::new();
        for sa in addrs {
            match sa.ip() {
                IpAddr::V6(ip) if !v6.contains(&ip) => v6.push(ip),
                IpAddr::V4(ip) if !v4.contains(&ip) => v4.push(ip),
                _ => {}
            }
        }
        if v6.is_empty() && v4.is_empty() {
            return Err("no usable addresses".to_string());
        }
        Ok((v6, v4))
    }
}

impl Resolver for GaiResolver {
    fn resolve(&self, dest: Destination, hostname: &str, events: Sender<Event>) -> bool {
        info!(dest = dest.name(), hostname, "resolving");
        let outcome = match Self::lookup(hostname) {
            Ok((v6, v4)) => {
                info!(dest = dest.name(), v6 = v6.len(), v4 = v4.len(), "resolved");
                ResolveOutcome::Resolved { ipv6: v6, ipv4: v4 }
            }
            Err(error) => {
                warn!(dest = dest.name(), hostname, %error, "DNS lookup failed");
                ResolveOutcome::Failed {
                    transient: true,
                    error,
                }
            }
        };
        events.send(Event::ResolveDone { dest, outcome }).is_ok()
    }

    fn cancel(&self) {}
}

/// Thread-backed asynchronous resolver. Each `resolve` spawns a lookup
/// thread; `cancel` bumps a generation counter so stale completions are
/// dropped silently, matching the channel-teardown semantics of the
/// original c-ares backend.
#[derive(Debug, Default)]
pub struct ThreadResolver {
    generation: Arc<AtomicU64>,
}

impl Resolver for ThreadResolver {
    fn resolve(&self, dest: Destination, hostname: &str, events: Sender<Event>) -> bool {
        let generation = Arc::clone(&self.generation);
        let gen_at_start = generation.load(Ordering::SeqCst);
        let hostname = hostname.to_string();
        info!(dest = dest.name(), hostname, "resolving (async)");
        thread::Builder::new()
            .name("cm-resolve".into())
            .spawn(move || {
                let outcome = match GaiResolver::lookup(&hostname) {
                    Ok((v6, v4)) => ResolveOutcome::Resolved { ipv6: v6, ipv4: v4 },
                    Err(error) => ResolveOutcome::Failed {
                        transient: true,
                        error,
                    },
                };
                if generation.load(Ordering::SeqCst) != gen_at_start {
                    debug!("resolver channel torn down, dropping result");
                    return;
                }
                let _ = events.send(Event::ResolveDone { dest, outcome });
            })
            .is_ok()
    }

    fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
