//! The uplink registry: every candidate uplink the manager knows about,
//! materialized from the configuration store, and the "used link"
//! selection.
//!
//! Invariant: at most one uplink has `is_used == true`.

use std::collections::BTreeMap;

use tracing::{debug, info};

use trellis_common::rows::UplinkRow;
use trellis_common::types::{IfType, UplinkState};

/// One candidate uplink.
#[derive(Debug, Clone, Default)]
pub struct Uplink {
    pub if_name: String,
    pub if_type: IfType,
    pub bridge: Option<String>,
    pub has_l2: bool,
    pub is_used: bool,
    pub priority: i32,
    pub loop_state: bool,
    pub ipv4: Option<UplinkState>,
    pub ipv6: Option<UplinkState>,
    pub unreachable_link_counter: i32,
    pub unreachable_router_counter: i32,
    pub unreachable_internet_counter: i32,
    pub unreachable_cloud_counter: i32,
    pub ntp_state: bool,
}

impl Uplink {
    pub fn from_row(row: &UplinkRow) -> Uplink {
        Uplink {
            if_name: row.if_name.clone(),
            if_type: IfType::from_str_opt(&row.if_type).unwrap_or_default(),
            bridge: row.bridge.clone().filter(|b| !b.is_empty()),
            has_l2: row.has_l2,
            is_used: row.is_used,
            priority: row.priority,
            loop_state: row.loop_state,
            ipv4: row.ipv4,
            ipv6: row.ipv6,
            unreachable_link_counter: row.unreachable_link_counter,
            unreachable_router_counter: row.unreachable_router_counter,
            unreachable_internet_counter: row.unreachable_internet_counter,
            unreachable_cloud_counter: row.unreachable_cloud_counter,
            ntp_state: row.ntp_state,
        }
    }

    /// A family is unblocked when its state is known and not `Blocked`. A
    /// row with no IP state at all counts as unblocked so fresh links can
    /// still be selected.
    pub fn has_unblocked_family(&self) -> bool {
        if self.ipv4.is_none() && self.ipv6.is_none() {
            return true;
        }
        self.ipv4.is_some_and(|s| s != UplinkState::Blocked)
            || self.ipv6.is_some_and(|s| s != UplinkState::Blocked)
    }

    pub fn clear_counters(&mut self) {
        self.unreachable_link_counter = 0;
        self.unreachable_router_counter = 0;
        self.unreachable_internet_counter = 0;
        self.unreachable_cloud_counter = 0;
    }
}

/// Result of a used-link re-evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub changed: bool,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Default)]
pub struct UplinkRegistry {
    links: BTreeMap<String, Uplink>,
}

impl UplinkRegistry {
    pub fn new() -> UplinkRegistry {
        UplinkRegistry::default()
    }

    pub fn upsert_row(&mut self, row: &UplinkRow) -> &Uplink {
        let up = Uplink::from_row(row);
        debug!(if_name = %up.if_name, if_type = up.if_type.as_str(),
               has_l2 = up.has_l2, is_used = up.is_used, "uplink row");
        self.links.insert(up.if_name.clone(), up);
        &self.links[&row.if_name]
    }

    pub fn remove(&mut self, if_name: &str) -> Option<Uplink> {
        self.links.remove(if_name)
    }

    pub fn get(&self, if_name: &str) -> Option<&Uplink> {
        self.links.get(if_name)
    }

    pub fn get_mut(&mut self, if_name: &str) -> Option<&mut Uplink> {
        self.links.get_mut(if_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uplink> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The currently used uplink, if any.
    pub fn used(&self) -> Option<&Uplink> {
        self.links.values().find(|u| u.is_used)
    }

    pub fn used_count(&self) -> usize {
        self.links.values().filter(|u| u.is_used).count()
    }

    /// Uplinks with the given family in `Unblocking`.
    pub fn unblocking(&self, v6: bool) -> Vec<String> {
        self.links
            .values()
            .filter(|u| {
                let s = if v6 { u.ipv6 } else { u.ipv4 };
                s == Some(UplinkState::Unblocking)
            })
            .map(|u| u.if_name.clone())
            .collect()
    }

    /// Uplinks with L2 and at least one active family.
    pub fn active_uplinks(&self) -> Vec<String> {
        self.links
            .values()
            .filter(|u| {
                u.has_l2
                    && (u.ipv4 == Some(UplinkState::Active) || u.ipv6 == Some(UplinkState::Active))
            })
            .map(|u| u.if_name.clone())
            .collect()
    }

    /// Count of distinct L2-up link families, for the BLE phy-link bits.
    pub fn l2_family_counts(&self) -> (usize, usize) {
        let mut eth = 0;
        let mut wifi = 0;
        for u in self.links.values().filter(|u| u.has_l2) {
            if u.if_type.is_eth() {
                eth += 1;
            } else {
                wifi += 1;
            }
        }
        (eth, wifi)
    }

    /// Re-evaluate which uplink should be used.
    ///
    /// Preference order:
    /// 1. the uplink already persisted as used, when still eligible;
    /// 2. highest priority among links with L2 and an unblocked family;
    /// 3. ethernet before Wi-Fi at equal priority.
    ///
    /// With `block_current` the currently used uplink is excluded from the
    /// pool. Only computes; the caller applies the change and writes the
    /// store.
    pub fn select_used(&self, block_current: bool) -> Selection {
        let old = self.used().map(|u| u.if_name.clone());

        let eligible = |u: &&Uplink| {
            if block_current && Some(&u.if_name) == old.as_ref() {
                return false;
            }
            u.has_l2 && u.has_unblocked_family()
        };

        // Sticky: keep the persisted selection while it stays eligible.
        if !block_current {
            if let Some(cur) = self.used() {
                if eligible(&cur) {
                    return Selection {
                        changed: false,
                        old: old.clone(),
                        new: old,
                    };
                }
            }
        }

        let best = self
            .links
            .values()
            .filter(eligible)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.if_type.is_eth().cmp(&b.if_type.is_eth()))
                    // stable tie-break so selection is deterministic
                    .then_with(|| b.if_name.cmp(&a.if_name))
            })
            .map(|u| u.if_name.clone());

        let changed = best != old;
        if changed {
            info!(old = ?old, new = ?best, "used uplink selection changed");
        }
        Selection {
            changed,
            old,
            new: best,
        }
    }

    /// Flip the local `is_used` flags to match a selection.
    pub fn apply_selection(&mut self, sel: &Selection) {
        if !sel.changed {
            return;
        }
        for u in self.links.values_mut() {
            u.is_used = Some(&u.if_name) == sel.new.as_ref();
        }
    }
}

// ─── Context glue ───────────────────────────────────────────────────────

use trellis_common::types::Reason;

use crate::context::CoreContext;

impl CoreContext {
    /// Re-evaluate the used-link selection and apply it: local flags, store
    /// writes, main-link adoption, and the matching supervisor wake-up.
    /// Returns whether the selection changed.
    pub fn recalc_links(&mut self, block_current: bool) -> bool {
        let sel = self.registry.select_used(block_current);
        if !sel.changed {
            return false;
        }
        self.registry.apply_selection(&sel);
        if let Some(old) = &sel.old {
            if let Err(e) = self.store.set_uplink_used(old, false) {
                tracing::warn!(if_name = %old, error = %e, "is_used clear failed");
            }
        }
        match sel.new.clone() {
            Some(new) => {
                if let Err(e) = self.store.set_uplink_used(&new, true) {
                    tracing::warn!(if_name = %new, error = %e, "is_used set failed");
                }
                self.adopt_used_link(&new);
                self.update_state(Reason::LinkUsed);
            }
            None => {
                self.link.is_used = false;
                self.link.is_used_echoed = false;
                self.update_state(Reason::LinkNotUsed);
            }
        }
        true
    }

    /// Mirror a registry row into the main-link record.
    pub(crate) fn adopt_used_link(&mut self, if_name: &str) {
        let Some(u) = self.registry.get(if_name) else {
            return;
        };
        self.link.if_name = u.if_name.clone();
        self.link.if_type = u.if_type;
        self.link.bridge_name = u.bridge.clone().unwrap_or_default();
        self.link.priority = u.priority;
        self.link.is_used = true;
        self.link.is_used_echoed = false;
        self.link.restart_pending = false;
    }

    /// Ingest an uplink row change from the store.
    pub fn on_uplink_row(&mut self, row: &UplinkRow) -> Option<Reason> {
        let prev = self.registry.get(&row.if_name).cloned();
        let up = self.registry.upsert_row(row).clone();

        // Store acknowledged our used-link write (mirror semantics).
        if self.link.is_used && up.if_name == self.link.if_name && up.is_used {
            self.link.is_used_echoed = true;
        }

        // L2 changes feed the BLE phy-link bits during onboarding.
        let l2_changed = match &prev {
            Some(p) => p.has_l2 != up.has_l2,
            None => up.has_l2,
        };
        if l2_changed {
            self.set_ble_onboarding_link_state(up.has_l2, up.if_type);
        }

        // Fresh L2 candidates without any IP state get a DHCP dry-run.
        let l2_came_up = up.has_l2 && prev.as_ref().map_or(true, |p| !p.has_l2);
        if l2_came_up && !up.is_used && up.ipv4.is_none() && up.ipv6.is_none() {
            self.platform
                .start_dhcp_dryrun(&up.if_name, up.if_type, 0, self.events_tx.clone());
        }

        if up.is_used && (!self.link.is_used || self.link.if_name != up.if_name) {
            // At most one used uplink: demote any other row still marked.
            let stale: Vec<String> = self
                .registry
                .iter()
                .filter(|u| u.is_used && u.if_name != up.if_name)
                .map(|u| u.if_name.clone())
                .collect();
            for name in stale {
                if let Some(u) = self.registry.get_mut(&name) {
                    u.is_used = false;
                }
                if let Err(e) = self.store.set_uplink_used(&name, false) {
                    tracing::warn!(if_name = %name, error = %e, "is_used clear failed");
                }
            }
            self.adopt_used_link(&up.if_name);
            return Some(Reason::LinkUsed);
        }
        if !up.is_used && self.link.is_used && self.link.if_name == up.if_name {
            self.link.is_used = false;
            self.link.is_used_echoed = false;
            return Some(Reason::LinkNotUsed);
        }

        if self.registry.used().is_none() {
            self.recalc_links(false);
        }
        None
    }

    /// An uplink row disappeared from the store.
    pub fn on_uplink_removed(&mut self, if_name: &str) -> Option<Reason> {
        let removed = self.registry.remove(if_name);
        self.pending_probes.retain(|(name, _)| name != if_name);
        let was_used = removed.map(|u| u.is_used).unwrap_or(false)
            || (self.link.is_used && self.link.if_name == if_name);
        if was_used {
            self.link.is_used = false;
            self.link.is_used_echoed = false;
            self.update_state(Reason::LinkNotUsed);
            self.recalc_links(false);
        }
        None
    }
}
