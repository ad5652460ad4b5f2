//! # Trellis connection-manager core
//!
//! Brings a device onto the controller cloud and keeps it there across link
//! failures, address changes and transient outages. The core is a
//! single-threaded, cooperatively scheduled supervisor driving four
//! long-lived components:
//!
//! - **Supervisor FSM** ([`supervisor`]) — link selection → WAN IP → NTP →
//!   resolve → connect → connected → quiesce, with per-state timeouts and
//!   fixed-point re-entry on transitions.
//! - **Address resolver** ([`resolve`]) — parses `proto:host:port`
//!   resources, resolves both address families, and walks the results with
//!   an interleaving v6/v4 cursor.
//! - **Stability monitor** ([`stability`]) — periodic per-uplink
//!   connectivity probing with counter ladders and escalating remediation.
//! - **Uplink registry** ([`uplink`]) — the materialized uplink set and the
//!   "used link" selection.
//!
//! All I/O happens through injected capabilities ([`caps`]); the worker
//! thread in [`runtime`] owns the [`context::CoreContext`] and serializes
//! every handler.

pub mod ble;
pub mod caps;
pub mod config;
pub mod context;
pub mod link;
pub mod resolve;
pub mod runtime;
pub mod stability;
pub mod statefile;
pub mod supervisor;
pub mod uplink;

pub use config::CmConfig;
pub use context::CoreContext;
pub use runtime::{CmRuntime, Event};
pub use supervisor::CmState;
