//! swarmgrid-core: shared vocabulary for SwarmGrid.
//!
//! Every other crate in the workspace depends on this one for the domain
//! model (devices, jobs, assignments, join codes, snapshots), the wire
//! protocol spoken with devices, and configuration.
//!
//! Timestamps are Unix epoch milliseconds throughout. Operations that
//! depend on the clock take an explicit `now` in their `*_at` form so the
//! time-based policies (timeouts, staleness, expiry) can be driven
//! deterministically.

pub mod config;
pub mod protocol;
pub mod types;

pub use config::*;
pub use protocol::*;
pub use types::*;

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
