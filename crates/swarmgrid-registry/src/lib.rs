//! swarmgrid-registry: the authoritative table of connected devices.
//!
//! Tracks which devices exist, what they can run, how loaded they are,
//! and whether they are still alive.
//!
//! # Architecture
//!
//! ```text
//! DeviceRegistry
//!   ├── devices: device_id → Device (ordered by id)
//!   ├── connections: connection_id → device_id (disconnect routing)
//!   ├── health::assess() → Error / recovery on heartbeat samples
//!   ├── scoring → find_best_device(), load_balancing_pairs()
//!   └── events: Joined / Left / Updated / Stale (drained by the owner)
//! ```
//!
//! # Liveness
//!
//! A device whose last heartbeat is older than the configured timeout
//! (30s by default) is marked `Offline` by `sweep_stale()`. The registry
//! does not remove it; removal happens only when its current connection
//! disconnects.

pub mod health;
pub mod registry;
pub mod scoring;

pub use health::{HealthVerdict, assess};
pub use registry::{DeviceRegistry, RegistryEvent};
