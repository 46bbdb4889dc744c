//! swarmgrid-coordinator: glue and policy for a SwarmGrid swarm.
//!
//! The coordinator owns one device registry, one work-stealing scheduler
//! and one join code manager. It turns device and operator events into
//! calls against them, and runs the dispatch policies that need to look
//! at both devices and jobs at once.
//!
//! # Architecture
//!
//! ```text
//! transport / REST ──▶ SwarmHandle ──lock──▶ SwarmCoordinator
//!                          │                   ├── DeviceRegistry
//!                          │                   ├── WorkStealingScheduler
//!                          │                   ├── JoinCodeManager
//!                          │                   └── outbox: Vec<Outbound>
//!                          └──▶ outbound channel ──▶ connection hub
//!
//! maintenance::run ── health sweep (10s) · reaper (5s)
//!                     rebalance (10s)    · join code cleanup (1h)
//! ```
//!
//! # Dispatch
//!
//! - **Push**: after every submission, completion, and departure, idle
//!   non-cloud devices are handed up to two matching jobs each.
//! - **Pull**: a device asks for a batch; it gets at most its free
//!   capacity. An idle pull may steal from devices holding a backlog.
//! - **Rebalance**: periodically, old assignments move from overloaded
//!   devices to the fastest underloaded one.

pub mod coordinator;
pub mod error;
pub mod handle;
pub mod maintenance;

pub use coordinator::SwarmCoordinator;
pub use error::{CoordinatorError, CoordinatorResult};
pub use handle::SwarmHandle;
