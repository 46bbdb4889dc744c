//! swarmgrid-admission: join code lifecycle.
//!
//! Join codes are short random tokens that gate which devices may join a
//! swarm. Each code carries an expiry and a use budget; a code that runs
//! out of either is evicted.
//!
//! # Architecture
//!
//! ```text
//! operator ──generate_code──▶ JoinCodeManager ◀──use_code── coordinator
//!                                   │
//!                            cleanup_expired (hourly)
//! ```

pub mod error;
pub mod manager;

pub use error::{AdmissionError, AdmissionResult};
pub use manager::{JoinCodeManager, JoinCodeOptions};
