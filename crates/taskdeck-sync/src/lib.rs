//! State store for the task center dashboard.
//!
//! [`StateStore`] owns the canonical copy of queue counters, instances and
//! configuration. It seeds itself with pulls, keeps itself current from the
//! push channel and resyncs after every mutation.

pub mod error;
pub mod store;

pub use error::{Slice, SyncError};
pub use store::{DashboardState, InitReport, StateStore};
