//! Tracks whether the one attached device, and the companion app on it, are
//! ready for a sync session.

mod busy;
pub mod error;
mod machine;
mod state;

pub use crate::busy::{BusyGuard, BusyToken};
pub use crate::machine::{ConnectionConfig, ConnectionMachine, ProbeOverlap};
pub use crate::state::{ConnectionPhase, ConnectionState};
