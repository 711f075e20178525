//! The file-based command protocol spoken with the on-device companion app.
//!
//! Commands travel as XML envelopes dropped into a staging folder inside the
//! app sandbox; the app answers through a status artifact in the same folder.
//! [`StagingClient`] turns that exchange into a single awaitable call.

mod connection;
mod envelope;
pub mod error;
mod progress;
mod staging;
mod status;

pub use crate::connection::{AppVersion, ConnectionArtifact};
pub use crate::envelope::{BookEntry, CommandEnvelope, CommandKind, Cover, MetadataAttributes};
pub use crate::progress::{NoProgress, ProgressReporter};
pub use crate::staging::{
    CONNECTION_FILE, CommandOutcome, STAGING_FOLDER, STATUS_FILE, StagingClient, StagingConfig,
};
pub use crate::status::{StatusCode, StatusReport};
