//! Fatal error classes.
//!
//! Everything else in the release run is recoverable and only logged; these
//! variants abort the run and are surfaced through `anyhow` in `main`.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A job category named on the command line has no descriptor.
    #[error("unknown job category: {0}")]
    UnknownJob(String),

    /// A release store named on the command line has no descriptor.
    #[error("unknown release store: {0}")]
    UnknownStore(String),

    /// A site code has no long-form name in the site table.
    #[error("unknown site code: {0}")]
    UnknownSite(String),

    /// An identifier pattern did not match a path that must carry it.
    #[error("no {entity} entity in {}", path.display())]
    MissingEntity { entity: &'static str, path: PathBuf },

    /// The anonymization transform returned without producing an output.
    #[error("defacing produced no output for {}", volume.display())]
    DefaceFailed { volume: PathBuf },

    /// Config failed schema or semantic validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
