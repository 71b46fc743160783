//! Top-level error type for the orchestration engine.
//!
//! Fatal, crate-boundary failures are represented here. Outcomes that the
//! engine itself understands and routes around -- a rate-limited agent, a
//! task that ran out of attempts -- are typed values elsewhere ([`crate::agent_pool::Selection`],
//! [`crate::classifier::Category`]), not variants of this enum.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("version control precondition failed: {0}")]
    VersionControlPrecondition(String),

    #[error("no agent kind is available at startup")]
    NoAgentsAvailable,

    #[error("persistence error reading/writing {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize/deserialize state at {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    VersionControl(#[from] crate::vc::VcError),

    #[error("agent selection stopped the cycle: {0}")]
    SelectionStalled(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
