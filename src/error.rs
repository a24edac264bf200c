//! Error types for Trueno-AB
//!
//! Administrative paths (create, lifecycle, reallocation) fail loudly with
//! these variants. Visitor-facing read paths never return
//! `ExperimentNotFound`; they treat unknown ids as "not participating".

use thiserror::Error;

use crate::model::{ExperimentId, ExperimentStatus, VariationId};

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-AB error types
#[derive(Error, Debug)]
pub enum Error {
    /// Experiment definition rejected; nothing was persisted
    #[error("{0}")]
    Validation(String),

    /// No experiment with this id exists in the store
    #[error("Experiment {0} not found")]
    ExperimentNotFound(ExperimentId),

    /// No variation with this id exists (or it belongs to another experiment)
    #[error("Variation {0} not found")]
    VariationNotFound(VariationId),

    /// Lifecycle transition not allowed by the state machine
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: ExperimentStatus,
        /// Requested status
        to: ExperimentStatus,
    },

    /// Persistence collaborator failed
    #[error("Store error: {0}")]
    Store(String),

    /// The external apply-winner hook reported a failure
    #[error("Apply-winner hook failed: {0}")]
    WinnerHook(#[source] anyhow::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a validation failure.
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
