//! Error Types - Communicator Error Handling
//!
//! Classified failures of the communicator. Initialization failures keep the
//! stage they originated from; unsupported collectives name the operation;
//! engine failures during a reduction round are communication failures.
//! Storage-class mismatches are diagnostics only and never appear here.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use thiserror::Error;

use crate::bootstrap::InitStage;
use crate::collectives::CollectiveOp;
use crate::config::ConfigError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by the communicator and its collaborators.
#[derive(Error, Debug)]
pub enum CommError {
    /// Bootstrap failed; init either fully succeeds or fully fails.
    #[error("Communicator init failed at {stage}: {source}")]
    Initialization {
        /// The bootstrap step that failed.
        stage: InitStage,
        /// The underlying failure.
        source: Box<CommError>,
    },

    /// The collective is a named contract point without an implementation.
    #[error("{op} is not implemented")]
    Unimplemented {
        /// The requested collective.
        op: CollectiveOp,
    },

    /// The collective engine reported a failure.
    #[error("Communication failure: {message}")]
    Communication {
        /// Description of the failure.
        message: String,
    },

    /// The communicator was finalized or never initialized.
    #[error("Communicator is not initialized")]
    NotInitialized,

    /// Rank or size information of the process group is unusable.
    #[error("Invalid process group: {message}")]
    InvalidGroup {
        /// Description of the problem.
        message: String,
    },

    /// Handle creation was given an id no root generated.
    #[error("Unknown unique group id {id}")]
    UnknownGroupId {
        /// Short hex rendering of the id.
        id: String,
    },

    /// The registry holds more device contexts than the engine reduces.
    #[error("Registry holds {count} device contexts; only context 0 is reduced")]
    MultipleContexts {
        /// Number of contexts in the registry.
        count: usize,
    },

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Accelerator failure.
    #[error("Device error: {0}")]
    Device(#[from] gradsync_core::Error),
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for communicator operations.
pub type Result<T> = core::result::Result<T, CommError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl CommError {
    /// Wraps a failure in the bootstrap stage it happened in.
    #[must_use]
    pub fn init(stage: InitStage, source: CommError) -> Self {
        Self::Initialization {
            stage,
            source: Box::new(source),
        }
    }

    /// Creates a new communication failure.
    #[must_use]
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    /// Creates a new invalid-group error.
    #[must_use]
    pub fn invalid_group(message: impl Into<String>) -> Self {
        Self::InvalidGroup {
            message: message.into(),
        }
    }

    /// Returns the bootstrap stage for initialization failures.
    #[must_use]
    pub fn stage(&self) -> Option<InitStage> {
        match self {
            Self::Initialization { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns true if the process should stop training after this error.
    ///
    /// Every classified failure is fatal; peers block on the next collective
    /// otherwise.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

// =============================================================================
// Tests
// =============================================================================
