//! Error types for magpie operations.
//!
//! This module provides a single error hierarchy with structured error codes,
//! suggestions for resolution, and a retryability classification used by the
//! batch orchestrator.

use std::collections::HashMap;
use thiserror::Error;

use crate::types::BatchStage;

/// Result type alias for magpie operations.
pub type MagpieResult<T> = Result<T, MagpieError>;

/// Main error type for all magpie operations.
#[derive(Error, Debug)]
pub enum MagpieError {
    /// Malformed input entity, mention or relation. The item is skipped.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        item_id: Option<String>,
        details: HashMap<String, String>,
    },

    /// A pairwise similarity could not be computed. Callers treat this as score 0.
    #[error("Similarity computation error: {message}")]
    SimilarityComputation {
        message: String,
        code: ErrorCode,
        left_id: String,
        right_id: String,
    },

    /// The rate limiter could not grant a permit in time.
    #[error("Rate limit timeout: {message}")]
    RateLimitTimeout {
        message: String,
        code: ErrorCode,
        retry_after_ms: Option<u64>,
    },

    /// Following same-as links did not reach a canonical entity within the hop guard.
    #[error("Same-as link guard tripped starting at '{start_entity_id}' after {hops} hops")]
    LinkCycleGuardTripped {
        start_entity_id: String,
        hops: usize,
        path: Vec<String>,
    },

    /// A query ran out of wall-clock time.
    #[error("Retrieval timed out after {elapsed_ms}ms")]
    RetrievalTimeout { elapsed_ms: u64 },

    /// A resolution batch failed at a pipeline stage and exhausted its retries.
    #[error("Batch '{batch_id}' failed at stage {stage}: {cause}")]
    BatchFailed {
        batch_id: String,
        stage: BatchStage,
        cause: String,
        entity_ids: Vec<String>,
        attempts: usize,
    },

    /// Embedding generation failed.
    #[error("Embedding error: {message}")]
    Embedding {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Graph store operation failed.
    #[error("Graph store error: {message}")]
    GraphStore {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,
    ValMissingField,
    ValOutOfRange,
    ValInvalidSpan,

    // Similarity (SIM_xxx)
    SimDimensionMismatch,
    SimNonFinite,

    // Rate limit (RATE_xxx)
    RateAcquireTimeout,

    // Same-as links (LINK_xxx)
    LinkCycleGuard,

    // Retrieval (RET_xxx)
    RetTimeout,

    // Resolution batches (BATCH_xxx)
    BatchStageFailed,

    // Embedding (EMB_xxx)
    EmbConnectionFailed,
    EmbGenerationFailed,

    // Graph (GRP_xxx)
    GrpOperationFailed,
    GrpIntegrity,

    // Database (DB_xxx)
    DbOperationFailed,

    // Configuration
    Configuration,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValMissingField => "VAL_002",
            ErrorCode::ValOutOfRange => "VAL_003",
            ErrorCode::ValInvalidSpan => "VAL_004",
            ErrorCode::SimDimensionMismatch => "SIM_001",
            ErrorCode::SimNonFinite => "SIM_002",
            ErrorCode::RateAcquireTimeout => "RATE_001",
            ErrorCode::LinkCycleGuard => "LINK_001",
            ErrorCode::RetTimeout => "RET_001",
            ErrorCode::BatchStageFailed => "BATCH_001",
            ErrorCode::EmbConnectionFailed => "EMB_001",
            ErrorCode::EmbGenerationFailed => "EMB_002",
            ErrorCode::GrpOperationFailed => "GRP_001",
            ErrorCode::GrpIntegrity => "GRP_002",
            ErrorCode::DbOperationFailed => "DB_001",
            ErrorCode::Configuration => "CFG_001",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl MagpieError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            item_id: None,
            details: HashMap::new(),
        }
    }

    /// Create a validation error for a specific item with a specific code.
    pub fn invalid_item(item_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code,
            item_id: Some(item_id.into()),
            details: HashMap::new(),
        }
    }

    /// Create a similarity computation error.
    pub fn similarity(
        left_id: impl Into<String>,
        right_id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self::SimilarityComputation {
            message: message.into(),
            code,
            left_id: left_id.into(),
            right_id: right_id.into(),
        }
    }

    /// Create a rate limit timeout error.
    pub fn rate_limit_timeout(message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self::RateLimitTimeout {
            message: message.into(),
            code: ErrorCode::RateAcquireTimeout,
            retry_after_ms,
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            code: ErrorCode::EmbGenerationFailed,
            source: None,
        }
    }

    /// Create a graph store error.
    pub fn graph_store(message: impl Into<String>) -> Self {
        Self::GraphStore {
            message: message.into(),
            code: ErrorCode::GrpOperationFailed,
            source: None,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } => *code,
            Self::SimilarityComputation { code, .. } => *code,
            Self::RateLimitTimeout { code, .. } => *code,
            Self::LinkCycleGuardTripped { .. } => ErrorCode::LinkCycleGuard,
            Self::RetrievalTimeout { .. } => ErrorCode::RetTimeout,
            Self::BatchFailed { .. } => ErrorCode::BatchStageFailed,
            Self::Embedding { code, .. } => *code,
            Self::GraphStore { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::Configuration(_) => ErrorCode::Configuration,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether re-running the failed operation from the start can succeed.
    ///
    /// Link cycle alarms and configuration errors are data or setup problems
    /// and are surfaced instead of retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::GraphStore { code, .. } => *code != ErrorCode::GrpIntegrity,
            Self::RateLimitTimeout { .. }
            | Self::Embedding { .. }
            | Self::Database { .. }
            | Self::Io(_)
            | Self::RetrievalTimeout { .. } => true,
            _ => false,
        }
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::RateLimitTimeout { .. } => Some("Retry the request with backoff"),
            Self::LinkCycleGuardTripped { .. } => {
                Some("Inspect the same-as link log for a cycle or an over-long chain")
            }
            Self::BatchFailed { .. } => Some("Re-submit the whole batch; resolution is idempotent"),
            Self::Embedding { .. } => Some("Please check your embedding provider configuration"),
            Self::Configuration(_) => Some("Please check the engine configuration file"),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for MagpieError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}
