//! Typed error taxonomy shared by every adapter in this crate.
//!
//! Each adapter (object store, queue, registry, catalog) gets its own enum
//! rather than one crate-wide error, so call sites can match on exactly the
//! failure modes that adapter can produce. All of them carry enough context
//! to classify as transient vs permanent at the worker boundary.

use thiserror::Error;

/// Errors surfaced by the object-store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("conflict writing {key}: {reason}")]
    Conflict { key: String, reason: String },

    #[error("transient store error after {attempts} attempts: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("permanent store error: {0}")]
    Permanent(#[source] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

/// Errors surfaced by the queue adapter.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue receive handle no longer valid")]
    HandleExpired,

    #[error("transient queue error: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("permanent queue error: {0}")]
    Permanent(#[source] anyhow::Error),
}

/// Errors surfaced by the run registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("run {0} already exists")]
    AlreadyExists(String),

    #[error("run {0} not found")]
    NotFound(String),

    #[error("run {run_id} is in terminal state {status}; mutation rejected")]
    Terminal { run_id: String, status: String },

    #[error("compare-and-swap exhausted after {attempts} attempts on run {run_id}")]
    CasExhausted { run_id: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the result catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("result folder {0} not found")]
    NotFound(String),

    #[error("result folder {0} is empty or still being assembled")]
    NotReady(String),

    #[error("counter allocation exhausted after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("zip streaming failed: {0}")]
    Zip(#[source] anyhow::Error),
}

/// Classification used by the worker to decide retry vs terminal failure
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

pub trait Classify {
    fn classify(&self) -> FailureClass;
}

impl Classify for StoreError {
    fn classify(&self) -> FailureClass {
        match self {
            StoreError::Transient { .. } => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }
}

impl Classify for QueueError {
    fn classify(&self) -> FailureClass {
        match self {
            QueueError::Transient(_) => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }
}

impl Classify for RegistryError {
    fn classify(&self) -> FailureClass {
        match self {
            RegistryError::Store(e) => e.classify(),
            _ => FailureClass::Permanent,
        }
    }
}

impl Classify for CatalogError {
    fn classify(&self) -> FailureClass {
        match self {
            CatalogError::Store(e) => e.classify(),
            CatalogError::Conflict { .. } => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }
}
