//! Error taxonomy for the migration engine.
//!
//! Node-level failures are isolated to their own subtree by the callers;
//! configuration and root-level failures abort the whole operation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by a remote content gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Remote entity does not exist. Callers skip the branch.
    #[error("content {id} not found")]
    NotFound { id: String },

    /// Duplicate title on create. Recovered via title lookup, not fatal.
    #[error("page titled '{title}' already exists in space '{space_key}'")]
    Conflict { title: String, space_key: String },

    /// Title lookup matched more than one page; refusing to guess.
    #[error("title '{title}' is ambiguous in space '{space_key}' ({matches} matches)")]
    AmbiguousTitle {
        title: String,
        space_key: String,
        matches: usize,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("malformed response payload: {0}")]
    Payload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// True for missing-entity errors that only abandon one branch.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for duplicate-title create failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Errors raised while building or reshaping a content tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The root page itself could not be fetched; the build aborts.
    #[error("root page {root_id} unavailable: {source}")]
    RootUnavailable {
        root_id: i64,
        #[source]
        source: GatewayError,
    },

    /// Hierarchy deeper than the recursion guard allows.
    #[error("tree exceeds maximum depth of {max_depth} at page {page_id}")]
    DepthExceeded { max_depth: usize, page_id: i64 },

    #[error("failed to persist tree to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the UI replication driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Element did not appear within the bounded wait. Transient; retried.
    #[error("element '{selector}' not located within {timeout_secs}s")]
    ElementNotFound { selector: String, timeout_secs: u64 },

    /// Element went stale between locate and interact. Transient; retried.
    #[error("element '{selector}' went stale")]
    StaleElement { selector: String },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// The configured user may not read or edit the page. Branch skipped.
    #[error("access denied for page {page_id}")]
    AccessDenied { page_id: i64 },

    #[error("browser session closed")]
    SessionClosed,
}

impl DriverError {
    /// Transient conditions are retried up to the configured bound.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ElementNotFound { .. } | Self::StaleElement { .. }
        )
    }
}

/// Fatal configuration errors, raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    Missing(PathBuf),

    #[error("invalid instance kind '{0}' (expected 'cloud' or 'server')")]
    InvalidKind(String),

    #[error("selector catalogue has no '{element_type}' element for {kind}/{surface}")]
    MissingElement {
        kind: String,
        surface: String,
        element_type: String,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}
