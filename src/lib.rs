//! Spaceporter - content space migration engine.
//!
//! Rebuilds a page hierarchy from one content instance and replicates it
//! into another: structure over REST, bodies over live editor sessions
//! or a headless REST pass, attachments through a staging directory.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      SOURCE INSTANCE                            │
//! │  Pages, labels, attachments behind a cloud or server REST API   │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │ gateway calls
//! ┌───────────────────────────────┴─────────────────────────────────┐
//! │                        SPACEPORTER                              │
//! │  tree     - in-memory hierarchy, filtering, alignment           │
//! │  migrate  - structural replication, attachments, exports        │
//! │  browser  - editor-session copy protocol (clipboard carry-over) │
//! │  gateway  - REST client, shared request counters                │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │ gateway calls
//! ┌───────────────────────────────┴─────────────────────────────────┐
//! │                      TARGET INSTANCE                            │
//! │  Receives the replicated hierarchy under its own root page      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! - **Rerunnable**: existing target pages are reused, never duplicated
//! - **Failure isolation**: one broken node abandons only its subtree
//! - **Cooperative cancellation**: a shared flag stops descent cleanly
//! - **Traceable**: every replicated page carries an automation label

// === Core Modules ===

/// Run configuration and the UI element selector catalogue.
pub mod config;

/// Error taxonomy.
pub mod error;

/// Remote instance boundary: trait, REST client, request counters.
pub mod gateway;

/// In-memory content tree: build, traverse, align, persist.
pub mod tree;

/// Replication orchestrator: pages, labels, attachments, exports.
pub mod migrate;

/// Editor-session driver for body carry-over.
pub mod browser;

#[cfg(test)]
pub(crate) mod test_support;

// === Re-exports ===

pub use browser::session::{CopyMode, CopyReport, UiReplicator};
pub use browser::BrowserPort;
pub use config::{AppConfig, ElementCatalogue, InstanceConfig, InstanceKind};
pub use error::{ConfigError, DriverError, GatewayError, TreeError};
pub use gateway::{ContentGateway, ExportFormat, StatsSnapshot};
pub use migrate::{ProgressReporter, ReplicationReport, Replicator};
pub use tree::{ContentTree, PageNode, TreeFilter};
