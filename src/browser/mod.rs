//! Editor-session boundary for content carry-over.
//!
//! Structural replication leaves placeholder bodies behind; real content
//! moves through two live editor sessions driven over [`BrowserPort`].
//! The port is the seam to whatever automation backend hosts the
//! sessions; the engine only speaks in navigation, element waits, clicks
//! and keyboard shortcuts.

pub mod session;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{InstanceConfig, InstanceKind, UiElement};
use crate::error::DriverError;
use crate::tree::PageNode;

/// Which instance's window a driver call addresses. Both stay open for
/// the duration of a copy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowsingContext {
    Source,
    Target,
}

impl fmt::Display for BrowsingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Keyboard shortcut bundles the copy protocol dispatches into a focused
/// editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCombo {
    SelectAll,
    Copy,
    Paste,
    DeleteSelection,
}

/// Timing and retry policy for driver interactions.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Upper bound for one element to appear.
    pub element_timeout: Duration,
    /// Pause after actions that trigger asynchronous page work.
    pub settle_delay: Duration,
    /// Pause before retrying a transient failure.
    pub retry_delay: Duration,
    /// Total attempts per interaction, first try included.
    pub max_attempts: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            element_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

/// Editor URL for a page, per instance flavour.
pub fn edit_url(config: &InstanceConfig, node: &PageNode) -> String {
    match config.kind {
        InstanceKind::Cloud => format!(
            "{}/spaces/{}/pages/edit/{}",
            config.site(),
            config.space_key,
            node.id
        ),
        InstanceKind::Server => format!("{}{}", config.site(), node.edit_link),
    }
}

/// Read-only URL for a page, per instance flavour.
pub fn view_url(config: &InstanceConfig, node: &PageNode) -> String {
    match config.kind {
        InstanceKind::Cloud => format!("{}/wiki{}", config.site(), node.webui_link),
        InstanceKind::Server => format!(
            "{}/pages/viewpage.action?pageId={}",
            config.site(),
            node.id
        ),
    }
}

/// Abstract browser automation the copy protocol runs against.
#[async_trait]
pub trait BrowserPort: Send + Sync {
    async fn navigate(&self, context: BrowsingContext, url: &str) -> Result<(), DriverError>;

    /// Block until the element is present, up to `timeout`.
    async fn wait_for(
        &self,
        context: BrowsingContext,
        element: &UiElement,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    async fn click(&self, context: BrowsingContext, element: &UiElement)
        -> Result<(), DriverError>;

    /// Dispatch a keyboard shortcut into the focused element.
    async fn send_keys(
        &self,
        context: BrowsingContext,
        element: &UiElement,
        combo: KeyCombo,
    ) -> Result<(), DriverError>;

    async fn close(&self, context: BrowsingContext) -> Result<(), DriverError>;
}
