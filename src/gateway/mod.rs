//! Remote content gateway boundary.
//!
//! Everything the tree and the orchestrator need from a remote instance
//! goes through [`ContentGateway`]: fetching content, children, labels and
//! attachments, creating pages, moving binary payloads. Implementations
//! keep shared request counters that observers may snapshot at any time;
//! snapshots are eventually consistent, the counters are plain atomics.

pub mod rest;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Raw content descriptor as returned by a remote instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentPayload {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type", default)]
    pub page_type: String,
    #[serde(rename = "_links", default)]
    pub links: ContentLinks,
    /// Rendered storage body, present only on expanded fetches.
    #[serde(default)]
    pub body: Option<String>,
}

/// Link fragments attached to a content descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentLinks {
    #[serde(default)]
    pub webui: String,
    /// Cloud-style editor link.
    #[serde(default)]
    pub editui: String,
    /// Server-style editor link.
    #[serde(default)]
    pub edit: String,
}

impl ContentLinks {
    /// The editor link fragment appropriate for the instance kind.
    pub fn edit_fragment(&self, kind: crate::config::InstanceKind) -> &str {
        match kind {
            crate::config::InstanceKind::Cloud => &self.editui,
            crate::config::InstanceKind::Server => &self.edit,
        }
    }
}

/// Raw attachment descriptor as returned by a remote instance.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentPayload {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub download_link: String,
    #[serde(default)]
    pub webui_link: String,
}

/// Payload for creating one page on the target instance.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePage {
    pub title: String,
    pub space_id: String,
    /// Parent page id; absent for the replicated root.
    pub parent_id: Option<i64>,
    pub body: String,
}

/// Export document formats the gateway can download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    Word,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "doc",
        }
    }

    pub fn subdir(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
        }
    }
}

/// Read/update restriction sets for one page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageRestrictions {
    pub read_users: Vec<String>,
    pub read_groups: Vec<String>,
    pub update_users: Vec<String>,
    pub update_groups: Vec<String>,
}

impl PageRestrictions {
    /// Whether the given user (with group memberships) may open the page
    /// in the editor, which needs both view and update access.
    ///
    /// No restrictions in a category means that category is unrestricted,
    /// matching the remote API's convention.
    pub fn permits(&self, user: &str, groups: &[String]) -> bool {
        let allowed = |users: &[String], restricted_groups: &[String]| {
            (users.is_empty() && restricted_groups.is_empty())
                || users.iter().any(|u| u == user)
                || restricted_groups.iter().any(|g| groups.contains(g))
        };

        allowed(&self.read_users, &self.read_groups)
            && allowed(&self.update_users, &self.update_groups)
    }
}

/// Shared request counters, written after every gateway call.
///
/// Plain relaxed atomics: concurrent observers get eventually-consistent
/// snapshots, which is all the progress display needs.
#[derive(Debug, Default)]
pub struct RequestStats {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    pages_created: AtomicU64,
    attachments_created: AtomicU64,
    attachments_downloaded: AtomicU64,
    exports_downloaded: AtomicU64,
}

/// Point-in-time copy of [`RequestStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub pages_created: u64,
    pub attachments_created: u64,
    pub attachments_downloaded: u64,
    pub exports_downloaded: u64,
}

impl RequestStats {
    pub fn record_success(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_created(&self) {
        self.pages_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attachment_created(&self) {
        self.attachments_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attachment_downloaded(&self) {
        self.attachments_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_downloaded(&self) {
        self.exports_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            pages_created: self.pages_created.load(Ordering::Relaxed),
            attachments_created: self.attachments_created.load(Ordering::Relaxed),
            attachments_downloaded: self.attachments_downloaded.load(Ordering::Relaxed),
            exports_downloaded: self.exports_downloaded.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Percentage of requests that succeeded; 100 when nothing ran yet.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.success as f64 / self.total as f64 * 100.0
        }
    }
}

/// Abstract remote content operations the engine depends on.
#[async_trait]
pub trait ContentGateway: Send + Sync {
    /// Fetch one content descriptor, optionally with its rendered body.
    async fn get_content(&self, id: i64) -> Result<ContentPayload, GatewayError>;

    /// Direct child page descriptors, in remote order.
    async fn get_child_pages(&self, id: i64) -> Result<Vec<ContentPayload>, GatewayError>;

    /// Label names attached to a page.
    async fn get_labels(&self, id: i64) -> Result<Vec<String>, GatewayError>;

    /// Attach labels to a page.
    async fn add_labels(&self, id: i64, labels: &[String]) -> Result<(), GatewayError>;

    /// Create a page; duplicate titles surface as [`GatewayError::Conflict`].
    async fn create_content(&self, page: &CreatePage) -> Result<i64, GatewayError>;

    /// Current version number of a page.
    async fn get_content_version(&self, id: i64) -> Result<u32, GatewayError>;

    /// Replace a page's body at `version + 1`.
    async fn update_content(
        &self,
        id: i64,
        title: &str,
        body: &str,
        version: u32,
    ) -> Result<(), GatewayError>;

    /// Attachment descriptors for a page.
    async fn get_attachments(&self, id: i64) -> Result<Vec<AttachmentPayload>, GatewayError>;

    /// Download one attachment's bytes.
    async fn download_attachment(
        &self,
        id: i64,
        file_name: &str,
    ) -> Result<Bytes, GatewayError>;

    /// Upload bytes as an attachment under a page.
    async fn upload_attachment(
        &self,
        id: i64,
        file_name: &str,
        data: Bytes,
    ) -> Result<(), GatewayError>;

    /// Download a rendered export of a page.
    async fn download_export(
        &self,
        id: i64,
        format: ExportFormat,
    ) -> Result<Bytes, GatewayError>;

    /// Resolve a space key to its id.
    async fn get_space_id(&self, space_key: &str) -> Result<String, GatewayError>;

    /// Resolve a page id by exact title within a space. Errors with
    /// [`GatewayError::AmbiguousTitle`] when the title is not unique.
    async fn get_page_id_by_title(
        &self,
        title: &str,
        space_key: &str,
    ) -> Result<i64, GatewayError>;

    /// Read/update restriction sets for a page.
    async fn get_restrictions(&self, id: i64) -> Result<PageRestrictions, GatewayError>;

    /// Shared request counters for this gateway.
    fn stats(&self) -> &RequestStats;
}
