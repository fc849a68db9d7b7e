//! Replication orchestrator: copies a page hierarchy from a source
//! instance into a target instance over the gateway boundary.
//!
//! Structure first, content later: every replicated page is created with
//! a placeholder body, labels and (optionally) attachments follow, and
//! bodies are carried over afterwards, either by the editor-session
//! driver or the headless REST pass. A failure at one node abandons only
//! that node's subtree; siblings and the rest of the run continue.

use std::fs;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::gateway::{AttachmentPayload, ContentGateway, CreatePage, ExportFormat};
use crate::tree::ContentTree;

/// Body given to every freshly created page until content is carried over.
pub const PLACEHOLDER_BODY: &str = "Text will follow soon!";

/// Label stamped on every replicated page so automated copies stay
/// distinguishable from hand-written ones.
pub const DEFAULT_AUTOMATION_LABEL: &str = "automated-migration";

/// Staged file names keep at most this many stem characters.
const FILE_STEM_LIMIT: usize = 64;

static UNSAFE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("sanitizer pattern is valid"));

/// Reduce an arbitrary attachment title to a filesystem-safe name.
///
/// Runs of non-alphanumeric characters collapse to a single underscore,
/// leading and trailing underscores are trimmed, the stem is capped and
/// the extension is preserved.
pub fn safe_file_name(title: &str) -> String {
    let (stem, extension) = match title.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (title, None),
    };

    let cleaned = UNSAFE_RUNS.replace_all(stem, "_");
    let cleaned = cleaned.trim_matches('_');
    let mut stem: String = cleaned.chars().take(FILE_STEM_LIMIT).collect();
    if stem.is_empty() {
        stem.push_str("attachment");
    }

    match extension {
        Some(ext) => {
            let ext: String = ext.chars().filter(char::is_ascii_alphanumeric).collect();
            if ext.is_empty() {
                stem
            } else {
                format!("{stem}.{ext}")
            }
        }
        None => stem,
    }
}

/// Outcome counters for one replication run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub pages: u64,
    pub attachments: u64,
    pub failed_attachments: u64,
    pub failed_subtrees: u64,
}

/// Outcome counters for one body carry-over pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyCopyReport {
    pub copied: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Drives structural replication between two gateways.
pub struct Replicator {
    source: Arc<dyn ContentGateway>,
    target: Arc<dyn ContentGateway>,
    target_space_id: String,
    target_space_key: String,
    automation_label: String,
    staging_dir: PathBuf,
    with_attachments: bool,
    cancel: Arc<AtomicBool>,
}

impl Replicator {
    /// Bind a replicator to its two gateways, resolving the target space
    /// id up front so every create call can reference it.
    pub async fn connect(
        source: Arc<dyn ContentGateway>,
        target: Arc<dyn ContentGateway>,
        target_space_key: &str,
        automation_label: &str,
        staging_dir: PathBuf,
        with_attachments: bool,
    ) -> Result<Self, GatewayError> {
        let target_space_id = target.get_space_id(target_space_key).await?;
        debug!(space_key = target_space_key, space_id = %target_space_id, "resolved target space");
        Ok(Self {
            source,
            target,
            target_space_id,
            target_space_key: target_space_key.to_string(),
            automation_label: automation_label.to_string(),
            staging_dir,
            with_attachments,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared stop flag. Setting it finishes the node in flight and then
    /// stops descending; nothing already replicated is rolled back.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Replicate the subtree rooted at `source_root_id` under the given
    /// target parent. Fails only when the root itself cannot be copied.
    pub async fn replicate(
        &self,
        source_root_id: i64,
        target_parent_id: Option<i64>,
    ) -> Result<ReplicationReport, GatewayError> {
        let mut report = ReplicationReport::default();
        self.replicate_node(source_root_id, target_parent_id, &mut report)
            .await?;
        info!(
            pages = report.pages,
            attachments = report.attachments,
            failed_attachments = report.failed_attachments,
            failed_subtrees = report.failed_subtrees,
            "replication finished"
        );
        Ok(report)
    }

    fn replicate_node<'a>(
        &'a self,
        source_id: i64,
        target_parent: Option<i64>,
        report: &'a mut ReplicationReport,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), GatewayError>> + Send + 'a>> {
        Box::pin(async move {
            if self.cancelled() {
                info!(source_id, "replication cancelled, not descending");
                return Ok(());
            }

            // Refresh from the source at visit time; the tree used for
            // planning may be stale by now.
            let payload = self.source.get_content(source_id).await?;
            let labels = self.source.get_labels(source_id).await?;

            let target_id = match self
                .target
                .create_content(&CreatePage {
                    title: payload.title.clone(),
                    space_id: self.target_space_id.clone(),
                    parent_id: target_parent,
                    body: PLACEHOLDER_BODY.to_string(),
                })
                .await
            {
                Ok(id) => {
                    info!(title = %payload.title, target_id = id, "created page");
                    id
                }
                Err(e) if e.is_conflict() => {
                    let id = self
                        .target
                        .get_page_id_by_title(&payload.title, &self.target_space_key)
                        .await?;
                    info!(title = %payload.title, target_id = id, "page already exists, reusing");
                    id
                }
                Err(e) => return Err(e),
            };
            report.pages += 1;

            // The automation marker travels in its own call; a rejected
            // source label must never cost the marker.
            let marker = std::slice::from_ref(&self.automation_label);
            if let Err(e) = self.target.add_labels(target_id, marker).await {
                warn!(title = %payload.title, error = %e, "automation label failed, continuing");
            }
            let source_labels: Vec<String> = labels
                .iter()
                .filter(|l| **l != self.automation_label)
                .cloned()
                .collect();
            if !source_labels.is_empty() {
                if let Err(e) = self.target.add_labels(target_id, &source_labels).await {
                    warn!(title = %payload.title, error = %e, "label attach failed, continuing");
                }
            }

            if self.with_attachments {
                self.transfer_attachments(source_id, target_id, report).await;
            }

            let children = self.source.get_child_pages(source_id).await?;
            for child in children {
                if self.cancelled() {
                    break;
                }
                let child_id = match child.id.parse::<i64>() {
                    Ok(id) => id,
                    Err(_) => {
                        warn!(id = %child.id, "skipping child with non-numeric id");
                        continue;
                    }
                };
                if let Err(e) = self
                    .replicate_node(child_id, Some(target_id), report)
                    .await
                {
                    warn!(
                        title = %child.title,
                        source_id = child_id,
                        error = %e,
                        "replication failed, abandoning subtree"
                    );
                    report.failed_subtrees += 1;
                }
            }

            Ok(())
        })
    }

    /// Copy every attachment of one source page onto one target page.
    /// Per-attachment failures are counted and skipped.
    async fn transfer_attachments(
        &self,
        source_id: i64,
        target_id: i64,
        report: &mut ReplicationReport,
    ) {
        let payloads = match self.source.get_attachments(source_id).await {
            Ok(payloads) => payloads,
            Err(e) => {
                warn!(source_id, error = %e, "attachment listing failed, skipping page");
                return;
            }
        };

        for payload in payloads {
            match self.transfer_one(source_id, target_id, &payload).await {
                Ok(()) => {
                    info!(attachment = %payload.title, target_id, "attachment copied");
                    report.attachments += 1;
                }
                Err(e) => {
                    warn!(attachment = %payload.title, error = %e, "attachment transfer failed");
                    report.failed_attachments += 1;
                }
            }
        }
    }

    /// Download, stage to disk, upload, and always delete the staged file.
    async fn transfer_one(
        &self,
        source_id: i64,
        target_id: i64,
        payload: &AttachmentPayload,
    ) -> Result<(), GatewayError> {
        let data = self
            .source
            .download_attachment(source_id, &payload.title)
            .await?;

        let file_name = safe_file_name(&payload.title);
        fs::create_dir_all(&self.staging_dir)?;
        let staged = self.staging_dir.join(&file_name);

        let outcome = self.stage_and_upload(target_id, &file_name, &staged, data).await;
        if staged.exists() {
            if let Err(e) = fs::remove_file(&staged) {
                warn!(path = %staged.display(), error = %e, "failed to remove staged file");
            }
        }
        outcome
    }

    async fn stage_and_upload(
        &self,
        target_id: i64,
        file_name: &str,
        staged: &Path,
        data: Bytes,
    ) -> Result<(), GatewayError> {
        fs::write(staged, &data)?;
        let bytes = fs::read(staged)?;
        self.target
            .upload_attachment(target_id, file_name, Bytes::from(bytes))
            .await
    }

    /// Standalone attachment pass over two already-aligned trees: zip the
    /// traversals and copy attachments pair by pair.
    pub async fn copy_attachments(
        &self,
        source: &ContentTree,
        target: &ContentTree,
    ) -> ReplicationReport {
        let mut report = ReplicationReport::default();
        let source_nodes = source.traverse();
        let target_nodes = target.traverse();
        for (s, t) in source_nodes.iter().zip(target_nodes.iter()) {
            if self.cancelled() {
                break;
            }
            if s.title != t.title {
                warn!(source = %s.title, target = %t.title, "title mismatch, skipping pair");
                continue;
            }
            self.transfer_attachments(s.id, t.id, &mut report).await;
        }
        report
    }

    /// REST-based body carry-over for two already-aligned trees: fetch
    /// each source body and write it to the matching target page at the
    /// next version. The headless alternative to the editor-session
    /// protocol; storage-format bodies land verbatim.
    pub async fn copy_bodies(
        &self,
        source: &ContentTree,
        target: &ContentTree,
    ) -> BodyCopyReport {
        let mut report = BodyCopyReport::default();
        let source_nodes = source.traverse();
        let target_nodes = target.traverse();
        for (s, t) in source_nodes.iter().zip(target_nodes.iter()) {
            if self.cancelled() {
                break;
            }
            if s.title != t.title {
                warn!(source = %s.title, target = %t.title, "title mismatch, skipping pair");
                report.skipped += 1;
                continue;
            }
            match self.copy_one_body(s.id, t.id, &t.title).await {
                Ok(()) => {
                    info!(page = %t.title, target_id = t.id, "body updated");
                    report.copied += 1;
                }
                Err(e) => {
                    warn!(page = %t.title, error = %e, "body update failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn copy_one_body(
        &self,
        source_id: i64,
        target_id: i64,
        title: &str,
    ) -> Result<(), GatewayError> {
        let payload = self.source.get_content(source_id).await?;
        let body = payload.body.unwrap_or_default();
        let version = self.target.get_content_version(target_id).await?;
        self.target
            .update_content(target_id, title, &body, version + 1)
            .await
    }

    /// Save every attachment of every tree node under `dest`, one
    /// directory per page id, without touching the target instance.
    pub async fn download_attachments(
        &self,
        tree: &ContentTree,
        dest: &Path,
    ) -> Result<ReplicationReport, GatewayError> {
        fs::create_dir_all(dest)?;
        let mut report = ReplicationReport::default();
        for node in tree.traverse() {
            if self.cancelled() {
                break;
            }
            let payloads = match self.source.get_attachments(node.id).await {
                Ok(payloads) => payloads,
                Err(e) => {
                    warn!(page = %node.title, error = %e, "attachment listing failed");
                    continue;
                }
            };
            let page_dir = dest.join(node.id.to_string());
            for payload in payloads {
                match self.source.download_attachment(node.id, &payload.title).await {
                    Ok(data) => {
                        fs::create_dir_all(&page_dir)?;
                        let path = page_dir.join(safe_file_name(&payload.title));
                        fs::write(&path, &data)?;
                        report.attachments += 1;
                    }
                    Err(e) => {
                        warn!(attachment = %payload.title, error = %e, "download failed");
                        report.failed_attachments += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Download a rendered export of every tree node into
    /// `dest/<format subdir>/`. Per-page failures are skipped.
    pub async fn download_exports(
        &self,
        tree: &ContentTree,
        format: ExportFormat,
        dest: &Path,
    ) -> Result<u64, GatewayError> {
        let dir = dest.join(format.subdir());
        fs::create_dir_all(&dir)?;
        let mut saved = 0;
        for node in tree.traverse() {
            if self.cancelled() {
                break;
            }
            match self.source.download_export(node.id, format).await {
                Ok(data) => {
                    let name = format!(
                        "{}.{}",
                        safe_file_name(&node.title),
                        format.extension()
                    );
                    fs::write(dir.join(&name), &data)?;
                    debug!(page = %node.title, file = %name, "export saved");
                    saved += 1;
                }
                Err(e) => {
                    warn!(page = %node.title, error = %e, "export failed, skipping page");
                }
            }
        }
        Ok(saved)
    }
}

/// Periodic read-only progress log over both gateways' counters.
pub struct ProgressReporter {
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(
        source: Arc<dyn ContentGateway>,
        target: Arc<dyn ContentGateway>,
        period: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let s = source.stats().snapshot();
                let t = target.stats().snapshot();
                info!(
                    source_requests = s.total,
                    source_success_rate = format!("{:.1}%", s.success_rate()),
                    target_requests = t.total,
                    target_success_rate = format!("{:.1}%", t.success_rate()),
                    pages_created = t.pages_created,
                    attachments_created = t.attachments_created,
                    "progress"
                );
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}
