//! In-memory model of a remote page hierarchy.
//!
//! A [`ContentTree`] is rebuilt wholesale from a gateway: construction
//! walks the remote hierarchy depth-first, applying exclude-id and label
//! filters with early exit (a pruned node's subtree is never visited).
//! The tree then supports pre-order traversal, alignment against another
//! tree by title, and write-only persistence projections.

pub mod attachment;
pub mod page;

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::InstanceKind;
use crate::error::TreeError;
use crate::gateway::ContentGateway;

pub use attachment::AttachmentRecord;
pub use page::{ChildEntry, PageNode};

/// Recursion guard for pathological hierarchies.
const MAX_DEPTH: usize = 128;

/// Filtering rules applied during construction.
///
/// The label filter is active only when non-empty; under an active filter
/// a node whose fetched labels do not contain the label is pruned with
/// its whole subtree. Exclude ids are compared string-normalized.
#[derive(Debug, Clone, Default)]
pub struct TreeFilter {
    pub include_label: Option<String>,
    pub exclude_ids: Vec<String>,
}

impl TreeFilter {
    pub fn new(include_label: &str, exclude_ids: &[String]) -> Self {
        Self {
            include_label: if include_label.is_empty() {
                None
            } else {
                Some(include_label.to_string())
            },
            exclude_ids: exclude_ids.to_vec(),
        }
    }

    fn excludes(&self, id: i64) -> bool {
        let id = id.to_string();
        self.exclude_ids.iter().any(|e| e.trim() == id)
    }

    fn label_permits(&self, labels: &[String]) -> bool {
        match &self.include_label {
            None => true,
            Some(label) => labels.iter().any(|l| l == label),
        }
    }
}

/// Serializable projection of a subtree, used for the JSON snapshot file.
#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    pub title: String,
    pub id: i64,
    pub labels: Vec<String>,
    pub attachments: Vec<String>,
    pub macros: Vec<String>,
    pub children: Vec<TreeSnapshot>,
}

/// A content tree bound to the gateway it was built from.
pub struct ContentTree {
    root: PageNode,
    gateway: Arc<dyn ContentGateway>,
    kind: InstanceKind,
    /// Point-in-time node count; recomputed by [`Self::refresh_total_nodes`].
    total_nodes: usize,
}

impl ContentTree {
    /// Build a tree by walking the remote hierarchy from `root_id`.
    ///
    /// A gateway failure below the root abandons only that subtree with a
    /// warning; failure to fetch the root aborts the whole build.
    pub async fn build(
        gateway: Arc<dyn ContentGateway>,
        kind: InstanceKind,
        root_id: i64,
        filter: &TreeFilter,
    ) -> Result<Self, TreeError> {
        info!(root_id, %kind, "building content tree");
        let payload = gateway
            .get_content(root_id)
            .await
            .map_err(|source| TreeError::RootUnavailable { root_id, source })?;
        let mut root = PageNode::from_payload(&payload, kind)
            .map_err(|source| TreeError::RootUnavailable { root_id, source })?;

        Self::populate(gateway.as_ref(), &mut root, kind, filter, 1).await?;

        let mut tree = Self {
            root,
            gateway,
            kind,
            total_nodes: 0,
        };
        let total = tree.refresh_total_nodes();
        info!(root = %tree.root.title, total_nodes = total, "content tree ready");
        Ok(tree)
    }

    fn populate<'a>(
        gateway: &'a dyn ContentGateway,
        node: &'a mut PageNode,
        kind: InstanceKind,
        filter: &'a TreeFilter,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<(), TreeError>> + Send + 'a>> {
        Box::pin(async move {
            if depth > MAX_DEPTH {
                return Err(TreeError::DepthExceeded {
                    max_depth: MAX_DEPTH,
                    page_id: node.id,
                });
            }

            let children = match gateway.get_child_pages(node.id).await {
                Ok(children) => children,
                Err(e) => {
                    warn!(
                        page = %node.title,
                        page_id = node.id,
                        error = %e,
                        "child fetch failed, abandoning subtree"
                    );
                    return Ok(());
                }
            };

            for payload in children {
                let mut child = match PageNode::from_payload(&payload, kind) {
                    Ok(child) => child,
                    Err(e) => {
                        warn!(id = %payload.id, error = %e, "skipping malformed child");
                        continue;
                    }
                };

                if filter.excludes(child.id) {
                    warn!(
                        page = %child.title,
                        page_id = child.id,
                        "skipping page and all sub pages, excluded id"
                    );
                    continue;
                }

                child.labels = match gateway.get_labels(child.id).await {
                    Ok(labels) => labels,
                    Err(e) => {
                        warn!(
                            page = %child.title,
                            page_id = child.id,
                            error = %e,
                            "label fetch failed, abandoning subtree"
                        );
                        continue;
                    }
                };

                if !filter.label_permits(&child.labels) {
                    warn!(
                        page = %child.title,
                        page_id = child.id,
                        "skipping page and all sub pages, label filter"
                    );
                    continue;
                }

                debug!(page = %child.title, page_id = child.id, labels = ?child.labels, "adding page");
                Self::populate(gateway, &mut child, kind, filter, depth + 1).await?;
                node.add_child(child);
            }

            Ok(())
        })
    }

    pub fn root(&self) -> &PageNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut PageNode {
        &mut self.root
    }

    pub fn gateway(&self) -> &Arc<dyn ContentGateway> {
        &self.gateway
    }

    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    /// Fetch the rendered body for one node on demand and recompute its
    /// macro list. Separate from construction: structural sync does not
    /// need bodies.
    pub async fn fetch_body(
        gateway: &dyn ContentGateway,
        node: &mut PageNode,
    ) -> Result<(), crate::error::GatewayError> {
        let payload = gateway.get_content(node.id).await?;
        node.set_body(payload.body.unwrap_or_default());
        Ok(())
    }

    /// Ensure a node's attachment records are populated; no-op when they
    /// already are.
    pub async fn ensure_attachments(
        gateway: &dyn ContentGateway,
        node: &mut PageNode,
    ) -> Result<(), crate::error::GatewayError> {
        if !node.attachments.is_empty() {
            return Ok(());
        }
        let payloads = gateway.get_attachments(node.id).await?;
        for payload in payloads {
            let record = AttachmentRecord::from_payload(payload);
            debug!(page = %node.title, attachment = %record.title, "added attachment");
            node.add_attachment(record);
        }
        Ok(())
    }

    /// Pre-order snapshot of the tree's structural nodes.
    ///
    /// Pure function of the tree state at call time; explicit stack, no
    /// recursion.
    pub fn traverse(&self) -> Vec<&PageNode> {
        let mut ordered = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            ordered.push(node);
            // Reverse push keeps children in gateway order on pop.
            let children: Vec<&PageNode> = node.child_pages().collect();
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
        ordered
    }

    /// Number of structural nodes strictly below `node`.
    pub fn count_descendants(node: &PageNode) -> usize {
        let mut count = 0;
        let mut stack: Vec<&PageNode> = node.child_pages().collect();
        while let Some(child) = stack.pop() {
            count += 1;
            stack.extend(child.child_pages());
        }
        count
    }

    /// Recompute and cache the reachable node count (descendants + root).
    pub fn refresh_total_nodes(&mut self) -> usize {
        self.total_nodes = Self::count_descendants(&self.root) + 1;
        self.total_nodes
    }

    /// Last computed node count; stale until the next refresh.
    pub fn total_nodes(&self) -> usize {
        self.total_nodes
    }

    /// Restructure this (target) tree so paired traversal with the source
    /// tree yields title-matching pairs.
    ///
    /// At every matched level the structural children become the title
    /// intersection ordered by the source node's child order. Source-only
    /// titles are warned and skipped; target-only titles are warned and
    /// dropped from the aligned view (never touched remotely).
    /// Non-structural entries are preserved ahead of the aligned list.
    pub fn align_with(&mut self, source_root: &PageNode) {
        Self::align_nodes(&mut self.root, source_root);
        self.refresh_total_nodes();
    }

    fn align_nodes(target: &mut PageNode, source: &PageNode) {
        let mut others = Vec::new();
        let mut by_title: HashMap<String, PageNode> = HashMap::new();
        for entry in target.children.drain(..) {
            match entry {
                ChildEntry::Page(page) => {
                    by_title.insert(page.title.clone(), page);
                }
                other @ ChildEntry::Other { .. } => others.push(other),
            }
        }

        let mut aligned = Vec::new();
        for source_child in source.child_pages() {
            match by_title.remove(&source_child.title) {
                Some(mut target_child) => {
                    Self::align_nodes(&mut target_child, source_child);
                    aligned.push(ChildEntry::Page(target_child));
                }
                None => {
                    warn!(
                        title = %source_child.title,
                        "no matching node found in target tree"
                    );
                }
            }
        }
        for title in by_title.keys() {
            warn!(%title, "target-only page dropped from aligned view");
        }

        others.extend(aligned);
        target.children = others;
    }

    /// Serializable projection of the whole tree.
    pub fn snapshot(&self) -> TreeSnapshot {
        Self::node_snapshot(&self.root)
    }

    fn node_snapshot(node: &PageNode) -> TreeSnapshot {
        TreeSnapshot {
            title: node.title.clone(),
            id: node.id,
            labels: node.labels.clone(),
            attachments: node.attachments.iter().map(|a| a.id.clone()).collect(),
            macros: node.macro_set().into_iter().map(str::to_string).collect(),
            children: node.child_pages().map(Self::node_snapshot).collect(),
        }
    }

    /// Human-readable indented listing, one line per node.
    pub fn render_listing(&self) -> String {
        let mut out = String::new();
        Self::render_node(&self.root, 0, &mut out);
        out
    }

    fn render_node(node: &PageNode, level: usize, out: &mut String) {
        let indent = "    ".repeat(level);
        out.push_str(&format!(
            "{indent}- {} (ID: {}, Labels: {:?}, Children: {}, Macros: {:?})\n",
            node.title,
            node.id,
            node.labels,
            node.child_pages().count(),
            node.macro_set(),
        ));
        for child in node.child_pages() {
            Self::render_node(child, level + 1, out);
        }
    }

    /// Write the indented listing to a file.
    pub fn save_listing(&self, path: &Path) -> Result<(), TreeError> {
        fs::write(path, self.render_listing()).map_err(|source| TreeError::Persist {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the JSON snapshot to a file.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), TreeError> {
        let json = serde_json::to_string_pretty(&self.snapshot()).map_err(|e| {
            TreeError::Persist {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            }
        })?;
        fs::write(path, json).map_err(|source| TreeError::Persist {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Conventional file name for persisted projections.
    pub fn artifact_name(instance_name: &str, root_id: i64, extension: &str) -> String {
        format!("tree_{instance_name}_{root_id}.{extension}")
    }
}
