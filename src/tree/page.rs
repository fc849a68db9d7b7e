//! Page nodes: the structural unit of a content tree.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::InstanceKind;
use crate::error::GatewayError;
use crate::gateway::ContentPayload;

use super::attachment::AttachmentRecord;

/// Macro invocations in storage-format bodies: `ac:name="macro-name"`.
static MACRO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"ac:name="([^"]*)""#).expect("macro pattern is valid"));

/// One entry in a page's child list.
///
/// Alignment and traversal only operate on `Page` entries; `Other`
/// entries (comments, inline content the remote lists among children)
/// are carried through untouched.
#[derive(Debug, Clone)]
pub enum ChildEntry {
    Page(PageNode),
    Other { id: String, kind: String },
}

impl ChildEntry {
    pub fn as_page(&self) -> Option<&PageNode> {
        match self {
            Self::Page(page) => Some(page),
            Self::Other { .. } => None,
        }
    }

    pub fn as_page_mut(&mut self) -> Option<&mut PageNode> {
        match self {
            Self::Page(page) => Some(page),
            Self::Other { .. } => None,
        }
    }
}

/// One content page: identity, metadata, owned children and attachments.
///
/// The parent back-reference is a plain id for lookups; ownership flows
/// strictly downward so dropping a node drops its subtree.
#[derive(Debug, Clone)]
pub struct PageNode {
    pub id: i64,
    pub title: String,
    pub status: String,
    pub page_type: String,
    pub edit_link: String,
    pub webui_link: String,
    pub labels: Vec<String>,
    pub children: Vec<ChildEntry>,
    pub attachments: Vec<AttachmentRecord>,
    pub body: Option<String>,
    pub macros: Vec<String>,
    pub parent_id: Option<i64>,
}

impl PageNode {
    /// Translate a remote content payload into a node. Children and
    /// attachments start empty and are populated by separate fetches.
    pub fn from_payload(
        payload: &ContentPayload,
        kind: InstanceKind,
    ) -> Result<Self, GatewayError> {
        let id = payload.id.parse::<i64>().map_err(|_| {
            GatewayError::Payload(format!("non-numeric page id '{}'", payload.id))
        })?;
        let mut node = Self {
            id,
            title: payload.title.clone(),
            status: payload.status.clone(),
            page_type: payload.page_type.clone(),
            edit_link: payload.links.edit_fragment(kind).to_string(),
            webui_link: payload.links.webui.clone(),
            labels: Vec::new(),
            children: Vec::new(),
            attachments: Vec::new(),
            body: None,
            macros: Vec::new(),
            parent_id: None,
        };
        if let Some(body) = &payload.body {
            node.set_body(body.clone());
        }
        Ok(node)
    }

    /// Append a structural child, preserving arrival order.
    pub fn add_child(&mut self, mut child: PageNode) {
        child.parent_id = Some(self.id);
        self.children.push(ChildEntry::Page(child));
    }

    pub fn add_attachment(&mut self, attachment: AttachmentRecord) {
        self.attachments.push(attachment);
    }

    /// Set the raw body and recompute the derived macro list.
    pub fn set_body(&mut self, body: String) {
        self.macros = MACRO_PATTERN
            .captures_iter(&body)
            .map(|c| c[1].to_string())
            .collect();
        self.body = Some(body);
    }

    /// Structural children in order.
    pub fn child_pages(&self) -> impl Iterator<Item = &PageNode> {
        self.children.iter().filter_map(ChildEntry::as_page)
    }

    pub fn child_pages_mut(&mut self) -> impl Iterator<Item = &mut PageNode> {
        self.children.iter_mut().filter_map(ChildEntry::as_page_mut)
    }

    /// Deduplicated macro names, for listings and snapshots.
    pub fn macro_set(&self) -> BTreeSet<&str> {
        self.macros.iter().map(String::as_str).collect()
    }
}
