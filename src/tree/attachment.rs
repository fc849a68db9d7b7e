//! Attachment records owned by page nodes.

use crate::gateway::AttachmentPayload;

/// One binary asset attached to a page. Immutable once translated from a
/// remote payload; owned exclusively by the listing page node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub id: String,
    pub title: String,
    pub media_type: String,
    pub file_size: u64,
    pub download_link: String,
    pub webui_link: String,
}

impl AttachmentRecord {
    pub fn from_payload(payload: AttachmentPayload) -> Self {
        Self {
            id: payload.id,
            title: payload.title,
            media_type: payload.media_type,
            file_size: payload.file_size,
            download_link: payload.download_link,
            webui_link: payload.webui_link,
        }
    }
}
