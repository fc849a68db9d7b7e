//! In-memory [`ContentGateway`] for exercising the tree and the
//! orchestrator without a network. Test-only.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::GatewayError;
use crate::gateway::{
    AttachmentPayload, ContentGateway, ContentLinks, ContentPayload, CreatePage, ExportFormat,
    PageRestrictions, RequestStats,
};

#[derive(Debug, Clone)]
struct MemNode {
    id: i64,
    title: String,
    labels: Vec<String>,
    children: Vec<i64>,
    attachments: Vec<AttachmentPayload>,
    body: String,
    version: u32,
    restricted_users: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<i64, MemNode>,
    roots: Vec<i64>,
    // failure injection
    fail_children: HashSet<i64>,
    fail_label_add: HashSet<i64>,
    fail_downloads: HashSet<String>,
    fail_uploads: HashSet<String>,
    // call recording
    children_fetched: HashSet<i64>,
    labels_fetched: HashSet<i64>,
    created: Vec<(i64, String, Option<i64>)>,
    uploaded: Vec<(i64, String, usize)>,
    label_adds: Vec<(i64, Vec<String>)>,
}

/// Scripted in-memory instance. Pages are registered up front with
/// `add_page`; failure injection flips individual operations into errors.
pub struct MemoryGateway {
    state: Mutex<State>,
    next_id: AtomicI64,
    space_key: String,
    space_id: String,
    stats: RequestStats,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_id: AtomicI64::new(1000),
            space_key: "MEM".to_string(),
            space_id: "700".to_string(),
            stats: RequestStats::default(),
        }
    }

    pub fn add_page(&self, id: i64, title: &str, parent: Option<i64>, labels: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.nodes.insert(
            id,
            MemNode {
                id,
                title: title.to_string(),
                labels: labels.iter().map(|l| l.to_string()).collect(),
                children: Vec::new(),
                attachments: Vec::new(),
                body: format!("<p>{title}</p>"),
                version: 1,
                restricted_users: Vec::new(),
            },
        );
        match parent {
            Some(parent) => {
                if let Some(node) = state.nodes.get_mut(&parent) {
                    node.children.push(id);
                }
            }
            None => state.roots.push(id),
        }
    }

    pub fn add_attachment(&self, page_id: i64, id: &str, title: &str, file_size: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&page_id) {
            node.attachments.push(AttachmentPayload {
                id: id.to_string(),
                title: title.to_string(),
                media_type: "application/octet-stream".to_string(),
                file_size,
                download_link: format!("/download/attachments/{page_id}/{title}"),
                webui_link: format!("/pages/viewpageattachments.action?pageId={page_id}"),
            });
        }
    }

    pub fn set_body(&self, id: i64, body: &str) {
        if let Some(node) = self.state.lock().unwrap().nodes.get_mut(&id) {
            node.body = body.to_string();
        }
    }

    pub fn restrict_page(&self, id: i64, users: &[&str]) {
        if let Some(node) = self.state.lock().unwrap().nodes.get_mut(&id) {
            node.restricted_users = users.iter().map(|u| u.to_string()).collect();
        }
    }

    pub fn fail_children_of(&self, id: i64) {
        self.state.lock().unwrap().fail_children.insert(id);
    }

    pub fn fail_label_add_on(&self, id: i64) {
        self.state.lock().unwrap().fail_label_add.insert(id);
    }

    pub fn fail_download_of(&self, file_name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_downloads
            .insert(file_name.to_string());
    }

    pub fn fail_upload_of(&self, file_name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_uploads
            .insert(file_name.to_string());
    }

    pub fn was_children_fetched(&self, id: i64) -> bool {
        self.state.lock().unwrap().children_fetched.contains(&id)
    }

    pub fn was_labels_fetched(&self, id: i64) -> bool {
        self.state.lock().unwrap().labels_fetched.contains(&id)
    }

    /// `(id, title, parent_id)` per page created, in creation order.
    pub fn created_pages(&self) -> Vec<(i64, String, Option<i64>)> {
        self.state.lock().unwrap().created.clone()
    }

    /// `(page_id, file_name, byte_count)` per upload, in upload order.
    pub fn uploads(&self) -> Vec<(i64, String, usize)> {
        self.state.lock().unwrap().uploaded.clone()
    }

    pub fn label_adds(&self) -> Vec<(i64, Vec<String>)> {
        self.state.lock().unwrap().label_adds.clone()
    }

    pub fn labels_of(&self, id: i64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&id)
            .map(|n| n.labels.clone())
            .unwrap_or_default()
    }

    pub fn body_of(&self, id: i64) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&id)
            .map(|n| n.body.clone())
    }

    pub fn page_id_of(&self, title: &str) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .values()
            .find(|n| n.title == title)
            .map(|n| n.id)
    }

    fn payload(node: &MemNode) -> ContentPayload {
        ContentPayload {
            id: node.id.to_string(),
            title: node.title.clone(),
            status: "current".to_string(),
            page_type: "page".to_string(),
            links: ContentLinks {
                webui: format!("/x/{}", node.id),
                editui: format!("/pages/edit/{}", node.id),
                edit: format!("/pages/editpage.action?pageId={}", node.id),
            },
            body: None,
        }
    }

    fn not_found(id: i64) -> GatewayError {
        GatewayError::NotFound { id: id.to_string() }
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentGateway for MemoryGateway {
    async fn get_content(&self, id: i64) -> Result<ContentPayload, GatewayError> {
        let state = self.state.lock().unwrap();
        match state.nodes.get(&id) {
            Some(node) => {
                self.stats.record_success();
                let mut payload = Self::payload(node);
                payload.body = Some(node.body.clone());
                Ok(payload)
            }
            None => {
                self.stats.record_failure();
                Err(Self::not_found(id))
            }
        }
    }

    async fn get_child_pages(&self, id: i64) -> Result<Vec<ContentPayload>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.children_fetched.insert(id);
        if state.fail_children.contains(&id) {
            self.stats.record_failure();
            return Err(GatewayError::UnexpectedStatus {
                status: 500,
                body: "injected child fetch failure".to_string(),
            });
        }
        let node = state.nodes.get(&id).ok_or_else(|| Self::not_found(id))?;
        let children = node
            .children
            .iter()
            .filter_map(|cid| state.nodes.get(cid))
            .map(Self::payload)
            .collect();
        self.stats.record_success();
        Ok(children)
    }

    async fn get_labels(&self, id: i64) -> Result<Vec<String>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.labels_fetched.insert(id);
        let node = state.nodes.get(&id).ok_or_else(|| Self::not_found(id))?;
        self.stats.record_success();
        Ok(node.labels.clone())
    }

    async fn add_labels(&self, id: i64, labels: &[String]) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_label_add.contains(&id) {
            self.stats.record_failure();
            return Err(GatewayError::UnexpectedStatus {
                status: 500,
                body: "injected label failure".to_string(),
            });
        }
        state.label_adds.push((id, labels.to_vec()));
        let node = state.nodes.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        node.labels.extend(labels.iter().cloned());
        self.stats.record_success();
        Ok(())
    }

    async fn create_content(&self, page: &CreatePage) -> Result<i64, GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.nodes.values().any(|n| n.title == page.title) {
            self.stats.record_failure();
            return Err(GatewayError::Conflict {
                title: page.title.clone(),
                space_key: self.space_key.clone(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.nodes.insert(
            id,
            MemNode {
                id,
                title: page.title.clone(),
                labels: Vec::new(),
                children: Vec::new(),
                attachments: Vec::new(),
                body: page.body.clone(),
                version: 1,
                restricted_users: Vec::new(),
            },
        );
        match page.parent_id {
            Some(parent) => {
                if let Some(node) = state.nodes.get_mut(&parent) {
                    node.children.push(id);
                }
            }
            None => state.roots.push(id),
        }
        state.created.push((id, page.title.clone(), page.parent_id));
        self.stats.record_success();
        self.stats.record_page_created();
        Ok(id)
    }

    async fn get_content_version(&self, id: i64) -> Result<u32, GatewayError> {
        let state = self.state.lock().unwrap();
        let node = state.nodes.get(&id).ok_or_else(|| Self::not_found(id))?;
        self.stats.record_success();
        Ok(node.version)
    }

    async fn update_content(
        &self,
        id: i64,
        _title: &str,
        body: &str,
        version: u32,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        let node = state.nodes.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        node.body = body.to_string();
        node.version = version;
        self.stats.record_success();
        Ok(())
    }

    async fn get_attachments(&self, id: i64) -> Result<Vec<AttachmentPayload>, GatewayError> {
        let state = self.state.lock().unwrap();
        let node = state.nodes.get(&id).ok_or_else(|| Self::not_found(id))?;
        self.stats.record_success();
        Ok(node.attachments.clone())
    }

    async fn download_attachment(
        &self,
        id: i64,
        file_name: &str,
    ) -> Result<Bytes, GatewayError> {
        let state = self.state.lock().unwrap();
        if state.fail_downloads.contains(file_name) {
            self.stats.record_failure();
            return Err(GatewayError::UnexpectedStatus {
                status: 500,
                body: "injected download failure".to_string(),
            });
        }
        let node = state.nodes.get(&id).ok_or_else(|| Self::not_found(id))?;
        let attachment = node
            .attachments
            .iter()
            .find(|a| a.title == file_name)
            .ok_or_else(|| GatewayError::NotFound {
                id: file_name.to_string(),
            })?;
        self.stats.record_success();
        self.stats.record_attachment_downloaded();
        Ok(Bytes::from(vec![0x42; attachment.file_size as usize]))
    }

    async fn upload_attachment(
        &self,
        id: i64,
        file_name: &str,
        data: Bytes,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_uploads.contains(file_name) {
            self.stats.record_failure();
            return Err(GatewayError::UnexpectedStatus {
                status: 500,
                body: "injected upload failure".to_string(),
            });
        }
        if !state.nodes.contains_key(&id) {
            return Err(Self::not_found(id));
        }
        state.uploaded.push((id, file_name.to_string(), data.len()));
        let size = data.len() as u64;
        if let Some(node) = state.nodes.get_mut(&id) {
            node.attachments.push(AttachmentPayload {
                id: format!("att-{id}-{file_name}"),
                title: file_name.to_string(),
                media_type: "application/octet-stream".to_string(),
                file_size: size,
                download_link: format!("/download/attachments/{id}/{file_name}"),
                webui_link: String::new(),
            });
        }
        self.stats.record_success();
        self.stats.record_attachment_created();
        Ok(())
    }

    async fn download_export(
        &self,
        id: i64,
        format: ExportFormat,
    ) -> Result<Bytes, GatewayError> {
        let state = self.state.lock().unwrap();
        if !state.nodes.contains_key(&id) {
            return Err(Self::not_found(id));
        }
        self.stats.record_success();
        self.stats.record_export_downloaded();
        Ok(Bytes::from(format!("export:{id}:{}", format.extension())))
    }

    async fn get_space_id(&self, _space_key: &str) -> Result<String, GatewayError> {
        self.stats.record_success();
        Ok(self.space_id.clone())
    }

    async fn get_page_id_by_title(
        &self,
        title: &str,
        space_key: &str,
    ) -> Result<i64, GatewayError> {
        let state = self.state.lock().unwrap();
        let matches: Vec<i64> = state
            .nodes
            .values()
            .filter(|n| n.title == title)
            .map(|n| n.id)
            .collect();
        match matches.len() {
            0 => Err(GatewayError::NotFound {
                id: title.to_string(),
            }),
            1 => {
                self.stats.record_success();
                Ok(matches[0])
            }
            n => Err(GatewayError::AmbiguousTitle {
                title: title.to_string(),
                space_key: space_key.to_string(),
                matches: n,
            }),
        }
    }

    async fn get_restrictions(&self, id: i64) -> Result<PageRestrictions, GatewayError> {
        let state = self.state.lock().unwrap();
        let node = state.nodes.get(&id).ok_or_else(|| Self::not_found(id))?;
        self.stats.record_success();
        Ok(PageRestrictions {
            read_users: node.restricted_users.clone(),
            read_groups: Vec::new(),
            update_users: node.restricted_users.clone(),
            update_groups: Vec::new(),
        })
    }

    fn stats(&self) -> &RequestStats {
        &self.stats
    }
}
