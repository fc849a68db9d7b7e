//! REST implementation of the content gateway.
//!
//! Covers both instance flavours: cloud-style sites mount the API under
//! `/wiki/rest/api` (with page creation on the v2 path), server-style
//! sites under `/rest/api`. Every call updates the shared request
//! counters; response bodies are surfaced in errors truncated to keep
//! logs readable.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{AuthMode, InstanceConfig, InstanceKind};
use crate::error::GatewayError;

use super::{
    AttachmentPayload, ContentGateway, ContentLinks, ContentPayload, CreatePage,
    ExportFormat, PageRestrictions, RequestStats,
};

/// Longest response-body excerpt carried into errors and logs.
const BODY_EXCERPT: usize = 250;

/// Placeholder representation used for storage-format bodies.
const STORAGE_REPRESENTATION: &str = "storage";

/// REST gateway bound to one instance.
pub struct RestGateway {
    client: Client,
    config: InstanceConfig,
    stats: RequestStats,
}

#[derive(Debug, Deserialize)]
struct ResultsEnvelope<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ContentEnvelope {
    id: String,
    title: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "type", default)]
    page_type: String,
    #[serde(rename = "_links", default)]
    links: ContentLinks,
    #[serde(default)]
    body: Option<BodyEnvelope>,
    #[serde(default)]
    version: Option<VersionEnvelope>,
}

#[derive(Debug, Deserialize)]
struct BodyEnvelope {
    #[serde(default)]
    storage: Option<StorageBody>,
}

#[derive(Debug, Deserialize)]
struct StorageBody {
    value: String,
}

#[derive(Debug, Deserialize)]
struct VersionEnvelope {
    number: u32,
}

#[derive(Debug, Deserialize)]
struct LabelEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentEnvelope {
    id: String,
    title: String,
    #[serde(default)]
    metadata: AttachmentMetadata,
    #[serde(default)]
    extensions: AttachmentExtensions,
    #[serde(rename = "_links", default)]
    links: AttachmentLinks,
}

#[derive(Debug, Default, Deserialize)]
struct AttachmentMetadata {
    #[serde(rename = "mediaType", default)]
    media_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct AttachmentExtensions {
    #[serde(rename = "fileSize", default)]
    file_size: u64,
}

#[derive(Debug, Default, Deserialize)]
struct AttachmentLinks {
    #[serde(default)]
    download: String,
    #[serde(default)]
    webui: String,
}

#[derive(Debug, Deserialize)]
struct IdEnvelope {
    id: String,
}

impl From<ContentEnvelope> for ContentPayload {
    fn from(envelope: ContentEnvelope) -> Self {
        let body = envelope
            .body
            .and_then(|b| b.storage)
            .map(|s| s.value);
        ContentPayload {
            id: envelope.id,
            title: envelope.title,
            status: envelope.status,
            page_type: envelope.page_type,
            links: envelope.links,
            body,
        }
    }
}

impl From<AttachmentEnvelope> for AttachmentPayload {
    fn from(envelope: AttachmentEnvelope) -> Self {
        AttachmentPayload {
            id: envelope.id,
            title: envelope.title,
            media_type: envelope.metadata.media_type,
            file_size: envelope.extensions.file_size,
            download_link: envelope.links.download,
            webui_link: envelope.links.webui,
        }
    }
}

impl RestGateway {
    /// Build a gateway for one instance. Fatal on client construction
    /// failure (invalid TLS setup or timeout value).
    pub fn new(config: InstanceConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            stats: RequestStats::default(),
        })
    }

    pub fn instance_name(&self) -> &str {
        &self.config.name
    }

    /// API root for v1-style endpoints.
    fn rest_base(&self) -> String {
        match self.config.kind {
            InstanceKind::Cloud => format!("{}/wiki/rest/api", self.config.site()),
            InstanceKind::Server => format!("{}/rest/api", self.config.site()),
        }
    }

    /// Site prefix for non-REST paths (downloads, exports).
    fn site_prefix(&self) -> String {
        match self.config.kind {
            InstanceKind::Cloud => format!("{}/wiki", self.config.site()),
            InstanceKind::Server => self.config.site().to_string(),
        }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        let creds = &self.config.credentials;
        let request = request
            .header("X-Atlassian-Token", "no-check")
            .header("Accept", "application/json");
        match creds.auth_mode {
            AuthMode::Basic => {
                let secret = match self.config.kind {
                    InstanceKind::Cloud => &creds.api_token,
                    InstanceKind::Server => &creds.password,
                };
                request.basic_auth(&creds.email, Some(secret))
            }
            AuthMode::Bearer => request.bearer_auth(&creds.api_token),
        }
    }

    /// Send a request, record stats by outcome, and hand back the response
    /// for operation-specific status mapping.
    async fn execute(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = match self.authed(request).send().await {
            Ok(r) => r,
            Err(e) => {
                self.stats.record_failure();
                return Err(GatewayError::Http(e));
            }
        };
        if response.status().is_success() {
            self.stats.record_success();
            debug!(
                instance = %self.config.name,
                status = %response.status(),
                "request ok"
            );
        } else {
            self.stats.record_failure();
        }
        Ok(response)
    }

    /// Map a non-success response to an error, consuming its body.
    async fn unexpected(&self, response: Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
        warn!(
            instance = %self.config.name,
            status = status,
            body = %excerpt,
            "request failed"
        );
        GatewayError::UnexpectedStatus {
            status,
            body: excerpt,
        }
    }

    fn storage_body(value: &str) -> serde_json::Value {
        json!({
            "storage": {
                "value": value,
                "representation": STORAGE_REPRESENTATION,
            }
        })
    }

    fn parse_id(raw: &str) -> Result<i64, GatewayError> {
        raw.parse::<i64>()
            .map_err(|_| GatewayError::Payload(format!("non-numeric content id '{raw}'")))
    }
}

#[async_trait]
impl ContentGateway for RestGateway {
    async fn get_content(&self, id: i64) -> Result<ContentPayload, GatewayError> {
        let url = format!("{}/content/{}", self.rest_base(), id);
        let request = self.client.get(&url).query(&[
            ("expand", "body.storage,children.attachment"),
            ("limit", &self.config.fetch_limit.to_string()),
        ]);
        let response = self.execute(request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound { id: id.to_string() }),
            s if s.is_success() => {
                let envelope: ContentEnvelope = response.json().await?;
                Ok(envelope.into())
            }
            _ => Err(self.unexpected(response).await),
        }
    }

    async fn get_child_pages(&self, id: i64) -> Result<Vec<ContentPayload>, GatewayError> {
        let url = format!("{}/content/{}/child/page", self.rest_base(), id);
        let request = self
            .client
            .get(&url)
            .query(&[("limit", &self.config.fetch_limit.to_string())]);
        let response = self.execute(request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound { id: id.to_string() }),
            s if s.is_success() => {
                let envelope: ResultsEnvelope<ContentEnvelope> = response.json().await?;
                Ok(envelope.results.into_iter().map(Into::into).collect())
            }
            _ => Err(self.unexpected(response).await),
        }
    }

    async fn get_labels(&self, id: i64) -> Result<Vec<String>, GatewayError> {
        let url = format!("{}/content/{}/label", self.rest_base(), id);
        let response = self.execute(self.client.get(&url)).await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        let envelope: ResultsEnvelope<LabelEntry> = response.json().await?;
        Ok(envelope.results.into_iter().map(|l| l.name).collect())
    }

    async fn add_labels(&self, id: i64, labels: &[String]) -> Result<(), GatewayError> {
        let url = format!("{}/content/{}/label", self.rest_base(), id);
        let payload: Vec<_> = labels
            .iter()
            .map(|name| json!({ "prefix": "global", "name": name }))
            .collect();
        let response = self.execute(self.client.post(&url).json(&payload)).await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        Ok(())
    }

    async fn create_content(&self, page: &CreatePage) -> Result<i64, GatewayError> {
        let (url, payload) = match self.config.kind {
            InstanceKind::Cloud => {
                let mut payload = json!({
                    "spaceId": page.space_id,
                    "status": "current",
                    "title": page.title,
                    "body": {
                        "representation": STORAGE_REPRESENTATION,
                        "value": page.body,
                    }
                });
                if let Some(parent) = page.parent_id {
                    payload["parentId"] = json!(parent.to_string());
                }
                (format!("{}/wiki/api/v2/pages", self.config.site()), payload)
            }
            InstanceKind::Server => {
                let mut payload = json!({
                    "type": "page",
                    "title": page.title,
                    "space": { "key": self.config.space_key },
                    "body": Self::storage_body(&page.body),
                });
                if let Some(parent) = page.parent_id {
                    payload["ancestors"] = json!([{ "id": parent }]);
                }
                (format!("{}/content", self.rest_base()), payload)
            }
        };

        let response = self.execute(self.client.post(&url).json(&payload)).await?;
        match response.status() {
            StatusCode::BAD_REQUEST => {
                warn!(
                    instance = %self.config.name,
                    title = %page.title,
                    "create rejected, title already exists"
                );
                Err(GatewayError::Conflict {
                    title: page.title.clone(),
                    space_key: self.config.space_key.clone(),
                })
            }
            s if s.is_success() => {
                let envelope: IdEnvelope = response.json().await?;
                self.stats.record_page_created();
                Self::parse_id(&envelope.id)
            }
            _ => Err(self.unexpected(response).await),
        }
    }

    async fn get_content_version(&self, id: i64) -> Result<u32, GatewayError> {
        let url = format!("{}/content/{}", self.rest_base(), id);
        let response = self
            .execute(self.client.get(&url).query(&[("expand", "version")]))
            .await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        let envelope: ContentEnvelope = response.json().await?;
        envelope
            .version
            .map(|v| v.number)
            .ok_or_else(|| GatewayError::Payload(format!("content {id} has no version field")))
    }

    async fn update_content(
        &self,
        id: i64,
        title: &str,
        body: &str,
        version: u32,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/content/{}", self.rest_base(), id);
        let payload = json!({
            "id": id.to_string(),
            "title": title,
            "status": "current",
            "body": Self::storage_body(body),
            "version": { "number": version },
        });
        let response = self.execute(self.client.put(&url).json(&payload)).await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        Ok(())
    }

    async fn get_attachments(&self, id: i64) -> Result<Vec<AttachmentPayload>, GatewayError> {
        let url = format!("{}/content/{}/child/attachment", self.rest_base(), id);
        let request = self
            .client
            .get(&url)
            .query(&[("limit", &self.config.fetch_limit.to_string())]);
        let response = self.execute(request).await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        let envelope: ResultsEnvelope<AttachmentEnvelope> = response.json().await?;
        Ok(envelope.results.into_iter().map(Into::into).collect())
    }

    async fn download_attachment(
        &self,
        id: i64,
        file_name: &str,
    ) -> Result<Bytes, GatewayError> {
        let url = format!(
            "{}/download/attachments/{}/{}",
            self.site_prefix(),
            id,
            urlencoding::encode(file_name)
        );
        let response = self.execute(self.client.get(&url)).await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        self.stats.record_attachment_downloaded();
        Ok(response.bytes().await?)
    }

    async fn upload_attachment(
        &self,
        id: i64,
        file_name: &str,
        data: Bytes,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/content/{}/child/attachment", self.rest_base(), id);
        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        debug!(
            instance = %self.config.name,
            page_id = id,
            file = %file_name,
            "uploading attachment"
        );
        let response = self.execute(self.client.post(&url).multipart(form)).await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        self.stats.record_attachment_created();
        Ok(())
    }

    async fn download_export(
        &self,
        id: i64,
        format: ExportFormat,
    ) -> Result<Bytes, GatewayError> {
        let url = match format {
            ExportFormat::Pdf => format!(
                "{}/spaces/flyingpdf/pdfpageexport.action",
                self.site_prefix()
            ),
            ExportFormat::Word => format!("{}/exportword", self.site_prefix()),
        };
        let response = self
            .execute(self.client.get(&url).query(&[("pageId", &id.to_string())]))
            .await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        self.stats.record_export_downloaded();
        Ok(response.bytes().await?)
    }

    async fn get_space_id(&self, space_key: &str) -> Result<String, GatewayError> {
        let url = format!("{}/space/{}", self.rest_base(), space_key);
        let response = self.execute(self.client.get(&url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound {
                id: space_key.to_string(),
            }),
            s if s.is_success() => {
                let value: serde_json::Value = response.json().await?;
                match value.get("id") {
                    Some(serde_json::Value::String(id)) => Ok(id.clone()),
                    Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
                    _ => Err(GatewayError::Payload(format!(
                        "space '{space_key}' response carried no id"
                    ))),
                }
            }
            _ => Err(self.unexpected(response).await),
        }
    }

    async fn get_page_id_by_title(
        &self,
        title: &str,
        space_key: &str,
    ) -> Result<i64, GatewayError> {
        let url = format!("{}/content", self.rest_base());
        let request = self
            .client
            .get(&url)
            .query(&[("title", title), ("spaceKey", space_key)]);
        let response = self.execute(request).await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        let envelope: ResultsEnvelope<IdEnvelope> = response.json().await?;
        match envelope.results.len() {
            0 => Err(GatewayError::NotFound {
                id: title.to_string(),
            }),
            1 => Self::parse_id(&envelope.results[0].id),
            matches => Err(GatewayError::AmbiguousTitle {
                title: title.to_string(),
                space_key: space_key.to_string(),
                matches,
            }),
        }
    }

    async fn get_restrictions(&self, id: i64) -> Result<PageRestrictions, GatewayError> {
        let url = format!(
            "{}/content/{}/restriction/byOperation",
            self.rest_base(),
            id
        );
        let response = self.execute(self.client.get(&url)).await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        let value: serde_json::Value = response.json().await?;

        let users = |operation: &str| -> Vec<String> {
            value
                .pointer(&format!("/{operation}/restrictions/user/results"))
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|u| u.get("username").and_then(|n| n.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        let groups = |operation: &str| -> Vec<String> {
            value
                .pointer(&format!("/{operation}/restrictions/group/results"))
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|g| g.get("name").and_then(|n| n.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(PageRestrictions {
            read_users: users("read"),
            read_groups: groups("read"),
            update_users: users("update"),
            update_groups: groups("update"),
        })
    }

    fn stats(&self) -> &RequestStats {
        &self.stats
    }
}
