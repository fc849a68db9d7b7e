//! Run configuration: the two content instances, filtering options, and
//! the UI element selector catalogue used by the browser driver.
//!
//! Instances load from a YAML file with `source` and `target` sections;
//! the element catalogue is a separate JSON file keyed by instance kind
//! and page surface. Both are validated at startup and any problem is
//! fatal before a single remote call is made.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which flavour of content instance an endpoint set targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Cloud,
    Server,
}

impl InstanceKind {
    /// Normalize free-form user input ("Confluence Cloud", "server", ...).
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let normalized: String = input
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "cloud" | "confluencecloud" => Ok(Self::Cloud),
            "server" | "confluenceserver" => Ok(Self::Server),
            _ => Err(ConfigError::InvalidKind(input.to_string())),
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// REST authentication mode for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Username + token (cloud) or password (server) as HTTP basic auth.
    #[default]
    Basic,
    /// Bearer token in the Authorization header.
    Bearer,
}

/// Credentials for one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub auth_mode: AuthMode,
}

/// One content instance: where it lives and how to walk it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub kind: InstanceKind,
    /// Base site URL without a trailing slash, e.g. `https://acme.example.com`.
    pub site_url: String,
    pub space_key: String,
    pub root_page_id: i64,
    /// Restrict traversal to the subtree carrying this label. Empty = no filter.
    #[serde(default)]
    pub label: String,
    /// Page ids pruned from the tree together with their subtrees.
    #[serde(default)]
    pub exclude_ids: Vec<String>,
    /// Page size for children/attachment listings.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,
    /// Per-request timeout for gateway calls, seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub credentials: Credentials,
}

fn default_fetch_limit() -> u32 {
    100
}

fn default_request_timeout() -> u64 {
    30
}

impl InstanceConfig {
    /// Site URL with any trailing slash stripped.
    pub fn site(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }
}

/// Top-level run configuration: a source and a target instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub source: InstanceConfig,
    pub target: InstanceConfig,
}

impl AppConfig {
    /// Load and validate the YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        let config: AppConfig =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        for (key, instance) in [("source", &self.source), ("target", &self.target)] {
            if instance.site_url.is_empty() || instance.space_key.is_empty() {
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    reason: format!("instance '{key}' is missing site_url or space_key"),
                });
            }
        }
        Ok(())
    }
}

/// How an element is located on a page surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    Css,
    Xpath,
    Id,
    Name,
    ClassName,
    TagName,
}

/// One interactive element the driver needs to find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiElement {
    /// Role of the element ("content", "save_button", "discard_button", ...).
    pub element_type: String,
    pub selector_kind: SelectorKind,
    pub selector_value: String,
}

/// Selector catalogue keyed by instance kind and page surface.
///
/// JSON shape: `{ "cloud": { "edit_page": [ {element}, ... ] }, "server": ... }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ElementCatalogue {
    #[serde(flatten)]
    surfaces: HashMap<String, HashMap<String, Vec<UiElement>>>,
}

impl ElementCatalogue {
    /// Load the catalogue from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Look up one element by role; `None` when the surface or role is absent.
    pub fn element(
        &self,
        kind: InstanceKind,
        surface: &str,
        element_type: &str,
    ) -> Option<&UiElement> {
        self.surfaces
            .get(&kind.to_string())?
            .get(surface)?
            .iter()
            .find(|e| e.element_type == element_type)
    }
}

/// Default staging directory for attachment and export downloads.
pub fn default_staging_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "spaceporter", "spaceporter")
        .map(|d| d.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}
