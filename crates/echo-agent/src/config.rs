//! Agent configuration

use std::path::{Path, PathBuf};

use echo_cache::{CachePurpose, ContainerName};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AgentError, AgentResult};

/// Edge agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Deployment version, embedded in every container name
    pub version: String,

    /// Absolute URL of the application root
    pub scope: Url,

    /// Root document served to offline navigations
    pub shell_path: String,

    /// Shell assets pre-warmed into the static container at install time
    pub precache: Vec<String>,

    /// Request classification data
    pub routes: RouteConfig,

    /// Outbox and background sync settings
    pub sync: SyncConfig,

    /// Push notification defaults
    pub notifications: NotificationConfig,

    /// On-disk locations for the durable stores
    pub storage: StorageConfig,
}

/// Data behind the ordered routing rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Script and stylesheet path suffixes
    pub script_extensions: Vec<String>,

    /// Path prefixes of bundler output
    pub build_prefixes: Vec<String>,

    pub icon_prefixes: Vec<String>,

    pub manifest_paths: Vec<String>,

    pub image_extensions: Vec<String>,

    pub api_prefixes: Vec<String>,

    /// Backend platform host suffixes (matched on label boundaries)
    pub backend_hosts: Vec<String>,

    /// `host:port` pairs of the dev server's live-reload transport
    pub dev_transport: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// One-shot "connectivity restored" tag that drains the outbox
    pub outbox_tag: String,

    /// Recurring maintenance tag that asks pages to re-sync history
    pub periodic_tag: String,

    /// Message endpoint, relative to the scope
    pub messages_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the agent databases
    pub data_dir: PathBuf,

    pub cache_file: String,

    pub outbox_file: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            scope: Url::parse("http://localhost:3000/").expect("static URL is valid"),
            shell_path: "/".to_string(),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/icons/icon-192x192.png".to_string(),
                "/icons/icon-512x512.png".to_string(),
            ],
            routes: RouteConfig::default(),
            sync: SyncConfig::default(),
            notifications: NotificationConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            script_extensions: strings(&[".js", ".mjs", ".css"]),
            build_prefixes: strings(&["/static/", "/assets/", "/_next/static/"]),
            icon_prefixes: strings(&["/icons/"]),
            manifest_paths: strings(&["/manifest.json"]),
            image_extensions: strings(&[
                ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".ico", ".avif",
            ]),
            api_prefixes: strings(&["/api/"]),
            backend_hosts: strings(&[
                "firebaseio.com",
                "firestore.googleapis.com",
                "firebasestorage.googleapis.com",
                "identitytoolkit.googleapis.com",
            ]),
            dev_transport: strings(&["localhost:24678"]),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            outbox_tag: "send-messages".to_string(),
            periodic_tag: "sync-messages".to_string(),
            messages_endpoint: "/messages".to_string(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "EchoChat".to_string(),
            default_body: "You have a new message".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            tag: "echochat-message".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("echochat"),
            cache_file: "caches.db".to_string(),
            outbox_file: "outbox.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_file)
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.data_dir.join(&self.outbox_file)
    }
}

impl AgentConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> AgentResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> AgentResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.version.is_empty() {
            return Err(AgentError::Config("version must not be empty".to_string()));
        }
        if !matches!(self.scope.scheme(), "http" | "https") {
            return Err(AgentError::Config(format!(
                "scope must be an http(s) URL, got {}",
                self.scope
            )));
        }
        Ok(())
    }

    /// Resolve a path (or absolute URL) against the scope.
    pub fn resolve(&self, path: &str) -> AgentResult<Url> {
        Ok(self.scope.join(path)?)
    }

    pub fn shell_url(&self) -> AgentResult<Url> {
        self.resolve(&self.shell_path)
    }

    pub fn messages_url(&self) -> AgentResult<Url> {
        self.resolve(&self.sync.messages_endpoint)
    }

    pub fn precache_urls(&self) -> AgentResult<Vec<Url>> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    /// Name of the current container for `purpose`.
    pub fn container(&self, purpose: CachePurpose) -> String {
        ContainerName::new(self.version.as_str(), purpose).to_string()
    }
}
