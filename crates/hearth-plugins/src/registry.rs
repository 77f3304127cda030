//! npm registry client.
//!
//! Two endpoints are used:
//! - package info: `GET {registry}/{name}`
//! - search: `GET {registry}/-/v1/search?text=keywords:<keyword> <query>&size=<n>`
//!
//! A 404 from package info means the package is unpublished and is reported
//! as `Ok(None)`. Every other failure is a `RegistryError`; callers that
//! merge catalogs treat those like `None`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::PluginManagerConfig;
use hearth_core::config::endpoints;
use hearth_core::names::{is_plugin_name, validate_package_name};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::record::{PackageMetadata, PluginLinks, compare_versions};

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:https?|ftp)://\S+").expect("valid url regex"));

/// Strip URLs and surrounding whitespace from a package description.
pub fn sanitize_description(description: &str) -> String {
    URL_RE.replace_all(description, "").trim().to_string()
}

/// Public npm page of a package.
pub fn npm_page(name: &str) -> String {
    format!("{}/{}", endpoints::NPM_PACKAGE_PAGE, name)
}

/// Source of package metadata.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Metadata for one package; `None` when it is not published.
    async fn lookup(&self, name: &str) -> Result<Option<PackageMetadata>, RegistryError>;

    /// Plugins matching a free-text query.
    async fn search(&self, query: &str) -> Result<Vec<PackageMetadata>, RegistryError>;
}

/// HTTP client for an npm-compatible registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    base_url: String,
    prefix: String,
    keyword: String,
    search_limit: usize,
}

impl RegistryClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        prefix: impl Into<String>,
        keyword: impl Into<String>,
        search_limit: usize,
    ) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(concat!("hearth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            prefix: prefix.into(),
            keyword: keyword.into(),
            search_limit,
        })
    }

    pub fn from_config(config: &PluginManagerConfig) -> Result<Self, RegistryError> {
        Self::new(
            config.registry_base(),
            config.registry_timeout(),
            config.plugin_prefix.clone(),
            config.plugin_keyword.clone(),
            config.search_limit,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn package_url(&self, name: &str) -> String {
        // scoped names keep their '@' but encode the '/'
        let encoded = urlencoding::encode(name).replace("%40", "@");
        format!("{}/{}", self.base_url, encoded)
    }

    async fn search_registry(&self, query: &str) -> Result<Vec<PackageMetadata>, RegistryError> {
        let url = format!("{}/-/v1/search", self.base_url);
        let text = format!("keywords:{} {}", self.keyword, query.trim());
        let size = self.search_limit.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[("text", text.as_str()), ("size", size.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(category = "registry", status = status.as_u16(), query, "Search failed");
            return Err(RegistryError::Status(status.as_u16()));
        }

        let body: SearchResponse = response.json().await?;
        Ok(body
            .objects
            .into_iter()
            .map(|object| object.package.into_metadata())
            .filter(|meta| is_plugin_name(&meta.name, &self.prefix))
            .collect())
    }
}

#[async_trait]
impl PackageRegistry for RegistryClient {
    async fn lookup(&self, name: &str) -> Result<Option<PackageMetadata>, RegistryError> {
        let url = self.package_url(name);
        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(category = "registry", package = name, error = %e, "Registry unreachable");
            RegistryError::from(e)
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(category = "registry", package = name, "Package not published");
            return Ok(None);
        }
        if !status.is_success() {
            warn!(category = "registry", package = name, status = status.as_u16(), "Lookup failed");
            return Err(RegistryError::Status(status.as_u16()));
        }

        let packument: Packument = response.json().await?;
        Ok(Some(packument.into_metadata(name)))
    }

    async fn search(&self, query: &str) -> Result<Vec<PackageMetadata>, RegistryError> {
        let results = self.search_registry(query).await?;
        if !results.is_empty() {
            return Ok(results);
        }

        // an exact plugin name that the keyword search missed
        let query = query.trim();
        if is_plugin_name(query, &self.prefix) && validate_package_name(query).is_ok() {
            debug!(category = "registry", query, "Search empty, trying direct lookup");
            return Ok(self.lookup(query).await?.into_iter().collect());
        }
        Ok(results)
    }
}

/// Person fields appear either as `"Name <mail>"` or as an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Person {
    Object {
        name: Option<String>,
        username: Option<String>,
    },
    Text(String),
}

impl Person {
    fn display_name(&self) -> Option<String> {
        match self {
            Person::Object { name, username } => name.clone().or_else(|| username.clone()),
            Person::Text(text) => {
                let name = text.split('<').next().unwrap_or_default().trim();
                (!name.is_empty()).then(|| name.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Bugs {
    Object { url: Option<String> },
    Text(String),
}

impl Bugs {
    fn url(self) -> Option<String> {
        match self {
            Bugs::Object { url } => url,
            Bugs::Text(url) => Some(url),
        }
    }
}

/// Package document returned by the info endpoint.
#[derive(Debug, Deserialize)]
struct Packument {
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "dist-tags", default)]
    dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    versions: BTreeMap<String, Value>,
    #[serde(default)]
    maintainers: Vec<Person>,
    #[serde(default)]
    author: Option<Person>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    bugs: Option<Bugs>,
    #[serde(default)]
    keywords: Value,
    #[serde(default)]
    time: BTreeMap<String, Value>,
}

impl Packument {
    fn into_metadata(self, requested: &str) -> PackageMetadata {
        let name = self.name.unwrap_or_else(|| requested.to_string());
        let author = self
            .maintainers
            .first()
            .and_then(Person::display_name)
            .or_else(|| self.author.as_ref().and_then(Person::display_name));

        let mut versions: Vec<String> = self.versions.into_keys().collect();
        versions.sort_by(|a, b| compare_versions(a, b));

        PackageMetadata {
            description: self
                .description
                .as_deref()
                .map(sanitize_description)
                .unwrap_or_default(),
            latest_version: self.dist_tags.get("latest").cloned(),
            versions,
            dist_tags: self.dist_tags,
            keywords: string_list(&self.keywords),
            author,
            links: PluginLinks {
                npm: Some(npm_page(&name)),
                homepage: self.homepage,
                bugs: self.bugs.and_then(Bugs::url),
            },
            last_updated: self
                .time
                .get("modified")
                .and_then(Value::as_str)
                .map(str::to_string),
            name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    objects: Vec<SearchObject>,
}

#[derive(Debug, Deserialize)]
struct SearchObject {
    package: SearchPackage,
}

#[derive(Debug, Deserialize)]
struct SearchPackage {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    keywords: Value,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    links: SearchLinks,
    #[serde(default)]
    publisher: Option<Person>,
    #[serde(default)]
    maintainers: Vec<Person>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchLinks {
    npm: Option<String>,
    homepage: Option<String>,
    bugs: Option<String>,
}

impl SearchPackage {
    fn into_metadata(self) -> PackageMetadata {
        let author = self
            .publisher
            .as_ref()
            .and_then(Person::display_name)
            .or_else(|| self.maintainers.first().and_then(Person::display_name));

        let mut dist_tags = BTreeMap::new();
        if let Some(version) = &self.version {
            dist_tags.insert("latest".to_string(), version.clone());
        }

        PackageMetadata {
            description: self
                .description
                .as_deref()
                .map(sanitize_description)
                .unwrap_or_default(),
            latest_version: self.version.clone(),
            versions: self.version.into_iter().collect(),
            dist_tags,
            keywords: string_list(&self.keywords),
            author,
            links: PluginLinks {
                npm: self.links.npm.or_else(|| Some(npm_page(&self.name))),
                homepage: self.links.homepage,
                bugs: self.links.bugs,
            },
            last_updated: self.date,
            name: self.name,
        }
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
