//! PsychonautWiki upstream backend.
//!
//! Two endpoints are involved per fetch:
//!   1. the GraphQL API (`substances` query) for the record itself —
//!      name, article URL, chemical/psychoactive classes, effect names;
//!   2. the MediaWiki `pageimages` API plus the `thumb.php` thumbnailer for
//!      the page's primary schematic bitmap.
//!
//! The schematic is best-effort: a failure there degrades the record
//! (no image) instead of failing the whole fetch. All wire types are
//! private to this module — callers only see [`SubjectRecord`].

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use super::{FetchError, SubjectRecord};

// ── Public provider ──────────────────────────────────────────────────────────

/// Adapter for the PsychonautWiki GraphQL + MediaWiki APIs.
///
/// Constructed once at startup, then cheaply cloned because
/// `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct PnWikiProvider {
    client: Client,
    api_url: String,
    mediawiki_url: String,
    wiki_url: String,
    schematic_width: u32,
}

impl PnWikiProvider {
    pub fn new(config: &UpstreamConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            mediawiki_url: config.mediawiki_url.clone(),
            wiki_url: config.wiki_url.clone(),
            schematic_width: config.schematic_width,
        })
    }

    /// Fetch one subject record. `key` is already case-normalized.
    pub async fn fetch(&self, key: &str) -> Result<SubjectRecord, FetchError> {
        let substance = self.query_substance(key).await?.ok_or(FetchError::NotFound)?;

        // Schematic lookup is best-effort — log and continue without it.
        let schematic = match self.fetch_schematic(&substance.name).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "schematic fetch failed, serving record without image");
                None
            }
        };

        let class = substance.class.unwrap_or_default();
        Ok(SubjectRecord {
            key: key.to_string(),
            name: substance.name,
            url: substance.url,
            chemical_classes: class.chemical.unwrap_or_default(),
            psychoactive_classes: class.psychoactive.unwrap_or_default(),
            summary: substance
                .effects
                .unwrap_or_default()
                .into_iter()
                .map(|e| e.name)
                .collect(),
            schematic,
            last_fetched: Utc::now(),
        })
    }

    // ── GraphQL ──────────────────────────────────────────────────────────────

    async fn query_substance(&self, key: &str) -> Result<Option<Substance>, FetchError> {
        // The query string is interpolated into the GraphQL document, so
        // strip characters that would break out of the string literal.
        let sanitized: String = key.chars().filter(|c| *c != '"' && *c != '\\').collect();

        let query = format!(
            r#"{{
                substances(query: "{sanitized}", limit: 1) {{
                    name
                    url
                    class {{ chemical psychoactive }}
                    effects {{ name }}
                }}
            }}"#
        );

        debug!(key, "querying substance upstream");

        let response = self
            .client
            .post(&self.api_url)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| FetchError::Upstream(format!("graphql request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Upstream(format!("graphql endpoint returned HTTP {status}")));
        }

        let parsed: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Upstream(format!("failed to parse graphql response: {e}")))?;

        Ok(parsed.data.and_then(|d| d.substances.into_iter().next()))
    }

    // ── Schematic ────────────────────────────────────────────────────────────

    /// Resolve the page's primary image filename, then fetch its raster
    /// thumbnail at the configured width.
    async fn fetch_schematic(&self, title: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let response = self
            .client
            .get(&self.mediawiki_url)
            .query(&[
                ("action", "query"),
                ("titles", title),
                ("prop", "pageimages"),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Upstream(format!("pageimages request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Upstream(format!("mediawiki returned HTTP {status}")));
        }

        let parsed: PageImagesResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Upstream(format!("failed to parse pageimages response: {e}")))?;

        let Some(filename) = parsed
            .query
            .map(|q| q.pages)
            .unwrap_or_default()
            .into_values()
            .find_map(|p| p.pageimage)
        else {
            debug!(title, "page has no primary image");
            return Ok(None);
        };

        let thumb_url = format!("{}thumb.php", self.wiki_url);
        let width = self.schematic_width.to_string();
        let response = self
            .client
            .get(&thumb_url)
            .query(&[("f", filename.as_str()), ("width", width.as_str())])
            .send()
            .await
            .map_err(|e| FetchError::Upstream(format!("thumbnail request failed: {e}")))?;

        if !response.status().is_success() {
            debug!(title, %filename, "thumbnailer has no rendering for this file");
            return Ok(None);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Upstream(format!("failed to read thumbnail body: {e}")))?;

        Ok(Some(bytes.to_vec()))
    }
}

// ── Private wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<GraphQlData>,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    #[serde(default)]
    substances: Vec<Substance>,
}

#[derive(Debug, Deserialize)]
struct Substance {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    class: Option<SubstanceClass>,
    #[serde(default)]
    effects: Option<Vec<Effect>>,
}

#[derive(Debug, Deserialize, Default)]
struct SubstanceClass {
    #[serde(default)]
    chemical: Option<Vec<String>>,
    #[serde(default)]
    psychoactive: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Effect {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PageImagesResponse {
    #[serde(default)]
    query: Option<PageImagesQuery>,
}

#[derive(Debug, Deserialize, Default)]
struct PageImagesQuery {
    #[serde(default)]
    pages: std::collections::HashMap<String, Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    pageimage: Option<String>,
}
