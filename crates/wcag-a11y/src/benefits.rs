/// Who benefits from a success criterion, taken from its "Understanding" page.
///
/// Pages are fetched on demand and the extracted lists are kept in a JSON file keyed by
/// criterion id. Entries are only written after a fetch that found something and are
/// never expired.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use mcp_common::http::FetchClient;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AppError;
use crate::storage::{read_json, write_json_atomic};
use crate::text::clean_text;

static BENEFITS_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<([a-z][a-z0-9]*)\b[^>]*\bid\s*=\s*["']benefits["'][^>]*>"#)
        .expect("valid regex")
});
static LI_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(/?)li\b([^>]*)>").expect("valid regex"));
static CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bclass\s*=\s*["']([^"']*)["']"#).expect("valid regex"));
static CRITERION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("valid regex"));

/// Source of fresh benefit lists.
#[async_trait]
pub trait BenefitSource: Send + Sync {
    async fn fetch(&self, version: &str, criterion_id: &str) -> Result<Vec<String>, AppError>;
}

pub struct BenefitFetcher {
    client: FetchClient,
    base_url: String,
}

impl BenefitFetcher {
    pub fn new(client: FetchClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn page_url(&self, version: &str, criterion_id: &str) -> String {
        format!(
            "{}/WCAG{}/Understanding/{criterion_id}.html",
            self.base_url,
            version.replace('.', "")
        )
    }
}

#[async_trait]
impl BenefitSource for BenefitFetcher {
    async fn fetch(&self, version: &str, criterion_id: &str) -> Result<Vec<String>, AppError> {
        let url = self.page_url(version, criterion_id);
        let page = self
            .client
            .get_text(&url)
            .await
            .map_err(|e| AppError::Upstream(format!("fetching {url} failed: {e}")))?;
        match page {
            Some(html) => Ok(extract_benefits(&html)),
            None => {
                debug!(url = %url, "understanding page not found");
                Ok(Vec::new())
            }
        }
    }
}

/// List items inside the element with `id="benefits"`, without marker or pseudo-content
/// items, as clean text. A nested item is listed on its own and also inside its parent.
pub fn extract_benefits(html: &str) -> Vec<String> {
    let Some(section) = benefits_section(html) else {
        return Vec::new();
    };
    list_items(section)
        .into_iter()
        .filter(|(attrs, _)| !is_decoration(attrs))
        .map(|(_, body)| clean_text(body))
        .filter(|text| !text.is_empty() && !text.eq_ignore_ascii_case("none"))
        .collect()
}

/// `(attributes, body)` of every `<li>` in opening order. Bodies run to the matching
/// close tag, so nested items stay whole; an unclosed item runs to the end.
fn list_items(section: &str) -> Vec<(&str, &str)> {
    let mut items: Vec<(&str, usize, Option<usize>)> = Vec::new();
    let mut open = Vec::new();
    for caps in LI_TAG_RE.captures_iter(section) {
        let Some(tag) = caps.get(0) else { continue };
        if caps[1].is_empty() {
            let attrs = caps.get(2).map_or("", |m| m.as_str());
            open.push(items.len());
            items.push((attrs, tag.end(), None));
        } else if let Some(index) = open.pop() {
            items[index].2 = Some(tag.start());
        }
    }
    items
        .into_iter()
        .map(|(attrs, start, end)| (attrs, &section[start..end.unwrap_or(section.len())]))
        .collect()
}

fn is_decoration(attrs: &str) -> bool {
    CLASS_RE.captures(attrs).is_some_and(|caps| {
        caps[1]
            .split_whitespace()
            .any(|class| class == "marker" || class == "pseudocontent")
    })
}

/// Body of the benefits element, up to its matching close tag or the end of the page.
fn benefits_section(html: &str) -> Option<&str> {
    let open = BENEFITS_OPEN_RE.captures(html)?;
    let whole = open.get(0)?;
    let tag = open[1].to_ascii_lowercase();
    let body = &html[whole.end()..];

    let tag_re = Regex::new(&format!(r"(?i)<(/?){}\b[^>]*>", regex::escape(&tag))).ok()?;
    let mut depth = 1usize;
    for caps in tag_re.captures_iter(body) {
        if caps[1].is_empty() {
            depth += 1;
        } else {
            depth -= 1;
            if depth == 0 {
                return caps.get(0).map(|m| &body[..m.start()]);
            }
        }
    }
    Some(body)
}

/// On-disk map of criterion id to benefit list, loaded on first use.
pub struct BenefitCache {
    path: PathBuf,
    entries: Mutex<Option<BTreeMap<String, Vec<String>>>>,
}

impl BenefitCache {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: Mutex::new(None),
        }
    }

    pub async fn get(&self, criterion_id: &str) -> Result<Option<Vec<String>>, AppError> {
        let mut entries = self.entries.lock().await;
        let map = self.loaded(&mut entries).await?;
        Ok(map.get(criterion_id).cloned())
    }

    /// Record a fresh list. Empty lists are not stored.
    pub async fn put(&self, criterion_id: &str, benefits: &[String]) -> Result<(), AppError> {
        if benefits.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.lock().await;
        let map = self.loaded(&mut entries).await?;
        map.insert(criterion_id.to_string(), benefits.to_vec());
        write_json_atomic(&self.path, &*map).await
    }

    async fn loaded<'a>(
        &self,
        entries: &'a mut Option<BTreeMap<String, Vec<String>>>,
    ) -> Result<&'a mut BTreeMap<String, Vec<String>>, AppError> {
        if entries.is_none() {
            let map = read_json(&self.path).await?.unwrap_or_default();
            *entries = Some(map);
        }
        Ok(entries.get_or_insert_with(BTreeMap::new))
    }
}

pub struct Benefits {
    cache: BenefitCache,
    source: Arc<dyn BenefitSource>,
}

impl Benefits {
    pub fn new(cache: BenefitCache, source: Arc<dyn BenefitSource>) -> Self {
        Self { cache, source }
    }

    /// Cached list if present, otherwise a fresh fetch.
    pub async fn get(&self, version: &str, criterion_id: &str) -> Result<Vec<String>, AppError> {
        if !CRITERION_ID_RE.is_match(criterion_id) {
            return Err(AppError::Validation(format!(
                "'{criterion_id}' is not a success criterion id"
            )));
        }
        if let Some(hit) = self.cache.get(criterion_id).await? {
            debug!(criterion_id, "benefits cache hit");
            return Ok(hit);
        }
        let fresh = self.source.fetch(version, criterion_id).await?;
        info!(criterion_id, version, count = fresh.len(), "benefits fetched");
        self.cache.put(criterion_id, &fresh).await?;
        Ok(fresh)
    }
}
