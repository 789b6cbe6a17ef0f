//! Storyblok delivery client, fixture stories and story → record normalization.

mod normalize;
mod richtext;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use brewbook_core::{RecordKind, Story};
use brewbook_storage::{ArtifactStore, FetchError, FetchedResponse, HttpFetcher, HttpRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

pub use normalize::{
    clean_tags, main_content_component, parse_geo_pair, split_comma_list, NormalizationStats,
    NormalizeError, NormalizedBatch, RecordNormalizer, SUMMARY_MAX_LEN,
};
pub use richtext::{create_summary, extract_plain_text};

pub const CRATE_NAME: &str = "brewbook-cms";

pub const DEFAULT_BASE_URL: &str = "https://api.storyblok.com/v2/cdn";
pub const MAX_PER_PAGE: u32 = 100;
pub const MAX_PAGES: u32 = 1000;

const UPSTREAM: &str = "storyblok";

#[derive(Debug, Error)]
pub enum CmsError {
    #[error("Storyblok API error: {status} {body}")]
    Api { status: u16, body: String },
    #[error(transparent)]
    Fetch(FetchError),
    #[error("invalid Storyblok url {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CmsError {
    pub fn status(&self) -> Option<u16> {
        match self {
            CmsError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<FetchError> for CmsError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status, body, .. } => CmsError::Api { status, body },
            other => CmsError::Fetch(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentVersion {
    Published,
    Draft,
}

impl ContentVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentVersion::Published => "published",
            ContentVersion::Draft => "draft",
        }
    }
}

#[derive(Clone)]
pub struct StoryblokConfig {
    pub token: String,
    pub base_url: String,
    pub per_page: u32,
}

impl StoryblokConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            per_page: MAX_PER_PAGE,
        }
    }
}

impl std::fmt::Debug for StoryblokConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryblokConfig")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("per_page", &self.per_page)
            .finish()
    }
}

/// Stories of one collection fetch plus how they were obtained.
#[derive(Debug, Clone)]
pub struct StoryCollection {
    pub stories: Vec<Story>,
    pub version: ContentVersion,
    pub pages: u32,
    pub malformed: usize,
}

#[async_trait]
pub trait StorySource: Send + Sync {
    fn source_name(&self) -> &str;

    async fn fetch_all_stories(&self) -> Result<StoryCollection, CmsError>;

    async fn fetch_story(&self, story_id: u64) -> Result<Option<Story>, CmsError>;
}

struct StoryPage {
    stories: Vec<Story>,
    entries: usize,
    malformed: usize,
    total: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StoryblokClient {
    config: StoryblokConfig,
    http: Arc<HttpFetcher>,
    artifacts: Option<ArtifactStore>,
    max_pages: u32,
}

impl StoryblokClient {
    pub fn new(config: StoryblokConfig, http: Arc<HttpFetcher>) -> Self {
        let per_page = config.per_page.clamp(1, MAX_PER_PAGE);
        Self {
            config: StoryblokConfig { per_page, ..config },
            http,
            artifacts: None,
            max_pages: MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.clamp(1, MAX_PAGES);
        self
    }

    pub fn with_artifacts(mut self, store: ArtifactStore) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn config(&self) -> &StoryblokConfig {
        &self.config
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<String, CmsError> {
        let raw = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let mut url = Url::parse(&raw).map_err(|source| CmsError::Url {
            url: raw.clone(),
            source,
        })?;
        url.query_pairs_mut()
            .append_pair("token", &self.config.token)
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url.into())
    }

    fn stories_url(&self, version: ContentVersion, page: u32) -> Result<String, CmsError> {
        self.endpoint(
            "stories",
            &[
                ("version", version.as_str().to_string()),
                ("per_page", self.config.per_page.to_string()),
                ("page", page.to_string()),
            ],
        )
    }

    async fn fetch_page(
        &self,
        version: ContentVersion,
        page: u32,
        captured_at: DateTime<Utc>,
    ) -> Result<StoryPage, CmsError> {
        let url = self.stories_url(version, page)?;
        let resp = self.http.fetch_bytes(UPSTREAM, &url).await?;
        self.persist_raw(captured_at, &resp).await;

        let total = resp
            .header_str("total")
            .and_then(|v| v.trim().parse::<u64>().ok());
        let payload: JsonValue = resp.json()?;
        let entries = payload
            .get("stories")
            .and_then(JsonValue::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let (stories, malformed) = parse_story_entries(entries);
        Ok(StoryPage {
            stories,
            entries: entries.len(),
            malformed,
            total,
        })
    }

    async fn persist_raw(&self, captured_at: DateTime<Utc>, resp: &FetchedResponse) {
        let Some(store) = &self.artifacts else {
            return;
        };
        if let Err(err) = store.store_bytes(captured_at, UPSTREAM, "json", &resp.body).await {
            warn!(error = %err, "failed to persist raw Storyblok page");
        }
    }

    async fn fetch_collection(
        &self,
        version: ContentVersion,
        first: StoryPage,
        captured_at: DateTime<Utc>,
    ) -> Result<StoryCollection, CmsError> {
        let per_page = u64::from(self.config.per_page);
        let last_page = first
            .total
            .map(|total| total.div_ceil(per_page).min(u64::from(self.max_pages)) as u32);

        let mut collection = StoryCollection {
            stories: Vec::new(),
            version,
            pages: 1,
            malformed: 0,
        };
        let mut page = first;
        loop {
            let short_page = (page.entries as u64) < per_page;
            let empty_page = page.entries == 0;
            collection.malformed += page.malformed;
            collection.stories.extend(page.stories);

            let next = collection.pages + 1;
            let done = match last_page {
                Some(last) => empty_page || next > last,
                None => empty_page || short_page || next > self.max_pages,
            };
            if done {
                break;
            }
            page = self.fetch_page(version, next, captured_at).await?;
            collection.pages = next;
        }
        Ok(collection)
    }

    async fn fetch_single(&self, story_id: u64, version: ContentVersion) -> Result<Option<Story>, CmsError> {
        let url = self.endpoint(
            &format!("stories/{story_id}"),
            &[("version", version.as_str().to_string())],
        )?;
        let resp = match self.http.fetch_bytes(UPSTREAM, &url).await {
            Ok(resp) => resp,
            Err(err) if err.status() == Some(404) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let payload: JsonValue = resp.json()?;
        let Some(story) = payload.get("story") else {
            return Ok(None);
        };
        let story = serde_json::from_value(story.clone())
            .with_context(|| format!("decoding story {story_id}"))?;
        Ok(Some(story))
    }
}

#[async_trait]
impl StorySource for StoryblokClient {
    fn source_name(&self) -> &str {
        UPSTREAM
    }

    /// Walks every page of the collection, falling back to draft content when
    /// the published first page is refused.
    async fn fetch_all_stories(&self) -> Result<StoryCollection, CmsError> {
        let captured_at = Utc::now();
        let (version, first) = match self
            .fetch_page(ContentVersion::Published, 1, captured_at)
            .await
        {
            Ok(page) => (ContentVersion::Published, page),
            Err(err) if err.status().is_some() => {
                info!(status = err.status(), "published stories unavailable, trying draft version");
                let page = self.fetch_page(ContentVersion::Draft, 1, captured_at).await?;
                (ContentVersion::Draft, page)
            }
            Err(err) => return Err(err),
        };

        let collection = self.fetch_collection(version, first, captured_at).await?;
        info!(
            count = collection.stories.len(),
            pages = collection.pages,
            version = version.as_str(),
            malformed = collection.malformed,
            "retrieved stories from Storyblok"
        );
        if let Some(story) = collection.stories.first() {
            log_first_story(story);
        }
        Ok(collection)
    }

    async fn fetch_story(&self, story_id: u64) -> Result<Option<Story>, CmsError> {
        match self.fetch_single(story_id, ContentVersion::Published).await {
            Ok(Some(story)) => Ok(Some(story)),
            Ok(None) => self.fetch_single(story_id, ContentVersion::Draft).await,
            Err(err) if err.status().is_some() => {
                info!(story_id, status = err.status(), "published story unavailable, trying draft version");
                self.fetch_single(story_id, ContentVersion::Draft).await
            }
            Err(err) => Err(err),
        }
    }
}

fn log_first_story(story: &Story) {
    debug!(
        id = story.id_or_zero(),
        slug = story.slug_str(),
        published_at = story.published_at.as_deref().unwrap_or_default(),
        has_content = story.content.is_some(),
        has_body = story.body_blocks().is_some(),
        "first story"
    );
}

fn parse_story_entries(entries: &[JsonValue]) -> (Vec<Story>, usize) {
    let mut stories = Vec::with_capacity(entries.len());
    let mut malformed = 0;
    for (index, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<Story>(entry.clone()) {
            Ok(story) => stories.push(story),
            Err(err) => {
                malformed += 1;
                warn!(index, error = %err, "skipping malformed story entry");
            }
        }
    }
    (stories, malformed)
}

pub fn load_stories_fixture(path: impl AsRef<Path>) -> anyhow::Result<StoryCollection> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let payload: JsonValue =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    let entries = payload
        .get("stories")
        .and_then(JsonValue::as_array)
        .with_context(|| format!("{} has no stories array", path.display()))?;
    let (stories, malformed) = parse_story_entries(entries);
    Ok(StoryCollection {
        stories,
        version: ContentVersion::Published,
        pages: 1,
        malformed,
    })
}

#[derive(Debug, Clone)]
pub struct FixtureStorySource {
    path: PathBuf,
}

impl FixtureStorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StorySource for FixtureStorySource {
    fn source_name(&self) -> &str {
        "fixture"
    }

    async fn fetch_all_stories(&self) -> Result<StoryCollection, CmsError> {
        let collection = load_stories_fixture(&self.path)?;
        info!(
            count = collection.stories.len(),
            path = %self.path.display(),
            "loaded fixture stories"
        );
        Ok(collection)
    }

    async fn fetch_story(&self, story_id: u64) -> Result<Option<Story>, CmsError> {
        let collection = load_stories_fixture(&self.path)?;
        Ok(collection
            .stories
            .into_iter()
            .find(|story| story.id == Some(story_id)))
    }
}

/// True when the story has an id, a slug, and a `content.body` array.
pub fn validate_story_structure(story: &Story) -> bool {
    story.id.is_some_and(|id| id != 0)
        && !story.slug_str().trim().is_empty()
        && story.body_blocks().is_some()
}

/// Whether the story carries a component the normalizer indexes.
pub fn is_relevant_story(story: &Story) -> bool {
    let in_body = story.body_blocks().is_some_and(|blocks| {
        blocks.iter().any(|block| {
            block
                .get("component")
                .and_then(JsonValue::as_str)
                .and_then(RecordKind::from_component)
                .is_some()
        })
    });
    let at_root = story
        .content
        .as_ref()
        .and_then(|c| c.component.as_deref())
        .and_then(RecordKind::from_component)
        .is_some();
    in_body || at_root
}

pub fn filter_relevant_stories(stories: Vec<Story>) -> Vec<Story> {
    stories
        .into_iter()
        .filter(|story| validate_story_structure(story) && is_relevant_story(story))
        .collect()
}
