//! Seeding orchestration: fetch stories, normalize, validate, index and report.

mod config;
pub mod report;
mod story_sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use brewbook_cms::{
    filter_relevant_stories, FixtureStorySource, NormalizationStats, NormalizedBatch, RecordNormalizer,
    StoryblokClient, StorySource,
};
use brewbook_core::RecordStats;
use brewbook_search::{
    load_search_config, AlgoliaProvider, IndexingOutcome, SearchConfigFile, SearchIndexService,
    SearchIndexServiceConfig,
};
use brewbook_storage::{ArtifactStore, HttpFetcher};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{ConfigError, SearchCredentials, Secret, SeedConfig};
pub use report::{report_markdown, ReportManifest, ReportManifestFile, ReportPaths};
pub use story_sync::{StoryAction, StoryIndexer, StoryWebhookEvent, SyncOutcome};

pub const CRATE_NAME: &str = "brewbook-sync";

#[derive(Debug, Clone, Default)]
pub struct SeedOptions {
    /// Clear the index before writing.
    pub replace_all: bool,
    /// Fetch and normalize only; the index is never touched.
    pub dry_run: bool,
    pub skip_synonyms: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub reports_dir: PathBuf,
    pub min_cafes: usize,
    pub min_events: usize,
    pub search: SearchConfigFile,
}

impl PipelineSettings {
    pub fn from_config(config: &SeedConfig) -> Result<Self> {
        let search = match &config.search_config_path {
            Some(path) => load_search_config(path)?,
            None => SearchConfigFile::default(),
        };
        Ok(Self {
            reports_dir: config.reports_dir.clone(),
            min_cafes: config.min_cafes,
            min_events: config.min_events,
            search,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementsCheck {
    pub min_cafes: usize,
    pub min_events: usize,
    pub cafe_count: usize,
    pub event_count: usize,
    pub other_count: usize,
    pub is_valid: bool,
    pub message: String,
}

pub fn validate_requirements(stats: &RecordStats, min_cafes: usize, min_events: usize) -> RequirementsCheck {
    let is_valid = stats.cafe_count >= min_cafes && stats.event_count >= min_events;
    let message = if is_valid {
        "All requirements met".to_string()
    } else {
        format!(
            "Requirements not met. Need {min_cafes} cafes (have {}) and {min_events} events (have {})",
            stats.cafe_count, stats.event_count
        )
    };
    RequirementsCheck {
        min_cafes,
        min_events,
        cafe_count: stats.cafe_count,
        event_count: stats.event_count,
        other_count: stats.other_count,
        is_valid,
        message,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub source: String,
    pub content_version: String,
    pub dry_run: bool,
    pub replace_all: bool,
    pub stories_fetched: usize,
    pub relevant_stories: usize,
    pub malformed_stories: usize,
    pub normalization: NormalizationStats,
    pub record_stats: RecordStats,
    pub requirements: RequirementsCheck,
    pub is_valid: bool,
    pub message: String,
    pub indexing: IndexingOutcome,
    pub report_dir: String,
    pub manifest_path: String,
}

pub struct SeedPipeline {
    settings: PipelineSettings,
    source: Arc<dyn StorySource>,
    index: Arc<SearchIndexService>,
    normalizer: RecordNormalizer,
}

impl SeedPipeline {
    pub fn new(settings: PipelineSettings, source: Arc<dyn StorySource>, index: Arc<SearchIndexService>) -> Self {
        Self {
            settings,
            source,
            index,
            normalizer: RecordNormalizer::new(),
        }
    }

    /// Wires the Storyblok client (or a fixture file) and the Algolia index from configuration.
    pub fn from_config(config: &SeedConfig, fixture: Option<PathBuf>) -> Result<Self> {
        let settings = PipelineSettings::from_config(config)?;
        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);

        let source: Arc<dyn StorySource> = match fixture {
            Some(path) => Arc::new(FixtureStorySource::new(path)),
            None => Arc::new(
                StoryblokClient::new(config.storyblok.clone(), Arc::clone(&http))
                    .with_artifacts(ArtifactStore::new(config.artifacts_dir.clone())),
            ),
        };

        let provider = AlgoliaProvider::new(config.search.write_config(), http);
        let index_config = SearchIndexServiceConfig {
            batch_size: settings
                .search
                .batch_size
                .unwrap_or(SearchIndexServiceConfig::default().batch_size),
            ..Default::default()
        };
        let index = Arc::new(SearchIndexService::with_config(Box::new(provider), index_config));
        Ok(Self::new(settings, source, index))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn source(&self) -> Arc<dyn StorySource> {
        Arc::clone(&self.source)
    }

    pub fn index(&self) -> Arc<SearchIndexService> {
        Arc::clone(&self.index)
    }

    /// Indexer for webhook events sharing this pipeline's source and index.
    pub fn story_indexer(&self) -> StoryIndexer {
        StoryIndexer::new(self.source(), self.index())
    }

    pub async fn configure_index(&self, skip_synonyms: bool) -> Result<()> {
        self.index
            .configure_index(&self.settings.search.settings)
            .await
            .context("configuring index")?;
        if skip_synonyms {
            info!("skipping synonyms");
            return Ok(());
        }
        self.index
            .apply_synonyms(&self.settings.search.synonyms_or_default(), true)
            .await
            .context("applying synonyms")?;
        Ok(())
    }

    pub async fn run_once(&self, options: &SeedOptions) -> Result<SeedRunSummary> {
        let run_id = Uuid::new_v4();
        let clock = Instant::now();
        let result = self
            .execute(run_id, options, clock)
            .instrument(info_span!("seed_run", %run_id))
            .await;
        if let Err(err) = &result {
            error!(
                %run_id,
                elapsed_ms = clock.elapsed().as_millis() as u64,
                error = ?err,
                "seed run failed"
            );
        }
        result
    }

    async fn execute(&self, run_id: Uuid, options: &SeedOptions, clock: Instant) -> Result<SeedRunSummary> {
        let started_at = Utc::now();
        info!(
            source = self.source.source_name(),
            index = self.index.index_name(),
            dry_run = options.dry_run,
            replace_all = options.replace_all,
            "starting seed run"
        );

        if options.dry_run {
            info!("dry run; index configuration skipped");
        } else {
            self.configure_index(options.skip_synonyms).await?;
        }

        let collection = self
            .source
            .fetch_all_stories()
            .await
            .context("fetching stories")?;
        let stories_fetched = collection.stories.len();
        let relevant = filter_relevant_stories(collection.stories);
        info!("Filtered {} relevant stories from {}", relevant.len(), stories_fetched);

        let NormalizedBatch { records, stats } = self.normalizer.normalize_stories(&relevant);
        let record_stats = RecordStats::from_records(&records);
        let requirements = validate_requirements(&record_stats, self.settings.min_cafes, self.settings.min_events);
        if requirements.is_valid {
            info!(cafes = record_stats.cafe_count, events = record_stats.event_count, "{}", requirements.message);
        } else {
            warn!(cafes = record_stats.cafe_count, events = record_stats.event_count, "{}", requirements.message);
        }

        let indexing = if options.dry_run {
            IndexingOutcome::default()
        } else if records.is_empty() {
            warn!("no records to index");
            IndexingOutcome::default()
        } else {
            self.index
                .save_objects(records.clone(), options.replace_all)
                .await
                .context("indexing records")?
        };

        let paths = ReportPaths::for_run(&self.settings.reports_dir, &run_id.to_string());
        let summary = SeedRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            source: self.source.source_name().to_string(),
            content_version: collection.version.as_str().to_string(),
            dry_run: options.dry_run,
            replace_all: options.replace_all,
            stories_fetched,
            relevant_stories: relevant.len(),
            malformed_stories: collection.malformed,
            normalization: stats,
            record_stats,
            is_valid: requirements.is_valid,
            message: requirements.message.clone(),
            requirements,
            indexing,
            report_dir: paths.run_dir.display().to_string(),
            manifest_path: paths.manifest.display().to_string(),
        };
        report::write_run_report(&paths, &summary, &records)
            .await
            .context("writing run report")?;

        info!(
            duration_ms = summary.duration_ms,
            indexed = summary.indexing.indexed,
            report_dir = %summary.report_dir,
            "seed run finished"
        );
        Ok(summary)
    }
}

/// Loads a fixture file and normalizes its relevant stories without touching any index.
pub fn normalize_fixture(path: &Path) -> Result<NormalizedBatch> {
    let collection = brewbook_cms::load_stories_fixture(path)?;
    let relevant = filter_relevant_stories(collection.stories);
    Ok(RecordNormalizer::new().normalize_stories(&relevant))
}

pub async fn run_seed_from_env(options: &SeedOptions, fixture: Option<PathBuf>) -> Result<SeedRunSummary> {
    let config = SeedConfig::from_env()?;
    let pipeline = SeedPipeline::from_config(&config, fixture)?;
    pipeline.run_once(options).await
}

/// Scheduler that re-runs the seed on `cron` (six-field, seconds first).
pub async fn build_scheduler(pipeline: Arc<SeedPipeline>, cron: &str, options: SeedOptions) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let schedule = cron.to_string();
    let job = Job::new_async(&schedule, move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        let options = options.clone();
        Box::pin(async move {
            info!("scheduled seed run triggered");
            if let Ok(summary) = pipeline.run_once(&options).await {
                info!(run_id = %summary.run_id, valid = summary.is_valid, "scheduled seed run finished");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

pub async fn maybe_build_scheduler(config: &SeedConfig, pipeline: Arc<SeedPipeline>) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    build_scheduler(pipeline, &config.seed_cron, SeedOptions::default())
        .await
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brewbook_search::InMemoryIndexProvider;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    pub(crate) fn fixture_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures")
            .join("storyblok")
            .join("stories.json")
    }

    fn pipeline(reports_dir: &Path, min_cafes: usize) -> (SeedPipeline, Arc<InMemoryIndexProvider>) {
        let provider = Arc::new(InMemoryIndexProvider::new("brewbook_test"));
        let index = Arc::new(SearchIndexService::new(Box::new(provider.clone())));
        let settings = PipelineSettings {
            reports_dir: reports_dir.to_path_buf(),
            min_cafes,
            min_events: 3,
            search: SearchConfigFile::default(),
        };
        let source = Arc::new(FixtureStorySource::new(fixture_path()));
        (SeedPipeline::new(settings, source, index), provider)
    }

    #[test]
    fn requirement_messages() {
        let stats = RecordStats {
            total_records: 9,
            cafe_count: 7,
            event_count: 2,
            other_count: 0,
        };
        let check = validate_requirements(&stats, 10, 3);
        assert!(!check.is_valid);
        assert_eq!(
            check.message,
            "Requirements not met. Need 10 cafes (have 7) and 3 events (have 2)"
        );
        assert_eq!(validate_requirements(&stats, 5, 2).message, "All requirements met");
    }

    #[tokio::test]
    async fn seed_run_indexes_fixture_and_writes_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, provider) = pipeline(tmp.path(), 10);

        let summary = pipeline.run_once(&SeedOptions::default()).await.unwrap();
        assert!(summary.is_valid);
        assert_eq!(summary.message, "All requirements met");
        assert_eq!(summary.stories_fetched, 17);
        assert_eq!(summary.relevant_stories, 15);
        assert_eq!(summary.malformed_stories, 1);
        assert_eq!(summary.record_stats.cafe_count, 11);
        assert_eq!(summary.record_stats.event_count, 4);
        assert_eq!(summary.indexing.indexed, 15);
        assert_eq!(summary.indexing.created, 15);

        assert_eq!(provider.objects().await.len(), 15);
        assert_eq!(provider.synonyms().await.len(), 15);
        assert!(provider.settings().await.contains_key("searchableAttributes"));

        let paths = ReportPaths::for_run(tmp.path(), &summary.run_id.to_string());
        assert!(paths.summary.exists());
        assert!(std::fs::read_to_string(&paths.brief).unwrap().contains("Status: SUCCESS"));

        let manifest: ReportManifest =
            serde_json::from_slice(&std::fs::read(&paths.manifest).unwrap()).unwrap();
        assert_eq!(manifest.files.len(), 3);
        assert!(manifest.files.iter().all(|f| f.sha256.len() == 64 && f.bytes > 0));

        let reader = ParquetRecordBatchReaderBuilder::try_new(std::fs::File::open(&paths.snapshot).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|batch| batch.unwrap().num_rows()).sum();
        assert_eq!(rows, 15);
    }

    #[tokio::test]
    async fn second_run_updates_existing_records() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, provider) = pipeline(tmp.path(), 10);
        pipeline.run_once(&SeedOptions::default()).await.unwrap();

        let again = pipeline.run_once(&SeedOptions::default()).await.unwrap();
        assert_eq!(again.indexing.created, 0);
        assert_eq!(again.indexing.updated, 15);
        assert_eq!(provider.clear_count().await, 0);

        let replaced = pipeline
            .run_once(&SeedOptions {
                replace_all: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(replaced.indexing.created, 15);
        assert_eq!(provider.clear_count().await, 1);
    }

    #[tokio::test]
    async fn unmet_requirements_still_index_and_report() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, provider) = pipeline(tmp.path(), 20);

        let summary = pipeline.run_once(&SeedOptions::default()).await.unwrap();
        assert!(!summary.is_valid);
        assert_eq!(
            summary.message,
            "Requirements not met. Need 20 cafes (have 11) and 3 events (have 4)"
        );
        assert_eq!(provider.objects().await.len(), 15);

        let brief = std::fs::read_to_string(ReportPaths::for_run(tmp.path(), &summary.run_id.to_string()).brief)
            .unwrap();
        assert!(brief.contains("INCOMPLETE"));
    }

    #[tokio::test]
    async fn dry_run_leaves_index_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, provider) = pipeline(tmp.path(), 10);

        let summary = pipeline
            .run_once(&SeedOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.indexing, IndexingOutcome::default());
        assert!(provider.objects().await.is_empty());
        assert!(provider.settings().await.is_empty());
        assert!(provider.synonyms().await.is_empty());
    }

    #[tokio::test]
    async fn missing_fixture_fails_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = Arc::new(InMemoryIndexProvider::new("brewbook_test"));
        let index = Arc::new(SearchIndexService::new(Box::new(provider)));
        let settings = PipelineSettings {
            reports_dir: tmp.path().to_path_buf(),
            min_cafes: 1,
            min_events: 1,
            search: SearchConfigFile::default(),
        };
        let pipeline = SeedPipeline::new(
            settings,
            Arc::new(FixtureStorySource::new(tmp.path().join("missing.json"))),
            index,
        );
        let err = pipeline.run_once(&SeedOptions::default()).await.unwrap_err();
        assert!(format!("{err:#}").contains("fetching stories"));
    }

    #[tokio::test]
    async fn report_lists_latest_runs_first() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(tmp.path(), 10);
        let first = pipeline.run_once(&SeedOptions::default()).await.unwrap();
        let second = pipeline
            .run_once(&SeedOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let markdown = report_markdown(tmp.path(), 5).unwrap();
        let first_at = markdown.find(&first.run_id.to_string()).unwrap();
        let second_at = markdown.find(&second.run_id.to_string()).unwrap();
        assert!(second_at < first_at);

        let latest_only = report_markdown(tmp.path(), 1).unwrap();
        assert!(!latest_only.contains(&first.run_id.to_string()));
    }

    #[test]
    fn normalize_fixture_skips_irrelevant_stories() {
        let batch = normalize_fixture(&fixture_path()).unwrap();
        assert_eq!(batch.records.len(), 15);
        assert_eq!(batch.stats.errors, 0);
    }

    #[tokio::test]
    async fn scheduler_is_only_built_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(tmp.path(), 10);
        let pipeline = Arc::new(pipeline);

        let mut config = SeedConfig::from_lookup(|name| match name {
            "ALGOLIA_APPLICATION_ID" | "ALGOLIA_WRITE_API_KEY" | "STORYBLOK_TOKEN" => Some("x".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(maybe_build_scheduler(&config, Arc::clone(&pipeline))
            .await
            .unwrap()
            .is_none());

        config.scheduler_enabled = true;
        assert!(maybe_build_scheduler(&config, Arc::clone(&pipeline))
            .await
            .unwrap()
            .is_some());

        assert!(build_scheduler(pipeline, "not a cron", SeedOptions::default())
            .await
            .is_err());
    }
}
