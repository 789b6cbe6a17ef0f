//! Run reports: JSON summary, Markdown brief, Parquet snapshot and manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use brewbook_core::SearchRecord;
use brewbook_storage::ArtifactStore;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::SeedRunSummary;

pub const SUMMARY_FILE: &str = "seed_summary.json";
pub const BRIEF_FILE: &str = "seed_brief.md";
pub const SNAPSHOT_FILE: &str = "records.parquet";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Where a run's report files live.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub run_dir: PathBuf,
    pub summary: PathBuf,
    pub brief: PathBuf,
    pub snapshot: PathBuf,
    pub manifest: PathBuf,
}

impl ReportPaths {
    pub fn for_run(reports_dir: &Path, run_id: &str) -> Self {
        let run_dir = reports_dir.join(run_id);
        let snapshots = run_dir.join("snapshots");
        Self {
            summary: run_dir.join(SUMMARY_FILE),
            brief: run_dir.join(BRIEF_FILE),
            snapshot: snapshots.join(SNAPSHOT_FILE),
            manifest: snapshots.join(MANIFEST_FILE),
            run_dir,
        }
    }
}

pub fn seed_brief(summary: &SeedRunSummary) -> String {
    let status = if summary.is_valid { "SUCCESS" } else { "INCOMPLETE" };
    let mut lines = vec![
        "# Brewbook Seed Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Duration: {} ms", summary.duration_ms),
        format!("- Source: {} ({})", summary.source, summary.content_version),
        format!("- Status: {status}"),
        format!("- Message: {}", summary.message),
        String::new(),
        "## Content".to_string(),
        format!("- Stories fetched: {}", summary.stories_fetched),
        format!("- Relevant stories: {}", summary.relevant_stories),
        format!("- Cafes: {}", summary.record_stats.cafe_count),
        format!("- Events: {}", summary.record_stats.event_count),
        format!(
            "- Normalization: {} processed, {} skipped, {} errors",
            summary.normalization.processed, summary.normalization.skipped, summary.normalization.errors
        ),
        String::new(),
        "## Indexing".to_string(),
    ];
    if summary.dry_run {
        lines.push("- Dry run: index untouched".to_string());
    } else {
        lines.push(format!("- Indexed: {}", summary.indexing.indexed));
        lines.push(format!("- Created: {}", summary.indexing.created));
        lines.push(format!("- Updated: {}", summary.indexing.updated));
        lines.push(format!("- Skipped: {}", summary.indexing.skipped));
        lines.push(format!("- Replace all: {}", summary.replace_all));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Writes every report file for one run and returns the manifest.
pub async fn write_run_report(
    paths: &ReportPaths,
    summary: &SeedRunSummary,
    records: &[SearchRecord],
) -> Result<ReportManifest> {
    let snapshot_dir = paths
        .snapshot
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths.run_dir.clone());
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    write_records_parquet(&paths.snapshot, records)?;

    fs::write(&paths.brief, seed_brief(summary))
        .await
        .with_context(|| format!("writing {}", paths.brief.display()))?;

    let summary_json = serde_json::to_vec_pretty(summary).context("serializing seed summary")?;
    fs::write(&paths.summary, summary_json)
        .await
        .with_context(|| format!("writing {}", paths.summary.display()))?;

    let manifest = ReportManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("seed_summary", &paths.run_dir, &paths.summary).await?,
            manifest_entry("seed_brief", &paths.run_dir, &paths.brief).await?,
            manifest_entry("records", &paths.run_dir, &paths.snapshot).await?,
        ],
    };
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    fs::write(&paths.manifest, bytes)
        .await
        .with_context(|| format!("writing {}", paths.manifest.display()))?;
    Ok(manifest)
}

async fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<ReportManifestFile> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let rel = path.strip_prefix(run_dir).unwrap_or(path).display().to_string();
    Ok(ReportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: ArtifactStore::sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = parquet::arrow::ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_records_parquet(path: &Path, records: &[SearchRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("object_id", DataType::Utf8, false),
        ArrowField::new("story_id", DataType::UInt64, false),
        ArrowField::new("type", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("slug", DataType::Utf8, false),
        ArrowField::new("location", DataType::Utf8, false),
        ArrowField::new("city", DataType::Utf8, true),
        ArrowField::new("tags", DataType::Utf8, false),
        ArrowField::new("rating", DataType::Float64, true),
        ArrowField::new("wifi", DataType::Boolean, true),
        ArrowField::new("power_outlets", DataType::Boolean, true),
        ArrowField::new("noise_level", DataType::Utf8, true),
        ArrowField::new("price_range", DataType::Utf8, true),
        ArrowField::new("lat", DataType::Float64, true),
        ArrowField::new("lng", DataType::Float64, true),
        ArrowField::new("published_at_timestamp", DataType::Int64, true),
    ]));

    let strings = |f: fn(&SearchRecord) -> &str| StringArray::from(records.iter().map(f).collect::<Vec<_>>());
    let optional = |f: fn(&SearchRecord) -> Option<&str>| StringArray::from(records.iter().map(f).collect::<Vec<_>>());

    let tags = StringArray::from(records.iter().map(|r| r.tags.join(", ")).collect::<Vec<_>>());
    let story_ids = UInt64Array::from(records.iter().map(|r| r.story_id).collect::<Vec<_>>());
    let ratings = Float64Array::from(records.iter().map(|r| r.rating).collect::<Vec<_>>());
    let wifi = BooleanArray::from(records.iter().map(|r| r.wifi).collect::<Vec<_>>());
    let power = BooleanArray::from(records.iter().map(|r| r.power_outlets).collect::<Vec<_>>());
    let lat = Float64Array::from(records.iter().map(|r| r.geoloc.map(|g| g.lat)).collect::<Vec<_>>());
    let lng = Float64Array::from(records.iter().map(|r| r.geoloc.map(|g| g.lng)).collect::<Vec<_>>());
    let published = Int64Array::from(records.iter().map(|r| r.published_at_timestamp).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(strings(|r| r.object_id.as_str())),
            Arc::new(story_ids),
            Arc::new(strings(|r| r.record_type.as_str())),
            Arc::new(strings(|r| r.title.as_str())),
            Arc::new(strings(|r| r.slug.as_str())),
            Arc::new(strings(|r| r.location.as_str())),
            Arc::new(optional(|r| r.city.as_deref())),
            Arc::new(tags),
            Arc::new(ratings),
            Arc::new(wifi),
            Arc::new(power),
            Arc::new(optional(|r| r.noise_level.as_deref())),
            Arc::new(optional(|r| r.price_range.as_deref())),
            Arc::new(lat),
            Arc::new(lng),
            Arc::new(published),
        ],
    )
    .context("building records batch")?;
    write_parquet(path, batch)
}

/// Markdown overview of the most recent `runs` seed runs under `reports_dir`.
pub fn report_markdown(reports_dir: &Path, runs: usize) -> Result<String> {
    let entries = std::fs::read_dir(reports_dir)
        .with_context(|| format!("reading {}", reports_dir.display()))?;

    let mut summaries = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let summary_path = entry.path().join(SUMMARY_FILE);
        if !summary_path.is_file() {
            continue;
        }
        let raw = std::fs::read_to_string(&summary_path)
            .with_context(|| format!("reading {}", summary_path.display()))?;
        let summary: SeedRunSummary =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", summary_path.display()))?;
        summaries.push((summary, entry.path()));
    }
    summaries.sort_by(|a, b| b.0.started_at.cmp(&a.0.started_at));

    let mut lines = vec!["# Brewbook Seed Report".to_string(), String::new()];
    if summaries.is_empty() {
        lines.push("No seed runs recorded yet.".to_string());
    }
    for (summary, dir) in summaries.into_iter().take(runs.max(1)) {
        lines.push(format!("## Run `{}`", summary.run_id));
        lines.push(format!("- started: {}", summary.started_at));
        lines.push(format!(
            "- status: {}",
            if summary.is_valid { "SUCCESS" } else { "INCOMPLETE" }
        ));
        lines.push(format!(
            "- cafes: {}, events: {}",
            summary.record_stats.cafe_count, summary.record_stats.event_count
        ));
        lines.push(format!(
            "- indexed: {} (created {}, updated {}, skipped {})",
            summary.indexing.indexed, summary.indexing.created, summary.indexing.updated, summary.indexing.skipped
        ));
        lines.push(format!("- message: {}", summary.message));
        let manifest = dir.join("snapshots").join(MANIFEST_FILE);
        if manifest.exists() {
            lines.push(format!("- manifest: `{}`", manifest.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}
