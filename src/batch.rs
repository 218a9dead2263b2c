//! Batch harvesting from a repository list CSV.
//!
//! The CSV has the columns `name`, `URL_to_harvest`, `FAIRsharing ID` and
//! `remarks`. Each harvested repository is written to
//! `{output_dir}/{safe_name}.json` and the run is summarized in
//! `{output_dir}/_harvest_summary.json`.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::executor::HarvestExecutor;
use crate::export::Exporter;
use crate::store::GraphStore;
use crate::traits::HarvestTarget;

pub const SUMMARY_FILE: &str = "_harvest_summary.json";

// ============================================================================
// Input
// ============================================================================

/// One row of the repository list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchEntry {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "URL_to_harvest", default)]
    pub url: String,
    #[serde(rename = "FAIRsharing ID", default)]
    pub fairsharing_id: String,
    #[serde(default)]
    pub remarks: String,
}

impl BatchEntry {
    pub fn target(&self) -> HarvestTarget {
        HarvestTarget::new(self.url.clone()).with_fairsharing_id(Some(self.fairsharing_id.clone()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub limit: Option<usize>,
    /// Case-insensitive substring matched against name and URL
    pub filter: Option<String>,
    pub dry_run: bool,
    pub output_dir: PathBuf,
}

/// Reads entries from CSV, trimming cells and skipping rows without a URL.
///
/// # Errors
///
/// Returns [`BatchError::Csv`] if a row cannot be decoded.
pub fn read_entries<R: Read>(reader: R, origin: &str) -> Result<Vec<BatchEntry>, BatchError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut entries = Vec::new();
    for row in csv_reader.deserialize::<BatchEntry>() {
        let entry = row.map_err(|source| BatchError::Csv {
            path: origin.to_string(),
            source,
        })?;
        if !entry.url.is_empty() {
            entries.push(entry);
        }
    }
    Ok(entries)
}

pub fn load_entries(path: &Path) -> Result<Vec<BatchEntry>, BatchError> {
    let file = std::fs::File::open(path).map_err(|source| BatchError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_entries(file, &path.display().to_string())
}

/// Applies the filter, then the limit.
pub fn select(entries: Vec<BatchEntry>, options: &BatchOptions) -> Vec<BatchEntry> {
    let needle = options.filter.as_ref().map(|f| f.to_lowercase());
    let filtered = entries.into_iter().filter(|entry| match &needle {
        Some(needle) => {
            entry.name.to_lowercase().contains(needle.as_str())
                || entry.url.to_lowercase().contains(needle.as_str())
        }
        None => true,
    });
    match options.limit {
        Some(limit) => filtered.take(limit).collect(),
        None => filtered.collect(),
    }
}

/// Keeps alphanumerics, space, `-` and `_`; spaces become `_`.
pub fn safe_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let safe = kept.trim().replace(' ', "_");
    if safe.is_empty() {
        "unnamed_repo".to_string()
    } else {
        safe
    }
}

// ============================================================================
// Reporting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Success,
    Incomplete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub name: String,
    pub url: String,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub services: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total: usize,
    pub success_count: usize,
    pub incomplete_count: usize,
    pub failed_count: usize,
    pub entries: Vec<EntryReport>,
}

impl BatchSummary {
    fn count(entries: &[EntryReport], status: EntryStatus) -> usize {
        entries.iter().filter(|e| e.status == status).count()
    }
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to read CSV {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// Runner
// ============================================================================

/// Harvests every entry through a bounded [`HarvestExecutor`].
///
/// A failing entry is reported in the summary; the remaining entries still
/// run.
pub struct BatchRunner {
    executor: Arc<HarvestExecutor>,
    exporter: Exporter,
    store: Option<Arc<GraphStore>>,
}

impl BatchRunner {
    pub fn new(executor: Arc<HarvestExecutor>, exporter: Exporter) -> Self {
        Self {
            executor,
            exporter,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Option<Arc<GraphStore>>) -> Self {
        self.store = store;
        self
    }

    /// Harvests `entries` into `output_dir` and writes the run summary.
    ///
    /// # Errors
    ///
    /// Fails only if the output directory or the summary cannot be written.
    pub async fn run(
        &self,
        entries: Vec<BatchEntry>,
        output_dir: &Path,
    ) -> Result<BatchSummary, BatchError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| BatchError::Io {
                path: output_dir.display().to_string(),
                source,
            })?;

        let timestamp = Utc::now();
        let started = Instant::now();
        info!(total = entries.len(), output_dir = %output_dir.display(), "Starting batch harvest");

        let mut used = HashSet::new();
        let jobs: Vec<(BatchEntry, PathBuf)> = entries
            .into_iter()
            .map(|entry| {
                let file = unique_filename(&safe_filename(&entry.name), &mut used);
                (entry, output_dir.join(file))
            })
            .collect();

        let reports = join_all(
            jobs.into_iter()
                .map(|(entry, path)| self.harvest_entry(entry, path)),
        )
        .await;

        let summary = BatchSummary {
            timestamp,
            duration_seconds: started.elapsed().as_secs_f64(),
            total: reports.len(),
            success_count: BatchSummary::count(&reports, EntryStatus::Success),
            incomplete_count: BatchSummary::count(&reports, EntryStatus::Incomplete),
            failed_count: BatchSummary::count(&reports, EntryStatus::Failed),
            entries: reports,
        };

        let summary_path = output_dir.join(SUMMARY_FILE);
        let body = serde_json::to_string_pretty(&summary)?;
        tokio::fs::write(&summary_path, body)
            .await
            .map_err(|source| BatchError::Io {
                path: summary_path.display().to_string(),
                source,
            })?;

        info!(
            success = summary.success_count,
            incomplete = summary.incomplete_count,
            failed = summary.failed_count,
            duration_seconds = summary.duration_seconds,
            "Batch harvest completed"
        );
        Ok(summary)
    }

    async fn harvest_entry(&self, entry: BatchEntry, path: PathBuf) -> EntryReport {
        let mut report = EntryReport {
            name: entry.name.clone(),
            url: entry.url.clone(),
            status: EntryStatus::Failed,
            file: None,
            services: 0,
            missing_fields: Vec::new(),
            error: None,
        };

        let result = match self.executor.execute(entry.target()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(name = %entry.name, error = %e, "Harvest failed");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let document = self.exporter.export(&result.record);
        if let Some(store) = &self.store {
            store.spawn_persist(result);
        }

        let written = match serde_json::to_string_pretty(&document) {
            Ok(body) => tokio::fs::write(&path, body).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = written {
            warn!(name = %entry.name, path = %path.display(), error = %e, "Failed to write harvest output");
            report.error = Some(e);
            return report;
        }

        report.file = Some(path.display().to_string());
        report.services = document.services.len();
        report.status = if document.complete {
            EntryStatus::Success
        } else {
            EntryStatus::Incomplete
        };
        report.missing_fields = document.missing_fields;
        info!(name = %entry.name, status = ?report.status, services = report.services, "Saved harvest");
        report
    }
}

fn unique_filename(stem: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = format!("{}.json", stem);
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}_{}.json", stem, n);
        n += 1;
    }
    candidate
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::pipeline::HarvestOrchestrator;
    use crate::model::{Field, PartialRecord, SourceKind};
    use crate::traits::{MetadataSource, SourceFailure};
    use async_trait::async_trait;

    const CSV: &str = "\
name,URL_to_harvest,FAIRsharing ID,remarks
PANGAEA,https://pangaea.de, 10.25504/FAIRsharing.6yw6cp ,
No URL,,,skip me
Untitled Archive,https://untitled.example.org,,needs manual check
";

    // Titles every repository except the untitled one
    struct TitleSource;

    #[async_trait]
    impl MetadataSource for TitleSource {
        fn kind(&self) -> SourceKind {
            SourceKind::SelfHosted
        }

        async fn harvest(&self, target: &HarvestTarget) -> Result<PartialRecord, SourceFailure> {
            let mut partial = PartialRecord::new(SourceKind::SelfHosted);
            if target.url.contains("untitled") {
                partial.set_one(Field::Description, "Nothing but a description");
            } else {
                partial.set_one(Field::Title, "PANGAEA");
            }
            Ok(partial)
        }
    }

    fn runner() -> BatchRunner {
        let orchestrator = Arc::new(HarvestOrchestrator::new(vec![
            Arc::new(TitleSource) as Arc<dyn MetadataSource>
        ]));
        BatchRunner::new(Arc::new(HarvestExecutor::new(orchestrator, 2)), Exporter::default())
    }

    #[test]
    fn test_read_entries_skips_rows_without_url() {
        let entries = read_entries(CSV.as_bytes(), "inline").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].fairsharing_id, "10.25504/FAIRsharing.6yw6cp");
        assert_eq!(
            entries[0].target().fairsharing_id.as_deref(),
            Some("10.25504/FAIRsharing.6yw6cp")
        );
        assert!(entries[1].target().fairsharing_id.is_none());
        assert_eq!(entries[1].remarks, "needs manual check");
    }

    #[test]
    fn test_select_filters_then_limits() {
        let entries = read_entries(CSV.as_bytes(), "inline").unwrap();
        let options = BatchOptions {
            filter: Some("PANGAEA.de".into()),
            ..Default::default()
        };
        assert_eq!(select(entries.clone(), &options).len(), 1);

        let options = BatchOptions {
            limit: Some(1),
            ..Default::default()
        };
        let selected = select(entries, &options);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "PANGAEA");
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("World Data Center / PANGAEA"), "World_Data_Center__PANGAEA");
        assert_eq!(safe_filename("re3data-mirror_v2"), "re3data-mirror_v2");
        assert_eq!(safe_filename(" ?! "), "unnamed_repo");
    }

    #[test]
    fn test_unique_filename_suffixes_duplicates() {
        let mut used = HashSet::new();
        assert_eq!(unique_filename("repo", &mut used), "repo.json");
        assert_eq!(unique_filename("repo", &mut used), "repo_2.json");
    }

    #[tokio::test]
    async fn test_run_writes_outputs_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output");
        let entries = read_entries(CSV.as_bytes(), "inline").unwrap();

        let summary = runner().run(entries, &out).await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.incomplete_count, 1);
        assert_eq!(summary.failed_count, 0);
        assert_eq!(summary.entries[1].missing_fields, vec!["title".to_string()]);

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("PANGAEA.json")).unwrap())
                .unwrap();
        assert_eq!(saved["repoURI"], "https://pangaea.de");
        assert_eq!(saved["complete"], true);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join(SUMMARY_FILE)).unwrap())
                .unwrap();
        assert_eq!(written["incomplete_count"], 1);
        assert_eq!(written["entries"][1]["status"], "incomplete");
    }
}
