//! Harvest orchestration.
//!
//! This module provides the [`HarvestOrchestrator`] that runs every metadata
//! source for one repository and merges their partial records with:
//! - Async execution via `tokio`, concurrent or sequential
//! - A timeout per source call
//! - Structured logging via `tracing`
//! - Precedence-ordered merging via [`SourcePrecedence`]

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::harvest::merge::{merge_partials, SourcePrecedence};
use crate::model::{PartialRecord, RepositoryRecord, SourceKind};
use crate::traits::{HarvestTarget, MetadataSource, SourceFailure};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Stages of one harvest, in order. `ExportReady` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarvestState {
    Init,
    SelfHosted,
    RegistryLookup,
    Merge,
    ExportReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// What one source contributed to a harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutcome {
    pub source: SourceKind,
    pub status: OutcomeStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Statistics about the harvest operation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestStats {
    /// Total time spent on the entire harvest (milliseconds)
    pub total_duration_ms: u64,

    /// Sources that returned a partial record
    pub sources_succeeded: usize,

    /// Sources that failed or timed out
    pub sources_failed: usize,

    /// Metadata fields with a non-empty merged value
    pub fields_populated: usize,

    /// Services after de-duplication
    pub services_found: usize,
}

/// Complete harvest result: the merged record plus what produced it.
#[derive(Debug, Clone)]
pub struct HarvestResult {
    pub record: RepositoryRecord,

    /// Non-empty partial records, in precedence order
    pub partials: Vec<PartialRecord>,

    pub outcomes: Vec<SourceOutcome>,

    pub stats: HarvestStats,

    pub state: HarvestState,

    /// Every stage entered, in order, starting with `Init`
    pub stages: Vec<HarvestState>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs the self-hosted extractor and the registry harvesters for one
/// repository and merges their output.
///
/// A harvest never fails: a source that errors or times out contributes an
/// empty partial and is reported in [`HarvestResult::outcomes`].
///
/// # Thread Safety
///
/// The orchestrator is `Send + Sync` and is shared by concurrent harvests.
/// Each harvest owns its accumulator.
pub struct HarvestOrchestrator {
    sources: Vec<Arc<dyn MetadataSource>>,

    precedence: SourcePrecedence,

    /// Budget for each source call (default: 30 seconds)
    source_timeout: Duration,

    /// Whether sources run concurrently (default: true)
    concurrent: bool,
}

impl HarvestOrchestrator {
    pub fn new(sources: Vec<Arc<dyn MetadataSource>>) -> Self {
        Self {
            sources,
            precedence: SourcePrecedence::default(),
            source_timeout: Duration::from_secs(30),
            concurrent: true,
        }
    }

    pub fn with_precedence(mut self, precedence: SourcePrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Sets the timeout applied to each source call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn precedence(&self) -> &SourcePrecedence {
        &self.precedence
    }

    /// Harvests and merges metadata for `url`.
    pub async fn harvest(&self, url: &str) -> HarvestResult {
        self.harvest_with_hints(HarvestTarget::new(url)).await
    }

    /// Harvests with registry identifiers already known to the caller.
    #[instrument(skip(self, target), fields(url = %target.url))]
    pub async fn harvest_with_hints(&self, target: HarvestTarget) -> HarvestResult {
        let start = Instant::now();
        let mut stages = vec![HarvestState::Init];
        debug!(state = ?HarvestState::Init, sources = self.sources.len(), "Starting harvest");

        let mut ordered: Vec<&Arc<dyn MetadataSource>> = self.sources.iter().collect();
        ordered.sort_by_key(|source| self.precedence.rank_of(source.kind()));

        let results: Vec<(PartialRecord, SourceOutcome)> = if self.concurrent {
            // Both stages run at once; record them in pipeline order.
            for stage in [HarvestState::SelfHosted, HarvestState::RegistryLookup] {
                if ordered.iter().any(|source| stage_of(source.kind()) == stage) {
                    enter(&mut stages, stage);
                }
            }
            debug!(?stages, "Running all sources concurrently");
            join_all(ordered.iter().map(|source| self.run_source(source, &target))).await
        } else {
            let mut results = Vec::with_capacity(ordered.len());
            for source in &ordered {
                enter(&mut stages, stage_of(source.kind()));
                results.push(self.run_source(source, &target).await);
            }
            results
        };

        enter(&mut stages, HarvestState::Merge);
        let (partials, outcomes): (Vec<PartialRecord>, Vec<SourceOutcome>) =
            results.into_iter().unzip();
        let partials: Vec<PartialRecord> = partials.into_iter().filter(|p| !p.is_empty()).collect();
        let record = merge_partials(&target.url, partials.clone(), &self.precedence, Utc::now());

        let stats = HarvestStats {
            total_duration_ms: start.elapsed().as_millis() as u64,
            sources_succeeded: outcomes
                .iter()
                .filter(|o| o.status == OutcomeStatus::Success)
                .count(),
            sources_failed: outcomes
                .iter()
                .filter(|o| o.status == OutcomeStatus::Failed)
                .count(),
            fields_populated: record.metadata.values().filter(|v| !v.is_empty()).count(),
            services_found: record.services.len(),
        };

        enter(&mut stages, HarvestState::ExportReady);
        info!(
            duration_ms = stats.total_duration_ms,
            succeeded = stats.sources_succeeded,
            failed = stats.sources_failed,
            fields = stats.fields_populated,
            services = stats.services_found,
            "Harvest completed"
        );

        HarvestResult {
            record,
            partials,
            outcomes,
            stats,
            state: HarvestState::ExportReady,
            stages,
        }
    }

    /// Runs one source under the per-source timeout. Failures become an
    /// empty partial plus a failed outcome.
    async fn run_source(
        &self,
        source: &Arc<dyn MetadataSource>,
        target: &HarvestTarget,
    ) -> (PartialRecord, SourceOutcome) {
        let kind = source.kind();
        let started = Instant::now();

        let result = match timeout(self.source_timeout, source.harvest(target)).await {
            Ok(result) => result,
            Err(_) => Err(SourceFailure::Timeout(self.source_timeout.as_secs())),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(mut partial) => {
                partial.source = kind;
                info!(source = %kind, duration_ms, fields = partial.metadata.len(), "Source harvested");
                let outcome = SourceOutcome {
                    source: kind,
                    status: OutcomeStatus::Success,
                    duration_ms,
                    failure_class: None,
                    message: None,
                };
                (partial, outcome)
            }
            Err(failure) => {
                if matches!(failure, SourceFailure::Empty(_)) {
                    info!(source = %kind, duration_ms, reason = %failure, "Source has no record");
                } else {
                    warn!(
                        source = %kind,
                        duration_ms,
                        class = failure.class(),
                        error = %failure,
                        "Source failed, continuing without it"
                    );
                }
                let outcome = SourceOutcome {
                    source: kind,
                    status: OutcomeStatus::Failed,
                    duration_ms,
                    failure_class: Some(failure.class()),
                    message: Some(failure.to_string()),
                };
                (PartialRecord::new(kind), outcome)
            }
        }
    }
}

fn stage_of(kind: SourceKind) -> HarvestState {
    if kind == SourceKind::SelfHosted {
        HarvestState::SelfHosted
    } else {
        HarvestState::RegistryLookup
    }
}

/// Records `stage` unless it is already the current one.
fn enter(stages: &mut Vec<HarvestState>, stage: HarvestState) {
    if stages.last() != Some(&stage) {
        debug!(state = ?stage, "Entering stage");
        stages.push(stage);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, FieldValue};
    use async_trait::async_trait;

    // Source returning a fixed result after an optional delay
    struct StaticSource {
        kind: SourceKind,
        result: Result<PartialRecord, SourceFailure>,
        delay: Duration,
    }

    impl StaticSource {
        fn titled(kind: SourceKind, title: &str) -> Arc<dyn MetadataSource> {
            let mut partial = PartialRecord::new(kind);
            partial.set_one(Field::Title, title);
            partial.set(Field::Keywords, vec![format!("{} keyword", kind)]);
            Arc::new(Self {
                kind,
                result: Ok(partial),
                delay: Duration::ZERO,
            })
        }

        fn failing(kind: SourceKind, failure: SourceFailure) -> Arc<dyn MetadataSource> {
            Arc::new(Self {
                kind,
                result: Err(failure),
                delay: Duration::ZERO,
            })
        }

        fn slow(kind: SourceKind, delay: Duration) -> Arc<dyn MetadataSource> {
            Arc::new(Self {
                kind,
                result: Ok(PartialRecord::new(kind)),
                delay,
            })
        }
    }

    #[async_trait]
    impl MetadataSource for StaticSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn harvest(&self, _target: &HarvestTarget) -> Result<PartialRecord, SourceFailure> {
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    fn three_titles() -> Vec<Arc<dyn MetadataSource>> {
        vec![
            StaticSource::titled(SourceKind::FairSharing, "FAIRsharing title"),
            StaticSource::titled(SourceKind::Re3Data, "re3data title"),
            StaticSource::titled(SourceKind::SelfHosted, "Self-hosted title"),
        ]
    }

    #[tokio::test]
    async fn test_self_hosted_value_wins() {
        let orchestrator = HarvestOrchestrator::new(three_titles());
        let result = orchestrator.harvest("https://example.org").await;

        assert_eq!(result.state, HarvestState::ExportReady);
        assert_eq!(result.record.title(), Some("Self-hosted title"));
        assert_eq!(result.record.provenance["title"].source, SourceKind::SelfHosted);
        assert_eq!(result.stats.sources_succeeded, 3);
        assert_eq!(result.partials.len(), 3);
    }

    #[tokio::test]
    async fn test_sequential_and_concurrent_merge_identically() {
        let concurrent = HarvestOrchestrator::new(three_titles())
            .harvest("https://example.org")
            .await;
        let sequential = HarvestOrchestrator::new(three_titles())
            .with_concurrency(false)
            .harvest("https://example.org")
            .await;

        assert_eq!(concurrent.record.metadata, sequential.record.metadata);
        assert_eq!(
            concurrent.record.get(Field::Keywords),
            Some(&FieldValue::Many(vec![
                "self-hosted keyword".into(),
                "re3data keyword".into(),
                "fairsharing keyword".into()
            ]))
        );
    }

    #[tokio::test]
    async fn test_both_modes_pass_through_every_stage() {
        let expected = vec![
            HarvestState::Init,
            HarvestState::SelfHosted,
            HarvestState::RegistryLookup,
            HarvestState::Merge,
            HarvestState::ExportReady,
        ];
        for concurrent in [true, false] {
            let result = HarvestOrchestrator::new(three_titles())
                .with_concurrency(concurrent)
                .harvest("https://example.org")
                .await;
            assert_eq!(result.stages, expected, "concurrent = {}", concurrent);
        }
    }

    #[tokio::test]
    async fn test_custom_precedence_changes_winner() {
        let orchestrator = HarvestOrchestrator::new(three_titles())
            .with_precedence("re3data".parse().unwrap());
        let result = orchestrator.harvest("https://example.org").await;
        assert_eq!(result.record.title(), Some("re3data title"));
    }

    #[tokio::test]
    async fn test_failures_degrade_to_empty_partials() {
        let orchestrator = HarvestOrchestrator::new(vec![
            StaticSource::titled(SourceKind::SelfHosted, "Only title"),
            StaticSource::failing(SourceKind::Re3Data, SourceFailure::Empty("none".into())),
            StaticSource::failing(SourceKind::FairSharing, SourceFailure::Auth("rejected".into())),
        ]);
        let result = orchestrator.harvest("https://example.org").await;

        assert_eq!(result.record.title(), Some("Only title"));
        assert_eq!(result.stats.sources_failed, 2);
        let classes: Vec<_> = result.outcomes.iter().filter_map(|o| o.failure_class).collect();
        assert_eq!(classes, vec!["source-empty", "auth-failure"]);
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let orchestrator = HarvestOrchestrator::new(vec![
            StaticSource::titled(SourceKind::SelfHosted, "Still here"),
            StaticSource::slow(SourceKind::FairSharing, Duration::from_secs(5)),
        ])
        .with_timeout(Duration::from_millis(50));

        let result = orchestrator.harvest("https://example.org").await;
        assert_eq!(result.record.title(), Some("Still here"));
        let fairsharing = result
            .outcomes
            .iter()
            .find(|o| o.source == SourceKind::FairSharing)
            .unwrap();
        assert_eq!(fairsharing.failure_class, Some("timeout"));
    }

    #[tokio::test]
    async fn test_repeated_harvests_are_identical() {
        let orchestrator = HarvestOrchestrator::new(three_titles());
        let first = orchestrator.harvest("https://example.org").await;
        let second = orchestrator.harvest("https://example.org").await;
        assert_eq!(first.record.metadata, second.record.metadata);
        assert_eq!(first.record.repo_uri(), "https://example.org");
    }
}
