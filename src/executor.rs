use crate::harvest::pipeline::{HarvestOrchestrator, HarvestResult};
use crate::traits::HarvestTarget;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Executor closed: {0}")]
    Closed(String),
}

/// Runs harvests with at most `concurrency_limit` in flight.
pub struct HarvestExecutor {
    orchestrator: Arc<HarvestOrchestrator>,
    semaphore: Arc<Semaphore>,
}

impl HarvestExecutor {
    pub fn new(orchestrator: Arc<HarvestOrchestrator>, concurrency_limit: usize) -> Self {
        Self {
            orchestrator,
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    #[instrument(skip(self, target), fields(url = %target.url))]
    pub async fn execute(&self, target: HarvestTarget) -> Result<HarvestResult, ExecutorError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ExecutorError::Closed(format!("Semaphore error: {}", e)))?;

        info!("Starting harvest");
        let result = self.orchestrator.harvest_with_hints(target).await;
        info!(
            duration_ms = result.stats.total_duration_ms,
            fields = result.stats.fields_populated,
            "Finished harvest"
        );
        Ok(result)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, PartialRecord, SourceKind};
    use crate::traits::{MetadataSource, SourceFailure};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSource for SlowSource {
        fn kind(&self) -> SourceKind {
            SourceKind::SelfHosted
        }

        async fn harvest(&self, target: &HarvestTarget) -> Result<PartialRecord, SourceFailure> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut partial = PartialRecord::new(SourceKind::SelfHosted);
            partial.set_one(Field::Title, target.url.clone());
            Ok(partial)
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let source = Arc::new(SlowSource {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let orchestrator = Arc::new(HarvestOrchestrator::new(vec![source.clone() as Arc<dyn MetadataSource>]));
        let executor = HarvestExecutor::new(orchestrator, 2);

        let runs = (0..6).map(|i| executor.execute(HarvestTarget::new(format!("https://r{}.org", i))));
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(executor.available_permits(), 2);
    }
}
