//! Periodic ingestion with a single in-flight run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::guard::RunGuard;
use super::pipeline::{IngestPipeline, RunSummary};
use crate::config::IngestionConfig;
use crate::error::{Error, Result};

#[derive(Debug)]
pub enum PollOutcome {
    Completed(RunSummary),
    /// Another run was in flight; nothing was queued.
    Skipped,
}

pub struct Poller {
    pipeline: Arc<IngestPipeline>,
    input_dir: PathBuf,
    state_file: PathBuf,
    lock_file: PathBuf,
    interval: Duration,
    in_flight: Mutex<()>,
}

impl Poller {
    pub fn new(pipeline: Arc<IngestPipeline>, config: &IngestionConfig) -> Self {
        Self {
            pipeline,
            input_dir: config.input_dir.clone(),
            state_file: config.state_file.clone(),
            lock_file: config.lock_file.clone(),
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = dir.into();
        self
    }

    /// Run once now, unless a run is already in progress in this process
    /// or another one.
    pub async fn trigger(&self) -> Result<PollOutcome> {
        let Ok(_running) = self.in_flight.try_lock() else {
            info!("Ingestion already running, trigger skipped");
            return Ok(PollOutcome::Skipped);
        };

        let _guard = match RunGuard::acquire(&self.lock_file) {
            Ok(guard) => guard,
            Err(Error::RunInProgress(path)) => {
                info!(lock = %path, "Run lock held elsewhere, trigger skipped");
                return Ok(PollOutcome::Skipped);
            }
            Err(err) => return Err(err),
        };

        let summary = self
            .pipeline
            .run_dir(&self.input_dir, &self.state_file, false)
            .await?;
        Ok(PollOutcome::Completed(summary))
    }

    /// Tick forever. A failed run is logged and the next tick proceeds.
    pub async fn run(&self) -> Result<()> {
        info!(
            dir = %self.input_dir.display(),
            interval_secs = self.interval.as_secs(),
            "🚀 Starting ingestion poller"
        );

        loop {
            match self.trigger().await {
                Ok(PollOutcome::Completed(summary)) if !summary.is_clean() => warn!(
                    incomplete = summary.incomplete.len(),
                    failed = summary.failed.len(),
                    "Poll run finished with failures"
                ),
                Ok(_) => {}
                Err(err) => error!(error = %err, "Poll run failed"),
            }

            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoaderConfig, SegmentationConfig};
    use crate::extraction::{Extractor, HeuristicProvider, InMemoryEntityStore};
    use crate::graph::{GraphLoader, GraphSink, MemoryGraph};
    use crate::segmentation::Segmenter;
    use tempfile::tempdir;

    fn poller(root: &std::path::Path) -> Poller {
        let loader = GraphLoader::new(
            vec![Arc::new(MemoryGraph::new()) as Arc<dyn GraphSink>],
            &LoaderConfig::default(),
        );
        let extractor = Extractor::new(
            Arc::new(HeuristicProvider::new()),
            Arc::new(InMemoryEntityStore::new()),
            2,
        );
        let pipeline = IngestPipeline::new(
            Segmenter::new(&SegmentationConfig::default()),
            extractor,
            loader,
        );
        let config = IngestionConfig {
            input_dir: root.join("sources"),
            state_file: root.join("state.json"),
            lock_file: root.join("ingest.lock"),
            poll_interval_secs: 1,
        };
        std::fs::create_dir_all(&config.input_dir).unwrap();
        std::fs::write(config.input_dir.join("notes.txt"), "Notes on pricing.").unwrap();
        Poller::new(Arc::new(pipeline), &config)
    }

    #[tokio::test]
    async fn trigger_runs_ingestion() {
        let dir = tempdir().unwrap();
        let poller = poller(dir.path());
        match poller.trigger().await.unwrap() {
            PollOutcome::Completed(summary) => assert_eq!(summary.ingested.len(), 1),
            PollOutcome::Skipped => panic!("expected a run"),
        }
        assert!(dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn trigger_while_in_flight_is_skipped() {
        let dir = tempdir().unwrap();
        let poller = poller(dir.path());
        let _held = poller.in_flight.lock().await;
        assert!(matches!(poller.trigger().await.unwrap(), PollOutcome::Skipped));
    }

    #[tokio::test]
    async fn trigger_skips_when_lock_file_held() {
        let dir = tempdir().unwrap();
        let poller = poller(dir.path());
        let _other = RunGuard::acquire(&dir.path().join("ingest.lock")).unwrap();
        assert!(matches!(poller.trigger().await.unwrap(), PollOutcome::Skipped));
    }
}
