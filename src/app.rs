use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{DebugTarget, RunConfig};
use crate::domain::{ExperimentId, Keyword, ResultRow};
use crate::entrez::ArchiveClient;
use crate::error::HarvestError;
use crate::geo::{GeoClient, LinkedRecordFetcher};
use crate::llm::{LlmClient, LlmGateway};
use crate::pipeline::Pipeline;
use crate::writer::CsvResultWriter;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub keywords_processed: usize,
    pub identifiers_found: usize,
    pub rows_written: usize,
    pub experiments_skipped: usize,
}

/// Drives the whole run: sequential keyword loop, bounded fan-out of
/// experiment pipelines, and a single writer task fed by a channel so file
/// writes are never interleaved.
pub struct App<A: ArchiveClient, G: GeoClient, C: LlmClient> {
    config: RunConfig,
    archive: A,
    fetcher: LinkedRecordFetcher<G>,
    gateway: LlmGateway<C>,
}

impl<A: ArchiveClient, G: GeoClient, C: LlmClient> App<A, G, C> {
    pub fn new(
        config: RunConfig,
        archive: A,
        fetcher: LinkedRecordFetcher<G>,
        gateway: LlmGateway<C>,
    ) -> Self {
        Self {
            config,
            archive,
            fetcher,
            gateway,
        }
    }

    /// Startup probe of the inference endpoint; a failure here aborts the
    /// run before any processing begins.
    pub fn startup_check(&self) -> Result<(), HarvestError> {
        self.gateway.health_check()
    }

    pub fn run(
        &self,
        keywords: &[Keyword],
        writer: CsvResultWriter,
    ) -> Result<RunSummary, HarvestError> {
        if let Some(target) = &self.config.debug {
            return self.run_single(target, writer);
        }

        let mut summary = RunSummary::default();
        let skipped = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<ResultRow>();
        let writer_thread = thread::spawn(move || {
            let mut writer = writer;
            let mut written = 0usize;
            for row in rx {
                match writer.append(&row) {
                    Ok(()) => written += 1,
                    Err(err) => error!("failed to write result row: {err}"),
                }
            }
            written
        });

        let mut processed: HashSet<ExperimentId> = HashSet::new();
        for keyword in keywords {
            summary.keywords_processed += 1;
            info!("searching archive for keyword '{keyword}'");
            let ids = match self.archive.search(keyword) {
                Ok(ids) => ids,
                Err(err) => {
                    error!("search failed for keyword '{keyword}': {err}");
                    continue;
                }
            };
            if ids.is_empty() {
                info!("no experiments found for keyword '{keyword}'; recording placeholder");
                let _ = tx.send(ResultRow::placeholder(keyword));
                continue;
            }

            let fresh: Vec<ExperimentId> = ids
                .into_iter()
                .filter(|id| processed.insert(id.clone()))
                .collect();
            summary.identifiers_found += fresh.len();
            if fresh.is_empty() {
                info!("all experiments for '{keyword}' already processed this run");
                continue;
            }
            info!(
                "processing {} experiments for keyword '{keyword}'",
                fresh.len()
            );

            let pipeline = Pipeline::new(&self.archive, &self.fetcher, &self.gateway);
            let width = self.config.workers.min(fresh.len()).max(1);
            let queue = Mutex::new(fresh.into_iter());
            thread::scope(|scope| {
                for _ in 0..width {
                    let tx = tx.clone();
                    let queue = &queue;
                    let pipeline = &pipeline;
                    let skipped = &skipped;
                    scope.spawn(move || loop {
                        let next = { queue.lock().ok().and_then(|mut iter| iter.next()) };
                        let Some(experiment) = next else {
                            break;
                        };
                        match pipeline.process(keyword, &experiment) {
                            Ok(row) => {
                                let _ = tx.send(row);
                            }
                            Err(err) => {
                                warn!("skipping {experiment}: {err}");
                                skipped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    });
                }
            });
        }

        drop(tx);
        summary.rows_written = writer_thread.join().unwrap_or(0);
        summary.experiments_skipped = skipped.load(Ordering::Relaxed);
        info!(
            "run complete: {} keywords, {} experiments found, {} rows written, {} skipped",
            summary.keywords_processed,
            summary.identifiers_found,
            summary.rows_written,
            summary.experiments_skipped
        );
        Ok(summary)
    }

    fn run_single(
        &self,
        target: &DebugTarget,
        mut writer: CsvResultWriter,
    ) -> Result<RunSummary, HarvestError> {
        info!(
            "debug mode: processing {} with keyword '{}'",
            target.experiment, target.keyword
        );
        let pipeline = Pipeline::new(&self.archive, &self.fetcher, &self.gateway);
        let row = pipeline.process(&target.keyword, &target.experiment)?;
        writer.append(&row)?;
        Ok(RunSummary {
            keywords_processed: 0,
            identifiers_found: 1,
            rows_written: 1,
            experiments_skipped: 0,
        })
    }
}
