use tracing::{debug, info};

use crate::domain::{ExperimentId, Keyword, ResultRow};
use crate::entrez::ArchiveClient;
use crate::error::HarvestError;
use crate::geo::{GeoClient, LinkedRecordFetcher};
use crate::llm::{LlmClient, LlmGateway, SynthesisRequest};

/// Per-experiment pipeline: XML fetch, accession extraction, linked-record
/// fetch, metadata synthesis, row construction. The XML fetch is the only
/// stage that can fail the experiment; everything after it degrades to
/// sentinel values.
pub struct Pipeline<'a, A: ArchiveClient, G: GeoClient, C: LlmClient> {
    archive: &'a A,
    fetcher: &'a LinkedRecordFetcher<G>,
    gateway: &'a LlmGateway<C>,
}

impl<'a, A: ArchiveClient, G: GeoClient, C: LlmClient> Pipeline<'a, A, G, C> {
    pub fn new(
        archive: &'a A,
        fetcher: &'a LinkedRecordFetcher<G>,
        gateway: &'a LlmGateway<C>,
    ) -> Self {
        Self {
            archive,
            fetcher,
            gateway,
        }
    }

    pub fn process(
        &self,
        keyword: &Keyword,
        experiment: &ExperimentId,
    ) -> Result<ResultRow, HarvestError> {
        debug!("fetching SRA XML for {experiment}");
        let xml = self.archive.fetch_experiment_xml(experiment)?;

        let accessions = self.gateway.extract_accessions(&xml, experiment);

        // Always runs; an empty pair short-circuits inside the fetcher.
        let linked = self.fetcher.fetch(&accessions);
        debug!(
            "linked record for {experiment}: {}",
            if linked.is_some() { "present" } else { "absent" }
        );

        let request = SynthesisRequest {
            experiment,
            keyword,
            xml: &xml,
            accessions: &accessions,
            linked: linked.as_ref(),
        };
        let metadata = self.gateway.synthesize(&request);

        info!("row ready for {experiment} (keyword '{keyword}')");
        Ok(ResultRow::for_experiment(
            keyword,
            experiment,
            &accessions,
            metadata,
        ))
    }
}
