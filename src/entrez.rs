use std::collections::HashSet;
use std::fs;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::{ExperimentId, Keyword};
use crate::error::HarvestError;

const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 500;
const SEARCH_RETMAX: usize = 100_000;
// E-utils caps GET identifier lists; larger searches are fetched in batches.
const EFETCH_BATCH: usize = 200;

pub trait ArchiveClient: Send + Sync {
    /// Keyword search returning experiment accessions, deduplicated and
    /// order-preserving. An empty result is not an error.
    fn search(&self, keyword: &Keyword) -> Result<Vec<ExperimentId>, HarvestError>;
    /// Retrieves the raw XML record for one experiment.
    fn fetch_experiment_xml(&self, id: &ExperimentId) -> Result<String, HarvestError>;
}

#[derive(Clone)]
pub struct EntrezHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    save_xml_dir: Option<Utf8PathBuf>,
}

impl EntrezHttpClient {
    pub fn new(save_xml_dir: Option<Utf8PathBuf>) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sra-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::EntrezHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| HarvestError::EntrezHttp(err.to_string()))?;

        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            base_url: EUTILS_BASE_URL.to_string(),
            api_key,
            save_xml_dir,
        })
    }

    fn get_with_retries(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<String, HarvestError> {
        let url = format!("{}/{path}", self.base_url);
        let mut attempt = 0usize;
        loop {
            let mut request = self.client.get(&url).query(&query);
            if let Some(key) = &self.api_key {
                request = request.query(&[("api_key", key.as_str())]);
            }
            match request.send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        return response
                            .text()
                            .map_err(|err| HarvestError::EntrezHttp(err.to_string()));
                    }
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    let message = response
                        .text()
                        .unwrap_or_else(|_| "Entrez request failed".to_string());
                    return Err(HarvestError::EntrezStatus { status, message });
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(HarvestError::EntrezHttp(err.to_string()));
                }
            }
        }
    }
}

impl ArchiveClient for EntrezHttpClient {
    fn search(&self, keyword: &Keyword) -> Result<Vec<ExperimentId>, HarvestError> {
        let term = format!("{}[All Fields]", keyword.as_str());
        let body = self.get_with_retries(
            "esearch.fcgi",
            &[
                ("db", "sra".to_string()),
                ("term", term),
                ("retmode", "json".to_string()),
                ("retmax", SEARCH_RETMAX.to_string()),
            ],
        )?;
        let envelope: EsearchEnvelope = serde_json::from_str(&body)
            .map_err(|err| HarvestError::EntrezHttp(format!("esearch response: {err}")))?;
        let uids = envelope.esearchresult.idlist;
        debug!("esearch for '{keyword}' returned {} uids", uids.len());
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for chunk in uids.chunks(EFETCH_BATCH) {
            let body = self.get_with_retries(
                "efetch.fcgi",
                &[
                    ("db", "sra".to_string()),
                    ("id", chunk.join(",")),
                    ("rettype", "runinfo".to_string()),
                    ("retmode", "text".to_string()),
                ],
            )?;
            for id in parse_runinfo_experiments(&body)? {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn fetch_experiment_xml(&self, id: &ExperimentId) -> Result<String, HarvestError> {
        let body = self.get_with_retries(
            "efetch.fcgi",
            &[
                ("db", "sra".to_string()),
                ("id", id.as_str().to_string()),
                ("rettype", "xml".to_string()),
            ],
        )?;
        if body.trim().is_empty() {
            return Err(HarvestError::EntrezHttp(format!(
                "empty XML record for {id}"
            )));
        }
        if let Some(dir) = &self.save_xml_dir {
            let write = fs::create_dir_all(dir.as_std_path()).and_then(|_| {
                fs::write(dir.join(format!("{id}.xml")).as_std_path(), body.as_bytes())
            });
            if let Err(err) = write {
                warn!("could not save XML for {id}: {err}");
            }
        }
        Ok(body)
    }
}

/// Extracts experiment accessions from the `Experiment` column of a runinfo
/// CSV document, in row order. Rows with unparseable accessions are skipped.
pub fn parse_runinfo_experiments(runinfo_csv: &str) -> Result<Vec<ExperimentId>, HarvestError> {
    if runinfo_csv.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(runinfo_csv.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| HarvestError::Csv(err.to_string()))?;
    let Some(index) = headers.iter().position(|header| header == "Experiment") else {
        warn!("runinfo document has no Experiment column");
        return Ok(Vec::new());
    };
    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| HarvestError::Csv(err.to_string()))?;
        if let Some(field) = record.get(index) {
            if let Ok(id) = field.parse::<ExperimentId>() {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

#[derive(Debug, Deserialize)]
struct EsearchEnvelope {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_runinfo_extracts_experiment_column() {
        let runinfo = "Run,Experiment,Sample\nSRR1,SRX100,SRS1\nSRR2,SRX101,SRS2\nSRR3,SRX100,SRS1\n";
        let ids = parse_runinfo_experiments(runinfo).unwrap();
        let values: Vec<&str> = ids.iter().map(ExperimentId::as_str).collect();
        assert_eq!(values, vec!["SRX100", "SRX101", "SRX100"]);
    }

    #[test]
    fn parse_runinfo_skips_invalid_accessions() {
        let runinfo = "Run,Experiment\nSRR1,SRX100\nSRR2,not-an-id\n";
        let ids = parse_runinfo_experiments(runinfo).unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn parse_runinfo_empty_document() {
        assert!(parse_runinfo_experiments("").unwrap().is_empty());
        assert!(parse_runinfo_experiments("Run,Sample\nSRR1,SRS1\n")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn parse_esearch_envelope() {
        let body = r#"{"header":{},"esearchresult":{"count":"2","idlist":["301934","301935"]}}"#;
        let envelope: EsearchEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.esearchresult.idlist.len(), 2);
    }
}
