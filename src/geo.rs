use std::fs;
use std::io::Read;
use std::time::Duration;

use camino::Utf8PathBuf;
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::domain::{AccessionPair, GeoSampleAccession, GeoSeriesAccession, LinkedRecord};
use crate::error::HarvestError;

const MAX_SUMMARY_LINES: usize = 40;
const MAX_VALUE_CHARS: usize = 300;

pub trait GeoClient: Send + Sync {
    fn fetch_series_soft(&self, accession: &GeoSeriesAccession) -> Result<String, HarvestError>;
    fn fetch_sample_brief(&self, accession: &GeoSampleAccession) -> Result<String, HarvestError>;
}

#[derive(Clone)]
pub struct GeoHttpClient {
    client: Client,
}

impl GeoHttpClient {
    pub fn new() -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sra-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::GeoHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| HarvestError::GeoHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn soft_url(accession: &GeoSeriesAccession) -> String {
        let prefix = geo_series_prefix(accession);
        format!(
            "https://ftp.ncbi.nlm.nih.gov/geo/series/{prefix}/{acc}/soft/{acc}_family.soft.gz",
            acc = accession.as_str()
        )
    }
}

impl GeoClient for GeoHttpClient {
    fn fetch_series_soft(&self, accession: &GeoSeriesAccession) -> Result<String, HarvestError> {
        let url = Self::soft_url(accession);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| HarvestError::GeoHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GEO request failed".to_string());
            return Err(HarvestError::GeoStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| HarvestError::GeoHttp(err.to_string()))?;
        let mut decoder = GzDecoder::new(bytes.as_ref());
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|err| HarvestError::GeoHttp(err.to_string()))?;
        Ok(text)
    }

    fn fetch_sample_brief(&self, accession: &GeoSampleAccession) -> Result<String, HarvestError> {
        let response = self
            .client
            .get("https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi")
            .query(&[
                ("acc", accession.as_str()),
                ("targ", "self"),
                ("form", "text"),
                ("view", "brief"),
            ])
            .send()
            .map_err(|err| HarvestError::GeoHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GEO request failed".to_string());
            return Err(HarvestError::GeoStatus { status, message });
        }
        response
            .text()
            .map_err(|err| HarvestError::GeoHttp(err.to_string()))
    }
}

/// Best-effort fetch of the GEO record linked to an experiment. Absence is a
/// valid terminal state: missing accessions short-circuit without a network
/// call and fetch failures degrade to `None`.
pub struct LinkedRecordFetcher<G: GeoClient> {
    geo: G,
    save_dir: Option<Utf8PathBuf>,
}

impl<G: GeoClient> LinkedRecordFetcher<G> {
    pub fn new(geo: G, save_dir: Option<Utf8PathBuf>) -> Self {
        Self { geo, save_dir }
    }

    /// The series accession takes precedence when both are present, since
    /// the family record carries broader study context.
    pub fn fetch(&self, accessions: &AccessionPair) -> Option<LinkedRecord> {
        if accessions.is_empty() {
            debug!("no GEO accessions linked; skipping enrichment fetch");
            return None;
        }
        let (label, text) = if let Some(series) = &accessions.series {
            match self.geo.fetch_series_soft(series) {
                Ok(text) => (series.as_str().to_string(), text),
                Err(err) => {
                    warn!("GEO series fetch failed for {series}: {err}");
                    return None;
                }
            }
        } else {
            let sample = accessions.sample.as_ref()?;
            match self.geo.fetch_sample_brief(sample) {
                Ok(text) => (sample.as_str().to_string(), text),
                Err(err) => {
                    warn!("GEO sample fetch failed for {sample}: {err}");
                    return None;
                }
            }
        };

        if let Some(dir) = &self.save_dir {
            let write = fs::create_dir_all(dir.as_std_path()).and_then(|_| {
                fs::write(dir.join(format!("{label}.soft.txt")).as_std_path(), &text)
            });
            if let Err(err) = write {
                warn!("could not save GEO record for {label}: {err}");
            }
        }

        let lines = summarize_soft(&text);
        if lines.is_empty() {
            debug!("GEO record for {label} carried no attribute lines");
            return None;
        }
        Some(LinkedRecord { lines })
    }
}

/// Reduces a SOFT document to a bounded list of `key: value` facts taken
/// from its attribute lines, keeping prompts small.
pub fn summarize_soft(soft_text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for line in soft_text.lines() {
        let Some(rest) = line.strip_prefix('!') else {
            continue;
        };
        let Some((key, value)) = rest.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        let value: String = value.chars().take(MAX_VALUE_CHARS).collect();
        lines.push(format!("{key}: {value}"));
        if lines.len() >= MAX_SUMMARY_LINES {
            break;
        }
    }
    lines
}

pub fn geo_series_prefix(accession: &GeoSeriesAccession) -> String {
    let digits = accession.as_str().trim_start_matches("GSE");
    if digits.len() <= 3 {
        return "GSEnnn".to_string();
    }
    let head = &digits[..digits.len() - 3];
    format!("GSE{}nnn", head)
}
