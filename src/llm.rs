use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::{
    AccessionPair, ExperimentId, Keyword, LabelCheck, LinkedRecord, SynthesizedMetadata,
    standardize_treatment_label, SENTINEL,
};
use crate::error::HarvestError;

const ACCESSION_ATTEMPTS: usize = 2;
const SYNTHESIS_ATTEMPTS: usize = 3;
const ACCESSION_XML_LIMIT: usize = 8_000;
const SYNTHESIS_XML_HEAD: usize = 2_000;
const SYNTHESIS_XML_TAIL: usize = 2_000;

pub trait LlmClient: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, HarvestError>;
    fn health_check(&self) -> Result<(), HarvestError>;
}

/// Blocking client for an Ollama-style local inference endpoint.
#[derive(Clone)]
pub struct OllamaHttpClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaHttpClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sra-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::LlmHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|err| HarvestError::LlmHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

impl LlmClient for OllamaHttpClient {
    fn generate(&self, prompt: &str) -> Result<String, HarvestError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": { "temperature": 0.05 },
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|err| HarvestError::LlmHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "inference request failed".to_string());
            return Err(HarvestError::LlmStatus { status, message });
        }
        let payload: GenerateResponse = response
            .json()
            .map_err(|err| HarvestError::LlmHttp(err.to_string()))?;
        Ok(payload.response)
    }

    fn health_check(&self) -> Result<(), HarvestError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| HarvestError::LlmUnavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(HarvestError::LlmUnavailable(format!(
                "endpoint returned status {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Inputs for the comprehensive synthesis call.
pub struct SynthesisRequest<'a> {
    pub experiment: &'a ExperimentId,
    pub keyword: &'a Keyword,
    pub xml: &'a str,
    pub accessions: &'a AccessionPair,
    pub linked: Option<&'a LinkedRecord>,
}

/// Schema-validating front over the raw inference client. Malformed model
/// output never propagates: accession extraction falls back to pattern
/// matching and synthesis falls back to a sentinel-filled record.
pub struct LlmGateway<C: LlmClient> {
    client: C,
    responses_dir: Utf8PathBuf,
}

impl<C: LlmClient> LlmGateway<C> {
    pub fn new(client: C, responses_dir: Utf8PathBuf) -> Self {
        Self {
            client,
            responses_dir,
        }
    }

    pub fn health_check(&self) -> Result<(), HarvestError> {
        self.client.health_check()
    }

    /// Extracts the linked GEO accessions from an SRA experiment record.
    /// One reformulated reprompt on malformed output, then the
    /// deterministic pattern extractor, which never fails.
    pub fn extract_accessions(&self, xml: &str, experiment: &ExperimentId) -> AccessionPair {
        let snippet = truncate_chars(xml, ACCESSION_XML_LIMIT);
        for attempt in 0..ACCESSION_ATTEMPTS {
            let prompt = if attempt == 0 {
                accession_prompt(&snippet)
            } else {
                accession_retry_prompt(&snippet)
            };
            match self.client.generate(&prompt) {
                Ok(text) => {
                    if let Some(pair) = parse_accession_response(&text) {
                        debug!(
                            "accessions for {experiment}: gse={} gsm={}",
                            pair.series_field(),
                            pair.sample_field()
                        );
                        return pair;
                    }
                    warn!(
                        "accession extraction for {experiment} returned malformed output (attempt {})",
                        attempt + 1
                    );
                }
                Err(err) => warn!(
                    "accession extraction call failed for {experiment} (attempt {}): {err}",
                    attempt + 1
                ),
            }
        }
        info!("using pattern-based accession extraction for {experiment}");
        fallback_extract_accessions(xml)
    }

    /// Synthesizes the full metadata record. Up to two stricter reprompts;
    /// after that every field is the sentinel. The raw model output (or a
    /// constructed fallback) is persisted for audit either way.
    pub fn synthesize(&self, request: &SynthesisRequest<'_>) -> SynthesizedMetadata {
        let base_prompt = synthesis_prompt(request);
        let mut last_response = String::new();
        for attempt in 0..SYNTHESIS_ATTEMPTS {
            let prompt = if attempt == 0 {
                base_prompt.clone()
            } else {
                format!("{STRICT_FORMAT_REMINDER}\n\n{base_prompt}")
            };
            match self.client.generate(&prompt) {
                Ok(text) => {
                    last_response = text.clone();
                    if let Some(candidate) = extract_json(&text) {
                        if let Ok(mut metadata) =
                            serde_json::from_str::<SynthesizedMetadata>(&candidate)
                        {
                            metadata.normalize();
                            apply_label_policy(&mut metadata);
                            self.persist_response(request.experiment, &candidate);
                            return metadata;
                        }
                    }
                    warn!(
                        "synthesis for {} returned malformed output (attempt {})",
                        request.experiment,
                        attempt + 1
                    );
                }
                Err(err) => warn!(
                    "synthesis call failed for {} (attempt {}): {err}",
                    request.experiment,
                    attempt + 1
                ),
            }
        }
        let fallback = serde_json::json!({
            "error": "metadata synthesis failed after retries",
            "raw_response": last_response,
        });
        self.persist_response(request.experiment, &fallback.to_string());
        SynthesizedMetadata::default()
    }

    fn persist_response(&self, experiment: &ExperimentId, raw: &str) {
        let record = serde_json::json!({
            "experiment": experiment.as_str(),
            "recorded_at": chrono::Utc::now().to_rfc3339(),
            "response": raw,
        });
        let path = self
            .responses_dir
            .join(format!("{}.json", experiment.as_str()));
        let write = fs::create_dir_all(self.responses_dir.as_std_path()).and_then(|_| {
            fs::write(
                path.as_std_path(),
                serde_json::to_vec_pretty(&record).unwrap_or_default(),
            )
        });
        if let Err(err) = write {
            warn!("could not persist raw model response for {experiment}: {err}");
        }
    }
}

/// Non-conforming treatment labels are coerced to `WT`; the raw text stays
/// in the protocol field for human review.
fn apply_label_policy(metadata: &mut SynthesizedMetadata) {
    match standardize_treatment_label(&metadata.standardized_treatment_label) {
        LabelCheck::Conforming(label) => metadata.standardized_treatment_label = label,
        LabelCheck::Coerced { raw } => {
            if metadata.sample_treatment_protocol == SENTINEL {
                metadata.sample_treatment_protocol = raw;
            } else {
                metadata.sample_treatment_protocol =
                    format!("{}; reported label: {raw}", metadata.sample_treatment_protocol);
            }
            metadata.standardized_treatment_label = "WT".to_string();
        }
    }
}

fn parse_accession_response(text: &str) -> Option<AccessionPair> {
    let candidate = extract_json(text)?;
    let raw: RawAccessions = serde_json::from_str(&candidate).ok()?;
    Some(AccessionPair {
        series: raw
            .gse
            .as_deref()
            .and_then(|value| value.trim().parse().ok()),
        sample: raw
            .gsm
            .as_deref()
            .and_then(|value| value.trim().parse().ok()),
    })
}

#[derive(Debug, Deserialize)]
struct RawAccessions {
    #[serde(default)]
    gse: Option<String>,
    #[serde(default)]
    gsm: Option<String>,
}

/// Deterministic accession scan: first `GSE<digits>` / `GSM<digits>` in
/// document order. Worst case both sides are absent.
pub fn fallback_extract_accessions(xml: &str) -> AccessionPair {
    let series = Regex::new(r"GSE[0-9]+")
        .unwrap()
        .find(xml)
        .and_then(|found| found.as_str().parse().ok());
    let sample = Regex::new(r"GSM[0-9]+")
        .unwrap()
        .find(xml)
        .and_then(|found| found.as_str().parse().ok());
    AccessionPair { series, sample }
}

/// Pulls a JSON object out of model text: fenced block first, then the
/// whole trimmed body, then the first brace-balanced object.
pub fn extract_json(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            let candidate = rest[..end].trim();
            if !candidate.is_empty() {
                return Some(candidate.to_string());
            }
        }
    }
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }
    balanced_object(text)
}

fn balanced_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}

fn xml_snippet(xml: &str) -> String {
    let total = xml.chars().count();
    if total <= SYNTHESIS_XML_HEAD + SYNTHESIS_XML_TAIL {
        return xml.to_string();
    }
    let head: String = xml.chars().take(SYNTHESIS_XML_HEAD).collect();
    let tail: String = xml.chars().skip(total - SYNTHESIS_XML_TAIL).collect();
    format!("{head}\n[... record truncated ...]\n{tail}")
}

fn accession_prompt(xml: &str) -> String {
    format!(
        r#"You identify GEO accessions inside SRA experiment XML. Find the GEO
Series accession (starts with "GSE") for the overall study and the GEO
Sample accession (starts with "GSM") linked to this experiment. Look in
STUDY_REF and EXPERIMENT attributes, EXTERNAL_ID elements with the GEO
namespace, and titles.

Respond with exactly one JSON object with keys "gse" and "gsm". Use "N/A"
for a value you cannot find. No other text.

SRA experiment XML:
```xml
{xml}
```
JSON:"#
    )
}

fn accession_retry_prompt(xml: &str) -> String {
    format!(
        r#"Your previous answer was not valid JSON. Respond with ONLY this JSON
shape and nothing else: {{"gse": "GSE12345", "gsm": "GSM123456"}}. Use
"N/A" for a missing value. Do not add explanations or markdown.

SRA experiment XML:
```xml
{xml}
```
JSON:"#
    )
}

const STRICT_FORMAT_REMINDER: &str = "Your previous answer was not a single valid JSON object. \
Respond with ONLY one JSON object containing exactly the requested keys, with string values. \
No markdown fences, no commentary, no trailing text.";

fn synthesis_prompt(request: &SynthesisRequest<'_>) -> String {
    let linked_summary = request
        .linked
        .map(|record| record.lines.join("\n"))
        .unwrap_or_else(|| SENTINEL.to_string());
    format!(
        r#"You are a meticulous biomedical data curator. Analyze the SRA
experiment XML and the linked GEO summary and extract structured metadata
for this sequencing sample. Cross-reference both sources and apply domain
knowledge: infer species from cell line names (LNCaP, MCF7 -> Homo
sapiens; NIH3T3 -> Mus musculus), recognize techniques from library
strategy (RNA-Seq, scRNA-Seq, ChIP-Seq, ATAC-Seq, WGS, WES,
Bisulfite-Seq), and read genotype/treatment hints from sample titles and
characteristics (sgGENE -> GENE_knockout, siGENE/shGENE ->
GENE_knockdown, drug names -> COMPOUND_treated).

Respond with exactly one JSON object with these keys, all string values:
"species", "sample_type", "sequencing_technique", "disease_description",
"sample_treatment_protocol", "standardized_treatment_label",
"library_source", "instrument_model", "is_chipseq_related_experiment",
"chipseq_antibody_target", "chipseq_control_description",
"chipseq_igg_control_present", "chipseq_input_control_present",
"scientific_sample_summary".

Field rules:
- species: full scientific name, e.g. "Homo sapiens".
- sample_type: Cell Line, Primary Cells, Tissue, PDX, Organoid, or Other.
- sample_treatment_protocol: every treatment with dose/duration when
  stated, e.g. "10uM Enzalutamide for 24h; transfected with TP53 siRNA".
- standardized_treatment_label: exactly one of "WT", "control",
  "{{GENE}}_overexpressed", "{{GENE}}_knockdown", "{{GENE}}_knockout",
  "{{COMPOUND}}_treated", or several of these joined with " + ". Use "WT"
  for wild-type, untreated, or unknown; "control" for vehicle, mock, or
  negative controls.
- library_source: TRANSCRIPTOMIC, GENOMIC, EPIGENOMIC, METAGENOMIC, or
  OTHER.
- instrument_model: full name with manufacturer, e.g. "Illumina NovaSeq
  6000".
- is_chipseq_related_experiment: "yes" or "no". The chipseq_* fields are
  "N/A" when it is "no".
- chipseq_igg_control_present / chipseq_input_control_present: "yes",
  "no", or "unknown".
- scientific_sample_summary: 2-4 sentences of scientific prose covering
  organism, sample, treatments, technique, and study goal.
Use "N/A" for anything that cannot be reasonably inferred. Your entire
response must be that single JSON object.

Original search keyword: {keyword}
SRA experiment ID: {experiment}
GSE accession (if known): {gse}
GSM accession (if known): {gsm}

SRA experiment XML:
```xml
{xml}
```

GEO data summary (or "N/A"):
```text
{linked}
```
JSON:"#,
        keyword = request.keyword,
        experiment = request.experiment,
        gse = request.accessions.series_field(),
        gsm = request.accessions.sample_field(),
        xml = xml_snippet(request.xml),
        linked = linked_summary,
    )
}
