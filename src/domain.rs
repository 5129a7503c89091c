use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Placeholder written wherever a field's true value could not be determined.
pub const SENTINEL: &str = "N/A";

/// A search term, kept with its original casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyword(String);

impl Keyword {
    pub fn new(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SRA experiment accession (SRX/ERX/DRX followed by digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentId(String);

impl ExperimentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = ["SRX", "ERX", "DRX"].iter().any(|prefix| {
            normalized
                .strip_prefix(prefix)
                .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
                .unwrap_or(false)
        });
        if !is_valid {
            return Err(HarvestError::InvalidExperimentId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoSeriesAccession(String);

impl GeoSeriesAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeoSeriesAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeoSeriesAccession {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = normalized
            .strip_prefix("GSE")
            .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(false);
        if !is_valid {
            return Err(HarvestError::InvalidSeriesAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoSampleAccession(String);

impl GeoSampleAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeoSampleAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeoSampleAccession {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = normalized
            .strip_prefix("GSM")
            .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(false);
        if !is_valid {
            return Err(HarvestError::InvalidSampleAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// GEO accessions extracted from an SRA experiment record. Either side may
/// be absent; both-absent is a valid terminal state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessionPair {
    pub series: Option<GeoSeriesAccession>,
    pub sample: Option<GeoSampleAccession>,
}

impl AccessionPair {
    pub fn is_empty(&self) -> bool {
        self.series.is_none() && self.sample.is_none()
    }

    pub fn series_field(&self) -> String {
        self.series
            .as_ref()
            .map(|acc| acc.as_str().to_string())
            .unwrap_or_else(|| SENTINEL.to_string())
    }

    pub fn sample_field(&self) -> String {
        self.sample
            .as_ref()
            .map(|acc| acc.as_str().to_string())
            .unwrap_or_else(|| SENTINEL.to_string())
    }
}

/// Key facts reduced from a GEO SOFT document, bounded for prompt use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedRecord {
    pub lines: Vec<String>,
}

fn sentinel() -> String {
    SENTINEL.to_string()
}

/// Fixed-schema metadata synthesized for one experiment. Every field is
/// always present; unknown values carry the sentinel instead of being
/// omitted, so every output row has identical shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedMetadata {
    #[serde(default = "sentinel")]
    pub species: String,
    #[serde(default = "sentinel")]
    pub sample_type: String,
    #[serde(default = "sentinel")]
    pub sequencing_technique: String,
    #[serde(default = "sentinel")]
    pub disease_description: String,
    #[serde(default = "sentinel")]
    pub sample_treatment_protocol: String,
    #[serde(default = "sentinel")]
    pub standardized_treatment_label: String,
    #[serde(default = "sentinel")]
    pub library_source: String,
    #[serde(default = "sentinel")]
    pub instrument_model: String,
    #[serde(default = "sentinel")]
    pub is_chipseq_related_experiment: String,
    #[serde(default = "sentinel")]
    pub chipseq_antibody_target: String,
    #[serde(default = "sentinel")]
    pub chipseq_control_description: String,
    #[serde(default = "sentinel")]
    pub chipseq_igg_control_present: String,
    #[serde(default = "sentinel")]
    pub chipseq_input_control_present: String,
    #[serde(default = "sentinel")]
    pub scientific_sample_summary: String,
}

impl Default for SynthesizedMetadata {
    fn default() -> Self {
        Self {
            species: sentinel(),
            sample_type: sentinel(),
            sequencing_technique: sentinel(),
            disease_description: sentinel(),
            sample_treatment_protocol: sentinel(),
            standardized_treatment_label: sentinel(),
            library_source: sentinel(),
            instrument_model: sentinel(),
            is_chipseq_related_experiment: sentinel(),
            chipseq_antibody_target: sentinel(),
            chipseq_control_description: sentinel(),
            chipseq_igg_control_present: sentinel(),
            chipseq_input_control_present: sentinel(),
            scientific_sample_summary: sentinel(),
        }
    }
}

impl SynthesizedMetadata {
    /// Collapses empty and null-like model values into the sentinel so the
    /// output schema is uniform.
    pub fn normalize(&mut self) {
        for field in [
            &mut self.species,
            &mut self.sample_type,
            &mut self.sequencing_technique,
            &mut self.disease_description,
            &mut self.sample_treatment_protocol,
            &mut self.standardized_treatment_label,
            &mut self.library_source,
            &mut self.instrument_model,
            &mut self.is_chipseq_related_experiment,
            &mut self.chipseq_antibody_target,
            &mut self.chipseq_control_description,
            &mut self.chipseq_igg_control_present,
            &mut self.chipseq_input_control_present,
            &mut self.scientific_sample_summary,
        ] {
            let trimmed = field.trim();
            if is_unknown_text(trimmed) {
                *field = sentinel();
            } else if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
    }
}

fn is_unknown_text(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "" | "null" | "n/a" | "na" | "none" | "unknown" | "not specified" | "unclear"
    )
}

/// Outcome of checking a model-reported treatment label against the closed
/// shape set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelCheck {
    Conforming(String),
    Coerced { raw: String },
}

/// Validates a treatment label against the standardized taxonomy: `WT`,
/// `control`, `{GENE}_overexpressed`, `{GENE}_knockdown`, `{GENE}_knockout`,
/// `{COMPOUND}_treated`, or a `+`-joined combination. Common uninformative
/// phrasings normalize to `WT`/`control` before the shape check.
pub fn standardize_treatment_label(raw: &str) -> LabelCheck {
    let trimmed = raw.trim();
    if let Some(mapped) = map_uninformative(trimmed) {
        return LabelCheck::Conforming(mapped.to_string());
    }
    let shape =
        Regex::new(r"^(WT|control|[A-Za-z0-9][A-Za-z0-9./-]*_(overexpressed|knockdown|knockout|treated))$")
            .unwrap();
    let parts: Vec<&str> = trimmed.split('+').map(str::trim).collect();
    if parts.iter().all(|part| shape.is_match(part)) {
        LabelCheck::Conforming(parts.join(" + "))
    } else {
        LabelCheck::Coerced {
            raw: trimmed.to_string(),
        }
    }
}

fn map_uninformative(value: &str) -> Option<&'static str> {
    let lowered = value.to_ascii_lowercase();
    match lowered.as_str() {
        "" | "n/a" | "na" | "none" | "unknown" | "wt" | "wild type" | "wild-type" | "wildtype"
        | "untreated" | "parental" => Some("WT"),
        "control" | "ctrl" | "mock" | "vehicle" | "vehicle only" | "dmso" | "sicontrol" | "sinc"
        | "shcontrol" | "negative control" => Some("control"),
        _ => None,
    }
}

/// One output record: keyword and experiment identity, extracted GEO
/// accessions, then the synthesized metadata. Field order is the CSV
/// column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    pub original_keyword: String,
    pub sra_experiment_id: String,
    pub gse_accession: String,
    pub gsm_accession: String,
    pub species: String,
    pub sample_type: String,
    pub sequencing_technique: String,
    pub disease_description: String,
    pub sample_treatment_protocol: String,
    pub standardized_treatment_label: String,
    pub library_source: String,
    pub instrument_model: String,
    pub is_chipseq_related_experiment: String,
    pub chipseq_antibody_target: String,
    pub chipseq_control_description: String,
    pub chipseq_igg_control_present: String,
    pub chipseq_input_control_present: String,
    pub scientific_sample_summary: String,
}

impl ResultRow {
    pub const COLUMNS: [&'static str; 18] = [
        "original_keyword",
        "sra_experiment_id",
        "gse_accession",
        "gsm_accession",
        "species",
        "sample_type",
        "sequencing_technique",
        "disease_description",
        "sample_treatment_protocol",
        "standardized_treatment_label",
        "library_source",
        "instrument_model",
        "is_chipseq_related_experiment",
        "chipseq_antibody_target",
        "chipseq_control_description",
        "chipseq_igg_control_present",
        "chipseq_input_control_present",
        "scientific_sample_summary",
    ];

    /// Row emitted when a keyword's search returned zero experiments, so the
    /// output still covers every input keyword.
    pub fn placeholder(keyword: &Keyword) -> Self {
        Self::from_parts(
            keyword,
            SENTINEL,
            &AccessionPair::default(),
            SynthesizedMetadata::default(),
        )
    }

    pub fn for_experiment(
        keyword: &Keyword,
        experiment: &ExperimentId,
        accessions: &AccessionPair,
        metadata: SynthesizedMetadata,
    ) -> Self {
        Self::from_parts(keyword, experiment.as_str(), accessions, metadata)
    }

    fn from_parts(
        keyword: &Keyword,
        experiment_field: &str,
        accessions: &AccessionPair,
        metadata: SynthesizedMetadata,
    ) -> Self {
        Self {
            original_keyword: keyword.as_str().to_string(),
            sra_experiment_id: experiment_field.to_string(),
            gse_accession: accessions.series_field(),
            gsm_accession: accessions.sample_field(),
            species: metadata.species,
            sample_type: metadata.sample_type,
            sequencing_technique: metadata.sequencing_technique,
            disease_description: metadata.disease_description,
            sample_treatment_protocol: metadata.sample_treatment_protocol,
            standardized_treatment_label: metadata.standardized_treatment_label,
            library_source: metadata.library_source,
            instrument_model: metadata.instrument_model,
            is_chipseq_related_experiment: metadata.is_chipseq_related_experiment,
            chipseq_antibody_target: metadata.chipseq_antibody_target,
            chipseq_control_description: metadata.chipseq_control_description,
            chipseq_igg_control_present: metadata.chipseq_igg_control_present,
            chipseq_input_control_present: metadata.chipseq_input_control_present,
            scientific_sample_summary: metadata.scientific_sample_summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_experiment_id_valid() {
        let id: ExperimentId = "srx123456".parse().unwrap();
        assert_eq!(id.as_str(), "SRX123456");
        assert!("ERX99".parse::<ExperimentId>().is_ok());
        assert!("DRX1".parse::<ExperimentId>().is_ok());
    }

    #[test]
    fn parse_experiment_id_invalid() {
        let err = "SRR123".parse::<ExperimentId>().unwrap_err();
        assert_matches!(err, HarvestError::InvalidExperimentId(_));
        assert!("SRX".parse::<ExperimentId>().is_err());
        assert!("SRX12a".parse::<ExperimentId>().is_err());
    }

    #[test]
    fn parse_geo_accessions() {
        let series: GeoSeriesAccession = "gse12345".parse().unwrap();
        assert_eq!(series.as_str(), "GSE12345");
        let sample: GeoSampleAccession = "GSM99".parse().unwrap();
        assert_eq!(sample.as_str(), "GSM99");
        assert_matches!(
            "GSM12".parse::<GeoSeriesAccession>().unwrap_err(),
            HarvestError::InvalidSeriesAccession(_)
        );
    }

    #[test]
    fn accession_pair_fields() {
        let pair = AccessionPair {
            series: Some("GSE1".parse().unwrap()),
            sample: None,
        };
        assert_eq!(pair.series_field(), "GSE1");
        assert_eq!(pair.sample_field(), SENTINEL);
        assert!(!pair.is_empty());
        assert!(AccessionPair::default().is_empty());
    }

    #[test]
    fn metadata_normalize_fills_sentinels() {
        let mut metadata = SynthesizedMetadata {
            species: "  Homo sapiens ".to_string(),
            sample_type: "not specified".to_string(),
            sequencing_technique: "".to_string(),
            ..SynthesizedMetadata::default()
        };
        metadata.normalize();
        assert_eq!(metadata.species, "Homo sapiens");
        assert_eq!(metadata.sample_type, SENTINEL);
        assert_eq!(metadata.sequencing_technique, SENTINEL);
    }

    #[test]
    fn treatment_label_shapes() {
        assert_eq!(
            standardize_treatment_label("TP53_knockdown"),
            LabelCheck::Conforming("TP53_knockdown".to_string())
        );
        assert_eq!(
            standardize_treatment_label("MYC_overexpressed + Enzalutamide_treated"),
            LabelCheck::Conforming("MYC_overexpressed + Enzalutamide_treated".to_string())
        );
        assert_eq!(
            standardize_treatment_label("control"),
            LabelCheck::Conforming("control".to_string())
        );
    }

    #[test]
    fn treatment_label_uninformative_normalization() {
        assert_eq!(
            standardize_treatment_label("untreated"),
            LabelCheck::Conforming("WT".to_string())
        );
        assert_eq!(
            standardize_treatment_label("DMSO"),
            LabelCheck::Conforming("control".to_string())
        );
        assert_eq!(
            standardize_treatment_label("N/A"),
            LabelCheck::Conforming("WT".to_string())
        );
    }

    #[test]
    fn treatment_label_malformed_is_coerced() {
        assert_matches!(
            standardize_treatment_label("10uM drug for 24h"),
            LabelCheck::Coerced { .. }
        );
        assert_matches!(
            standardize_treatment_label("TP53_deleted"),
            LabelCheck::Coerced { .. }
        );
    }

    #[test]
    fn placeholder_row_is_sentinel_filled() {
        let keyword = Keyword::new("H660").unwrap();
        let row = ResultRow::placeholder(&keyword);
        assert_eq!(row.original_keyword, "H660");
        assert_eq!(row.sra_experiment_id, SENTINEL);
        assert_eq!(row.gse_accession, SENTINEL);
        assert_eq!(row.species, SENTINEL);
        assert_eq!(row.scientific_sample_summary, SENTINEL);
    }
}
