use std::collections::{HashMap, HashSet};

use camino::Utf8PathBuf;

use sra_meta_harvest::app::App;
use sra_meta_harvest::config::{DebugTarget, RunConfig};
use sra_meta_harvest::domain::{
    ExperimentId, GeoSampleAccession, GeoSeriesAccession, Keyword, SENTINEL,
};
use sra_meta_harvest::entrez::ArchiveClient;
use sra_meta_harvest::error::HarvestError;
use sra_meta_harvest::geo::{GeoClient, LinkedRecordFetcher};
use sra_meta_harvest::llm::{LlmClient, LlmGateway};
use sra_meta_harvest::writer::CsvResultWriter;

struct MockArchive {
    ids: HashMap<String, Vec<String>>,
    fail_fetch: HashSet<String>,
    bare_xml: bool,
}

impl MockArchive {
    fn new(ids: &[(&str, &[&str])]) -> Self {
        Self {
            ids: ids
                .iter()
                .map(|(keyword, ids)| {
                    (
                        keyword.to_string(),
                        ids.iter().map(|id| id.to_string()).collect(),
                    )
                })
                .collect(),
            fail_fetch: HashSet::new(),
            bare_xml: false,
        }
    }
}

impl ArchiveClient for MockArchive {
    fn search(&self, keyword: &Keyword) -> Result<Vec<ExperimentId>, HarvestError> {
        Ok(self
            .ids
            .get(keyword.as_str())
            .map(|ids| ids.iter().map(|id| id.parse().unwrap()).collect())
            .unwrap_or_default())
    }

    fn fetch_experiment_xml(&self, id: &ExperimentId) -> Result<String, HarvestError> {
        if self.fail_fetch.contains(id.as_str()) {
            return Err(HarvestError::EntrezHttp("exhausted retries".to_string()));
        }
        if self.bare_xml {
            return Ok("<EXPERIMENT/>".to_string());
        }
        Ok(format!(
            r#"<EXPERIMENT accession="{id}"><STUDY_REF accession="GSE100"/><EXTERNAL_ID namespace="GEO">GSM200</EXTERNAL_ID></EXPERIMENT>"#
        ))
    }
}

struct MockGeo;

impl GeoClient for MockGeo {
    fn fetch_series_soft(&self, _accession: &GeoSeriesAccession) -> Result<String, HarvestError> {
        Ok("!Series_title = Prostate study\n!Sample_characteristics_ch1 = cell line: H660\n"
            .to_string())
    }

    fn fetch_sample_brief(&self, _accession: &GeoSampleAccession) -> Result<String, HarvestError> {
        Ok("!Sample_title = sample\n".to_string())
    }
}

struct WellBehavedLlm;

impl LlmClient for WellBehavedLlm {
    fn generate(&self, prompt: &str) -> Result<String, HarvestError> {
        if prompt.contains("biomedical data curator") {
            Ok(serde_json::json!({
                "species": "Homo sapiens",
                "sample_type": "Cell Line",
                "sequencing_technique": "RNA-Seq",
                "standardized_treatment_label": "Enzalutamide_treated",
                "scientific_sample_summary": "RNA-Seq of H660 prostate cells under enzalutamide.",
            })
            .to_string())
        } else {
            Ok(r#"{"gse": "GSE100", "gsm": "GSM200"}"#.to_string())
        }
    }

    fn health_check(&self) -> Result<(), HarvestError> {
        Ok(())
    }
}

struct GarbageLlm;

impl LlmClient for GarbageLlm {
    fn generate(&self, _prompt: &str) -> Result<String, HarvestError> {
        Ok("no json at all".to_string())
    }

    fn health_check(&self) -> Result<(), HarvestError> {
        Ok(())
    }
}

fn run_config(dir: &tempfile::TempDir, workers: usize) -> RunConfig {
    RunConfig {
        model: "test-model".to_string(),
        llm_base_url: "http://localhost:11434".to_string(),
        workers,
        input_path: Utf8PathBuf::from("unused.csv"),
        keyword_column: None,
        output_path: Utf8PathBuf::from_path_buf(dir.path().join("out.csv")).unwrap(),
        responses_dir: Utf8PathBuf::from_path_buf(dir.path().join("responses")).unwrap(),
        save_xml_dir: None,
        save_geo_dir: None,
        debug: None,
    }
}

fn read_rows(path: &Utf8PathBuf) -> (Vec<String>, Vec<HashMap<String, String>>) {
    let mut reader = csv::Reader::from_path(path.as_std_path()).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|record| {
            let record = record.unwrap();
            headers
                .iter()
                .cloned()
                .zip(record.iter().map(String::from))
                .collect()
        })
        .collect();
    (headers, rows)
}

fn keywords(values: &[&str]) -> Vec<Keyword> {
    values
        .iter()
        .map(|value| Keyword::new(value).unwrap())
        .collect()
}

#[test]
fn run_emits_one_row_per_experiment_and_placeholder_per_empty_keyword() {
    let dir = tempfile::tempdir().unwrap();
    let config = run_config(&dir, 2);
    let output_path = config.output_path.clone();
    let responses_dir = config.responses_dir.clone();

    let archive = MockArchive::new(&[("H660", &["SRX1", "SRX2"]), ("EMPTY", &[])]);
    let app = App::new(
        config,
        archive,
        LinkedRecordFetcher::new(MockGeo, None),
        LlmGateway::new(WellBehavedLlm, responses_dir),
    );

    let writer = CsvResultWriter::open(&output_path).unwrap();
    let summary = app.run(&keywords(&["H660", "EMPTY"]), writer).unwrap();

    assert_eq!(summary.keywords_processed, 2);
    assert_eq!(summary.identifiers_found, 2);
    assert_eq!(summary.rows_written, 3);
    assert_eq!(summary.experiments_skipped, 0);

    let (_, rows) = read_rows(&output_path);
    assert_eq!(rows.len(), 3);

    let experiment_ids: HashSet<&str> = rows
        .iter()
        .map(|row| row["sra_experiment_id"].as_str())
        .collect();
    assert!(experiment_ids.contains("SRX1"));
    assert!(experiment_ids.contains("SRX2"));
    assert!(experiment_ids.contains(SENTINEL));

    let placeholder = rows
        .iter()
        .find(|row| row["sra_experiment_id"] == SENTINEL)
        .unwrap();
    assert_eq!(placeholder["original_keyword"], "EMPTY");
    assert_eq!(placeholder["species"], SENTINEL);
    assert_eq!(placeholder["gse_accession"], SENTINEL);

    let real = rows
        .iter()
        .find(|row| row["sra_experiment_id"] == "SRX1")
        .unwrap();
    assert_eq!(real["original_keyword"], "H660");
    assert_eq!(real["gse_accession"], "GSE100");
    assert_eq!(real["gsm_accession"], "GSM200");
    assert_eq!(real["species"], "Homo sapiens");
    assert_eq!(real["standardized_treatment_label"], "Enzalutamide_treated");
}

#[test]
fn fetch_failure_skips_the_experiment_without_a_row() {
    let dir = tempfile::tempdir().unwrap();
    let config = run_config(&dir, 1);
    let output_path = config.output_path.clone();
    let responses_dir = config.responses_dir.clone();

    let mut archive = MockArchive::new(&[("H660", &["SRX9"])]);
    archive.fail_fetch.insert("SRX9".to_string());
    let app = App::new(
        config,
        archive,
        LinkedRecordFetcher::new(MockGeo, None),
        LlmGateway::new(WellBehavedLlm, responses_dir),
    );

    let writer = CsvResultWriter::open(&output_path).unwrap();
    let summary = app.run(&keywords(&["H660"]), writer).unwrap();

    assert_eq!(summary.identifiers_found, 1);
    assert_eq!(summary.rows_written, 0);
    assert_eq!(summary.experiments_skipped, 1);

    let (_, rows) = read_rows(&output_path);
    assert!(rows.is_empty());
}

#[test]
fn malformed_model_output_degrades_to_a_sentinel_row() {
    let dir = tempfile::tempdir().unwrap();
    let config = run_config(&dir, 1);
    let output_path = config.output_path.clone();
    let responses_dir = config.responses_dir.clone();

    let mut archive = MockArchive::new(&[("H660", &["SRX5"])]);
    archive.bare_xml = true;
    let app = App::new(
        config,
        archive,
        LinkedRecordFetcher::new(MockGeo, None),
        LlmGateway::new(GarbageLlm, responses_dir),
    );

    let writer = CsvResultWriter::open(&output_path).unwrap();
    let summary = app.run(&keywords(&["H660"]), writer).unwrap();

    assert_eq!(summary.rows_written, 1);
    let (_, rows) = read_rows(&output_path);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    // the experiment id is the one field guaranteed once fetch succeeds
    assert_eq!(row["sra_experiment_id"], "SRX5");
    assert_eq!(row["gse_accession"], SENTINEL);
    assert_eq!(row["gsm_accession"], SENTINEL);
    assert_eq!(row["species"], SENTINEL);
    assert_eq!(row["standardized_treatment_label"], SENTINEL);
}

#[test]
fn repeated_identifiers_are_processed_once_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = run_config(&dir, 1);
    let output_path = config.output_path.clone();
    let responses_dir = config.responses_dir.clone();

    let archive = MockArchive::new(&[("H660", &["SRX1"]), ("NCI-H660", &["SRX1", "SRX3"])]);
    let app = App::new(
        config,
        archive,
        LinkedRecordFetcher::new(MockGeo, None),
        LlmGateway::new(WellBehavedLlm, responses_dir),
    );

    let writer = CsvResultWriter::open(&output_path).unwrap();
    let summary = app.run(&keywords(&["H660", "NCI-H660"]), writer).unwrap();

    assert_eq!(summary.identifiers_found, 2);
    assert_eq!(summary.rows_written, 2);

    let (_, rows) = read_rows(&output_path);
    let srx1_rows = rows
        .iter()
        .filter(|row| row["sra_experiment_id"] == "SRX1")
        .count();
    assert_eq!(srx1_rows, 1);
}

#[test]
fn debug_mode_runs_exactly_one_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = run_config(&dir, 1);
    config.debug = Some(DebugTarget {
        experiment: "SRX7".parse().unwrap(),
        keyword: Keyword::new("DEBUG").unwrap(),
    });
    let output_path = config.output_path.clone();
    let responses_dir = config.responses_dir.clone();

    let archive = MockArchive::new(&[]);
    let app = App::new(
        config,
        archive,
        LinkedRecordFetcher::new(MockGeo, None),
        LlmGateway::new(WellBehavedLlm, responses_dir),
    );

    let writer = CsvResultWriter::open(&output_path).unwrap();
    let summary = app.run(&[], writer).unwrap();

    assert_eq!(summary.rows_written, 1);
    let (_, rows) = read_rows(&output_path);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["sra_experiment_id"], "SRX7");
    assert_eq!(rows[0]["original_keyword"], "DEBUG");
}

#[test]
fn raw_model_responses_are_persisted_per_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let config = run_config(&dir, 1);
    let output_path = config.output_path.clone();
    let responses_dir = config.responses_dir.clone();

    let archive = MockArchive::new(&[("H660", &["SRX1"])]);
    let app = App::new(
        config,
        archive,
        LinkedRecordFetcher::new(MockGeo, None),
        LlmGateway::new(WellBehavedLlm, responses_dir.clone()),
    );

    let writer = CsvResultWriter::open(&output_path).unwrap();
    app.run(&keywords(&["H660"]), writer).unwrap();

    let record_path = responses_dir.join("SRX1.json");
    let saved = std::fs::read_to_string(record_path.as_std_path()).unwrap();
    assert!(saved.contains("Homo sapiens"));
}
