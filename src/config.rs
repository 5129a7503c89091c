use camino::Utf8PathBuf;

use crate::domain::{ExperimentId, Keyword};
use crate::error::HarvestError;

pub const DEFAULT_MODEL: &str = "qwen3:8b";
pub const DEFAULT_LLM_URL: &str = "http://localhost:11434";

/// Immutable run configuration, built once at startup from the CLI and
/// threaded through every component constructor.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: String,
    pub llm_base_url: String,
    /// Worker-pool width for experiment pipelines within a keyword. A width
    /// of 1 runs fully sequentially, the safe default when the inference
    /// service handles one request at a time.
    pub workers: usize,
    pub input_path: Utf8PathBuf,
    pub keyword_column: Option<String>,
    pub output_path: Utf8PathBuf,
    /// Directory receiving one raw-model-response record per experiment.
    pub responses_dir: Utf8PathBuf,
    pub save_xml_dir: Option<Utf8PathBuf>,
    pub save_geo_dir: Option<Utf8PathBuf>,
    /// When set, the keyword loop is bypassed and exactly one pipeline runs
    /// synchronously.
    pub debug: Option<DebugTarget>,
}

#[derive(Debug, Clone)]
pub struct DebugTarget {
    pub experiment: ExperimentId,
    pub keyword: Keyword,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.workers == 0 {
            return Err(HarvestError::InvalidConfig(
                "worker-pool width must be at least 1".to_string(),
            ));
        }
        if self.llm_base_url.trim().is_empty() {
            return Err(HarvestError::InvalidConfig(
                "inference endpoint URL must not be empty".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(HarvestError::InvalidConfig(
                "model identifier must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
