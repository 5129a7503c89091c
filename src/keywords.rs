use std::collections::HashSet;

use camino::Utf8PathBuf;
use tracing::info;

use crate::domain::Keyword;
use crate::error::HarvestError;

/// Reads search keywords from a flat CSV/text source. With a named column
/// the first row is treated as a header; otherwise every row's first field
/// is a keyword.
#[derive(Debug, Clone)]
pub struct KeywordProvider {
    path: Utf8PathBuf,
    column: Option<String>,
}

impl KeywordProvider {
    pub fn new(path: Utf8PathBuf, column: Option<String>) -> Self {
        Self { path, column }
    }

    pub fn load(&self) -> Result<Vec<Keyword>, HarvestError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(self.column.is_some())
            .flexible(true)
            .from_path(self.path.as_std_path())
            .map_err(|err| HarvestError::KeywordInput(format!("{}: {err}", self.path)))?;

        let index = match &self.column {
            Some(name) => {
                let headers = reader
                    .headers()
                    .map_err(|err| HarvestError::KeywordInput(err.to_string()))?;
                headers
                    .iter()
                    .position(|header| header == name)
                    .ok_or_else(|| HarvestError::MissingKeywordColumn(name.clone()))?
            }
            None => 0,
        };

        let mut seen = HashSet::new();
        let mut keywords = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| HarvestError::KeywordInput(err.to_string()))?;
            let Some(field) = record.get(index) else {
                continue;
            };
            let Some(keyword) = Keyword::new(field) else {
                continue;
            };
            if seen.insert(keyword.clone()) {
                keywords.push(keyword);
            }
        }

        if keywords.is_empty() {
            return Err(HarvestError::KeywordInput(format!(
                "no keywords found in {}",
                self.path
            )));
        }
        info!("loaded {} keywords from {}", keywords.len(), self.path);
        Ok(keywords)
    }
}
