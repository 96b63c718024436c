use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;

pub const DEFAULT_MAX_FILTERING_RETRIES: u32 = 100;

/// What happens when filtering leaves no acceptable value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FilteringBehavior {
    /// Emit `null` and log a warning.
    #[default]
    ReturnNull,
    /// Abort the run.
    ThrowException,
}

/// Options for the generation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct GenerateOptions {
    /// Run seed. The schema's own `seed` is used when unset.
    pub seed: Option<u64>,
    /// Attempts per value when a generator cannot filter natively.
    pub max_filtering_retries: u32,
    pub filtering_behavior: FilteringBehavior,
    /// Keep unreferenced fields pending until the dataset is materialized.
    pub memory_optimized: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            seed: None,
            max_filtering_retries: DEFAULT_MAX_FILTERING_RETRIES,
            filtering_behavior: FilteringBehavior::ReturnNull,
            memory_optimized: false,
        }
    }
}

impl GenerateOptions {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.max_filtering_retries == 0 {
            return Err(GenerationError::InvalidOptions(
                "max_filtering_retries must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Summary of a generated collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub key: String,
    pub name: String,
    pub items_requested: u64,
    pub items_generated: u64,
}

/// Structured generation issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationIssue {
    pub level: String,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl GenerationIssue {
    pub fn warning(code: &str, message: impl Into<String>, path: Option<String>) -> Self {
        Self {
            level: "warning".to_string(),
            code: code.to_string(),
            message: message.into(),
            path,
        }
    }
}

/// Report for a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: String,
    pub seed: u64,
    pub memory_optimized: bool,
    pub collections: Vec<CollectionReport>,
    pub generator_usage: BTreeMap<String, u64>,
    /// Draws spent by retry-based filtering.
    pub filter_attempts: u64,
    pub filters_exhausted: u64,
    pub warnings_by_code: BTreeMap<String, u64>,
    pub warnings: Vec<GenerationIssue>,
    /// SHA-256 of the dataset JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub duration_ms: u64,
}

impl GenerationReport {
    pub fn new(run_id: String, seed: u64, memory_optimized: bool) -> Self {
        Self {
            run_id,
            seed,
            memory_optimized,
            collections: Vec::new(),
            generator_usage: BTreeMap::new(),
            filter_attempts: 0,
            filters_exhausted: 0,
            warnings_by_code: BTreeMap::new(),
            warnings: Vec::new(),
            fingerprint: None,
            duration_ms: 0,
        }
    }

    pub fn record_generator_usage(&mut self, id: &str) {
        *self.generator_usage.entry(id.to_string()).or_insert(0) += 1;
    }

    pub fn record_filter_attempts(&mut self, attempts: u32) {
        self.filter_attempts += u64::from(attempts);
    }

    pub fn record_filter_exhausted(&mut self) {
        self.filters_exhausted += 1;
    }

    /// Add a collection entry, replacing an earlier entry with the same key.
    pub fn record_collection(&mut self, collection: CollectionReport) {
        match self
            .collections
            .iter_mut()
            .find(|existing| existing.key == collection.key)
        {
            Some(existing) => *existing = collection,
            None => self.collections.push(collection),
        }
    }

    pub fn record_warning(&mut self, issue: GenerationIssue) {
        *self.warnings_by_code.entry(issue.code.clone()).or_insert(0) += 1;
        self.warnings.push(issue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_reject_zero_retries() {
        let options = GenerateOptions {
            max_filtering_retries: 0,
            ..GenerateOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(GenerationError::InvalidOptions(_))
        ));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: GenerateOptions =
            serde_json::from_str(r#"{"filtering_behavior": "throw_exception"}"#).expect("parse");
        assert_eq!(options.filtering_behavior, FilteringBehavior::ThrowException);
        assert_eq!(options.max_filtering_retries, DEFAULT_MAX_FILTERING_RETRIES);
        assert_eq!(options.seed, None);
    }
}
