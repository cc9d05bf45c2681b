//! Metadata service - category and tag auto-creation

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::{Category, Tag};
use crate::ports::Repository;
use crate::services::import::ImportError;

/// Category and tag creation for an import batch
pub struct MetadataService {
    repository: Arc<dyn Repository>,
}

impl MetadataService {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Make sure every named category and tag exists
    ///
    /// Names are compared case-insensitively against what is stored. Each
    /// missing name is created on its own, so one failure does not stop the
    /// others. The step as a whole fails when the existing lists cannot be
    /// read or when every attempted creation failed.
    pub async fn ensure(
        &self,
        categories: &[String],
        tags: &[String],
    ) -> Result<MetadataResult, ImportError> {
        let (existing_categories, existing_tags) =
            tokio::try_join!(self.repository.get_categories(), self.repository.get_tags())
                .map_err(|e| ImportError::MetadataPhase(format!("could not list categories/tags: {}", e)))?;

        let known_categories: HashSet<String> = existing_categories
            .iter()
            .map(|c| c.name.to_lowercase())
            .collect();
        let known_tags: HashSet<String> = existing_tags.iter().map(|t| t.name.to_lowercase()).collect();

        let mut result = MetadataResult::default();

        for name in missing(categories, &known_categories) {
            match self.repository.add_category(&Category::new(name.clone())).await {
                Ok(()) => {
                    result.categories_created += 1;
                    result.results.push(MetadataResultEntry::created("category", &name));
                }
                Err(e) => {
                    tracing::warn!(category = %name, error = %e, "category creation failed");
                    result.failed_categories.insert(name.to_lowercase());
                    result.results.push(MetadataResultEntry::failed("category", &name, e.to_string()));
                }
            }
        }

        for name in missing(tags, &known_tags) {
            match self.repository.add_tag(&Tag::new(name.clone())).await {
                Ok(()) => {
                    result.tags_created += 1;
                    result.results.push(MetadataResultEntry::created("tag", &name));
                }
                Err(e) => {
                    tracing::warn!(tag = %name, error = %e, "tag creation failed");
                    result.failed_tags.insert(name.to_lowercase());
                    result.results.push(MetadataResultEntry::failed("tag", &name, e.to_string()));
                }
            }
        }

        let attempted = result.results.len();
        let failed = result.failed_categories.len() + result.failed_tags.len();
        if attempted > 0 && failed == attempted {
            return Err(ImportError::MetadataPhase(result.failure_summary()));
        }

        tracing::info!(
            categories = result.categories_created,
            tags = result.tags_created,
            failed,
            "metadata ensured"
        );
        Ok(result)
    }
}

/// Names not yet stored, first spelling kept, case-insensitive
fn missing(names: &[String], known: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| {
            let key = n.to_lowercase();
            !known.contains(&key) && seen.insert(key)
        })
        .map(str::to_string)
        .collect()
}

/// Outcome of [`MetadataService::ensure`]
#[derive(Debug, Default, Serialize)]
pub struct MetadataResult {
    pub categories_created: usize,
    pub tags_created: usize,
    /// Lowercased names that could not be created
    pub failed_categories: HashSet<String>,
    pub failed_tags: HashSet<String>,
    pub results: Vec<MetadataResultEntry>,
}

impl MetadataResult {
    pub fn category_failed(&self, name: &str) -> bool {
        self.failed_categories.contains(&name.to_lowercase())
    }

    pub fn tag_failed(&self, name: &str) -> bool {
        self.failed_tags.contains(&name.to_lowercase())
    }

    /// Human-readable list of failures
    pub fn failures(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "{} '{}': {}",
                    r.kind,
                    r.name,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect()
    }

    fn failure_summary(&self) -> String {
        self.failures().join("; ")
    }
}

/// Individual category/tag result entry
#[derive(Debug, Serialize)]
pub struct MetadataResultEntry {
    pub kind: &'static str,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetadataResultEntry {
    fn created(kind: &'static str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            success: true,
            error: None,
        }
    }

    fn failed(kind: &'static str, name: &str, error: String) -> Self {
        Self {
            kind,
            name: name.to_string(),
            success: false,
            error: Some(error),
        }
    }
}
