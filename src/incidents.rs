//! Incident matcher: a fixed, pre-embedded set of incident reports searched
//! by cosine similarity, independent of the document store.
//!
//! The whole record set is loaded and embedded once per process lifetime.
//! Matching is a brute-force linear scan over the embedding matrix — the
//! incident set is small enough that an index structure would be overhead.
//! Also provides structured filtering over the loaded records; the records
//! arrive already structured (field extraction from raw report text happens
//! upstream).

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::embedding::{embed_query, normalize, EmbeddingProvider};

/// A structured incident report. Field names mirror the report source's
/// column headers. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    #[serde(rename = "Incident Number", default)]
    pub number: Option<i64>,
    #[serde(rename = "Severity", default)]
    pub severity: String,
    #[serde(rename = "Severity Level", default)]
    pub severity_level: String,
    #[serde(rename = "Date", default)]
    pub date: String,
    #[serde(rename = "Location", default)]
    pub location: String,
    #[serde(rename = "Pipeline Operator", default)]
    pub operator: String,
    #[serde(rename = "Material Released", default)]
    pub material: String,
    #[serde(rename = "PHMSA Guide Reference", default)]
    pub guide_reference: String,
    #[serde(rename = "Incident Description", default)]
    pub description: String,
    #[serde(rename = "Response Actions", default)]
    pub response_actions: String,
    #[serde(rename = "Casualties & Injuries", default)]
    pub casualties: String,
}

impl IncidentRecord {
    /// The text that gets embedded for similarity matching.
    fn embedding_text(&self) -> String {
        let number = self
            .number
            .map(|n| n.to_string())
            .unwrap_or_default();
        format!(
            "Incident {}: {} {}",
            number, self.description, self.response_actions
        )
    }
}

/// An incident record annotated with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentMatch {
    #[serde(flatten)]
    pub record: IncidentRecord,
    pub similarity: f32,
}

/// Pre-embedded incident set.
#[derive(Default)]
pub struct IncidentMatcher {
    records: Vec<IncidentRecord>,
    /// Unit-norm embedding per record, row-aligned with `records`.
    embeddings: Vec<Vec<f32>>,
}

impl IncidentMatcher {
    /// An empty matcher; every query returns no matches.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a JSON array of incident reports and embed them once.
    ///
    /// A missing file is not an error: the matcher starts empty and the
    /// condition is logged, matching the empty-result policy.
    pub async fn load(path: &Path, provider: &dyn EmbeddingProvider) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("incident report file not found: {}", path.display());
            return Ok(Self::empty());
        }

        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read incident file: {}", path.display()))?;
        let records: Vec<IncidentRecord> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse incident file: {}", path.display()))?;

        Self::from_records(records, provider).await
    }

    /// Embed an already-loaded record set.
    pub async fn from_records(
        records: Vec<IncidentRecord>,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Self> {
        if records.is_empty() {
            return Ok(Self::empty());
        }

        tracing::info!("embedding {} incidents", records.len());
        let texts: Vec<String> = records.iter().map(|r| r.embedding_text()).collect();
        let embeddings = provider
            .embed(&texts)
            .await?
            .into_iter()
            .map(|v| normalize(&v))
            .collect();

        Ok(Self {
            records,
            embeddings,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IncidentRecord] {
        &self.records
    }

    /// Top-`k` records by cosine similarity to an already-embedded query,
    /// descending, keeping only entries at or above `threshold`.
    pub fn similar_to_vector(
        &self,
        query_vec: &[f32],
        k: usize,
        threshold: f32,
    ) -> Vec<IncidentMatch> {
        if self.records.is_empty() || k == 0 {
            return Vec::new();
        }

        let query = normalize(query_vec);
        let mut scored: Vec<(usize, f32)> = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let dot: f32 = row.iter().zip(query.iter()).map(|(x, y)| x * y).sum();
                (i, dot)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .filter(|(_, score)| *score >= threshold)
            .map(|(i, score)| IncidentMatch {
                record: self.records[i].clone(),
                similarity: score,
            })
            .collect()
    }

    /// Embed the query and return similar incidents.
    pub async fn similar_incidents(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<IncidentMatch>> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(provider, query).await?;
        Ok(self.similar_to_vector(&query_vec, k, threshold))
    }
}

// ============ Structured filtering ============

/// Structured filter parameters, typically produced by
/// [`crate::llm::parse_filters`] from a natural-language query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IncidentFilters {
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub location_contains: Option<String>,
    #[serde(default)]
    pub from_year: Option<i32>,
    #[serde(default)]
    pub to_year: Option<i32>,
    #[serde(default)]
    pub has_injuries: Option<bool>,
    #[serde(default)]
    pub severity: Option<String>,
}

impl IncidentFilters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Apply filters to a record set, returning matching records in input order.
pub fn filter_incidents(records: &[IncidentRecord], filters: &IncidentFilters) -> Vec<IncidentRecord> {
    records
        .iter()
        .filter(|r| {
            if let Some(ref material) = filters.material {
                if !contains_ci(&r.material, material) {
                    return false;
                }
            }
            if let Some(ref location) = filters.location_contains {
                if !contains_ci(&r.location, location) {
                    return false;
                }
            }
            if filters.from_year.is_some() || filters.to_year.is_some() {
                let Some(year) = parse_year(&r.date) else {
                    return false;
                };
                if let Some(from) = filters.from_year {
                    if year < from {
                        return false;
                    }
                }
                if let Some(to) = filters.to_year {
                    if year > to {
                        return false;
                    }
                }
            }
            if let Some(wants_injuries) = filters.has_injuries {
                if reports_injuries(&r.casualties) != wants_injuries {
                    return false;
                }
            }
            if let Some(ref severity) = filters.severity {
                if !contains_ci(&r.severity, severity.trim()) {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect()
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Whether a casualties field describes actual injuries, as opposed to
/// "no injuries" / "none reported" phrasing.
fn reports_injuries(casualties: &str) -> bool {
    let text = casualties.to_lowercase();
    text.contains("injur") && !text.contains("no injur") && !text.contains("none reported")
}

/// Best-effort year extraction from a free-form date field.
fn parse_year(date: &str) -> Option<i32> {
    let date = date.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(date, fmt) {
            return Some(d.year());
        }
    }
    // Fall back to the first plausible four-digit number.
    date.split(|c: char| !c.is_ascii_digit())
        .filter_map(|token| token.parse::<i32>().ok())
        .find(|y| (1900..=2100).contains(y))
}
