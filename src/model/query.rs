//! The parsed form of a prescriber query. Ephemeral, one per request.

use serde::{Deserialize, Serialize};

use super::{DeaSchedule, DosageForm};

/// Strength constraint, applied post-expansion as a numeric range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthFilter {
    pub value: f64,
    pub unit: String,
    /// Absolute fraction of `value`; 0.05 unless the query says otherwise.
    pub tolerance: f64,
}

impl StrengthFilter {
    pub fn new(value: f64, unit: &str) -> Self {
        Self {
            value,
            unit: unit.to_string(),
            tolerance: 0.05,
        }
    }

    /// Inclusive `[value·(1−tol), value·(1+tol)]` range.
    pub fn range(&self) -> (f64, f64) {
        (
            self.value * (1.0 - self.tolerance),
            self.value * (1.0 + self.tolerance),
        )
    }

    /// Whether a candidate strength satisfies this filter. Unit comparison
    /// is case-insensitive; zero tolerance means exact value match.
    pub fn matches(&self, value: f64, unit: &str) -> bool {
        let (lo, hi) = self.range();
        value >= lo && value <= hi && unit.eq_ignore_ascii_case(&self.unit)
    }
}

/// The restricted filter set the preprocessor may emit. Anything outside
/// these keys is dropped before it reaches the search engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dosage_form: Option<DosageForm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<StrengthFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcn_seqno: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dea_schedule: Option<DeaSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_generic: Option<bool>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.dosage_form.is_none()
            && self.strength.is_none()
            && self.ndc.is_none()
            && self.gcn_seqno.is_none()
            && self.dea_schedule.is_none()
            && self.is_generic.is_none()
    }
}

/// Output of query understanding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// Canonical drug names, lowercase, deduplicated preserving order.
    pub drug_terms: Vec<String>,
    /// `drug_terms` joined by single spaces; the string embedded downstream.
    pub search_text: String,
    pub filters: QueryFilters,
    /// Log-only; never affects search.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrections: Vec<String>,
}

impl ParsedQuery {
    /// Build from terms, normalizing case and deduplicating in order.
    pub fn from_terms(terms: Vec<String>, filters: QueryFilters) -> Self {
        let mut seen = std::collections::BTreeSet::new();
        let drug_terms: Vec<String> = terms
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.clone()))
            .collect();
        let search_text = drug_terms.join(" ");
        Self {
            drug_terms,
            search_text,
            filters,
            corrections: Vec::new(),
        }
    }

    /// Minimal parse used when the LLM fails: the raw input becomes the one
    /// drug term and no filters are applied. Search proceeds regardless.
    pub fn fallback(raw: &str) -> Self {
        Self::from_terms(vec![raw.to_string()], QueryFilters::default())
    }
}
