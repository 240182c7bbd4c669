//! LLM reply validation into the closed [`ParsedQuery`] type.
//!
//! The model's JSON is treated as untrusted: unknown filter keys are
//! discarded (and reported, not errored) so prompt drift cannot widen the
//! filter surface; malformed values drop the filter they belong to.

use serde_json::Value;

use super::prompt;
use crate::llm::{ChatModel, LlmError, ResponseSchema};
use crate::model::{DeaSchedule, DosageForm, ParsedQuery, QueryFilters, StrengthFilter};

const PARSE_SCHEMA: ResponseSchema = ResponseSchema {
    required_keys: &["drug_terms", "filters"],
};

const RECOGNIZED_FILTERS: &[&str] = &[
    "dosage_form",
    "strength",
    "ndc",
    "gcn_seqno",
    "dea_schedule",
    "is_generic",
];

/// Result of query understanding; `parse` never fails.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub query: ParsedQuery,
    /// True when the minimal fallback parse was used.
    pub used_fallback: bool,
    /// Filter keys discarded during validation.
    pub dropped_filters: Vec<String>,
}

pub struct QueryParser<C> {
    chat: C,
    system_prompt: String,
}

impl<C: ChatModel> QueryParser<C> {
    pub fn new(chat: C) -> Self {
        Self {
            chat,
            system_prompt: prompt::system_prompt(),
        }
    }

    /// Understand `raw` into drug terms and filters. On LLM failure the raw
    /// input becomes the single drug term and search proceeds.
    pub async fn parse(&self, raw: &str) -> ParseOutcome {
        match self.chat.chat(&self.system_prompt, raw, &PARSE_SCHEMA).await {
            Ok(value) => {
                let (query, dropped_filters) = validate(&value);
                if !query.corrections.is_empty() {
                    tracing::info!(corrections = ?query.corrections, "preprocessor corrections");
                }
                ParseOutcome {
                    query,
                    used_fallback: false,
                    dropped_filters,
                }
            }
            Err(e) => {
                match e {
                    LlmError::InvalidResponse => {
                        tracing::warn!("LLM reply failed validation, using fallback parse")
                    }
                    other => tracing::warn!(error = %other, "LLM unavailable, using fallback parse"),
                }
                ParseOutcome {
                    query: ParsedQuery::fallback(raw),
                    used_fallback: true,
                    dropped_filters: Vec::new(),
                }
            }
        }
    }
}

/// Convert a conforming reply into a `ParsedQuery`, collecting the names of
/// discarded filters.
fn validate(value: &Value) -> (ParsedQuery, Vec<String>) {
    let terms: Vec<String> = value["drug_terms"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let mut dropped = Vec::new();
    let mut filters = QueryFilters::default();

    if let Some(obj) = value["filters"].as_object() {
        for (key, raw) in obj {
            match key.as_str() {
                "dosage_form" => match raw.as_str().and_then(DosageForm::normalize) {
                    Some(form) => filters.dosage_form = Some(form),
                    None => dropped.push("dosage_form".to_string()),
                },
                "strength" => match parse_strength(raw) {
                    Some(strength) => filters.strength = Some(strength),
                    None => dropped.push("strength".to_string()),
                },
                "ndc" => match parse_ndc(raw) {
                    Some(ndc) => filters.ndc = Some(ndc),
                    None => dropped.push("ndc".to_string()),
                },
                "gcn_seqno" => match raw.as_i64() {
                    Some(gcn) => filters.gcn_seqno = Some(gcn),
                    None => dropped.push("gcn_seqno".to_string()),
                },
                "dea_schedule" => {
                    let schedule = raw
                        .as_str()
                        .map(DeaSchedule::normalize)
                        .unwrap_or(DeaSchedule::None);
                    if schedule == DeaSchedule::None {
                        dropped.push("dea_schedule".to_string());
                    } else {
                        filters.dea_schedule = Some(schedule);
                    }
                }
                "is_generic" => match raw.as_bool() {
                    Some(wanted) => filters.is_generic = Some(wanted),
                    None => dropped.push("is_generic".to_string()),
                },
                unknown => {
                    debug_assert!(!RECOGNIZED_FILTERS.contains(&unknown));
                    tracing::debug!(key = unknown, "discarding unrecognized filter key");
                    dropped.push(unknown.to_string());
                }
            }
        }
    }

    let mut query = ParsedQuery::from_terms(terms, filters);
    query.corrections = value["corrections"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    (query, dropped)
}

fn parse_strength(raw: &Value) -> Option<StrengthFilter> {
    let value = raw["value"].as_f64()?;
    if value <= 0.0 {
        return None;
    }
    let unit = raw["unit"].as_str()?.trim().to_uppercase();
    let mut strength = StrengthFilter::new(value, &unit);
    if let Some(tolerance) = raw["tolerance"].as_f64() {
        if (0.0..1.0).contains(&tolerance) {
            strength.tolerance = tolerance;
        }
    }
    Some(strength)
}

/// Accept `00310757090`, `0031-0757-090`, etc.; must reduce to 11 digits.
fn parse_ndc(raw: &Value) -> Option<String> {
    let digits: String = raw
        .as_str()?
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    (digits.len() == 11).then_some(digits)
}
