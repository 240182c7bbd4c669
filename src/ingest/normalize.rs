//! Deterministic catalog-row to search-document normalization.
//!
//! Every rule here is pure: the same row always produces the same document
//! (embedding and indexing timestamp aside), which is what makes re-ingest
//! idempotent and resume equivalent to an uninterrupted run.

use chrono::{DateTime, Utc};

use crate::catalog::CatalogRow;
use crate::model::{DeaSchedule, DosageForm, DrugDocument, StrengthUnit};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum NormalizeError {
    #[error("ndc '{0}' is not an 11-digit code")]
    BadNdc(String),
    #[error("row {0} has an empty name")]
    EmptyName(String),
}

/// Build the searchable document for one catalog row. The embedding is left
/// empty; the pipeline fills it from `embedding_text`.
pub fn normalize_row(
    row: &CatalogRow,
    indexed_at: DateTime<Utc>,
) -> Result<DrugDocument, NormalizeError> {
    let ndc: String = row.ndc.chars().filter(|c| c.is_ascii_digit()).collect();
    if !DrugDocument::is_valid_ndc(&ndc) {
        return Err(NormalizeError::BadNdc(row.ndc.clone()));
    }

    let drug_name = row.label_name.trim().to_uppercase();
    if drug_name.is_empty() {
        return Err(NormalizeError::EmptyName(ndc));
    }

    let brand_name = row
        .brand_name
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_uppercase();
    let generic_name = row
        .generic_name
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    // Brand flags come from `innov` alone: '1' is the innovator product,
    // everything else (including blank) is generic, so the brand/generic
    // exclusivity always holds.
    let is_brand = row.innov.as_deref().map(str::trim) == Some("1");

    let drug_class = class_tag(row.drug_class.as_deref().unwrap_or(""), &generic_name);
    let therapeutic_class = row
        .therapeutic_class
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_string();

    let dosage_form = DosageForm::normalize(row.dosage_form.as_deref().unwrap_or(""))
        .unwrap_or(DosageForm::Other);
    let (strength_value, strength_unit) = parse_strength(row.strength.as_deref().unwrap_or(""));
    let dea_schedule = DeaSchedule::normalize(row.dea_class.as_deref().unwrap_or(""));

    let manufacturer = row
        .manufacturer
        .as_deref()
        .or(row.labeler_id.as_deref())
        .unwrap_or("")
        .trim()
        .to_uppercase();

    let indication_key = if is_brand && !brand_name.is_empty() {
        format!("brand:{brand_name}")
    } else {
        format!("class:{drug_class}")
    };

    Ok(DrugDocument {
        ndc,
        drug_name,
        brand_name,
        generic_name,
        gcn_seqno: row.gcn_seqno.unwrap_or(0),
        drug_class,
        therapeutic_class,
        dosage_form,
        strength_value,
        strength_unit,
        manufacturer,
        is_brand,
        is_generic: !is_brand,
        dea_schedule,
        indication_key,
        embedding: Vec::new(),
        indexed_at,
    })
}

/// The text embedded for a document: names plus class descriptors, in a
/// fixed order.
pub fn embedding_text(doc: &DrugDocument) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(4);
    parts.push(doc.drug_name.as_str());
    if !doc.generic_name.is_empty() {
        parts.push(doc.generic_name.as_str());
    }
    if !doc.brand_name.is_empty() {
        parts.push(doc.brand_name.as_str());
    }
    if !doc.therapeutic_class.is_empty() {
        parts.push(doc.therapeutic_class.as_str());
    }
    parts.join(" ")
}

/// Ingredient-class tag: uppercase, underscore-separated. Falls back to the
/// generic name when the catalog has no class.
fn class_tag(raw_class: &str, generic_name: &str) -> String {
    let source = if raw_class.trim().is_empty() {
        generic_name
    } else {
        raw_class
    };
    source
        .trim()
        .to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Pull `(value, unit)` out of FDB strength strings: `"200 MG/ML"`,
/// `"10MG"`, `"0.5 %"`. Compound units keep the leading unit.
fn parse_strength(raw: &str) -> (f64, StrengthUnit) {
    static STRENGTH: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let pattern = STRENGTH.get_or_init(|| {
        regex::Regex::new(r"(?<value>\d+(?:\.\d+)?)\s*(?<unit>[A-Za-z]+|%)?").expect("valid regex")
    });

    let Some(captures) = pattern.captures(raw.trim()) else {
        return (0.0, StrengthUnit::None);
    };
    let Ok(value) = captures["value"].parse::<f64>() else {
        return (0.0, StrengthUnit::None);
    };
    let unit = captures
        .name("unit")
        .map(|m| StrengthUnit::normalize(m.as_str()))
        .unwrap_or(StrengthUnit::None);
    (value, unit)
}
