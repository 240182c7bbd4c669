//! Family grouping and variant collapse.

use std::collections::BTreeMap;

use crate::model::{DrugDocument, MatchType, SearchResult, Variant};

/// A deduplicated candidate after classification: one per NDC, carrying its
/// winning match type and vector score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub doc: DrugDocument,
    pub match_type: MatchType,
    pub score: f32,
}

/// Family key: brand name for brand drugs, else ingredient class, else
/// generic name.
pub fn family_key(doc: &DrugDocument) -> String {
    if doc.is_brand && !doc.brand_name.trim().is_empty() {
        doc.brand_name.trim().to_string()
    } else if !doc.drug_class.trim().is_empty() {
        doc.drug_class.trim().to_string()
    } else {
        doc.generic_name.trim().to_string()
    }
}

/// Group candidates into results.
///
/// Per family: the match type is the highest-priority one present, the
/// similarity is the best vector score, and the representative is the
/// lexicographically lowest NDC among members of that match type. Variants
/// collapse on `(manufacturer, strength_value, strength_unit, dosage_form)`
/// with all NDCs of a tuple preserved.
pub fn group_candidates(candidates: Vec<Candidate>) -> Vec<SearchResult> {
    let mut families: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        families
            .entry(family_key(&candidate.doc))
            .or_default()
            .push(candidate);
    }

    let mut results = Vec::with_capacity(families.len());
    for (key, members) in families {
        let best_priority = members
            .iter()
            .map(|c| c.match_type.priority())
            .max()
            .unwrap_or(0);
        let match_type = members
            .iter()
            .find(|c| c.match_type.priority() == best_priority)
            .map(|c| c.match_type)
            .unwrap_or(MatchType::Therapeutic);
        let similarity = members
            .iter()
            .filter(|c| c.match_type == MatchType::Vector)
            .map(|c| c.score as f64)
            .fold(0.0, f64::max);

        let representative = members
            .iter()
            .filter(|c| c.match_type.priority() == best_priority)
            .map(|c| &c.doc)
            .min_by(|a, b| a.ndc.cmp(&b.ndc))
            .cloned();
        let Some(representative) = representative else {
            continue;
        };

        // Variant collapse. Keys sort deterministically via BTreeMap.
        let mut variants: BTreeMap<(String, String, String, String), Variant> = BTreeMap::new();
        for member in &members {
            let doc = &member.doc;
            let key = (
                doc.manufacturer.clone(),
                format!("{:.6}", doc.strength_value),
                doc.strength_unit.as_str().to_string(),
                doc.dosage_form.as_str().to_string(),
            );
            let variant = variants.entry(key).or_insert_with(|| Variant {
                ndcs: Vec::new(),
                manufacturer: doc.manufacturer.clone(),
                strength_value: doc.strength_value,
                strength_unit: doc.strength_unit,
                dosage_form: doc.dosage_form,
            });
            if !variant.ndcs.contains(&doc.ndc) {
                variant.ndcs.push(doc.ndc.clone());
            }
        }
        let mut variants: Vec<Variant> = variants.into_values().collect();
        for variant in &mut variants {
            variant.ndcs.sort();
        }

        results.push(SearchResult {
            family_key: key,
            representative,
            variants,
            match_type,
            similarity,
            indications: Vec::new(),
        });
    }
    results
}
