//! Ranked drug-group results.

use serde::{Deserialize, Serialize};

use super::document::{DosageForm, DrugDocument, StrengthUnit};

/// Provenance of a result. Priority on dedup conflicts: vector wins over
/// pharmacological wins over therapeutic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Vector,
    Pharmacological,
    Therapeutic,
}

impl MatchType {
    pub fn priority(&self) -> u8 {
        match self {
            MatchType::Vector => 2,
            MatchType::Pharmacological => 1,
            MatchType::Therapeutic => 0,
        }
    }
}

/// One packaging/strength variant within a family. Collapsed by
/// `(manufacturer, strength_value, strength_unit, dosage_form)`; every
/// distinct NDC of the tuple is preserved in `ndcs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub ndcs: Vec<String>,
    pub manufacturer: String,
    pub strength_value: f64,
    pub strength_unit: StrengthUnit,
    pub dosage_form: DosageForm,
}

/// One returned drug group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Brand name for brand families, drug_class (or generic name) otherwise.
    pub family_key: String,
    pub representative: DrugDocument,
    pub variants: Vec<Variant>,
    pub match_type: MatchType,
    /// Cosine similarity in [0, 1] for vector matches, 0 for class matches.
    pub similarity: f64,
    #[serde(default)]
    pub indications: Vec<String>,
}

impl SearchResult {
    /// Sort key implementing the result ordering: match-type priority
    /// descending, then similarity descending, then representative name
    /// ascending within the class tiers.
    pub fn ordering_key(&self) -> (std::cmp::Reverse<u8>, std::cmp::Reverse<u64>, String) {
        let similarity_bits = if self.match_type == MatchType::Vector {
            // f64 in [0,1]; the raw bit pattern preserves order for
            // non-negative floats.
            self.similarity.max(0.0).to_bits()
        } else {
            0
        };
        (
            std::cmp::Reverse(self.match_type.priority()),
            std::cmp::Reverse(similarity_bits),
            self.representative.drug_name.clone(),
        )
    }
}
