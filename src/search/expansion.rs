//! Class collection for the expansion pass.
//!
//! Expansion runs exactly once, over the combined Phase-1 hit set. Running
//! it per drug in the multi-drug path would multiply store load and skew
//! dedup toward earlier terms.

use std::collections::BTreeSet;

use crate::model::DrugDocument;

/// Distinct non-blacklisted class values observed in the vector hits,
/// in first-seen order.
pub fn collect_classes(
    hits: &[DrugDocument],
    blacklist: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let mut drug_classes = Vec::new();
    let mut therapeutic_classes = Vec::new();
    let mut seen_drug = BTreeSet::new();
    let mut seen_thera = BTreeSet::new();

    for doc in hits {
        let drug_class = doc.drug_class.trim();
        if !drug_class.is_empty()
            && !is_blacklisted(drug_class, blacklist)
            && seen_drug.insert(drug_class.to_string())
        {
            drug_classes.push(drug_class.to_string());
        }

        let therapeutic = doc.therapeutic_class.trim();
        if !therapeutic.is_empty()
            && !is_blacklisted(therapeutic, blacklist)
            && seen_thera.insert(therapeutic.to_string())
        {
            therapeutic_classes.push(therapeutic.to_string());
        }
    }

    (drug_classes, therapeutic_classes)
}

fn is_blacklisted(class: &str, blacklist: &BTreeSet<String>) -> bool {
    blacklist.iter().any(|b| b.eq_ignore_ascii_case(class))
}
