//! Filter plumbing between the parsed query and the vector store.
//!
//! The auto-apply whitelist decides which parsed filters become predicates
//! on the Phase-1/Phase-2 queries. Strength is deliberately not one of them:
//! it is applied post-expansion so class recall is not pruned early.

use crate::config::SearchTuning;
use crate::model::{DosageForm, QueryFilters};
use crate::vector::{FilterExpr, NumField, Predicate, TagField};

/// The store tags a requested dosage form matches: its synonym set when one
/// is configured, otherwise just itself.
pub fn dosage_form_tags(form: DosageForm, tuning: &SearchTuning) -> Vec<String> {
    match tuning.dosage_form_synonyms.get(form.as_str()) {
        Some(set) => set.iter().cloned().collect(),
        None => vec![form.as_str().to_string()],
    }
}

/// Build the whitelisted conjunction applied before ANN traversal.
pub fn auto_filter_expr(filters: &QueryFilters, tuning: &SearchTuning) -> FilterExpr {
    let allowed = &tuning.auto_apply_filters;
    let mut expr = FilterExpr::new();

    if allowed.contains("dosage_form") {
        if let Some(form) = filters.dosage_form {
            expr = expr.and(Predicate::TagIn(
                TagField::DosageForm,
                dosage_form_tags(form, tuning),
            ));
        }
    }
    if allowed.contains("dea_schedule") {
        if let Some(schedule) = filters.dea_schedule {
            expr = expr.and(Predicate::TagEq(
                TagField::DeaSchedule,
                schedule.as_str().to_string(),
            ));
        }
    }
    if allowed.contains("is_generic") {
        if let Some(wanted) = filters.is_generic {
            expr = expr.and(Predicate::IsGeneric(wanted));
        }
    }
    if allowed.contains("ndc") {
        if let Some(ndc) = &filters.ndc {
            expr = expr.and(Predicate::TagEq(TagField::Ndc, ndc.clone()));
        }
    }
    if allowed.contains("gcn_seqno") {
        if let Some(gcn) = filters.gcn_seqno {
            expr = expr.and(Predicate::NumEq(NumField::GcnSeqno, gcn as f64));
        }
    }
    expr
}
