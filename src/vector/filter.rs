//! Typed filter expressions and their SQL compilation.
//!
//! A filter is a conjunction of predicates over tag and numeric fields,
//! optionally combined with a lexical prefilter over the name fields. Tag
//! comparison is case-insensitive.

use rusqlite::types::Value;

/// Exact-match fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagField {
    Ndc,
    DrugClass,
    TherapeuticClass,
    DosageForm,
    StrengthUnit,
    DeaSchedule,
    IndicationKey,
    Manufacturer,
}

impl TagField {
    fn column(&self) -> &'static str {
        match self {
            TagField::Ndc => "ndc",
            TagField::DrugClass => "drug_class",
            TagField::TherapeuticClass => "therapeutic_class",
            TagField::DosageForm => "dosage_form",
            TagField::StrengthUnit => "strength_unit",
            TagField::DeaSchedule => "dea_schedule",
            TagField::IndicationKey => "indication_key",
            TagField::Manufacturer => "manufacturer",
        }
    }
}

/// Numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumField {
    GcnSeqno,
    StrengthValue,
}

impl NumField {
    fn column(&self) -> &'static str {
        match self {
            NumField::GcnSeqno => "gcn_seqno",
            NumField::StrengthValue => "strength_value",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    TagEq(TagField, String),
    TagIn(TagField, Vec<String>),
    NumEq(NumField, f64),
    NumRange(NumField, f64, f64),
    IsBrand(bool),
    IsGeneric(bool),
    /// Wildcard text match over `drug_name|brand_name|generic_name`.
    Text(String),
}

/// Conjunction of predicates. Empty means match-all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpr {
    pub predicates: Vec<Predicate>,
}

impl FilterExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Compile to a SQL `WHERE` clause body plus bound parameters.
    /// Returns `("1=1", [])` for the empty filter.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        if self.predicates.is_empty() {
            return ("1=1".to_string(), Vec::new());
        }

        let mut clauses = Vec::with_capacity(self.predicates.len());
        let mut params: Vec<Value> = Vec::new();

        for predicate in &self.predicates {
            match predicate {
                Predicate::TagEq(field, value) => {
                    clauses.push(format!("{} = ? COLLATE NOCASE", field.column()));
                    params.push(Value::Text(value.clone()));
                }
                Predicate::TagIn(field, values) => {
                    if values.is_empty() {
                        clauses.push("1=0".to_string());
                        continue;
                    }
                    let marks = vec!["?"; values.len()].join(", ");
                    clauses.push(format!("{} COLLATE NOCASE IN ({marks})", field.column()));
                    params.extend(values.iter().cloned().map(Value::Text));
                }
                Predicate::NumEq(field, value) => {
                    clauses.push(format!("{} = ?", field.column()));
                    params.push(Value::Real(*value));
                }
                Predicate::NumRange(field, lo, hi) => {
                    clauses.push(format!("{} BETWEEN ? AND ?", field.column()));
                    params.push(Value::Real(*lo));
                    params.push(Value::Real(*hi));
                }
                Predicate::IsBrand(wanted) => {
                    clauses.push("is_brand = ?".to_string());
                    params.push(Value::Integer(*wanted as i64));
                }
                Predicate::IsGeneric(wanted) => {
                    clauses.push("is_generic = ?".to_string());
                    params.push(Value::Integer(*wanted as i64));
                }
                Predicate::Text(term) => {
                    clauses.push(
                        "(drug_name LIKE ? OR brand_name LIKE ? OR generic_name LIKE ?)"
                            .to_string(),
                    );
                    let pattern = format!("%{}%", escape_like(term));
                    for _ in 0..3 {
                        params.push(Value::Text(pattern.clone()));
                    }
                }
            }
        }

        (clauses.join(" AND "), params)
    }

    /// In-memory evaluation, used by the test double.
    pub fn matches(&self, doc: &crate::model::DrugDocument) -> bool {
        self.predicates.iter().all(|p| match p {
            Predicate::TagEq(field, value) => tag_value(doc, *field).eq_ignore_ascii_case(value),
            Predicate::TagIn(field, values) => {
                let actual = tag_value(doc, *field);
                values.iter().any(|v| actual.eq_ignore_ascii_case(v))
            }
            Predicate::NumEq(field, value) => num_value(doc, *field) == *value,
            Predicate::NumRange(field, lo, hi) => {
                let actual = num_value(doc, *field);
                actual >= *lo && actual <= *hi
            }
            Predicate::IsBrand(wanted) => doc.is_brand == *wanted,
            Predicate::IsGeneric(wanted) => doc.is_generic == *wanted,
            Predicate::Text(term) => {
                let needle = term.to_uppercase();
                doc.drug_name.to_uppercase().contains(&needle)
                    || doc.brand_name.to_uppercase().contains(&needle)
                    || doc.generic_name.to_uppercase().contains(&needle)
            }
        })
    }
}

fn tag_value(doc: &crate::model::DrugDocument, field: TagField) -> String {
    match field {
        TagField::Ndc => doc.ndc.clone(),
        TagField::DrugClass => doc.drug_class.clone(),
        TagField::TherapeuticClass => doc.therapeutic_class.clone(),
        TagField::DosageForm => doc.dosage_form.as_str().to_string(),
        TagField::StrengthUnit => doc.strength_unit.as_str().to_string(),
        TagField::DeaSchedule => doc.dea_schedule.as_str().to_string(),
        TagField::IndicationKey => doc.indication_key.clone(),
        TagField::Manufacturer => doc.manufacturer.clone(),
    }
}

fn num_value(doc: &crate::model::DrugDocument, field: NumField) -> f64 {
    match field {
        NumField::GcnSeqno => doc.gcn_seqno as f64,
        NumField::StrengthValue => doc.strength_value,
    }
}

fn escape_like(term: &str) -> String {
    term.replace('%', "").replace('_', " ")
}
