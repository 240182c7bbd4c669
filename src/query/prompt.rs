//! The static system prompt for query understanding.
//!
//! Built once per process and reused verbatim on every request so the
//! provider's prompt cache stays warm.

/// Curated abbreviation and class expansions. Kept small and reviewed by a
/// pharmacist; additions go through the same review.
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("ASA", "aspirin"),
    ("APAP", "acetaminophen"),
    ("HCTZ", "hydrochlorothiazide"),
    ("MTX", "methotrexate"),
    ("PCN", "penicillin"),
    ("NTG", "nitroglycerin"),
    ("ACEI", "lisinopril, enalapril, ramipril, benazepril"),
    ("ARB", "losartan, valsartan, irbesartan, olmesartan"),
    ("PPI", "omeprazole, pantoprazole, esomeprazole, lansoprazole"),
    ("SSRI", "sertraline, fluoxetine, escitalopram, citalopram, paroxetine"),
    ("NSAID", "ibuprofen, naproxen, meloxicam, diclofenac"),
    (
        "statin",
        "atorvastatin, rosuvastatin, simvastatin, pravastatin, lovastatin",
    ),
];

/// Dosage form vocabulary the model may emit in `filters.dosage_form`.
pub const DOSAGE_FORM_VOCABULARY: &str = "TABLET, CAPSULE, CREAM, GEL, OINTMENT, SOLUTION, SUSPENSION, INJECTION, VIAL, \
     SYRINGE, POWDER, PATCH, SPRAY, INHALER, DROPS, SUPPOSITORY, OTHER";

/// Render the full system prompt.
pub fn system_prompt() -> String {
    let mut table = String::new();
    for (abbrev, expansion) in ABBREVIATIONS {
        table.push_str(&format!("- {abbrev} -> {expansion}\n"));
    }

    format!(
        r#"You are a drug-search query preprocessor for prescribers. Convert the user's
free-form query into a JSON object with exactly these keys:

{{
  "drug_terms": ["<canonical drug name>", ...],
  "filters": {{}},
  "corrections": ["<note about any correction you made>", ...]
}}

Rules:

1. drug_terms contains ONLY canonical drug names (generic or brand), lowercase.
   NEVER put condition words in drug_terms. When the query names a condition
   ("high cholesterol", "high BP"), expand it to the drugs that treat it
   ("atorvastatin", "rosuvastatin", ... / "lisinopril", "amlodipine", ...).
2. Expand abbreviations using this table:
{table}
3. Correct obvious misspellings (up to 3 letter edits) only when a single drug
   is clearly intended; note each correction in "corrections".
4. Recognized filter keys, emit only what the query asks for:
   - "dosage_form": one of {vocabulary}. Normalize loose phrasing
     ("gel packet" -> "GEL", "cream (gram)" -> "CREAM"); use "INJECTION" for
     any injectable phrasing.
   - "strength": {{"value": <number>, "unit": "<MG|ML|MCG|G|%|UNIT>",
     "tolerance": <fraction, omit for default>}}
   - "ndc": 11-digit code as a string, digits only.
   - "gcn_seqno": integer.
   - "dea_schedule": one of "2", "3", "4", "5".
   - "is_generic": boolean.
5. Do not invent filters the query does not ask for. Never emit other keys.

Respond with the JSON object only."#,
        table = table,
        vocabulary = DOSAGE_FORM_VOCABULARY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_abbreviation_table() {
        let prompt = system_prompt();
        assert!(prompt.contains("ASA -> aspirin"));
        assert!(prompt.contains("rosuvastatin"));
    }

    #[test]
    fn prompt_bans_condition_words() {
        assert!(system_prompt().contains("NEVER put condition words"));
    }

    #[test]
    fn prompt_is_stable_across_calls() {
        // A byte-identical prompt is what makes provider-side caching work.
        assert_eq!(system_prompt(), system_prompt());
    }
}
