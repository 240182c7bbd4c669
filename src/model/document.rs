//! The denormalized search document, one per NDC, plus its closed
//! vocabularies. Documents are created by the ingestion pipeline and are
//! immutable between ingests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::InvalidEnum;

/// Embedding dimension for all stored and query vectors.
pub const EMBEDDING_DIM: usize = 1024;

/// Generate an enum with `as_str` + `FromStr`, serialized through its wire
/// string so tags like `"%"` and `""` round-trip exactly.
macro_rules! tag_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            pub const ALL: &'static [$name] = &[$(Self::$variant),+];
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnum;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

tag_enum!(DosageForm {
    Tablet => "TABLET",
    Capsule => "CAPSULE",
    Cream => "CREAM",
    Gel => "GEL",
    Ointment => "OINTMENT",
    Solution => "SOLUTION",
    Suspension => "SUSPENSION",
    Injection => "INJECTION",
    Vial => "VIAL",
    Syringe => "SYRINGE",
    Powder => "POWDER",
    Patch => "PATCH",
    Spray => "SPRAY",
    Inhaler => "INHALER",
    Drops => "DROPS",
    Suppository => "SUPPOSITORY",
    Other => "OTHER",
});

tag_enum!(StrengthUnit {
    Mg => "MG",
    Ml => "ML",
    Mcg => "MCG",
    G => "G",
    Percent => "%",
    Unit => "UNIT",
    None => "",
});

tag_enum!(DeaSchedule {
    None => "",
    Two => "2",
    Three => "3",
    Four => "4",
    Five => "5",
});

impl DosageForm {
    /// Map a loose dosage form description onto the closed vocabulary.
    ///
    /// Handles FDB form strings (`TAB`, `CREAM (GRAM)`, `GEL PACKET`,
    /// `SOLN, INJ`) as well as plain-English filter values from the query
    /// preprocessor. Returns `None` when nothing in the description maps.
    pub fn normalize(raw: &str) -> Option<DosageForm> {
        let upper = raw.trim().to_uppercase();
        if upper.is_empty() {
            return None;
        }
        if let Ok(exact) = upper.parse() {
            return Some(exact);
        }

        // Keyword table, checked in order. Specific forms (VIAL, SYRINGE)
        // win over their parent route (INJECTION).
        const KEYWORDS: &[(&str, DosageForm)] = &[
            ("VIAL", DosageForm::Vial),
            ("SYRINGE", DosageForm::Syringe),
            ("AMPUL", DosageForm::Vial),
            ("INJ", DosageForm::Injection),
            ("TAB", DosageForm::Tablet),
            ("CAP", DosageForm::Capsule),
            ("CREAM", DosageForm::Cream),
            ("GEL", DosageForm::Gel),
            ("OINT", DosageForm::Ointment),
            ("SUSP", DosageForm::Suspension),
            ("SOLN", DosageForm::Solution),
            ("SOLUTION", DosageForm::Solution),
            ("POWD", DosageForm::Powder),
            ("PWDR", DosageForm::Powder),
            ("PATCH", DosageForm::Patch),
            ("TRANSDERMAL", DosageForm::Patch),
            ("SPRAY", DosageForm::Spray),
            ("INHAL", DosageForm::Inhaler),
            ("AEROSOL", DosageForm::Inhaler),
            ("DROP", DosageForm::Drops),
            ("SUPP", DosageForm::Suppository),
            ("LIQUID", DosageForm::Solution),
            ("SYRUP", DosageForm::Solution),
            ("ELIXIR", DosageForm::Solution),
            ("LOTION", DosageForm::Cream),
        ];

        KEYWORDS
            .iter()
            .find(|(kw, _)| upper.contains(kw))
            .map(|(_, form)| *form)
    }
}

impl StrengthUnit {
    /// Case-insensitive unit parse, tolerant of common FDB spellings.
    pub fn normalize(raw: &str) -> StrengthUnit {
        match raw.trim().to_uppercase().as_str() {
            "MG" => StrengthUnit::Mg,
            "ML" => StrengthUnit::Ml,
            "MCG" | "UG" => StrengthUnit::Mcg,
            "G" | "GM" | "GRAM" => StrengthUnit::G,
            "%" | "PERCENT" => StrengthUnit::Percent,
            "UNIT" | "UNITS" | "IU" => StrengthUnit::Unit,
            _ => StrengthUnit::None,
        }
    }
}

impl DeaSchedule {
    pub fn normalize(raw: &str) -> DeaSchedule {
        match raw.trim() {
            "2" | "II" | "C2" => DeaSchedule::Two,
            "3" | "III" | "C3" => DeaSchedule::Three,
            "4" | "IV" | "C4" => DeaSchedule::Four,
            "5" | "V" | "C5" => DeaSchedule::Five,
            _ => DeaSchedule::None,
        }
    }
}

/// One denormalized search document per NDC.
///
/// `embedding` holds the unit-norm 1024-dim vector; it is empty on documents
/// fetched with a projection that excludes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrugDocument {
    pub ndc: String,
    pub drug_name: String,
    pub brand_name: String,
    pub generic_name: String,
    pub gcn_seqno: i64,
    pub drug_class: String,
    pub therapeutic_class: String,
    pub dosage_form: DosageForm,
    pub strength_value: f64,
    pub strength_unit: StrengthUnit,
    pub manufacturer: String,
    pub is_brand: bool,
    pub is_generic: bool,
    pub dea_schedule: DeaSchedule,
    pub indication_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

impl DrugDocument {
    /// 11-digit numeric NDC check.
    pub fn is_valid_ndc(ndc: &str) -> bool {
        ndc.len() == 11 && ndc.bytes().all(|b| b.is_ascii_digit())
    }

    /// Check the stored-document invariants: valid NDC, brand XOR generic,
    /// and (when present) a unit-norm embedding of the right dimension.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !Self::is_valid_ndc(&self.ndc) {
            return Err(format!("ndc '{}' is not 11 digits", self.ndc));
        }
        if self.is_brand == self.is_generic {
            return Err(format!(
                "ndc {}: is_brand and is_generic must differ",
                self.ndc
            ));
        }
        if !self.embedding.is_empty() {
            if self.embedding.len() != EMBEDDING_DIM {
                return Err(format!(
                    "ndc {}: embedding dimension {} != {EMBEDDING_DIM}",
                    self.ndc,
                    self.embedding.len()
                ));
            }
            let norm: f32 = self.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            if !(0.99..=1.01).contains(&norm) {
                return Err(format!("ndc {}: embedding norm {norm} not ~1", self.ndc));
            }
        }
        Ok(())
    }
}
