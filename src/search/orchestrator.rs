//! The request-scoped search pipeline.
//!
//! Phases run strictly in order: parsing, embedding, vector search,
//! expansion, filtering, grouping, enrichment. Per-term work inside the
//! embedding and vector-search phases runs concurrently; the merge is
//! deterministic regardless of completion order. Expansion and enrichment
//! failures degrade the response instead of failing it as long as Phase 1
//! produced hits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use super::expansion::collect_classes;
use super::grouping::{group_candidates, Candidate};
use super::{Counts, Phase, SearchError, SearchMetadata, SearchOutcome};
use crate::catalog::CatalogStore;
use crate::config::{SearchTuning, Timeouts};
use crate::embedding::Embedder;
use crate::indication::IndicationStore;
use crate::llm::ChatModel;
use crate::model::{DrugDocument, MatchType};
use crate::query::filters::{auto_filter_expr, dosage_form_tags};
use crate::query::{ParseOutcome, QueryParser};
use crate::vector::{Predicate, QuerySpec, TagField, VectorStore};

/// Results cap; request limits are clamped to it.
pub const MAX_LIMIT: usize = 50;
const DEFAULT_LIMIT: usize = 20;

/// Lexical prefilter is skipped for terms shorter than this.
const MIN_PREFILTER_LEN: usize = 4;

/// Per-request options from the API surface.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub ef_runtime: Option<usize>,
    pub multi_drug_threshold: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            ef_runtime: None,
            multi_drug_threshold: None,
        }
    }
}

pub struct SearchOrchestrator {
    parser: QueryParser<Box<dyn ChatModel>>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    catalog: CatalogStore,
    indications: IndicationStore,
    tuning: SearchTuning,
    timeouts: Timeouts,
}

impl SearchOrchestrator {
    pub fn new(
        chat: Box<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        catalog: CatalogStore,
        indications: IndicationStore,
        tuning: SearchTuning,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            parser: QueryParser::new(chat),
            embedder,
            store,
            catalog,
            indications,
            tuning,
            timeouts,
        }
    }

    /// Run the full pipeline for one request.
    pub async fn search(
        &self,
        raw: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, SearchError> {
        let mut latency: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut degraded = false;

        // ── parsing ──────────────────────────────────────────────
        let phase_start = Instant::now();
        let ParseOutcome {
            query: parsed,
            used_fallback,
            dropped_filters,
        } = cancellable(cancel, self.parser.parse(raw)).await?;
        latency.insert(Phase::Parsing.as_str(), elapsed_ms(phase_start));

        // Routing. Zero drug terms exercises the fallback path: embed the
        // raw string, Phase 1 only, no expansion.
        let fallback_path = parsed.drug_terms.is_empty();
        let terms: Vec<String> = if fallback_path {
            vec![raw.trim().to_lowercase()]
        } else {
            parsed.drug_terms.clone()
        };
        let threshold = options
            .multi_drug_threshold
            .unwrap_or(self.tuning.multi_drug_threshold);
        let multi_drug = !fallback_path && terms.len() >= threshold;
        let k1 = if multi_drug {
            self.tuning.k1_multi
        } else {
            self.tuning.k1_single
        };
        let ef_runtime = Some(
            options
                .ef_runtime
                .unwrap_or(self.tuning.ef_runtime_default),
        );
        let auto_filters = auto_filter_expr(&parsed.filters, &self.tuning);

        tracing::debug!(
            terms = terms.len(),
            multi_drug,
            fallback_path,
            "search routed"
        );

        // ── embedding ────────────────────────────────────────────
        let phase_start = Instant::now();
        let embeddings = cancellable(
            cancel,
            join_all(terms.iter().map(|term| {
                timed(self.timeouts.embedding, Phase::Embedding, async move {
                    self.embedder.embed(term).await.map_err(SearchError::from)
                })
            })),
        )
        .await?;
        latency.insert(Phase::Embedding.as_str(), elapsed_ms(phase_start));

        let mut term_vectors: Vec<(usize, Vec<f32>)> = Vec::new();
        let mut first_error: Option<SearchError> = None;
        for (idx, result) in embeddings.into_iter().enumerate() {
            match result {
                Ok(vector) => term_vectors.push((idx, vector)),
                Err(e) => {
                    tracing::warn!(term = %terms[idx], error = %e, "term embedding failed");
                    first_error.get_or_insert(e);
                    degraded = true;
                }
            }
        }
        if term_vectors.is_empty() {
            return Err(first_error.unwrap_or(SearchError::PhaseTimeout("embedding")));
        }

        // ── vector_search ────────────────────────────────────────
        let phase_start = Instant::now();
        let per_term = cancellable(
            cancel,
            join_all(term_vectors.iter().map(|(idx, vector)| {
                let term = &terms[*idx];
                let mut filter = auto_filters.clone();
                // Canonical-term lexical prefilter; disabled on the fallback
                // path (the raw string is not a drug name) and short terms.
                if !fallback_path && term.len() >= MIN_PREFILTER_LEN {
                    filter = filter.and(Predicate::Text(term.clone()));
                }
                let spec = QuerySpec {
                    filter,
                    vector: Some(vector.clone()),
                    k: k1,
                    ef_runtime,
                    ..QuerySpec::default()
                };
                timed(self.timeouts.vector_query, Phase::VectorSearch, async move {
                    self.store.hybrid_query(&spec).await.map_err(SearchError::from)
                })
            })),
        )
        .await?;
        latency.insert(Phase::VectorSearch.as_str(), elapsed_ms(phase_start));

        // Deterministic merge: per-NDC maximum score, earliest term index.
        let mut vector_hits: BTreeMap<String, (f32, usize, DrugDocument)> = BTreeMap::new();
        let mut first_error: Option<SearchError> = None;
        let mut any_term_ok = false;
        for ((term_idx, _), result) in term_vectors.iter().zip(per_term) {
            match result {
                Ok(hits) => {
                    any_term_ok = true;
                    for hit in hits {
                        let entry = vector_hits
                            .entry(hit.doc.ndc.clone())
                            .or_insert((hit.score, *term_idx, hit.doc));
                        if hit.score > entry.0 {
                            entry.0 = hit.score;
                        }
                        if *term_idx < entry.1 {
                            entry.1 = *term_idx;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "term vector search failed");
                    first_error.get_or_insert(e);
                    degraded = true;
                }
            }
        }
        if !any_term_ok {
            return Err(first_error.unwrap_or(SearchError::PhaseTimeout("vector_search")));
        }

        // ── expansion ────────────────────────────────────────────
        // One pass over the combined hit set, never per drug.
        let mut pharma_hits: Vec<DrugDocument> = Vec::new();
        let mut therapeutic_hits: Vec<DrugDocument> = Vec::new();
        if !fallback_path && !vector_hits.is_empty() {
            let phase_start = Instant::now();
            let observed: Vec<DrugDocument> =
                vector_hits.values().map(|(_, _, doc)| doc.clone()).collect();
            let (drug_classes, therapeutic_classes) =
                collect_classes(&observed, &self.tuning.therapeutic_class_blacklist);

            let class_queries: Vec<(TagField, String)> = drug_classes
                .into_iter()
                .map(|c| (TagField::DrugClass, c))
                .chain(
                    therapeutic_classes
                        .into_iter()
                        .map(|c| (TagField::TherapeuticClass, c)),
                )
                .collect();

            let expansion_results = cancellable(
                cancel,
                join_all(class_queries.iter().map(|(field, class)| {
                    let spec = QuerySpec {
                        filter: auto_filters
                            .clone()
                            .and(Predicate::TagEq(*field, class.clone())),
                        vector: None,
                        k: self.tuning.k2_expansion,
                        ..QuerySpec::default()
                    };
                    timed(self.timeouts.vector_query, Phase::Expansion, async move {
                        self.store.hybrid_query(&spec).await.map_err(SearchError::from)
                    })
                })),
            )
            .await?;

            for ((field, class), result) in class_queries.iter().zip(expansion_results) {
                match result {
                    Ok(hits) => {
                        let docs = hits.into_iter().map(|h| h.doc);
                        if *field == TagField::DrugClass {
                            pharma_hits.extend(docs);
                        } else {
                            therapeutic_hits.extend(docs);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(class = %class, error = %e, "expansion query failed");
                        degraded = true;
                    }
                }
            }
            latency.insert(Phase::Expansion.as_str(), elapsed_ms(phase_start));
        }

        // ── classification + dedup ───────────────────────────────
        // Priority on conflict: vector > pharmacological > therapeutic.
        let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
        for (ndc, (score, _, doc)) in vector_hits {
            candidates.insert(
                ndc,
                Candidate {
                    doc,
                    match_type: MatchType::Vector,
                    score,
                },
            );
        }
        for doc in pharma_hits {
            candidates.entry(doc.ndc.clone()).or_insert(Candidate {
                doc,
                match_type: MatchType::Pharmacological,
                score: 0.0,
            });
        }
        for doc in therapeutic_hits {
            candidates.entry(doc.ndc.clone()).or_insert(Candidate {
                doc,
                match_type: MatchType::Therapeutic,
                score: 0.0,
            });
        }

        // ── filtering (post-expansion) ───────────────────────────
        let phase_start = Instant::now();
        let mut candidates: Vec<Candidate> = candidates.into_values().collect();
        if let Some(strength) = &parsed.filters.strength {
            candidates.retain(|c| {
                strength.matches(c.doc.strength_value, c.doc.strength_unit.as_str())
            });
        }
        if let Some(form) = parsed.filters.dosage_form {
            let allowed = dosage_form_tags(form, &self.tuning);
            candidates.retain(|c| {
                allowed
                    .iter()
                    .any(|tag| tag.eq_ignore_ascii_case(c.doc.dosage_form.as_str()))
            });
        }
        latency.insert(Phase::Filtering.as_str(), elapsed_ms(phase_start));

        let mut counts = Counts::default();
        for candidate in &candidates {
            match candidate.match_type {
                MatchType::Vector => counts.vector += 1,
                MatchType::Pharmacological => counts.pharmacological += 1,
                MatchType::Therapeutic => counts.therapeutic += 1,
            }
        }

        // ── grouping + ordering ──────────────────────────────────
        let phase_start = Instant::now();
        let mut results = group_candidates(candidates);
        results.sort_by_cached_key(|r| r.ordering_key());
        counts.families = results.len();
        results.truncate(options.limit.clamp(1, MAX_LIMIT));
        latency.insert(Phase::Grouping.as_str(), elapsed_ms(phase_start));

        // ── enrichment ───────────────────────────────────────────
        if !results.is_empty() {
            let phase_start = Instant::now();
            if let Err(e) = self.enrich(&mut results, cancel).await {
                match e {
                    SearchError::Cancelled => return Err(SearchError::Cancelled),
                    other => {
                        tracing::warn!(error = %other, "enrichment failed, degrading");
                        degraded = true;
                    }
                }
            }
            latency.insert(Phase::Enrichment.as_str(), elapsed_ms(phase_start));
        }

        Ok(SearchOutcome {
            results,
            metadata: SearchMetadata {
                parsed,
                parser: if used_fallback { "fallback" } else { "llm" },
                dropped_filters,
                counts,
                latency_ms: latency,
                degraded,
            },
        })
    }

    /// One batched catalog call plus indication lookups for the final set.
    async fn enrich(
        &self,
        results: &mut [crate::model::SearchResult],
        cancel: &CancellationToken,
    ) -> Result<(), SearchError> {
        let mut ndcs: Vec<String> = Vec::new();
        for result in results.iter() {
            ndcs.push(result.representative.ndc.clone());
            for variant in &result.variants {
                ndcs.extend(variant.ndcs.iter().cloned());
            }
        }
        ndcs.sort();
        ndcs.dedup();

        let enriched = cancellable(
            cancel,
            timed(
                self.timeouts.catalog_enrich,
                Phase::Enrichment,
                async move {
                    self.catalog
                        .enrich_by_ndc(&ndcs)
                        .await
                        .map_err(|e| SearchError::Enrichment(e.to_string()))
                },
            ),
        )
        .await??;

        let keys: Vec<String> = results
            .iter()
            .map(|r| r.representative.indication_key.clone())
            .filter(|k| !k.is_empty())
            .collect();
        let store = self.indications.clone();
        let indication_map = cancellable(
            cancel,
            tokio::task::spawn_blocking(move || store.get_many(&keys)),
        )
        .await?
        .map_err(|e| SearchError::Enrichment(e.to_string()))?
        .map_err(|e| SearchError::Enrichment(e.to_string()))?;

        for result in results.iter_mut() {
            if let Some(row) = enriched.get(&result.representative.ndc) {
                if !row.manufacturer.is_empty() {
                    result.representative.manufacturer = row.manufacturer.clone();
                }
            }
            if let Some(indications) = indication_map.get(&result.representative.indication_key) {
                result.indications = indications.clone();
            }
        }
        Ok(())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Race a future against the request's cancellation token.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T, SearchError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SearchError::Cancelled),
        value = fut => Ok(value),
    }
}

/// Apply a per-phase deadline to one upstream call.
async fn timed<T>(
    deadline: Duration,
    phase: Phase,
    fut: impl std::future::Future<Output = Result<T, SearchError>>,
) -> Result<T, SearchError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(SearchError::PhaseTimeout(phase.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::store::tests::seeded_catalog;
    use crate::embedding::{deterministic_vector, MockEmbedder};
    use crate::llm::MockChatModel;
    use crate::model::{DeaSchedule, DosageForm, StrengthUnit, EMBEDDING_DIM};
    use crate::vector::InMemoryVectorStore;
    use chrono::Utc;
    use serde_json::json;

    /// A fixture document whose embedding is derived from `embed_key`, so a
    /// query term equal to that key is a perfect vector match.
    #[allow(clippy::too_many_arguments)]
    fn fx_doc(
        ndc: &str,
        embed_key: &str,
        brand: Option<&str>,
        class: &str,
        therapeutic: &str,
        form: DosageForm,
        strength: f64,
        unit: StrengthUnit,
        dea: DeaSchedule,
    ) -> DrugDocument {
        let is_brand = brand.is_some();
        DrugDocument {
            ndc: ndc.into(),
            drug_name: format!("{} {} {}", embed_key.to_uppercase(), strength, form.as_str()),
            brand_name: brand.unwrap_or("").into(),
            generic_name: embed_key.to_string(),
            gcn_seqno: 100,
            drug_class: class.into(),
            therapeutic_class: therapeutic.into(),
            dosage_form: form,
            strength_value: strength,
            strength_unit: unit,
            manufacturer: "SEED PHARMA".into(),
            is_brand,
            is_generic: !is_brand,
            dea_schedule: dea,
            indication_key: if let Some(b) = brand {
                format!("brand:{b}")
            } else {
                format!("class:{class}")
            },
            embedding: deterministic_vector(embed_key, EMBEDDING_DIM),
            indexed_at: Utc::now(),
        }
    }

    struct Fixture {
        _catalog_dir: tempfile::TempDir,
        _indication_dir: tempfile::TempDir,
        pool: sqlx::SqlitePool,
        indications: IndicationStore,
        orchestrator: SearchOrchestrator,
    }

    async fn fixture_with_chat(
        chat: MockChatModel,
        docs: Vec<DrugDocument>,
        tuning: SearchTuning,
    ) -> Fixture {
        let store = InMemoryVectorStore::new();
        let catalog_rows: Vec<(String, String, String, i64)> = docs
            .iter()
            .map(|d| (d.ndc.clone(), d.drug_name.clone(), String::new(), d.gcn_seqno))
            .collect();
        for doc in &docs {
            store.upsert(doc).await.unwrap();
        }

        let borrowed: Vec<(&str, &str, &str, i64)> = catalog_rows
            .iter()
            .map(|(n, l, o, g)| (n.as_str(), l.as_str(), o.as_str(), *g))
            .collect();
        let (catalog_dir, pool, catalog) = seeded_catalog(&borrowed).await;

        let indication_dir = tempfile::tempdir().unwrap();
        let indications =
            IndicationStore::open(&indication_dir.path().join("ind.db")).unwrap();

        let orchestrator = SearchOrchestrator::new(
            Box::new(chat),
            Arc::new(MockEmbedder::new()),
            Arc::new(store),
            catalog,
            indications.clone(),
            tuning,
            Timeouts::default(),
        );

        Fixture {
            _catalog_dir: catalog_dir,
            _indication_dir: indication_dir,
            pool,
            indications,
            orchestrator,
        }
    }

    async fn fixture(
        reply: serde_json::Value,
        docs: Vec<DrugDocument>,
        tuning: SearchTuning,
    ) -> Fixture {
        fixture_with_chat(MockChatModel::always(reply), docs, tuning).await
    }

    fn statin_docs() -> Vec<DrugDocument> {
        let thera = "Antihyperlipidemic - HMG CoA Reductase Inhibitors";
        vec![
            fx_doc("00000000101", "atorvastatin", None, "ATORVASTATIN_CALCIUM", thera, DosageForm::Tablet, 40.0, StrengthUnit::Mg, DeaSchedule::None),
            fx_doc("00000000102", "rosuvastatin", None, "ROSUVASTATIN_CALCIUM", thera, DosageForm::Tablet, 10.0, StrengthUnit::Mg, DeaSchedule::None),
            fx_doc("00000000103", "simvastatin", None, "SIMVASTATIN", thera, DosageForm::Tablet, 20.0, StrengthUnit::Mg, DeaSchedule::None),
            fx_doc("00000000104", "pravastatin", None, "PRAVASTATIN_SODIUM", thera, DosageForm::Tablet, 40.0, StrengthUnit::Mg, DeaSchedule::None),
            fx_doc("00000000105", "lovastatin", None, "LOVASTATIN", thera, DosageForm::Tablet, 20.0, StrengthUnit::Mg, DeaSchedule::None),
            // Brand class-mate, higher NDC: loses the k=1 tie and comes back
            // through expansion as a pharmacological match.
            fx_doc("00000000900", "rosuvastatin", Some("CRESTOR"), "ROSUVASTATIN_CALCIUM", thera, DosageForm::Tablet, 10.0, StrengthUnit::Mg, DeaSchedule::None),
        ]
    }

    #[tokio::test]
    async fn condition_query_expands_to_statin_classes() {
        let mut tuning = SearchTuning::default();
        tuning.k1_multi = 1;
        let reply = json!({
            "drug_terms": ["atorvastatin", "rosuvastatin", "simvastatin", "pravastatin", "lovastatin"],
            "filters": {},
        });
        let fx = fixture(reply, statin_docs(), tuning).await;

        let outcome = fx
            .orchestrator
            .search("high cholesterol", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let vector_results: Vec<_> = outcome
            .results
            .iter()
            .filter(|r| r.match_type == MatchType::Vector)
            .collect();
        assert!(vector_results.len() >= 5, "got {}", vector_results.len());
        assert!(outcome.results[0].similarity >= 0.50);

        // A pharmacological result sharing a vector hit's drug_class.
        let pharma: Vec<_> = outcome
            .results
            .iter()
            .filter(|r| r.match_type == MatchType::Pharmacological)
            .collect();
        assert!(!pharma.is_empty());
        let vector_classes: Vec<&str> = vector_results
            .iter()
            .map(|r| r.representative.drug_class.as_str())
            .collect();
        assert!(pharma
            .iter()
            .any(|r| vector_classes.contains(&r.representative.drug_class.as_str())));
        assert_eq!(outcome.metadata.parser, "llm");
    }

    #[tokio::test]
    async fn strength_and_injectable_form_filter_variants() {
        let reply = json!({
            "drug_terms": ["testosterone"],
            "filters": {
                "strength": {"value": 200, "unit": "MG"},
                "dosage_form": "INJECTION",
            },
            "corrections": ["tastosterne -> testosterone"],
        });
        let docs = vec![
            fx_doc("00000000201", "testosterone", None, "TESTOSTERONE_CYPIONATE", "Androgens", DosageForm::Vial, 200.0, StrengthUnit::Mg, DeaSchedule::Three),
            fx_doc("00000000202", "testosterone", None, "TESTOSTERONE_CYPIONATE", "Androgens", DosageForm::Vial, 100.0, StrengthUnit::Mg, DeaSchedule::Three),
            fx_doc("00000000203", "testosterone", None, "TESTOSTERONE", "Androgens", DosageForm::Cream, 200.0, StrengthUnit::Mg, DeaSchedule::Three),
        ];
        let fx = fixture(reply, docs, SearchTuning::default()).await;

        let outcome = fx
            .orchestrator
            .search("tastosterne 200 mg vial", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.results.is_empty());
        let injectable = ["INJECTION", "VIAL", "SYRINGE", "SOLUTION"];
        for result in &outcome.results {
            for variant in &result.variants {
                assert_eq!(variant.strength_value, 200.0);
                assert_eq!(variant.strength_unit, StrengthUnit::Mg);
                assert!(injectable.contains(&variant.dosage_form.as_str()));
            }
        }
        let strength = outcome.metadata.parsed.filters.strength.as_ref().unwrap();
        assert_eq!(strength.value, 200.0);
        assert_eq!(strength.unit, "MG");
    }

    #[tokio::test]
    async fn cream_restriction_excludes_other_forms() {
        let reply = json!({
            "drug_terms": ["testosterone"],
            "filters": {"dosage_form": "CREAM"},
        });
        let docs = vec![
            fx_doc("00000000301", "testosterone", None, "TESTOSTERONE", "Androgens", DosageForm::Cream, 1.0, StrengthUnit::Percent, DeaSchedule::Three),
            fx_doc("00000000302", "testosterone", None, "TESTOSTERONE", "Androgens", DosageForm::Gel, 1.0, StrengthUnit::Percent, DeaSchedule::Three),
            fx_doc("00000000303", "testosterone", None, "TESTOSTERONE_CYPIONATE", "Androgens", DosageForm::Vial, 200.0, StrengthUnit::Mg, DeaSchedule::Three),
        ];
        let fx = fixture(reply, docs, SearchTuning::default()).await;

        let outcome = fx
            .orchestrator
            .search("testosterone cream", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.results.is_empty());
        for result in &outcome.results {
            for variant in &result.variants {
                assert_eq!(variant.dosage_form, DosageForm::Cream);
            }
        }
    }

    #[tokio::test]
    async fn exact_ndc_lookup_returns_single_family() {
        let reply = json!({
            "drug_terms": [],
            "filters": {"ndc": "00310757090"},
        });
        let thera = "Antihyperlipidemic - HMG CoA Reductase Inhibitors";
        let docs = vec![
            fx_doc("00310757090", "rosuvastatin", Some("CRESTOR"), "ROSUVASTATIN_CALCIUM", thera, DosageForm::Tablet, 10.0, StrengthUnit::Mg, DeaSchedule::None),
            fx_doc("00000000102", "rosuvastatin", None, "ROSUVASTATIN_CALCIUM", thera, DosageForm::Tablet, 10.0, StrengthUnit::Mg, DeaSchedule::None),
        ];
        let fx = fixture(reply, docs, SearchTuning::default()).await;

        let outcome = fx
            .orchestrator
            .search("ndc 00310757090", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].representative.ndc, "00310757090");
        assert_eq!(outcome.results[0].family_key, "CRESTOR");
        // Fallback path (zero drug terms) skips expansion entirely.
        assert!(!outcome.metadata.latency_ms.contains_key("expansion"));
    }

    #[tokio::test]
    async fn schedule_filter_restricts_every_result() {
        let reply = json!({
            "drug_terms": ["oxycodone", "morphine"],
            "filters": {"dea_schedule": "2"},
        });
        let docs = vec![
            fx_doc("00000000401", "oxycodone", None, "OXYCODONE_HCL", "Opioid Analgesics", DosageForm::Tablet, 5.0, StrengthUnit::Mg, DeaSchedule::Two),
            fx_doc("00000000402", "morphine", None, "MORPHINE_SULFATE", "Opioid Analgesics", DosageForm::Tablet, 15.0, StrengthUnit::Mg, DeaSchedule::Two),
            fx_doc("00000000403", "tramadol", None, "TRAMADOL_HCL", "Opioid Analgesics", DosageForm::Tablet, 50.0, StrengthUnit::Mg, DeaSchedule::Four),
        ];
        let fx = fixture(reply, docs, SearchTuning::default()).await;

        let outcome = fx
            .orchestrator
            .search("schedule II pain medication", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.results.is_empty());
        for result in &outcome.results {
            assert_eq!(result.representative.dea_schedule, DeaSchedule::Two);
        }
    }

    #[tokio::test]
    async fn threshold_exactly_met_takes_multi_path() {
        // k1 differs between paths, so the hit count reveals the route.
        let mut tuning = SearchTuning::default();
        tuning.k1_multi = 1;
        let reply = json!({
            "drug_terms": ["metformin", "lisinopril", "amlodipine"],
            "filters": {},
        });
        let docs = vec![
            fx_doc("00000000501", "metformin", None, "METFORMIN_HCL", "Biguanides", DosageForm::Tablet, 500.0, StrengthUnit::Mg, DeaSchedule::None),
            fx_doc("00000000502", "metformin", None, "METFORMIN_HCL", "Biguanides", DosageForm::Tablet, 1000.0, StrengthUnit::Mg, DeaSchedule::None),
            fx_doc("00000000503", "lisinopril", None, "LISINOPRIL", "ACE Inhibitors", DosageForm::Tablet, 10.0, StrengthUnit::Mg, DeaSchedule::None),
            fx_doc("00000000504", "amlodipine", None, "AMLODIPINE_BESYLATE", "Calcium Channel Blockers", DosageForm::Tablet, 5.0, StrengthUnit::Mg, DeaSchedule::None),
        ];

        let fx = fixture(reply.clone(), docs.clone(), tuning.clone()).await;
        let multi = fx
            .orchestrator
            .search("bp and sugar meds", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        // Multi path: k1 = 1 per term, so only one metformin NDC is a vector hit.
        assert_eq!(multi.metadata.counts.vector, 3);

        let fx2 = fixture(reply, docs, tuning).await;
        let single = fx2
            .orchestrator
            .search(
                "bp and sugar meds",
                &SearchOptions {
                    multi_drug_threshold: Some(4),
                    ..SearchOptions::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        // Below the threshold the single-drug k1 (20) applies.
        assert_eq!(single.metadata.counts.vector, 4);
    }

    #[tokio::test]
    async fn llm_failure_uses_fallback_and_still_searches() {
        let chat = MockChatModel::new(vec![Err(crate::llm::LlmError::Timeout)]);
        let docs = vec![fx_doc(
            "00000000601", "lisinopril", None, "LISINOPRIL", "ACE Inhibitors",
            DosageForm::Tablet, 10.0, StrengthUnit::Mg, DeaSchedule::None,
        )];
        let fx = fixture_with_chat(chat, docs, SearchTuning::default()).await;

        let outcome = fx
            .orchestrator
            .search("lisinopril", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.metadata.parser, "fallback");
        // Fallback embeds the raw string; with a matching doc it still hits.
        assert!(!outcome.results.is_empty());
    }

    #[tokio::test]
    async fn enrichment_failure_degrades_not_fails() {
        let reply = json!({"drug_terms": ["lisinopril"], "filters": {}});
        let docs = vec![fx_doc(
            "00000000701", "lisinopril", None, "LISINOPRIL", "ACE Inhibitors",
            DosageForm::Tablet, 10.0, StrengthUnit::Mg, DeaSchedule::None,
        )];
        let fx = fixture(reply, docs, SearchTuning::default()).await;
        fx.pool.close().await;

        let outcome = fx
            .orchestrator
            .search("lisinopril", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.metadata.degraded);
        assert!(!outcome.results.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_the_request() {
        let reply = json!({"drug_terms": ["aspirin"], "filters": {}});
        let fx = fixture(reply, vec![], SearchTuning::default()).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fx
            .orchestrator
            .search("aspirin", &SearchOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Cancelled));
    }

    #[tokio::test]
    async fn indications_attach_from_the_indication_store() {
        let reply = json!({"drug_terms": ["rosuvastatin"], "filters": {}});
        let thera = "Antihyperlipidemic - HMG CoA Reductase Inhibitors";
        let docs = vec![fx_doc(
            "00310757090", "rosuvastatin", Some("CRESTOR"), "ROSUVASTATIN_CALCIUM", thera,
            DosageForm::Tablet, 10.0, StrengthUnit::Mg, DeaSchedule::None,
        )];
        let fx = fixture(reply, docs, SearchTuning::default()).await;
        fx.indications
            .upsert("brand:CRESTOR", &["High cholesterol".to_string()])
            .unwrap();

        let outcome = fx
            .orchestrator
            .search("rosuvastatin", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let crestor = outcome
            .results
            .iter()
            .find(|r| r.family_key == "CRESTOR")
            .unwrap();
        assert_eq!(crestor.indications, vec!["High cholesterol"]);
        // Enrichment refreshed the manufacturer from the catalog.
        assert_eq!(crestor.representative.manufacturer, "ACME");
    }

    #[tokio::test]
    async fn ordering_is_priority_then_similarity_then_name() {
        let mut tuning = SearchTuning::default();
        tuning.k1_multi = 1;
        let reply = json!({
            "drug_terms": ["atorvastatin", "rosuvastatin", "simvastatin", "pravastatin", "lovastatin"],
            "filters": {},
        });
        let fx = fixture(reply, statin_docs(), tuning).await;

        let outcome = fx
            .orchestrator
            .search("high cholesterol", &SearchOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let results = &outcome.results;
        for pair in results.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(a.match_type.priority() >= b.match_type.priority());
            if a.match_type == MatchType::Vector && b.match_type == MatchType::Vector {
                assert!(a.similarity >= b.similarity);
            }
            if a.match_type == b.match_type && a.match_type != MatchType::Vector {
                assert!(a.representative.drug_name <= b.representative.drug_name);
            }
        }
        // No NDC appears under two match types.
        let mut seen = std::collections::BTreeSet::new();
        for result in results {
            for variant in &result.variants {
                for ndc in &variant.ndcs {
                    assert!(seen.insert(ndc.clone()), "ndc {ndc} duplicated");
                }
            }
        }
    }

    #[tokio::test]
    async fn limit_clamps_result_count() {
        let mut tuning = SearchTuning::default();
        tuning.k1_multi = 1;
        let reply = json!({
            "drug_terms": ["atorvastatin", "rosuvastatin", "simvastatin", "pravastatin", "lovastatin"],
            "filters": {},
        });
        let fx = fixture(reply, statin_docs(), tuning).await;

        let outcome = fx
            .orchestrator
            .search(
                "high cholesterol",
                &SearchOptions {
                    limit: 2,
                    ..SearchOptions::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
    }
}
