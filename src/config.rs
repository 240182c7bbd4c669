//! Runtime configuration.
//!
//! All recognized options are enumerated here and read from the environment
//! with documented defaults. Configuration is built once at startup and
//! injected; nothing in the crate reads the environment after that.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

pub const APP_NAME: &str = "rxsearch";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default directory for store files: `<platform data dir>/rxsearch`.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

fn data_file(name: &str) -> String {
    data_dir().join(name).to_string_lossy().into_owned()
}

/// Top-k and routing constants for the search orchestrator.
#[derive(Debug, Clone)]
pub struct SearchTuning {
    /// Drug-term count at which the multi-drug path is taken.
    pub multi_drug_threshold: usize,
    /// Phase-1 top-k for a single-drug query.
    pub k1_single: usize,
    /// Phase-1 top-k per term for a multi-drug query.
    pub k1_multi: usize,
    /// Phase-2 per-class expansion limit.
    pub k2_expansion: usize,
    /// Default HNSW runtime beam width, overridable per query.
    pub ef_runtime_default: usize,
    /// Filters from the LLM that are passed straight to the search engine.
    pub auto_apply_filters: BTreeSet<String>,
    /// Therapeutic classes never used for expansion.
    pub therapeutic_class_blacklist: BTreeSet<String>,
    /// Loose dosage form -> set of store tags it matches.
    pub dosage_form_synonyms: BTreeMap<String, BTreeSet<String>>,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            multi_drug_threshold: 3,
            k1_single: 20,
            k1_multi: 8,
            k2_expansion: 100,
            ef_runtime_default: 10,
            auto_apply_filters: csv_set("dosage_form,dea_schedule,is_generic,ndc,gcn_seqno"),
            therapeutic_class_blacklist: csv_set(
                "Bulk Chemicals,Miscellaneous,Uncategorized,Not Specified",
            ),
            dosage_form_synonyms: parse_synonyms("INJECTION=INJECTION|VIAL|SYRINGE|SOLUTION"),
        }
    }
}

/// Ingestion pipeline knobs.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub batch_size: usize,
    /// Max in-flight embedding calls.
    pub concurrency: usize,
    /// Stop and hand back `next_offset` when this much wall clock remains.
    pub safety_margin: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 8,
            safety_margin: Duration::from_millis(30_000),
        }
    }
}

/// Per-upstream deadlines. All overridable from the environment.
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub llm: Duration,
    pub embedding: Duration,
    pub vector_query: Duration,
    pub catalog_enrich: Duration,
    pub request: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            llm: Duration::from_millis(10_000),
            embedding: Duration::from_millis(5_000),
            vector_query: Duration::from_millis(2_000),
            catalog_enrich: Duration::from_millis(3_000),
            request: Duration::from_millis(30_000),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Embedding model identifier. Changing it invalidates the cache namespace.
    pub embedding_model: String,
    pub embedding_url: String,
    pub llm_model: String,
    pub llm_url: String,
    pub llm_api_key: String,
    pub vector_db_path: String,
    pub catalog_db_path: String,
    pub cache_db_path: String,
    /// Whether the query path consults the embedding cache (ingest always does).
    pub query_embed_cache: bool,
    pub bind_addr: String,
    pub tuning: SearchTuning,
    pub ingest: IngestSettings,
    pub timeouts: Timeouts,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            embedding_model: "mxbai-embed-large".into(),
            embedding_url: "http://localhost:11434".into(),
            llm_model: "claude-haiku".into(),
            llm_url: "http://localhost:8082".into(),
            llm_api_key: String::new(),
            vector_db_path: data_file("vector.db"),
            catalog_db_path: data_file("fdb-catalog.db"),
            cache_db_path: data_file("embedding-cache.db"),
            query_embed_cache: true,
            bind_addr: "0.0.0.0:8080".into(),
            tuning: SearchTuning::default(),
            ingest: IngestSettings::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl AppConfig {
    /// Build configuration from the environment, applying defaults for
    /// anything unset. Unknown variables are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let tuning_defaults = SearchTuning::default();
        let ingest_defaults = IngestSettings::default();
        let timeout_defaults = Timeouts::default();

        Self {
            embedding_model: env_or("EMBEDDING_MODEL", &defaults.embedding_model),
            embedding_url: env_or("EMBEDDING_URL", &defaults.embedding_url),
            llm_model: env_or("LLM_MODEL", &defaults.llm_model),
            llm_url: env_or("LLM_URL", &defaults.llm_url),
            llm_api_key: env_or("LLM_API_KEY", &defaults.llm_api_key),
            vector_db_path: env_or("VECTOR_DB_PATH", &defaults.vector_db_path),
            catalog_db_path: env_or("CATALOG_DB_PATH", &defaults.catalog_db_path),
            cache_db_path: env_or("CACHE_DB_PATH", &defaults.cache_db_path),
            query_embed_cache: env_parse("QUERY_EMBED_CACHE", defaults.query_embed_cache),
            bind_addr: env_or("BIND_ADDR", &defaults.bind_addr),
            tuning: SearchTuning {
                multi_drug_threshold: env_parse(
                    "MULTI_DRUG_THRESHOLD",
                    tuning_defaults.multi_drug_threshold,
                ),
                k1_single: env_parse("K1_SINGLE", tuning_defaults.k1_single),
                k1_multi: env_parse("K1_MULTI", tuning_defaults.k1_multi),
                k2_expansion: env_parse("K2_EXPANSION", tuning_defaults.k2_expansion),
                ef_runtime_default: env_parse(
                    "EF_RUNTIME_DEFAULT",
                    tuning_defaults.ef_runtime_default,
                ),
                auto_apply_filters: std::env::var("AUTO_APPLY_FILTERS")
                    .map(|v| csv_set(&v))
                    .unwrap_or(tuning_defaults.auto_apply_filters),
                therapeutic_class_blacklist: std::env::var("THERAPEUTIC_CLASS_BLACKLIST")
                    .map(|v| csv_set(&v))
                    .unwrap_or(tuning_defaults.therapeutic_class_blacklist),
                dosage_form_synonyms: std::env::var("DOSAGE_FORM_SYNONYMS")
                    .map(|v| parse_synonyms(&v))
                    .unwrap_or(tuning_defaults.dosage_form_synonyms),
            },
            ingest: IngestSettings {
                batch_size: env_parse("INGEST_BATCH_SIZE", ingest_defaults.batch_size),
                concurrency: env_parse("INGEST_CONCURRENCY", ingest_defaults.concurrency),
                safety_margin: Duration::from_millis(env_parse(
                    "INGEST_SAFETY_MARGIN_MS",
                    ingest_defaults.safety_margin.as_millis() as u64,
                )),
            },
            timeouts: Timeouts {
                llm: ms_env("LLM_TIMEOUT_MS", timeout_defaults.llm),
                embedding: ms_env("EMBED_TIMEOUT_MS", timeout_defaults.embedding),
                vector_query: ms_env("VECTOR_TIMEOUT_MS", timeout_defaults.vector_query),
                catalog_enrich: ms_env("ENRICH_TIMEOUT_MS", timeout_defaults.catalog_enrich),
                request: ms_env("REQUEST_TIMEOUT_MS", timeout_defaults.request),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn ms_env(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(key, default.as_millis() as u64))
}

fn csv_set(csv: &str) -> BTreeSet<String> {
    csv.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `FORM=TAG|TAG;FORM2=TAG` into a synonym map. Keys and tags are
/// uppercased so lookups are case-insensitive.
fn parse_synonyms(raw: &str) -> BTreeMap<String, BTreeSet<String>> {
    let mut map = BTreeMap::new();
    for entry in raw.split(';') {
        let Some((form, tags)) = entry.split_once('=') else {
            continue;
        };
        let tags: BTreeSet<String> = tags
            .split('|')
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        if !tags.is_empty() {
            map.insert(form.trim().to_uppercase(), tags);
        }
    }
    map
}
