//! The resumable batch loader.
//!
//! Each batch: scan a page, normalize rows, embed with bounded parallelism,
//! upsert documents, backfill unseen indication keys. Row-level failures go
//! to the dead-letter list; only catalog or vector store failures abort.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use super::checkpoint::Checkpoint;
use super::normalize::{embedding_text, normalize_row};
use super::IngestError;
use crate::catalog::CatalogStore;
use crate::config::IngestSettings;
use crate::embedding::Embedder;
use crate::indication::IndicationStore;
use crate::model::DrugDocument;
use crate::vector::VectorStore;

/// One ingestion invocation.
#[derive(Debug, Clone, Default)]
pub struct IngestParams {
    pub offset: u64,
    /// 0 means all rows.
    pub max_rows: u64,
    /// Wall-clock budget; the run stops early when the remaining time drops
    /// under the configured safety margin and hands back `next_offset`.
    pub deadline: Option<Instant>,
    pub checkpoint_path: Option<PathBuf>,
}

/// Emitted per batch via tracing, and aggregated into the report.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchMetrics {
    pub ok: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub next_offset: u64,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub batches: usize,
    pub ok: usize,
    pub failed: usize,
    pub next_offset: u64,
    pub dead_letter: Vec<String>,
    /// False when the run stopped on the wall-clock budget or `max_rows`
    /// before exhausting the scan.
    pub completed: bool,
}

pub struct IngestPipeline {
    catalog: CatalogStore,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    indications: IndicationStore,
    settings: IngestSettings,
}

impl IngestPipeline {
    pub fn new(
        catalog: CatalogStore,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        indications: IndicationStore,
        settings: IngestSettings,
    ) -> Self {
        Self {
            catalog,
            embedder,
            store,
            indications,
            settings,
        }
    }

    pub async fn run(&self, params: &IngestParams) -> Result<IngestReport, IngestError> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut report = IngestReport {
            next_offset: params.offset,
            ..IngestReport::default()
        };
        let mut processed: u64 = 0;

        loop {
            if let Some(deadline) = params.deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining < self.settings.safety_margin {
                    tracing::info!(
                        next_offset = report.next_offset,
                        "stopping before wall-clock budget, resume with next_offset"
                    );
                    self.save_checkpoint(params, &report)?;
                    return Ok(report);
                }
            }

            let mut page_size = self.settings.batch_size;
            if params.max_rows > 0 {
                let remaining_rows = params.max_rows.saturating_sub(processed);
                if remaining_rows == 0 {
                    self.save_checkpoint(params, &report)?;
                    return Ok(report);
                }
                page_size = page_size.min(remaining_rows as usize);
            }

            let rows = self
                .catalog
                .scan_active(report.next_offset, page_size)
                .await?;
            if rows.is_empty() {
                report.completed = true;
                self.save_checkpoint(params, &report)?;
                return Ok(report);
            }

            let batch_start = Instant::now();
            let scanned = rows.len();
            let indexed_at = Utc::now();

            // Normalize; bad rows dead-letter immediately.
            let mut docs: Vec<(DrugDocument, String)> = Vec::with_capacity(scanned);
            let mut metrics = BatchMetrics::default();
            for row in &rows {
                match normalize_row(row, indexed_at) {
                    Ok(doc) => {
                        let text = embedding_text(&doc);
                        docs.push((doc, text));
                    }
                    Err(e) => {
                        tracing::warn!(ndc = %row.ndc, error = %e, "row rejected at normalization");
                        report.dead_letter.push(row.ndc.clone());
                        metrics.failed += 1;
                    }
                }
            }

            // Embedding fan-out, bounded in-flight. The client retries
            // transient failures itself; what comes back Err is final.
            let embedded = join_all(docs.iter().map(|(doc, text)| {
                let semaphore = semaphore.clone();
                let ndc = doc.ndc.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    (ndc, self.embedder.embed(text).await)
                }
            }))
            .await;

            for ((mut doc, _), (ndc, embedding)) in docs.into_iter().zip(embedded) {
                debug_assert_eq!(doc.ndc, ndc);
                match embedding {
                    Ok(vector) => {
                        doc.embedding = vector;
                        self.store.upsert(&doc).await?;
                        self.backfill_indications(&doc).await?;
                        metrics.ok += 1;
                    }
                    Err(e) => {
                        tracing::warn!(ndc = %doc.ndc, error = %e, "embedding failed, dead-lettering row");
                        report.dead_letter.push(doc.ndc.clone());
                        metrics.failed += 1;
                    }
                }
            }

            report.next_offset += scanned as u64;
            processed += scanned as u64;
            report.batches += 1;
            report.ok += metrics.ok;
            report.failed += metrics.failed;
            metrics.duration_ms = batch_start.elapsed().as_millis() as u64;
            metrics.next_offset = report.next_offset;

            tracing::info!(
                ok = metrics.ok,
                failed = metrics.failed,
                duration_ms = metrics.duration_ms,
                next_offset = metrics.next_offset,
                "batch ingested"
            );
            self.save_checkpoint(params, &report)?;

            if scanned < page_size {
                report.completed = true;
                self.save_checkpoint(params, &report)?;
                return Ok(report);
            }
        }
    }

    /// Fetch and store the indication list for a key not yet seen.
    async fn backfill_indications(&self, doc: &DrugDocument) -> Result<(), IngestError> {
        let key = doc.indication_key.clone();
        if key.is_empty() {
            return Ok(());
        }

        let store = self.indications.clone();
        let check_key = key.clone();
        let seen = tokio::task::spawn_blocking(move || store.contains(&check_key))
            .await
            .map_err(|e| IngestError::Indications(e.to_string()))?
            .map_err(|e| IngestError::Indications(e.to_string()))?;
        if seen {
            return Ok(());
        }

        let lists = self
            .catalog
            .lookup_indications_by_class(std::slice::from_ref(&key))
            .await?;
        let indications = lists.get(&key).cloned().unwrap_or_default();

        let store = self.indications.clone();
        tokio::task::spawn_blocking(move || store.upsert(&key, &indications))
            .await
            .map_err(|e| IngestError::Indications(e.to_string()))?
            .map_err(|e| IngestError::Indications(e.to_string()))?;
        Ok(())
    }

    fn save_checkpoint(
        &self,
        params: &IngestParams,
        report: &IngestReport,
    ) -> Result<(), IngestError> {
        if let Some(path) = &params.checkpoint_path {
            Checkpoint::new(report.next_offset, report.dead_letter.clone()).save(path)?;
        }
        Ok(())
    }
}
