#![allow(clippy::missing_docs_in_private_items)]

//! The Public API (spec §6) as a Rust function-call contract, not an HTTP surface:
//! `html-router`/`api-router`'s axum state is gone, replaced by a plain facade over
//! `km_builder::Services`.

use bytes::Bytes;
use common::collaborators::generator::GenerationOptions;
use common::error::AppError;
use common::storage::types::pipeline::{Pipeline, PipelineFile};
use common::tags::TagFilter;
use common::upload::{DocumentUpload, UploadFile};
use km_builder::{Orchestrator, Services};
use retrieval_pipeline::{AskResult, RelevantSource, VectorIndex};
use tracing::{instrument, warn};
use uuid::Uuid;

pub struct KernelMemory {
    services: Services,
}

impl KernelMemory {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// `import_document(upload) -> document_id` (spec §6). Writes every file to
    /// `<index>/<document_id>/<file_name>` (spec §6 "Persisted layout"), builds the pipeline
    /// manifest, and submits it to the configured orchestrator.
    #[instrument(skip(self, upload))]
    pub async fn import_document(&self, upload: DocumentUpload) -> Result<String, AppError> {
        let mut files = Vec::with_capacity(upload.files.len());
        for file in &upload.files {
            let location = format!("{}/{}/{}", upload.index, upload.document_id, file.name);
            self.services.storage.put(&location, Bytes::from(file.bytes.clone())).await?;
            files.push(PipelineFile::new(Uuid::new_v4().to_string(), file.name.clone(), file.mime.clone(), location));
        }

        let pipeline = Pipeline::new(upload.index, upload.document_id.clone(), upload.steps, upload.tags, files);
        self.submit(pipeline).await?;
        Ok(upload.document_id)
    }

    /// `import_text(text, tags?, index?, document_id?, steps?) -> document_id` (spec §6).
    pub async fn import_text(
        &self,
        text: impl Into<String>,
        tags: common::tags::TagSet,
        index: impl Into<String>,
        document_id: Option<String>,
        steps: Option<Vec<String>>,
    ) -> Result<String, AppError> {
        let upload = DocumentUpload::new(
            index,
            document_id,
            vec![UploadFile {
                name: "text.txt".to_string(),
                bytes: text.into().into_bytes(),
                mime: "text/plain".to_string(),
            }],
            tags,
            steps,
        )?;
        self.import_document(upload).await
    }

    /// `import_web_page(url, ...) -> document_id` (spec §6). Fetches the page body and
    /// imports it as `text/plain`; HTML parsing is an out-of-scope concrete format decoder
    /// (spec §1), so markup is left in the extracted text.
    pub async fn import_web_page(
        &self,
        url: &str,
        tags: common::tags::TagSet,
        index: impl Into<String>,
        document_id: Option<String>,
    ) -> Result<String, AppError> {
        let body = reqwest::get(url).await?.text().await?;
        let name = url.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("page").to_string();
        let upload = DocumentUpload::new(
            index,
            document_id,
            vec![UploadFile {
                name,
                bytes: body.into_bytes(),
                mime: "text/plain".to_string(),
            }],
            tags,
            None,
        )?;
        self.import_document(upload).await
    }

    /// `is_document_ready(index, document_id) -> bool` (spec §6). Looks up the most recent
    /// manifest for the pair; a document with no manifest yet is not ready.
    pub async fn is_document_ready(&self, index: &str, document_id: &str) -> Result<bool, AppError> {
        let mut response = self
            .services
            .db
            .client
            .query("SELECT * FROM pipeline WHERE index = $index AND document_id = $document_id ORDER BY created_at DESC LIMIT 1")
            .bind(("index", index.to_string()))
            .bind(("document_id", document_id.to_string()))
            .await?;
        let rows: Vec<Pipeline> = response.take(0)?;
        Ok(rows.first().is_some_and(Pipeline::is_ready))
    }

    /// `ask(question, index?, filters?, min_relevance?, ...) -> {answer, no_result,
    /// relevant_sources[]}` (spec §6, §4.7).
    #[allow(clippy::too_many_arguments)]
    pub async fn ask(
        &self,
        question: &str,
        index: &str,
        filters: &[TagFilter],
        min_relevance: f32,
        limit: usize,
        options: GenerationOptions,
    ) -> Result<AskResult, AppError> {
        self.services.search_client.ask(question, index, filters, min_relevance, limit, options).await
    }

    /// `search(query, index?, filters?, limit?) -> list<partition>` (spec §6).
    pub async fn search(&self, query: &str, index: &str, filters: &[TagFilter], limit: usize) -> Result<Vec<RelevantSource>, AppError> {
        self.services.search_client.search(query, index, filters, limit).await
    }

    /// `delete_document(index, document_id)` (spec §6). Queues a deletion-only pipeline;
    /// the `delete_document` handler enumerates and removes every vector record itself.
    pub async fn delete_document(&self, index: &str, document_id: &str) -> Result<(), AppError> {
        let pipeline = Pipeline::new(index, document_id, vec!["delete_document".to_string()], common::tags::TagSet::new(), vec![]);
        self.submit(pipeline).await?;
        Ok(())
    }

    /// `delete_index(index)` (spec §6). The reserved `default` index is left intact with a
    /// warning rather than erroring (spec §8 boundary S6).
    pub async fn delete_index(&self, index: &str) -> Result<(), AppError> {
        if retrieval_pipeline::normalize_index_name(index)? == retrieval_pipeline::DEFAULT_INDEX {
            warn!(index, "refusing to delete the reserved default index");
        }
        let pipeline = Pipeline::new(index, Uuid::new_v4().to_string(), vec!["delete_index".to_string()], common::tags::TagSet::new(), vec![]);
        self.submit(pipeline).await?;
        Ok(())
    }

    /// `list_indexes() -> list<index_info>` (spec §6).
    pub async fn list_indexes(&self) -> Result<Vec<String>, AppError> {
        self.services.vector_index.list_indexes().await
    }

    async fn submit(&self, pipeline: Pipeline) -> Result<(), AppError> {
        match &self.services.orchestrator {
            Orchestrator::InProcess(orchestrator) => {
                let finished = orchestrator.submit(pipeline).await?;
                if finished.is_poisoned() {
                    return Err(AppError::PermanentIo(
                        finished.failure_reason.unwrap_or_else(|| "pipeline poisoned".to_string()),
                    ));
                }
                Ok(())
            }
            Orchestrator::Distributed(orchestrator) => orchestrator.submit(pipeline).await,
        }
    }
}
