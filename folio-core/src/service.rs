//! Ingestion service: job registry, document-level scheduling and the
//! persistence handoff.

use anyhow::{anyhow, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::error::{ErrorDetail, IngestError};
use crate::ids::generate_document_id;
use crate::pool::{CancellationToken, WorkerPool};
use crate::processor::{DocumentProcessor, RunContext};
use crate::storage::DocumentStorage;
use crate::types::{Document, DocumentId, ProcessingResult, ProcessingStatus};

struct Job {
    status: ProcessingStatus,
    progress: f32,
    document: Option<Arc<Document>>,
    error: Option<ErrorDetail>,
    token: CancellationToken,
}

impl Job {
    fn result(&self, id: &str) -> ProcessingResult {
        ProcessingResult {
            document_id: id.to_string(),
            status: self.status,
            progress: self.progress,
            document: self.document.clone(),
            error: self.error.clone(),
        }
    }
}

struct ServiceInner {
    processor: DocumentProcessor,
    extraction_pool: WorkerPool,
    document_pool: ThreadPool,
    storage: Arc<dyn DocumentStorage>,
    jobs: Mutex<HashMap<DocumentId, Job>>,
    changed: Condvar,
}

impl ServiceInner {
    fn jobs(&self) -> MutexGuard<'_, HashMap<DocumentId, Job>> {
        // a panicking worker must not take the registry down with it
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `update` unless the job is already terminal.
    fn update(&self, id: &str, update: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs();
        if let Some(job) = jobs.get_mut(id) {
            if !job.status.is_terminal() {
                update(job);
            }
        }
        drop(jobs);
        self.changed.notify_all();
    }

    fn transition(&self, id: &str, next: ProcessingStatus) -> Result<(), IngestError> {
        let mut jobs = self.jobs();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| IngestError::InvariantViolation(format!("unknown job {id}")))?;
        job.status.transition(next)?;
        drop(jobs);
        self.changed.notify_all();
        Ok(())
    }

    fn fail(&self, id: &str, error: &IngestError) {
        warn!("{} failed: {}", id, error);
        self.update(id, |job| {
            if job.status.transition(ProcessingStatus::Failed).is_ok() {
                job.error = Some(error.detail());
                job.document = None;
            }
        });
    }

    fn run(&self, id: &str, bytes: Vec<u8>, filename_hint: Option<String>, token: CancellationToken) {
        if let Err(e) = token.check() {
            self.fail(id, &e);
            return;
        }
        if let Err(e) = self.transition(id, ProcessingStatus::Processing) {
            self.fail(id, &e);
            return;
        }

        let progress = |value: f32| self.update(id, |job| job.progress = job.progress.max(value));
        let ctx = RunContext {
            pool: &self.extraction_pool,
            token: &token,
            progress: &progress,
        };

        let mut document = match self
            .processor
            .process(id, &bytes, filename_hint.as_deref(), &ctx)
        {
            Ok(document) => document,
            Err(e) => {
                self.fail(id, &e);
                return;
            }
        };

        // Persist the record in its final state, then publish it
        if let Err(e) = document.status.transition(ProcessingStatus::Completed) {
            self.fail(id, &e);
            return;
        }
        if let Err(e) = token.check() {
            self.fail(id, &e);
            return;
        }
        if let Err(e) = self.storage.store_document(&document) {
            self.fail(id, &IngestError::Storage(format!("{e:#}")));
            return;
        }

        let document = Arc::new(document);
        self.update(id, |job| {
            if job.status.transition(ProcessingStatus::Completed).is_ok() {
                job.progress = 1.0;
                job.document = Some(document);
            }
        });
        info!("{} completed", id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Accepts documents for processing and reports their state.
///
/// Each submitted document runs on a bounded document pool; its content
/// units fan out over one extraction pool shared by all runs.
#[derive(Clone)]
pub struct IngestionService {
    inner: Arc<ServiceInner>,
}

impl IngestionService {
    pub fn new(config: IngestConfig, storage: Arc<dyn DocumentStorage>) -> Result<Self> {
        Self::with_profiling(config, storage, false)
    }

    pub fn with_profiling(
        config: IngestConfig,
        storage: Arc<dyn DocumentStorage>,
        enable_profiling: bool,
    ) -> Result<Self> {
        let extraction_pool = WorkerPool::new(config.extraction.worker_threads)?;
        let document_pool = ThreadPoolBuilder::new()
            .num_threads(config.extraction.max_concurrent_documents.max(1))
            .thread_name(|i| format!("folio-document-{i}"))
            .build()
            .map_err(|e| anyhow!("Failed to build document pool: {}", e))?;
        info!(
            "Ingestion service: {} extraction threads, {} concurrent documents",
            extraction_pool.threads(),
            document_pool.current_num_threads()
        );

        let processor = DocumentProcessor::new(Arc::new(config)).with_profiling(enable_profiling);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                processor,
                extraction_pool,
                document_pool,
                storage,
                jobs: Mutex::new(HashMap::new()),
                changed: Condvar::new(),
            }),
        })
    }

    /// Register the document as `Pending` and schedule it. Returns at once.
    pub fn process_document(&self, bytes: Vec<u8>, filename_hint: Option<&str>) -> DocumentId {
        let id = generate_document_id(filename_hint);
        let token = CancellationToken::new();
        self.inner.jobs().insert(
            id.clone(),
            Job {
                status: ProcessingStatus::Pending,
                progress: 0.0,
                document: None,
                error: None,
                token: token.clone(),
            },
        );
        info!("Accepted {} ({} bytes)", id, bytes.len());

        let inner = Arc::clone(&self.inner);
        let job_id = id.clone();
        let hint = filename_hint.map(str::to_string);
        self.inner.document_pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| inner.run(&job_id, bytes, hint, token)));
            if let Err(payload) = outcome {
                let message = format!("worker panicked: {}", panic_message(payload.as_ref()));
                inner.fail(&job_id, &IngestError::InvariantViolation(message));
            }
        });
        id
    }

    pub fn get_processing_result(&self, id: &str) -> Option<ProcessingResult> {
        self.inner.jobs().get(id).map(|job| job.result(id))
    }

    /// Request cooperative cancellation. Returns false for unknown or
    /// already terminal documents.
    pub fn cancel(&self, id: &str) -> bool {
        let jobs = self.inner.jobs();
        match jobs.get(id) {
            Some(job) if !job.status.is_terminal() => {
                job.token.cancel();
                info!("Cancellation requested for {}", id);
                true
            }
            _ => false,
        }
    }

    /// Block until the document reaches a terminal state or `timeout`
    /// elapses; returns the latest result either way.
    pub fn wait_for(&self, id: &str, timeout: Option<Duration>) -> Option<ProcessingResult> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut jobs = self.inner.jobs();
        loop {
            let job = jobs.get(id)?;
            if job.status.is_terminal() {
                return Some(job.result(id));
            }
            jobs = match deadline {
                None => self
                    .inner
                    .changed
                    .wait(jobs)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Some(job.result(id));
                    }
                    self.inner
                        .changed
                        .wait_timeout(jobs, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    /// Convenience for callers that want the terminal result directly.
    pub fn process_and_wait(&self, bytes: Vec<u8>, filename_hint: Option<&str>) -> ProcessingResult {
        let id = self.process_document(bytes, filename_hint);
        match self.wait_for(&id, None) {
            Some(result) => result,
            None => ProcessingResult {
                document_id: id,
                status: ProcessingStatus::Failed,
                progress: 0.0,
                document: None,
                error: Some(IngestError::InvariantViolation("job vanished from registry".into()).detail()),
            },
        }
    }

    /// Remove a finished document from the registry and the storage.
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let mut jobs = self.inner.jobs();
        if let Some(job) = jobs.get(id) {
            if !job.status.is_terminal() {
                return Err(anyhow!("Document {} is still processing", id));
            }
        }
        let known = jobs.remove(id).is_some();
        drop(jobs);
        Ok(self.inner.storage.delete_document(id)? || known)
    }

    pub fn storage(&self) -> &Arc<dyn DocumentStorage> {
        &self.inner.storage
    }

    pub fn config(&self) -> &IngestConfig {
        self.inner.processor.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::preprocessors::epub::test_support::{build_epub, xhtml};
    use crate::storage::{FileStorage, InMemoryStorage, NoOpStorage};

    fn small_epub() -> Vec<u8> {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Small</dc:title></metadata>
  <manifest><item id="a" href="a.xhtml" media-type="application/xhtml+xml"/></manifest>
  <spine><itemref idref="a"/></spine>
</package>"#;
        let a = xhtml("a", "<h1>Only</h1><p>Text.</p>");
        build_epub(&[("OEBPS/content.opf", opf.as_bytes()), ("OEBPS/a.xhtml", &a)])
    }

    struct FailingStorage;

    impl DocumentStorage for FailingStorage {
        fn store_document(&self, _: &Document) -> Result<()> {
            Err(anyhow!("disk full"))
        }
        fn get_document(&self, _: &str) -> Result<Option<Document>> {
            Ok(None)
        }
        fn list_documents(&self) -> Result<Vec<DocumentId>> {
            Ok(Vec::new())
        }
        fn delete_document(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    struct PanickingStorage;

    impl DocumentStorage for PanickingStorage {
        fn store_document(&self, _: &Document) -> Result<()> {
            panic!("store exploded")
        }
        fn get_document(&self, _: &str) -> Result<Option<Document>> {
            Ok(None)
        }
        fn list_documents(&self) -> Result<Vec<DocumentId>> {
            Ok(Vec::new())
        }
        fn delete_document(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_completed_document_is_persisted() {
        let storage = Arc::new(InMemoryStorage::new());
        let service = IngestionService::new(IngestConfig::default(), storage.clone()).unwrap();

        let result = service.process_and_wait(small_epub(), Some("small.epub"));
        assert_eq!(result.status, ProcessingStatus::Completed);
        assert_eq!(result.progress, 1.0);

        let stored = storage.get_document(&result.document_id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.chapters.len(), 1);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["document"]["title"], "Small");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_storage_failure_fails_document() {
        let service = IngestionService::new(IngestConfig::default(), Arc::new(FailingStorage)).unwrap();
        let result = service.process_and_wait(small_epub(), None);

        assert_eq!(result.status, ProcessingStatus::Failed);
        assert!(result.document.is_none());
        assert_eq!(result.error.unwrap().kind, ErrorKind::StorageError);
    }

    #[test]
    fn test_worker_panic_fails_document_and_service_survives() {
        let mut config = IngestConfig::default();
        config.extraction.max_concurrent_documents = 1;
        let service = IngestionService::new(config, Arc::new(PanickingStorage)).unwrap();

        let first = service.process_and_wait(small_epub(), None);
        assert_eq!(first.status, ProcessingStatus::Failed);
        let error = first.error.unwrap();
        assert_eq!(error.kind, ErrorKind::InvariantViolation);
        assert!(error.message.contains("store exploded"));

        // The single document thread is still alive for the next job
        let second = service.process_and_wait(small_epub(), None);
        assert_eq!(second.status, ProcessingStatus::Failed);
        assert_ne!(first.document_id, second.document_id);
    }

    #[test]
    fn test_non_ascii_filename_persists_to_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path().to_str().unwrap()).unwrap());
        let service = IngestionService::new(IngestConfig::default(), storage.clone()).unwrap();

        let result = service.process_and_wait(small_epub(), Some("Café Stories.epub"));
        assert_eq!(result.status, ProcessingStatus::Completed);
        assert!(result.document_id.is_ascii());
        assert!(storage.get_document(&result.document_id).unwrap().is_some());
    }

    #[test]
    fn test_unsupported_format_fails() {
        let service = IngestionService::new(IngestConfig::default(), Arc::new(NoOpStorage)).unwrap();
        let result = service.process_and_wait(b"plain text".to_vec(), Some("a.txt"));
        assert_eq!(result.status, ProcessingStatus::Failed);
        assert_eq!(result.error.unwrap().kind, ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_terminal_documents_cannot_be_cancelled() {
        let service = IngestionService::new(IngestConfig::default(), Arc::new(NoOpStorage)).unwrap();
        let result = service.process_and_wait(small_epub(), None);
        assert_eq!(result.status, ProcessingStatus::Completed);
        assert!(!service.cancel(&result.document_id));
        assert!(!service.cancel("doc_unknown"));
    }

    #[test]
    fn test_cancel_pending_document() {
        let mut config = IngestConfig::default();
        config.extraction.max_concurrent_documents = 1;
        let service = IngestionService::new(config, Arc::new(NoOpStorage)).unwrap();

        // Occupy the only document slot so the second job stays pending
        let blocker = Arc::new((Mutex::new(false), Condvar::new()));
        let gate = Arc::clone(&blocker);
        service.inner.document_pool.spawn(move || {
            let (lock, cvar) = &*gate;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
        });

        let id = service.process_document(small_epub(), None);
        assert_eq!(
            service.get_processing_result(&id).unwrap().status,
            ProcessingStatus::Pending
        );
        assert!(service.cancel(&id));

        let (lock, cvar) = &*blocker;
        *lock.lock().unwrap() = true;
        cvar.notify_all();

        let result = service.wait_for(&id, Some(Duration::from_secs(30))).unwrap();
        assert_eq!(result.status, ProcessingStatus::Failed);
        assert_eq!(result.error.unwrap().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_unknown_id() {
        let service = IngestionService::new(IngestConfig::default(), Arc::new(NoOpStorage)).unwrap();
        assert!(service.get_processing_result("doc_missing").is_none());
        assert!(service.wait_for("doc_missing", Some(Duration::from_millis(1))).is_none());
    }
}
