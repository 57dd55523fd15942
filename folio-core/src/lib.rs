// Folio Core Library
//
// Ingests EPUB and PDF files into a normalized document model:
// documents own ordered, nested chapters, chapters own their content,
// images are shared per document and deduplicated by content.

pub mod config;
pub mod error;
pub mod ids;
pub mod images;
pub mod outline;
pub mod pool;
pub mod preprocessors;
pub mod processor;
pub mod rules;
pub mod search;
pub mod service;
pub mod storage;
pub mod text;
pub mod tree;
pub mod types;

// Re-export main types and functions for easy use
pub use config::IngestConfig;
pub use error::{ErrorDetail, ErrorKind, IngestError, IngestResult};
pub use pool::{CancellationToken, WorkerPool};
pub use preprocessors::{detect_format, Preprocessor, Source};
pub use processor::{DocumentProcessor, RunContext};
pub use search::{search_documents, SearchHit, SearchOptions};
pub use service::IngestionService;
pub use storage::{DocumentStorage, FileStorage, InMemoryStorage, NoOpStorage};
pub use tree::{ChapterHierarchy, ChapterPreview, OutputFormat};
pub use types::*;
