use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::IngestConfig;
use crate::error::IngestResult;
use crate::images::ImageStoreBuilder;
use crate::pool::{CancellationToken, WorkerPool};
use crate::preprocessors::{detect_format, Preprocessor, Source};
use crate::rules::ValidationRule;
use crate::storage::calculate_source_hash;
use crate::tree::ChapterTreeBuilder;
use crate::types::{Document, DocumentInfo, ProcessingStatus, UnitKey};

/// Collects timings for pipeline steps
pub struct StepProfiler {
    enabled: bool,
    timings: Vec<(String, Duration)>,
}

impl StepProfiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timings: Vec::new(),
        }
    }

    pub fn time_step<F, R>(&mut self, step_name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();

        if self.enabled {
            info!("{}: {}ms", step_name, elapsed.as_millis());
        } else {
            debug!("{}: {}ms", step_name, elapsed.as_millis());
        }
        self.timings.push((step_name.to_string(), elapsed));
        result
    }

    pub fn timings(&self) -> &[(String, Duration)] {
        &self.timings
    }

    pub fn log_summary(&self) {
        if !self.enabled || self.timings.is_empty() {
            return;
        }

        let total: Duration = self.timings.iter().map(|(_, d)| *d).sum();
        for (step, duration) in &self.timings {
            let percentage = if total.is_zero() {
                0.0
            } else {
                duration.as_secs_f64() / total.as_secs_f64() * 100.0
            };
            info!("{:.<35} {}ms ({:.1}%)", step, duration.as_millis(), percentage);
        }
        info!("{:.<35} {}ms", "Total", total.as_millis());
    }
}

/// Per-run handles supplied by the caller.
pub struct RunContext<'a> {
    pub pool: &'a WorkerPool,
    pub token: &'a CancellationToken,
    /// Receives progress in [0, 1] at stage milestones
    pub progress: &'a (dyn Fn(f32) + Sync),
}

/// Runs one document through detection, navigation, extraction, tree
/// building, image store and normalization.
pub struct DocumentProcessor {
    config: Arc<IngestConfig>,
    enable_profiling: bool,
}

impl DocumentProcessor {
    pub fn new(config: Arc<IngestConfig>) -> Self {
        Self {
            config,
            enable_profiling: false,
        }
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.enable_profiling = enabled;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Build a normalized document. The returned document is still in
    /// `Processing`; the caller owns the transition to a terminal state.
    pub fn process(
        &self,
        document_id: &str,
        bytes: &[u8],
        filename_hint: Option<&str>,
        ctx: &RunContext<'_>,
    ) -> IngestResult<Document> {
        let config = self.config.as_ref();
        let mut profiler = StepProfiler::new(self.enable_profiling);
        let started = Utc::now();

        let format = profiler.time_step("Format detection", || detect_format(bytes, filename_hint))?;
        ctx.token.check()?;

        let source = profiler.time_step("Open container", || Source::open(format, bytes))?;
        (ctx.progress)(0.1);
        ctx.token.check()?;

        let outline = profiler.time_step("Navigation", || source.resolve_outline(config))?;
        let units: Vec<UnitKey> = source.content_units(&outline, config);
        info!(
            "{}: {} outline entries, {} content units via {}",
            document_id,
            outline.len(),
            units.len(),
            source.name()
        );
        (ctx.progress)(0.2);
        ctx.token.check()?;

        let on_done = |done: usize, total: usize| {
            (ctx.progress)(0.2 + 0.6 * done as f32 / total.max(1) as f32);
        };
        let results = profiler.time_step("Content extraction", || {
            ctx.pool
                .run_all(&units, ctx.token, &on_done, |key| source.extract_unit(key, config))
        })?;
        let extracted: HashMap<_, _> = results
            .into_iter()
            .map(|(idx, result)| (units[idx].clone(), result))
            .collect();
        ctx.token.check()?;

        let tree = profiler.time_step("Tree building", || {
            ChapterTreeBuilder::new(document_id).build(&outline, &units, extracted)
        })?;
        let mut chapters = tree.chapters;
        (ctx.progress)(0.85);

        let store = profiler.time_step("Image store", || {
            ImageStoreBuilder::new(document_id).build(&mut chapters, &source)
        });
        ctx.token.check()?;

        let mut warnings = outline.warnings;
        warnings.extend(tree.warnings);
        warnings.extend(store.warnings);

        let title = source
            .title()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                filename_hint
                    .and_then(|n| Path::new(n).file_stem())
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "Untitled".to_string());

        let mut document = Document {
            id: document_id.to_string(),
            title,
            author: source.author(),
            format: source.format(),
            status: ProcessingStatus::Processing,
            error: None,
            info: DocumentInfo {
                metadata: source.metadata(),
                warnings,
                navigation: outline.kind,
                section_confidence: outline.confidence,
                source_sha256: calculate_source_hash(bytes),
                config_hash: config.output_hash(),
            },
            chapters,
            images: store.images,
            created_at: started,
            updated_at: Utc::now(),
        };

        profiler.time_step("Normalization", || ValidationRule::normalize(&mut document))?;
        (ctx.progress)(0.95);

        info!(
            "{}: {} chapters, {} images, {} warnings",
            document_id,
            document.chapters.len(),
            document.images.len(),
            document.info.warnings.len()
        );
        profiler.log_summary();
        Ok(document)
    }
}
