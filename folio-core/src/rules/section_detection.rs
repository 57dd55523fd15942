use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::PdfSectionConfig;
use crate::preprocessors::pdf::page_reader::{PdfPage, TextLine};

/// A line judged likely to open a section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionCandidate {
    pub page: u32,
    /// Index of the first line in the page
    pub line: usize,
    pub title: String,
    pub font_size: f32,
    pub score: f32,
    pub level: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SectionDetection {
    pub candidates: Vec<SectionCandidate>,
    pub confidence: f32,
    pub body_font_size: f32,
}

/// Font sizes seen in a document, and the heading levels derived from them.
#[derive(Debug, Clone, Default)]
pub struct FontSizeAnalysis {
    pub body_size: f32,
    /// Distinct heading sizes, largest first; index = level
    level_font_sizes: Vec<f32>,
    tolerance: f32,
}

impl FontSizeAnalysis {
    /// Character-weighted modal size over all lines. Ties go to the
    /// smaller size.
    pub fn from_pages(pages: &[PdfPage], tolerance: f32) -> Self {
        let mut weights: BTreeMap<i64, usize> = BTreeMap::new();
        for line in pages.iter().flat_map(|p| p.lines.iter()) {
            let key = (line.font_size * 10.0).round() as i64;
            *weights.entry(key).or_insert(0) += line.text.chars().count();
        }
        let body_size = weights
            .iter()
            .fold(None, |best: Option<(i64, usize)>, (&size, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((size, count)),
            })
            .map(|(size, _)| size as f32 / 10.0)
            .unwrap_or(0.0);

        Self {
            body_size,
            level_font_sizes: Vec::new(),
            tolerance,
        }
    }

    /// Rank the distinct sizes of `sizes`, merging sizes within tolerance.
    pub fn rank_heading_sizes(&mut self, sizes: impl IntoIterator<Item = f32>) {
        let mut sorted: Vec<f32> = sizes.into_iter().collect();
        sorted.sort_by(|a, b| b.total_cmp(a));
        self.level_font_sizes.clear();
        for size in sorted {
            let known = self
                .level_font_sizes
                .last()
                .is_some_and(|last| (last - size).abs() <= self.tolerance);
            if !known {
                self.level_font_sizes.push(size);
            }
        }
    }

    pub fn level_for(&self, font_size: f32, max_depth: usize) -> usize {
        let rank = self
            .level_font_sizes
            .iter()
            .position(|s| (s - font_size).abs() <= self.tolerance)
            .unwrap_or_else(|| {
                self.level_font_sizes
                    .iter()
                    .filter(|s| **s > font_size)
                    .count()
            });
        rank.min(max_depth.saturating_sub(1))
    }

    pub fn distinct_levels(&self) -> usize {
        self.level_font_sizes.len()
    }
}

/// Scores lines as section starts from font size and heading patterns.
pub struct SectionDetectionRule<'a> {
    config: &'a PdfSectionConfig,
    patterns: Vec<Regex>,
}

impl<'a> SectionDetectionRule<'a> {
    /// Invalid heading patterns are skipped with a warning.
    pub fn new(config: &'a PdfSectionConfig) -> Self {
        let patterns = config
            .heading_patterns
            .iter()
            .filter_map(|p| {
                Regex::new(p)
                    .map_err(|e| warn!("Ignoring heading pattern {:?}: {}", p, e))
                    .ok()
            })
            .collect();
        Self { config, patterns }
    }

    fn matches_pattern(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }

    fn length_ok(&self, text: &str) -> bool {
        let chars = text.chars().count();
        chars >= self.config.min_heading_chars && chars <= self.config.max_heading_chars
    }

    fn size_jump(&self, line: &TextLine, body: f32) -> f32 {
        if body <= 0.0 {
            return 0.0;
        }
        line.font_size / body - 1.0
    }

    fn score(&self, jump: f32, pattern: bool) -> f32 {
        let size_part = (jump / (2.0 * self.config.font_jump_ratio)).clamp(0.0, 1.0);
        let pattern_part = if pattern { 1.0 } else { 0.0 };
        self.config.size_weight * size_part + self.config.pattern_weight * pattern_part
    }

    pub fn detect(&self, pages: &[PdfPage]) -> SectionDetection {
        let mut analysis = FontSizeAnalysis::from_pages(pages, self.config.font_size_tolerance);
        let body = analysis.body_size;
        let mut candidates: Vec<SectionCandidate> = Vec::new();

        for page in pages {
            // Index of the previous line when it was a size-jump candidate
            let mut previous_sized: Option<usize> = None;

            for (idx, line) in page.lines.iter().enumerate() {
                let jump = self.size_jump(line, body);
                let sized = jump >= self.config.font_jump_ratio;
                let pattern = self.matches_pattern(&line.text);

                // Headings wrapped over several lines of the same size
                if sized && previous_sized == Some(idx.wrapping_sub(1)) {
                    if let Some(last) = candidates.last_mut() {
                        let same_size =
                            (last.font_size - line.font_size).abs() <= self.config.font_size_tolerance;
                        let merged = format!("{} {}", last.title, line.text);
                        if same_size && self.length_ok(&merged) {
                            last.title = merged;
                            last.score = last.score.max(self.score(jump, pattern));
                            previous_sized = Some(idx);
                            continue;
                        }
                    }
                }

                if !(sized || pattern) || !self.length_ok(&line.text) {
                    previous_sized = None;
                    continue;
                }

                candidates.push(SectionCandidate {
                    page: page.number,
                    line: idx,
                    title: line.text.clone(),
                    font_size: line.font_size,
                    score: self.score(jump, pattern),
                    level: 0,
                });
                previous_sized = sized.then_some(idx);
            }
        }

        if candidates.is_empty() {
            debug!("No section candidates (body size {:.1})", body);
            return SectionDetection {
                candidates,
                confidence: 0.0,
                body_font_size: body,
            };
        }

        analysis.rank_heading_sizes(candidates.iter().map(|c| c.font_size));
        for candidate in &mut candidates {
            candidate.level = analysis.level_for(candidate.font_size, self.config.max_depth as usize);
        }

        let mean_score = candidates.iter().map(|c| c.score).sum::<f32>() / candidates.len() as f32;
        let consistent = candidates
            .iter()
            .enumerate()
            .filter(|(i, c)| {
                candidates.iter().enumerate().any(|(j, other)| {
                    *i != j
                        && (other.font_size - c.font_size).abs() <= self.config.font_size_tolerance
                })
            })
            .count();
        let consistency = (consistent as f32 / candidates.len() as f32).max(0.5);
        let confidence = mean_score * consistency;

        debug!(
            "Section detection: {} candidates, {} levels, body {:.1}pt, confidence {:.2}",
            candidates.len(),
            analysis.distinct_levels(),
            body,
            confidence
        );

        SectionDetection {
            candidates,
            confidence,
            body_font_size: body,
        }
    }
}
