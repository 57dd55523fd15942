use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult};
use crate::types::{ChapterId, Document, ImageId};

// ValidationRule - final invariant check over a fully assembled document
pub struct ValidationRule;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    ForeignChapter {
        chapter: ChapterId,
        document_id: String,
    },
    DuplicateChapterId {
        chapter: ChapterId,
    },
    OrderNotIncreasing {
        chapter: ChapterId,
        previous: u32,
        order: u32,
    },
    MissingParent {
        chapter: ChapterId,
        parent: ChapterId,
    },
    ChildLinkMismatch {
        parent: ChapterId,
        child: ChapterId,
    },
    Cycle {
        chapter: ChapterId,
    },
    LevelMismatch {
        chapter: ChapterId,
        expected: u32,
        actual: u32,
    },
    PreorderMismatch {
        position: usize,
        expected: ChapterId,
        actual: ChapterId,
    },
    DanglingImage {
        chapter: ChapterId,
        image: ImageId,
    },
    ForeignImage {
        image: ImageId,
    },
}

impl ValidationIssue {
    /// Issues in the parent/child graph, reported as hierarchy errors.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ValidationIssue::MissingParent { .. }
                | ValidationIssue::ChildLinkMismatch { .. }
                | ValidationIssue::Cycle { .. }
                | ValidationIssue::LevelMismatch { .. }
                | ValidationIssue::PreorderMismatch { .. }
        )
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::ForeignChapter { chapter, document_id } => {
                write!(f, "chapter {chapter} belongs to document {document_id}")
            }
            ValidationIssue::DuplicateChapterId { chapter } => {
                write!(f, "chapter id {chapter} appears more than once")
            }
            ValidationIssue::OrderNotIncreasing { chapter, previous, order } => {
                write!(f, "chapter {chapter} has order {order} after {previous}")
            }
            ValidationIssue::MissingParent { chapter, parent } => {
                write!(f, "chapter {chapter} points at missing parent {parent}")
            }
            ValidationIssue::ChildLinkMismatch { parent, child } => {
                write!(f, "parent {parent} and child {child} disagree about their link")
            }
            ValidationIssue::Cycle { chapter } => {
                write!(f, "chapter {chapter} is its own ancestor")
            }
            ValidationIssue::LevelMismatch { chapter, expected, actual } => {
                write!(f, "chapter {chapter} has level {actual}, expected {expected}")
            }
            ValidationIssue::PreorderMismatch { position, expected, actual } => write!(
                f,
                "order position {position} holds {actual}, pre-order expects {expected}"
            ),
            ValidationIssue::DanglingImage { chapter, image } => {
                write!(f, "chapter {chapter} references missing image {image}")
            }
            ValidationIssue::ForeignImage { image } => {
                write!(f, "image {image} belongs to another document")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub total_chapters: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Structural issues fail as `HierarchyError`, anything else as
    /// `InvariantViolation`. The first issue of the chosen kind names it.
    pub fn into_result(self) -> IngestResult<()> {
        if let Some(issue) = self.issues.iter().find(|i| i.is_structural()) {
            return Err(IngestError::Hierarchy(issue.to_string()));
        }
        match self.issues.first() {
            Some(issue) => Err(IngestError::InvariantViolation(format!(
                "{} ({} issues total)",
                issue,
                self.issues.len()
            ))),
            None => Ok(()),
        }
    }
}

impl ValidationRule {
    /// Sort chapters by order, then check every document invariant.
    pub fn normalize(document: &mut Document) -> IngestResult<()> {
        document.chapters.sort_by_key(|c| c.order);
        let report = Self::validate(document);
        if !report.is_valid() {
            for issue in &report.issues {
                warn!("Validation: {}", issue);
            }
        }
        debug!(
            "Validated {} chapters, {} issues",
            report.total_chapters,
            report.issues.len()
        );
        report.into_result()
    }

    pub fn validate(document: &Document) -> ValidationReport {
        let mut issues = Vec::new();
        let chapters = &document.chapters;
        let by_id: HashMap<&str, usize> = chapters
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str(), i))
            .collect();

        // Ownership, ids and ordering
        let mut seen = HashSet::new();
        let mut previous: Option<u32> = None;
        for chapter in chapters {
            if chapter.document_id != document.id {
                issues.push(ValidationIssue::ForeignChapter {
                    chapter: chapter.id.clone(),
                    document_id: chapter.document_id.clone(),
                });
            }
            if !seen.insert(chapter.id.as_str()) {
                issues.push(ValidationIssue::DuplicateChapterId {
                    chapter: chapter.id.clone(),
                });
            }
            if let Some(prev) = previous {
                if chapter.order <= prev {
                    issues.push(ValidationIssue::OrderNotIncreasing {
                        chapter: chapter.id.clone(),
                        previous: prev,
                        order: chapter.order,
                    });
                }
            }
            previous = Some(chapter.order);
        }

        // Parent links, symmetry and levels
        for chapter in chapters {
            match &chapter.parent_id {
                None => {
                    if chapter.level != 0 {
                        issues.push(ValidationIssue::LevelMismatch {
                            chapter: chapter.id.clone(),
                            expected: 0,
                            actual: chapter.level,
                        });
                    }
                }
                Some(parent_id) => match by_id.get(parent_id.as_str()) {
                    None => issues.push(ValidationIssue::MissingParent {
                        chapter: chapter.id.clone(),
                        parent: parent_id.clone(),
                    }),
                    Some(&p) => {
                        let parent = &chapters[p];
                        if !parent.children.contains(&chapter.id) {
                            issues.push(ValidationIssue::ChildLinkMismatch {
                                parent: parent.id.clone(),
                                child: chapter.id.clone(),
                            });
                        }
                        if chapter.level != parent.level + 1 {
                            issues.push(ValidationIssue::LevelMismatch {
                                chapter: chapter.id.clone(),
                                expected: parent.level + 1,
                                actual: chapter.level,
                            });
                        }
                    }
                },
            }
            for child in &chapter.children {
                let agrees = by_id
                    .get(child.as_str())
                    .is_some_and(|&c| chapters[c].parent_id.as_ref() == Some(&chapter.id));
                if !agrees {
                    issues.push(ValidationIssue::ChildLinkMismatch {
                        parent: chapter.id.clone(),
                        child: child.clone(),
                    });
                }
            }
        }

        // Acyclicity: every parent walk must reach a root within len steps
        for chapter in chapters {
            let mut current = chapter.parent_id.as_deref();
            let mut steps = 0;
            while let Some(parent_id) = current {
                if parent_id == chapter.id || steps > chapters.len() {
                    issues.push(ValidationIssue::Cycle {
                        chapter: chapter.id.clone(),
                    });
                    break;
                }
                current = by_id
                    .get(parent_id)
                    .and_then(|&p| chapters[p].parent_id.as_deref());
                steps += 1;
            }
        }

        // Ascending order must be the pre-order of the forest
        let mut preorder: Vec<&str> = Vec::with_capacity(chapters.len());
        let mut visited = HashSet::new();
        let mut stack: Vec<&str> = chapters
            .iter()
            .filter(|c| c.parent_id.is_none())
            .map(|c| c.id.as_str())
            .rev()
            .collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            preorder.push(id);
            if let Some(&idx) = by_id.get(id) {
                stack.extend(chapters[idx].children.iter().rev().map(String::as_str));
            }
        }
        for (position, (expected, chapter)) in preorder.iter().zip(chapters.iter()).enumerate() {
            if *expected != chapter.id {
                issues.push(ValidationIssue::PreorderMismatch {
                    position,
                    expected: expected.to_string(),
                    actual: chapter.id.clone(),
                });
                break;
            }
        }
        if preorder.len() < chapters.len() && !issues.iter().any(|i| i.is_structural()) {
            // Chapters unreachable from any root sit on a parent cycle
            if let Some(stray) = chapters.iter().find(|c| !visited.contains(c.id.as_str())) {
                issues.push(ValidationIssue::Cycle {
                    chapter: stray.id.clone(),
                });
            }
        }

        // Images
        for chapter in chapters {
            for image in &chapter.content.images {
                if !document.images.contains_key(image) {
                    issues.push(ValidationIssue::DanglingImage {
                        chapter: chapter.id.clone(),
                        image: image.clone(),
                    });
                }
            }
        }
        for (key, image) in &document.images {
            if image.document_id != document.id || *key != image.id {
                issues.push(ValidationIssue::ForeignImage { image: key.clone() });
            }
        }

        ValidationReport {
            issues,
            total_chapters: chapters.len(),
        }
    }
}
