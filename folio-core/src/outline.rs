//! Navigation outline, independent of extracted content.
//!
//! Entries live in an arena and point at their parent by index. Children are
//! ordered by entry index, so pushing entries in document order yields the
//! reading order. Nothing here prevents a corrupt source from describing a
//! parent cycle; the tree builder rejects those.

use std::collections::HashSet;

use crate::types::{NavigationKind, ProcessingWarning, UnitKey};

#[derive(Debug, Clone, PartialEq)]
pub struct OutlineEntry {
    pub title: Option<String>,
    pub unit: Option<UnitKey>,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Outline {
    pub kind: NavigationKind,
    pub entries: Vec<OutlineEntry>,
    /// Warnings raised while resolving navigation
    pub warnings: Vec<ProcessingWarning>,
    /// Confidence of inferred sections, PDF heuristics only
    pub confidence: Option<f32>,
}

impl Outline {
    pub fn new(kind: NavigationKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            warnings: Vec::new(),
            confidence: None,
        }
    }

    pub fn push(
        &mut self,
        title: Option<String>,
        unit: Option<UnitKey>,
        parent: Option<usize>,
    ) -> usize {
        self.entries.push(OutlineEntry {
            title: title.filter(|t| !t.trim().is_empty()),
            unit,
            parent,
        });
        self.entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct units in first-reference order.
    pub fn units(&self) -> Vec<UnitKey> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter_map(|e| e.unit.as_ref())
            .filter(|u| seen.insert(u.as_str()))
            .cloned()
            .collect()
    }

    pub fn references(&self, unit: &str) -> bool {
        self.entries.iter().any(|e| e.unit.as_deref() == Some(unit))
    }

    /// Push an entry at `level` for readers that see nesting as a flat list
    /// of (level, entry) pairs. `stack` holds the open ancestors; a level
    /// deeper than the stack nests one below the current top.
    pub fn push_at_level(
        &mut self,
        stack: &mut Vec<usize>,
        level: usize,
        title: Option<String>,
        unit: Option<UnitKey>,
    ) -> usize {
        stack.truncate(level);
        let parent = stack.last().copied();
        let idx = self.push(title, unit, parent);
        stack.push(idx);
        idx
    }
}
