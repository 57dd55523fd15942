use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::{ErrorKind, IngestError, IngestResult};
use crate::ids::chapter_id;
use crate::outline::Outline;
use crate::preprocessors::ExtractedUnit;
use crate::text::infer_title;
use crate::types::{Chapter, ChapterContent, ChapterId, ProcessingWarning, UnitKey, WarningKind};

/// Chapters in ascending order plus warnings raised while assembling them.
#[derive(Debug, Default)]
pub struct ChapterTree {
    pub chapters: Vec<Chapter>,
    pub warnings: Vec<ProcessingWarning>,
}

/// One slot in the root sequence: an outline root or an unlisted unit.
#[derive(Debug, Clone, PartialEq)]
enum RootItem {
    Outline(usize),
    Unlisted(UnitKey),
}

/// A pending pre-order visit.
enum Visit {
    Entry { idx: usize, level: u32, parent: Option<usize> },
    Unlisted(UnitKey),
}

/// Reconciles an outline with per-unit extraction results into a chapter
/// forest. Chapters live in a flat arena ordered by pre-order position;
/// parent and child links are ids into that arena.
pub struct ChapterTreeBuilder<'a> {
    document_id: &'a str,
}

impl<'a> ChapterTreeBuilder<'a> {
    pub fn new(document_id: &'a str) -> Self {
        Self { document_id }
    }

    /// Reject parent links that point outside the outline or loop back on
    /// themselves. Each walk is bounded by the entry count.
    pub fn validate_outline(outline: &Outline) -> IngestResult<()> {
        let len = outline.entries.len();
        for (idx, entry) in outline.entries.iter().enumerate() {
            let mut current = entry.parent;
            let mut steps = 0;
            while let Some(parent) = current {
                if parent >= len {
                    return Err(IngestError::Hierarchy(format!(
                        "outline entry {idx} has parent {parent} outside the outline"
                    )));
                }
                if parent == idx || steps > len {
                    return Err(IngestError::Hierarchy(format!(
                        "outline entry {idx} is its own ancestor"
                    )));
                }
                current = outline.entries[parent].parent;
                steps += 1;
            }
        }
        Ok(())
    }

    fn root_of(outline: &Outline, mut idx: usize) -> usize {
        while let Some(parent) = outline.entries[idx].parent {
            idx = parent;
        }
        idx
    }

    /// Root sequence with unlisted units placed after the root subtree that
    /// holds the nearest preceding referenced unit, or at the front.
    fn root_sequence(
        outline: &Outline,
        reading_order: &[UnitKey],
        unlisted: &HashSet<&str>,
    ) -> Vec<RootItem> {
        let first_reference: HashMap<&str, usize> = outline
            .entries
            .iter()
            .enumerate()
            .rev()
            .filter_map(|(i, e)| e.unit.as_deref().map(|u| (u, i)))
            .collect();

        let mut front = Vec::new();
        let mut after_root: BTreeMap<usize, Vec<UnitKey>> = BTreeMap::new();
        let mut anchor: Option<usize> = None;

        for unit in reading_order {
            if let Some(&entry) = first_reference.get(unit.as_str()) {
                anchor = Some(Self::root_of(outline, entry));
            } else if unlisted.contains(unit.as_str()) {
                match anchor {
                    Some(root) => after_root.entry(root).or_default().push(unit.clone()),
                    None => front.push(unit.clone()),
                }
            }
        }

        let mut sequence: Vec<RootItem> = front.into_iter().map(RootItem::Unlisted).collect();
        for (idx, entry) in outline.entries.iter().enumerate() {
            if entry.parent.is_some() {
                continue;
            }
            sequence.push(RootItem::Outline(idx));
            if let Some(units) = after_root.remove(&idx) {
                sequence.extend(units.into_iter().map(RootItem::Unlisted));
            }
        }
        sequence
    }

    /// Build the forest. `extracted` holds one result per unit in
    /// `reading_order`; units the outline never references become root
    /// chapters only when they carry content.
    pub fn build(
        &self,
        outline: &Outline,
        reading_order: &[UnitKey],
        mut extracted: HashMap<UnitKey, IngestResult<ExtractedUnit>>,
    ) -> IngestResult<ChapterTree> {
        Self::validate_outline(outline)?;

        let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); outline.entries.len()];
        for (idx, entry) in outline.entries.iter().enumerate() {
            if let Some(parent) = entry.parent {
                children_of[parent].push(idx);
            }
        }

        let unlisted: HashSet<&str> = reading_order
            .iter()
            .filter(|u| !outline.references(u))
            .filter(|u| matches!(extracted.get(u.as_str()), Some(Ok(unit)) if unit.has_content()))
            .map(String::as_str)
            .collect();
        let roots = Self::root_sequence(outline, reading_order, &unlisted);

        let mut tree = ChapterTree::default();
        let mut chapter_of_entry: HashMap<usize, usize> = HashMap::new();
        let mut owner_of_unit: HashMap<UnitKey, (ChapterId, String)> = HashMap::new();

        let mut stack: Vec<Visit> = roots
            .into_iter()
            .rev()
            .map(|item| match item {
                RootItem::Outline(idx) => Visit::Entry { idx, level: 0, parent: None },
                RootItem::Unlisted(unit) => Visit::Unlisted(unit),
            })
            .collect();

        while let Some(visit) = stack.pop() {
            let order = tree.chapters.len() as u32 + 1;
            let id = chapter_id(self.document_id, order);

            let (entry_title, unit, level, parent_pos) = match &visit {
                Visit::Entry { idx, level, parent } => {
                    let entry = &outline.entries[*idx];
                    chapter_of_entry.insert(*idx, tree.chapters.len());
                    for child in children_of[*idx].iter().rev() {
                        stack.push(Visit::Entry {
                            idx: *child,
                            level: level + 1,
                            parent: Some(*idx),
                        });
                    }
                    let parent_pos = parent.and_then(|p| chapter_of_entry.get(&p).copied());
                    (entry.title.clone(), entry.unit.clone(), *level, parent_pos)
                }
                Visit::Unlisted(unit) => (None, Some(unit.clone()), 0, None),
            };

            let mut chapter = Chapter {
                id: id.clone(),
                document_id: self.document_id.to_string(),
                title: String::new(),
                order,
                level,
                parent_id: parent_pos.map(|p| tree.chapters[p].id.clone()),
                children: Vec::new(),
                source: unit.clone(),
                shares_content_with: None,
                content: ChapterContent::default(),
            };

            let mut heading = None;
            match unit {
                Some(unit) => {
                    if let Some((owner, owner_title)) = owner_of_unit.get(&unit) {
                        debug!("{} repeats unit {} held by {}", id, unit, owner);
                        chapter.shares_content_with = Some(owner.clone());
                        heading = Some(owner_title.clone());
                    } else {
                        match extracted.remove(&unit) {
                            Some(Ok(extracted_unit)) => {
                                heading = extracted_unit.heading.clone();
                                tree.warnings.extend(extracted_unit.warnings.iter().cloned());
                                chapter.content = into_content(extracted_unit);
                            }
                            Some(Err(e)) => {
                                let kind = match e.kind() {
                                    ErrorKind::MalformedContentUnit => WarningKind::MalformedContentUnit,
                                    _ => WarningKind::MissingAsset,
                                };
                                warn!("Unit {} unavailable: {}", unit, e);
                                tree.warnings.push(ProcessingWarning::for_unit(
                                    kind,
                                    &unit,
                                    e.to_string(),
                                ));
                            }
                            None => {
                                warn!("Unit {} was not extracted", unit);
                                tree.warnings.push(ProcessingWarning::for_unit(
                                    WarningKind::MissingAsset,
                                    &unit,
                                    "content unit was not extracted",
                                ));
                            }
                        }
                    }
                    let title = entry_title.unwrap_or_else(|| {
                        infer_title(heading.as_deref(), &chapter.content.text, order)
                    });
                    owner_of_unit
                        .entry(unit)
                        .or_insert_with(|| (id.clone(), title.clone()));
                    chapter.title = title;
                }
                None => {
                    chapter.title = entry_title.unwrap_or_else(|| infer_title(None, "", order));
                }
            }

            if let Some(p) = parent_pos {
                tree.chapters[p].children.push(id);
            }
            tree.chapters.push(chapter);
        }

        debug!(
            "Built {} chapters ({} outline entries, {} unlisted units)",
            tree.chapters.len(),
            outline.entries.len(),
            unlisted.len()
        );
        Ok(tree)
    }
}

fn into_content(unit: ExtractedUnit) -> ChapterContent {
    ChapterContent {
        html: unit.html,
        text: unit.text,
        footnotes: unit.footnotes,
        images: unit.image_refs,
        tables: unit.tables,
    }
}
