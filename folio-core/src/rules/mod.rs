// Rules that judge structure rather than extract it:
// - section_detection.rs: font-size and pattern based section inference for PDFs
// - validation.rs: final invariant check before a document may complete

pub mod section_detection;
pub mod validation;

pub use section_detection::{SectionCandidate, SectionDetection, SectionDetectionRule};
pub use validation::{ValidationIssue, ValidationReport, ValidationRule};
