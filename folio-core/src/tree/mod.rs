pub mod builder;
pub mod hierarchy;
pub mod serialization;

pub use builder::{ChapterTree, ChapterTreeBuilder};
pub use hierarchy::{ChapterHierarchy, ChapterPreview};
pub use serialization::OutputFormat;
