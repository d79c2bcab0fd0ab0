pub mod clues;
pub mod grid;
pub mod selection;
pub mod taxonomy;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use clues::ClueStore;
pub use grid::{CellDelta, GridIndex, GridSnapshot};
pub use selection::SelectionSet;
pub use taxonomy::{CategoryConfig, PipelineTaxonomy};
