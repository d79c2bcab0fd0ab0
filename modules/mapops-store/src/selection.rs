//! One operator session's working set of grid cells.

use std::collections::BTreeSet;

use mapops_common::{CellAggregate, CellId, MapOpsError};

use crate::grid::GridIndex;

/// A transient set of selected cell ids. Holds ids only — never cell copies —
/// and is cleared on package creation or explicit clear. Single-writer: one
/// user session mutates it.
#[derive(Debug, Default, Clone)]
pub struct SelectionSet {
    cells: BTreeSet<CellId>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a cell in or out of the selection. Returns whether the cell is
    /// selected after the call.
    pub fn toggle(&mut self, cell: CellId) -> bool {
        if self.cells.remove(&cell) {
            false
        } else {
            self.cells.insert(cell);
            true
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    pub fn contains(&self, cell: CellId) -> bool {
        self.cells.contains(&cell)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.iter().copied()
    }

    /// Derived stats over the member cells. Recomputed from the live grid on
    /// every call — never cached, so concurrent ingestion can't leave the
    /// numbers stale.
    pub fn stats(&self, grid: &GridIndex) -> Result<CellAggregate, MapOpsError> {
        let mut agg = CellAggregate::default();
        for id in &self.cells {
            agg.add_cell(grid.cell(*id)?);
        }
        Ok(agg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellDelta;

    #[test]
    fn toggle_adds_and_removes() {
        let mut sel = SelectionSet::new();
        let id = CellId::new(3, 2);
        assert!(sel.toggle(id));
        assert!(sel.contains(id));
        assert!(!sel.toggle(id));
        assert!(sel.is_empty());
    }

    #[test]
    fn stats_track_live_cell_values() {
        let mut grid = GridIndex::new(4, 4);
        let id = CellId::new(1, 0);
        grid.apply_delta(id, CellDelta { clues: 5, road: 2, urgent: 1 })
            .unwrap();

        let mut sel = SelectionSet::new();
        sel.toggle(id);
        assert_eq!(sel.stats(&grid).unwrap().total, 5);

        // Ingestion between calls — stats must reflect it immediately.
        grid.apply_delta(id, CellDelta { clues: 7, road: 0, urgent: 0 })
            .unwrap();
        assert_eq!(sel.stats(&grid).unwrap().total, 12);

        // And must always equal the live sum over member cells.
        let expected = grid.cell(id).unwrap().clue_count as u64;
        assert_eq!(sel.stats(&grid).unwrap().total, expected);
    }

    #[test]
    fn stats_on_unknown_member_fail() {
        let grid = GridIndex::new(2, 2);
        let mut sel = SelectionSet::new();
        sel.toggle(CellId::new(9, 9));
        assert!(matches!(
            sel.stats(&grid),
            Err(MapOpsError::NotFound(_))
        ));
    }

    #[test]
    fn clear_empties_the_selection() {
        let mut sel = SelectionSet::new();
        sel.toggle(CellId::new(0, 0));
        sel.toggle(CellId::new(1, 1));
        assert_eq!(sel.len(), 2);
        sel.clear();
        assert!(sel.is_empty());
    }
}
