//! Fixed spatial partition holding per-cell clue aggregates.

use mapops_common::{CellAggregate, CellId, GridCell, MapOpsError};

/// Signed counter change applied to one cell by an ingestion or resolution
/// event. Triage never touches counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellDelta {
    pub clues: i64,
    pub road: i64,
    pub urgent: i64,
}

impl CellDelta {
    /// Delta for ingesting one clue.
    pub fn ingest(road: bool, urgent: bool) -> Self {
        Self {
            clues: 1,
            road: road as i64,
            urgent: urgent as i64,
        }
    }

    /// Delta for resolving (archiving) one clue.
    pub fn resolve(road: bool, urgent: bool) -> Self {
        Self {
            clues: -1,
            road: -(road as i64),
            urgent: -(urgent as i64),
        }
    }
}

/// The fixed cols × rows grid. Cells are created at initialization and never
/// individually destroyed; no resizing at runtime.
#[derive(Debug, Clone)]
pub struct GridIndex {
    cols: u16,
    rows: u16,
    cells: Vec<GridCell>,
}

impl GridIndex {
    pub fn new(cols: u16, rows: u16) -> Self {
        let mut cells = Vec::with_capacity(cols as usize * rows as usize);
        for y in 0..rows {
            for x in 0..cols {
                cells.push(GridCell::empty(CellId::new(x, y)));
            }
        }
        Self { cols, rows, cells }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn index_of(&self, id: CellId) -> Result<usize, MapOpsError> {
        if id.x >= self.cols || id.y >= self.rows {
            return Err(MapOpsError::NotFound(format!(
                "cell {id} is outside the {}x{} grid",
                self.cols, self.rows
            )));
        }
        Ok(id.y as usize * self.cols as usize + id.x as usize)
    }

    /// O(1) cell lookup.
    pub fn cell(&self, id: CellId) -> Result<&GridCell, MapOpsError> {
        let idx = self.index_of(id)?;
        Ok(&self.cells[idx])
    }

    /// Apply an ingestion/resolution delta, enforcing the cell invariants:
    /// counters stay non-negative and sub-counts never exceed the total.
    pub fn apply_delta(&mut self, id: CellId, delta: CellDelta) -> Result<(), MapOpsError> {
        let idx = self.index_of(id)?;
        let cell = &self.cells[idx];

        let clues = cell.clue_count as i64 + delta.clues;
        let road = cell.road_clue_count as i64 + delta.road;
        let urgent = cell.urgent_count as i64 + delta.urgent;

        if clues < 0 || road < 0 || urgent < 0 {
            return Err(MapOpsError::Validation(format!(
                "delta would drive a counter negative on cell {id}"
            )));
        }
        if road > clues || urgent > clues {
            return Err(MapOpsError::Validation(format!(
                "delta would leave a sub-count above clue_count on cell {id}"
            )));
        }

        let cell = &mut self.cells[idx];
        cell.clue_count = clues as u32;
        cell.road_clue_count = road as u32;
        cell.urgent_count = urgent as u32;
        Ok(())
    }

    /// O(n) full-scan aggregation over cells matching `pred`. An empty match
    /// returns zero totals, not an error.
    pub fn aggregate<P: Fn(&GridCell) -> bool>(&self, pred: P) -> CellAggregate {
        aggregate_cells(&self.cells, pred)
    }

    /// Ids of cells matching `pred`, in row-major order.
    pub fn cells_where<P: Fn(&GridCell) -> bool>(&self, pred: P) -> Vec<CellId> {
        self.cells.iter().filter(|c| pred(c)).map(|c| c.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.iter()
    }

    /// Owned copy of every cell. A policy evaluation takes one snapshot up
    /// front and reads only from it, so it sees a single coherent view even
    /// while ingestion keeps mutating the live grid.
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            cols: self.cols,
            rows: self.rows,
            cells: self.cells.clone(),
        }
    }
}

/// Immutable point-in-time copy of the grid.
#[derive(Debug, Clone)]
pub struct GridSnapshot {
    cols: u16,
    rows: u16,
    cells: Vec<GridCell>,
}

impl GridSnapshot {
    pub fn cell(&self, id: CellId) -> Result<&GridCell, MapOpsError> {
        if id.x >= self.cols || id.y >= self.rows {
            return Err(MapOpsError::NotFound(format!(
                "cell {id} is outside the {}x{} grid",
                self.cols, self.rows
            )));
        }
        Ok(&self.cells[id.y as usize * self.cols as usize + id.x as usize])
    }

    pub fn aggregate<P: Fn(&GridCell) -> bool>(&self, pred: P) -> CellAggregate {
        aggregate_cells(&self.cells, pred)
    }

    pub fn cells_where<P: Fn(&GridCell) -> bool>(&self, pred: P) -> Vec<CellId> {
        self.cells.iter().filter(|c| pred(c)).map(|c| c.id).collect()
    }
}

fn aggregate_cells<P: Fn(&GridCell) -> bool>(cells: &[GridCell], pred: P) -> CellAggregate {
    let mut agg = CellAggregate::default();
    for cell in cells.iter().filter(|c| pred(c)) {
        agg.add_cell(cell);
    }
    agg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_out_of_range_is_not_found() {
        let grid = GridIndex::new(14, 8);
        assert!(grid.cell(CellId::new(0, 0)).is_ok());
        assert!(grid.cell(CellId::new(13, 7)).is_ok());
        assert!(matches!(
            grid.cell(CellId::new(14, 0)),
            Err(MapOpsError::NotFound(_))
        ));
        assert!(matches!(
            grid.cell(CellId::new(0, 8)),
            Err(MapOpsError::NotFound(_))
        ));
    }

    #[test]
    fn delta_enforces_cell_invariants() {
        let mut grid = GridIndex::new(4, 4);
        let id = CellId::new(1, 1);

        grid.apply_delta(id, CellDelta::ingest(true, true)).unwrap();
        grid.apply_delta(id, CellDelta::ingest(false, false)).unwrap();
        let cell = grid.cell(id).unwrap();
        assert_eq!(cell.clue_count, 2);
        assert_eq!(cell.road_clue_count, 1);
        assert_eq!(cell.urgent_count, 1);
        assert!(cell.road_clue_count <= cell.clue_count);
        assert!(cell.urgent_count <= cell.clue_count);

        // Road count may not exceed clue count
        let bad = CellDelta {
            clues: 0,
            road: 2,
            urgent: 0,
        };
        assert!(matches!(
            grid.apply_delta(id, bad),
            Err(MapOpsError::Validation(_))
        ));

        // Counters may not go negative
        let bad = CellDelta {
            clues: -3,
            road: 0,
            urgent: 0,
        };
        assert!(matches!(
            grid.apply_delta(id, bad),
            Err(MapOpsError::Validation(_))
        ));
    }

    #[test]
    fn aggregate_over_empty_match_is_zero() {
        let grid = GridIndex::new(14, 8);
        let agg = grid.aggregate(|c| c.road_clue_count > 0);
        assert_eq!(agg, CellAggregate::default());
    }

    #[test]
    fn aggregate_sums_matching_cells() {
        let mut grid = GridIndex::new(3, 3);
        grid.apply_delta(CellId::new(0, 0), CellDelta { clues: 5, road: 2, urgent: 1 })
            .unwrap();
        grid.apply_delta(CellId::new(2, 1), CellDelta { clues: 3, road: 0, urgent: 3 })
            .unwrap();

        let all = grid.aggregate(|_| true);
        assert_eq!(all.total, 8);
        assert_eq!(all.road, 2);
        assert_eq!(all.urgent, 4);

        let road_only = grid.aggregate(|c| c.road_clue_count > 0);
        assert_eq!(road_only.total, 5);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let mut grid = GridIndex::new(2, 2);
        let id = CellId::new(0, 0);
        grid.apply_delta(id, CellDelta { clues: 4, road: 0, urgent: 0 })
            .unwrap();

        let snap = grid.snapshot();
        grid.apply_delta(id, CellDelta { clues: 10, road: 0, urgent: 0 })
            .unwrap();

        assert_eq!(snap.cell(id).unwrap().clue_count, 4);
        assert_eq!(grid.cell(id).unwrap().clue_count, 14);
    }
}
