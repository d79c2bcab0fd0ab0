//! Seedable test-data generation. Test-only: this module is compiled solely
//! under `cfg(test)` or the `test-support` feature, never into production
//! code paths.

use chrono::{Duration, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use uuid::Uuid;

use mapops_common::{CellId, Clue, ClueKind, ClueStatus};

use crate::clues::ClueStore;
use crate::grid::GridIndex;

/// Detection sources sampled by the factory.
const SOURCES: [&str; 4] = [
    "satellite-diff",
    "probe-trace",
    "field-report",
    "partner-feed",
];

/// Deterministic clue generator. Same seed, same clues.
pub struct ClueFactory {
    rng: StdRng,
}

impl ClueFactory {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// One pending clue bucketed into `cell`, with bounded random kind,
    /// confidence, urgency, and source.
    pub fn clue_in(&mut self, cell: CellId) -> Clue {
        let kind = match self.rng.random_range(0..4u8) {
            0 => ClueKind::RoadChange,
            1 => ClueKind::PoiNew,
            2 => ClueKind::AdminAdjust,
            _ => ClueKind::WaterChange,
        };
        Clue {
            id: Uuid::new_v4(),
            kind,
            cell,
            lat: 30.0 + self.rng.random::<f64>(),
            lng: 114.0 + self.rng.random::<f64>(),
            confidence: 0.5 + self.rng.random::<f32>() * 0.5,
            urgent: self.rng.random_bool(0.15),
            status: ClueStatus::Pending,
            source: SOURCES[self.rng.random_range(0..SOURCES.len())].to_string(),
            detected_at: Utc::now() - Duration::minutes(self.rng.random_range(0..720)),
            related_clues: if self.rng.random_bool(0.3) {
                Some(self.rng.random_range(1..6))
            } else {
                None
            },
        }
    }

    /// Fill every grid cell with `per_cell` clues.
    pub fn populate(
        &mut self,
        grid: &mut GridIndex,
        store: &mut ClueStore,
        per_cell: u32,
    ) {
        let cells = grid.cells_where(|_| true);
        for cell in cells {
            for _ in 0..per_cell {
                let clue = self.clue_in(cell);
                store
                    .ingest(grid, clue)
                    .expect("factory clues are always valid");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_fills_every_cell() {
        let mut grid = GridIndex::new(3, 2);
        let mut store = ClueStore::new();
        let mut factory = ClueFactory::new(42);

        factory.populate(&mut grid, &mut store, 4);

        assert_eq!(store.len(), 24);
        for cell in grid.iter() {
            assert_eq!(cell.clue_count, 4);
        }
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = ClueFactory::new(9);
        let mut b = ClueFactory::new(9);
        let cell = CellId::new(0, 0);
        for _ in 0..10 {
            let (ca, cb) = (a.clue_in(cell), b.clue_in(cell));
            assert_eq!(ca.kind, cb.kind);
            assert_eq!(ca.urgent, cb.urgent);
            assert_eq!(ca.source, cb.source);
            assert!((ca.confidence - cb.confidence).abs() < f32::EPSILON);
        }
    }
}
