//! In-memory clue collection, indexed by id and by grid cell.
//!
//! The store and the grid move in lockstep: ingest bumps the owning cell's
//! counters, archive decrements them. Triage (promote/ignore) changes only
//! clue status.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use mapops_common::{CellId, Clue, ClueStatus, MapOpsError};

use crate::grid::{CellDelta, GridIndex};

#[derive(Debug, Default)]
pub struct ClueStore {
    clues: HashMap<Uuid, Clue>,
    by_cell: HashMap<CellId, Vec<Uuid>>,
}

impl ClueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a clue. Idempotent by clue id: re-ingesting a known id is a
    /// no-op and returns `false`. The owning cell's counters are bumped on
    /// first ingest.
    pub fn ingest(&mut self, grid: &mut GridIndex, clue: Clue) -> Result<bool, MapOpsError> {
        if self.clues.contains_key(&clue.id) {
            debug!(clue_id = %clue.id, "Duplicate clue ingest, skipping");
            return Ok(false);
        }
        if !(0.0..=1.0).contains(&clue.confidence) {
            return Err(MapOpsError::Validation(format!(
                "clue {} confidence {} outside 0..=1",
                clue.id, clue.confidence
            )));
        }
        // Counter update validates the cell id as a side effect.
        grid.apply_delta(clue.cell, CellDelta::ingest(clue.kind.is_road(), clue.urgent))?;

        self.by_cell.entry(clue.cell).or_default().push(clue.id);
        self.clues.insert(clue.id, clue);
        Ok(true)
    }

    pub fn get(&self, id: Uuid) -> Result<&Clue, MapOpsError> {
        self.clues
            .get(&id)
            .ok_or_else(|| MapOpsError::NotFound(format!("clue {id}")))
    }

    /// Triage: promote a pending clue.
    pub fn promote(&mut self, id: Uuid) -> Result<(), MapOpsError> {
        self.triage(id, ClueStatus::Promoted)
    }

    /// Triage: ignore a pending clue.
    pub fn ignore(&mut self, id: Uuid) -> Result<(), MapOpsError> {
        self.triage(id, ClueStatus::Ignored)
    }

    fn triage(&mut self, id: Uuid, to: ClueStatus) -> Result<(), MapOpsError> {
        let clue = self
            .clues
            .get_mut(&id)
            .ok_or_else(|| MapOpsError::NotFound(format!("clue {id}")))?;
        if clue.status != ClueStatus::Pending {
            return Err(MapOpsError::InvalidTransition(format!(
                "clue {id} is {}, only pending clues can be triaged",
                clue.status
            )));
        }
        clue.status = to;
        Ok(())
    }

    /// Resolve a clue: decrement the owning cell's counters and mark the
    /// record archived. The record is kept, never hard-deleted.
    pub fn archive(&mut self, grid: &mut GridIndex, id: Uuid) -> Result<(), MapOpsError> {
        let clue = self
            .clues
            .get_mut(&id)
            .ok_or_else(|| MapOpsError::NotFound(format!("clue {id}")))?;
        if clue.status == ClueStatus::Archived {
            return Err(MapOpsError::InvalidTransition(format!(
                "clue {id} is already archived"
            )));
        }
        grid.apply_delta(clue.cell, CellDelta::resolve(clue.kind.is_road(), clue.urgent))?;
        clue.status = ClueStatus::Archived;
        Ok(())
    }

    /// Clues bucketed into one cell, archived included, in ingest order.
    pub fn clues_in_cell(&self, cell: CellId) -> Vec<&Clue> {
        self.by_cell
            .get(&cell)
            .map(|ids| ids.iter().filter_map(|id| self.clues.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.clues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clues.is_empty()
    }
}
