//! File-backed administrative district table.
//!
//! Production wiring for the `admin_district` strategy when a district
//! extract is available on disk. The real boundary service stays out of
//! scope; this table is the injected stand-in.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mapops_common::{CellId, MapOpsError};

use crate::traits::SpatialGrouper;

/// One row of the district extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistrictEntry {
    pub cell: CellId,
    pub district: String,
}

pub struct DistrictTable {
    by_cell: HashMap<CellId, String>,
}

impl DistrictTable {
    pub fn new(entries: Vec<DistrictEntry>) -> Self {
        Self {
            by_cell: entries
                .into_iter()
                .map(|e| (e.cell, e.district))
                .collect(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, MapOpsError> {
        let entries: Vec<DistrictEntry> = serde_json::from_str(raw)
            .map_err(|e| MapOpsError::Validation(format!("district table: {e}")))?;
        Ok(Self::new(entries))
    }

    pub fn load(path: &str) -> Result<Self, MapOpsError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MapOpsError::Validation(format!("district table {path}: {e}")))?;
        Self::from_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.by_cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_cell.is_empty()
    }
}

#[async_trait]
impl SpatialGrouper for DistrictTable {
    /// Group cells by district, districts in name order. A cell missing from
    /// the table fails the whole call — the engine's all-or-nothing rule
    /// turns that into zero packages.
    async fn group(&self, cells: &[CellId]) -> Result<Vec<Vec<CellId>>> {
        let mut groups: BTreeMap<&str, Vec<CellId>> = BTreeMap::new();
        for cell in cells {
            match self.by_cell.get(cell) {
                Some(district) => groups.entry(district.as_str()).or_default().push(*cell),
                None => bail!("cell {cell} has no district mapping"),
            }
        }
        Ok(groups.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(x: u16, y: u16, district: &str) -> DistrictEntry {
        DistrictEntry {
            cell: CellId::new(x, y),
            district: district.to_string(),
        }
    }

    #[tokio::test]
    async fn groups_by_district_in_name_order() {
        let table = DistrictTable::new(vec![
            entry(0, 0, "west-lake"),
            entry(1, 0, "east-bank"),
            entry(2, 0, "west-lake"),
        ]);
        let groups = table
            .group(&[CellId::new(0, 0), CellId::new(1, 0), CellId::new(2, 0)])
            .await
            .unwrap();
        assert_eq!(
            groups,
            vec![
                vec![CellId::new(1, 0)],
                vec![CellId::new(0, 0), CellId::new(2, 0)],
            ]
        );
    }

    #[tokio::test]
    async fn unmapped_cell_fails_the_call() {
        let table = DistrictTable::new(vec![entry(0, 0, "west-lake")]);
        let err = table
            .group(&[CellId::new(0, 0), CellId::new(9, 9)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no district mapping"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            DistrictTable::from_json("not json"),
            Err(MapOpsError::Validation(_))
        ));
    }
}
