//! Task package lifecycle: Created → Processing → {Completed, Failed}.
//!
//! Terminal states are final. A retry never reopens a failed package; it
//! creates a new one referencing the old package's frozen scope.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use mapops_common::{MapOpsError, TaskPackage, TaskState};

use crate::packager;

/// Owns every task package the engine has materialized, in creation order.
#[derive(Debug, Default)]
pub struct TaskBook {
    packages: HashMap<Uuid, TaskPackage>,
    order: Vec<Uuid>,
}

impl TaskBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: TaskPackage) {
        self.order.push(package.id);
        self.packages.insert(package.id, package);
    }

    pub fn get(&self, id: Uuid) -> Result<&TaskPackage, MapOpsError> {
        self.packages
            .get(&id)
            .ok_or_else(|| MapOpsError::NotFound(format!("task package {id}")))
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut TaskPackage, MapOpsError> {
        self.packages
            .get_mut(&id)
            .ok_or_else(|| MapOpsError::NotFound(format!("task package {id}")))
    }

    /// Dispatch hand-off succeeded: Created → Processing.
    pub fn mark_processing(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), MapOpsError> {
        let pkg = self.get_mut(id)?;
        if pkg.state != TaskState::Created {
            return Err(MapOpsError::InvalidTransition(format!(
                "package {} is {}, only created packages can start processing",
                pkg.name, pkg.state
            )));
        }
        pkg.state = TaskState::Processing;
        pkg.dispatched_at = Some(at);
        Ok(())
    }

    /// Advance progress by `units`. Progress never exceeds the total;
    /// reaching it completes the package.
    pub fn advance(&mut self, id: Uuid, units: u32) -> Result<TaskState, MapOpsError> {
        let pkg = self.get_mut(id)?;
        if pkg.state != TaskState::Processing {
            return Err(MapOpsError::InvalidTransition(format!(
                "package {} is {}, progress only moves while processing",
                pkg.name, pkg.state
            )));
        }
        let next = pkg.progress_current.saturating_add(units);
        if next > pkg.progress_total {
            return Err(MapOpsError::Validation(format!(
                "package {}: progress {next} would exceed total {}",
                pkg.name, pkg.progress_total
            )));
        }
        pkg.progress_current = next;
        if pkg.progress_current == pkg.progress_total {
            pkg.state = TaskState::Completed;
        }
        Ok(pkg.state)
    }

    /// Explicit failure signal from the processing pipeline.
    pub fn fail(&mut self, id: Uuid, reason: &str) -> Result<(), MapOpsError> {
        let pkg = self.get_mut(id)?;
        if pkg.state != TaskState::Processing {
            return Err(MapOpsError::InvalidTransition(format!(
                "package {} is {}, only processing packages can fail",
                pkg.name, pkg.state
            )));
        }
        pkg.state = TaskState::Failed;
        pkg.failure_reason = Some(reason.to_string());
        Ok(())
    }

    /// Build a new Created package carrying a failed package's frozen scope.
    /// The failed package stays terminal.
    pub fn retry(
        &mut self,
        id: Uuid,
        now: DateTime<Utc>,
        sla_hours: i64,
    ) -> Result<Uuid, MapOpsError> {
        let failed = self.get(id)?;
        if failed.state != TaskState::Failed {
            return Err(MapOpsError::InvalidTransition(format!(
                "package {} is {}, only failed packages can be retried",
                failed.name, failed.state
            )));
        }
        let new_id = Uuid::new_v4();
        let replacement = TaskPackage {
            id: new_id,
            name: format!("{}-{}", failed.region, packager::short_id(&new_id)),
            region: failed.region.clone(),
            cells: failed.cells.clone(),
            clue_total: failed.clue_total,
            urgent_total: failed.urgent_total,
            road_total: failed.road_total,
            pipeline: failed.pipeline.clone(),
            state: TaskState::Created,
            progress_current: 0,
            progress_total: failed.progress_total,
            created_at: now,
            dispatched_at: None,
            sla_deadline: now + Duration::hours(sla_hours),
            failure_reason: None,
            source_policy: failed.source_policy,
            retry_of: Some(failed.id),
        };
        self.insert(replacement);
        Ok(new_id)
    }

    /// Non-terminal packages past their SLA deadline. Breach is a signal to
    /// operators, not an error.
    pub fn sla_breached(&self, now: DateTime<Utc>) -> Vec<&TaskPackage> {
        self.all()
            .filter(|p| !p.state.is_terminal() && p.sla_remaining_hours(now) < 0)
            .collect()
    }

    /// All packages in creation order.
    pub fn all(&self) -> impl Iterator<Item = &TaskPackage> {
        self.order.iter().filter_map(|id| self.packages.get(id))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
