//! Manual packaging: freeze an operator's selection into a task package.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use mapops_common::{MapOpsError, TaskPackage, TaskState};
use mapops_store::{GridIndex, PipelineTaxonomy, SelectionSet};

/// Parameters for a manual packaging action.
#[derive(Debug, Clone)]
pub struct PackageRequest {
    pub region: String,
    pub pipeline: Option<String>,
    pub sla_hours: i64,
}

/// Build a package from the current selection. Totals are read from the live
/// grid at creation time and frozen into the package, together with a copy of
/// the member cell ids; the selection is cleared on success, and neither
/// later selection changes nor grid mutation alter the package.
pub fn package_from_selection(
    selection: &mut SelectionSet,
    grid: &GridIndex,
    taxonomy: &PipelineTaxonomy,
    req: &PackageRequest,
    now: DateTime<Utc>,
) -> Result<TaskPackage, MapOpsError> {
    if selection.is_empty() {
        return Err(MapOpsError::Validation(
            "cannot package an empty selection".into(),
        ));
    }
    if let Some(pipeline) = &req.pipeline {
        taxonomy.resolve(pipeline)?;
    }

    let stats = selection.stats(grid)?;
    let cells = selection.iter().collect();
    let id = Uuid::new_v4();
    let package = TaskPackage {
        id,
        name: format!("{}-{}", req.region, short_id(&id)),
        region: req.region.clone(),
        cells,
        clue_total: stats.total,
        urgent_total: stats.urgent,
        road_total: stats.road,
        pipeline: req.pipeline.clone(),
        state: TaskState::Created,
        progress_current: 0,
        progress_total: stats.total.try_into().unwrap_or(u32::MAX),
        created_at: now,
        dispatched_at: None,
        sla_deadline: now + Duration::hours(req.sla_hours),
        failure_reason: None,
        source_policy: None,
        retry_of: None,
    };

    selection.clear();
    Ok(package)
}

/// Short package-name suffix from a Uuid.
pub(crate) fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
