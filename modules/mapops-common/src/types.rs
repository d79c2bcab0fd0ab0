use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MapOpsError;

// --- Grid Types ---

/// Coordinate of a cell in the fixed production grid. `x` is the column,
/// `y` the row; both are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    pub x: u16,
    pub y: u16,
}

impl CellId {
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Aggregate clue counters for one grid cell.
///
/// Invariants: `road_clue_count <= clue_count` and `urgent_count <= clue_count`.
/// Counters move only on clue ingestion and resolution, never on triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCell {
    pub id: CellId,
    pub clue_count: u32,
    pub road_clue_count: u32,
    pub urgent_count: u32,
}

impl GridCell {
    pub fn empty(id: CellId) -> Self {
        Self {
            id,
            clue_count: 0,
            road_clue_count: 0,
            urgent_count: 0,
        }
    }

    /// Read the counter a policy scope aggregates over.
    pub fn count_for(&self, metric: AggregateMetric) -> u32 {
        match metric {
            AggregateMetric::Total => self.clue_count,
            AggregateMetric::Road => self.road_clue_count,
            AggregateMetric::Urgent => self.urgent_count,
        }
    }
}

/// Sum of cell counters over some set of cells (a selection, a policy scope,
/// or the whole grid).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAggregate {
    pub total: u64,
    pub urgent: u64,
    pub road: u64,
}

impl CellAggregate {
    pub fn add_cell(&mut self, cell: &GridCell) {
        self.total += cell.clue_count as u64;
        self.urgent += cell.urgent_count as u64;
        self.road += cell.road_clue_count as u64;
    }

    pub fn get(&self, metric: AggregateMetric) -> u64 {
        match metric {
            AggregateMetric::Total => self.total,
            AggregateMetric::Road => self.road,
            AggregateMetric::Urgent => self.urgent,
        }
    }
}

/// The three live counters a policy scope can aggregate. The grid maintains
/// exactly these, so they are the only aggregates that can be computed
/// without a full clue scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMetric {
    Total,
    Road,
    Urgent,
}

impl fmt::Display for AggregateMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Total => write!(f, "total"),
            Self::Road => write!(f, "road"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for AggregateMetric {
    type Err = MapOpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total" => Ok(Self::Total),
            "road" => Ok(Self::Road),
            "urgent" => Ok(Self::Urgent),
            other => Err(MapOpsError::Validation(format!(
                "unknown aggregate metric '{other}'"
            ))),
        }
    }
}

// --- Clue Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClueKind {
    RoadChange,
    PoiNew,
    AdminAdjust,
    WaterChange,
}

impl ClueKind {
    /// Road clues feed the per-cell `road_clue_count` counter.
    pub fn is_road(&self) -> bool {
        matches!(self, Self::RoadChange)
    }
}

impl fmt::Display for ClueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoadChange => write!(f, "road_change"),
            Self::PoiNew => write!(f, "poi_new"),
            Self::AdminAdjust => write!(f, "admin_adjust"),
            Self::WaterChange => write!(f, "water_change"),
        }
    }
}

/// Triage lifecycle of a clue. `Archived` is the resolution state — resolved
/// clues stay in the store, they are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClueStatus {
    Pending,
    Promoted,
    Ignored,
    Archived,
}

impl fmt::Display for ClueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Promoted => write!(f, "promoted"),
            Self::Ignored => write!(f, "ignored"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// A detected candidate change in map data, awaiting triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clue {
    pub id: Uuid,
    pub kind: ClueKind,
    /// Grid cell this clue is bucketed into.
    pub cell: CellId,
    pub lat: f64,
    pub lng: f64,
    /// Detector confidence, 0.0–1.0.
    pub confidence: f32,
    pub urgent: bool,
    pub status: ClueStatus,
    /// Detection source (satellite diff, probe trace, field report, ...).
    pub source: String,
    pub detected_at: DateTime<Utc>,
    /// Number of correlated clues reported by the detector, if any.
    pub related_clues: Option<u32>,
}

// --- Pipeline Taxonomy Types ---

/// Top-level grouping of production pipelines. Closed set: unknown codes are
/// rejected at taxonomy load, and categories without a code land in
/// `Unclassified` — there is no silent string fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineGroup {
    Foundation,
    Location,
    LastMile,
    Other,
    Unclassified,
}

impl PipelineGroup {
    /// Display order for group iteration.
    pub const ALL: [PipelineGroup; 5] = [
        Self::Foundation,
        Self::Location,
        Self::LastMile,
        Self::Other,
        Self::Unclassified,
    ];

    pub fn parse_code(code: &str) -> Result<Self, MapOpsError> {
        match code {
            "foundation" => Ok(Self::Foundation),
            "location" => Ok(Self::Location),
            "last_mile" => Ok(Self::LastMile),
            "other" => Ok(Self::Other),
            other => Err(MapOpsError::Validation(format!(
                "unknown pipeline group code '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PipelineGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foundation => write!(f, "foundation"),
            Self::Location => write!(f, "location"),
            Self::LastMile => write!(f, "last_mile"),
            Self::Other => write!(f, "other"),
            Self::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// A node in the two-level pipeline tree. A category with `parent = None` is
/// a pipeline; with `parent = Some(id)` it is a sub-pipeline of that id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCategory {
    pub id: String,
    pub label: String,
    pub color: String,
    pub group: PipelineGroup,
    pub parent: Option<String>,
}

// --- Packaging Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialStrategy {
    MapTile,
    AdminDistrict,
    Topology,
}

impl fmt::Display for SpatialStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MapTile => write!(f, "map_tile"),
            Self::AdminDistrict => write!(f, "admin_district"),
            Self::Topology => write!(f, "topology"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    /// Dispatch the package immediately on creation.
    AutoPush,
    /// Leave the package pending until an operator confirms it.
    Draft,
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoPush => write!(f, "auto_push"),
            Self::Draft => write!(f, "draft"),
        }
    }
}

// --- Task Package Types ---

/// Lifecycle of a task package: Created → Processing → {Completed, Failed}.
/// The last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of grouped work dispatched to a production pipeline.
///
/// The cell list and clue totals are frozen at creation time: later mutation
/// of the grid or of the selection the package came from never alters them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPackage {
    pub id: Uuid,
    pub name: String,
    pub region: String,
    /// Frozen snapshot of the member cells.
    pub cells: Vec<CellId>,
    pub clue_total: u64,
    pub urgent_total: u64,
    pub road_total: u64,
    /// Target pipeline category id, if assigned.
    pub pipeline: Option<String>,
    pub state: TaskState,
    pub progress_current: u32,
    pub progress_total: u32,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub sla_deadline: DateTime<Utc>,
    pub failure_reason: Option<String>,
    /// Policy that fired this package, if it was not packaged manually.
    pub source_policy: Option<Uuid>,
    /// Failed package this one retries, if any.
    pub retry_of: Option<Uuid>,
}

impl TaskPackage {
    /// Hours until the SLA deadline. Negative means the SLA is breached —
    /// an observable signal, not an error.
    pub fn sla_remaining_hours(&self, now: DateTime<Utc>) -> i64 {
        (self.sla_deadline - now).num_hours()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn sla_goes_negative_after_deadline() {
        let now = Utc::now();
        let pkg = TaskPackage {
            id: Uuid::new_v4(),
            name: "t-1".into(),
            region: "t".into(),
            cells: vec![],
            clue_total: 0,
            urgent_total: 0,
            road_total: 0,
            pipeline: None,
            state: TaskState::Created,
            progress_current: 0,
            progress_total: 0,
            created_at: now,
            dispatched_at: None,
            sla_deadline: now + Duration::hours(5),
            failure_reason: None,
            source_policy: None,
            retry_of: None,
        };
        assert_eq!(pkg.sla_remaining_hours(now), 5);
        assert_eq!(pkg.sla_remaining_hours(now + Duration::hours(8)), -3);
    }

    #[test]
    fn group_codes_are_closed() {
        assert_eq!(
            PipelineGroup::parse_code("foundation").unwrap(),
            PipelineGroup::Foundation
        );
        assert!(PipelineGroup::parse_code("Foundation").is_err());
        assert!(PipelineGroup::parse_code("misc").is_err());
    }

    #[test]
    fn metric_reads_the_matching_counter() {
        let cell = GridCell {
            id: CellId::new(1, 2),
            clue_count: 10,
            road_clue_count: 4,
            urgent_count: 2,
        };
        assert_eq!(cell.count_for(AggregateMetric::Total), 10);
        assert_eq!(cell.count_for(AggregateMetric::Road), 4);
        assert_eq!(cell.count_for(AggregateMetric::Urgent), 2);
    }
}
