//! Packaging-policy evaluation: the tick loop.
//!
//! Each tick evaluates every enabled policy against one coherent snapshot of
//! the grid. Firings are staged fully before anything becomes visible — a
//! grouping failure, timeout, or mid-tick cancellation commits nothing.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mapops_common::{
    CellAggregate, CellId, MapOpsError, PolicyAction, SpatialStrategy, TaskPackage, TaskState,
};
use mapops_store::{GridIndex, GridSnapshot, PipelineTaxonomy, SelectionSet};

use crate::lifecycle::TaskBook;
use crate::packager::{self, PackageRequest};
use crate::policy::{PackagingPolicy, PolicyStore, Trigger};
use crate::tiling;
use crate::traits::{Clock, DispatchAck, PipelineDispatcher, SpatialGrouper};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Width of one tick window. A cron occurrence inside
    /// `(now - tick_interval, now]` is due on this tick.
    pub tick_interval: StdDuration,
    /// Bound on one external grouping call. Exceeding it fails the firing;
    /// the policy retries on the next tick.
    pub eval_timeout: StdDuration,
    pub default_sla_hours: i64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick_interval: StdDuration::from_secs(60),
            eval_timeout: StdDuration::from_secs(30),
            default_sla_hours: 72,
        }
    }
}

/// External collaborators, injected at construction.
pub struct EngineDeps {
    pub district: Box<dyn SpatialGrouper>,
    pub topology: Box<dyn SpatialGrouper>,
    pub dispatcher: Box<dyn PipelineDispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// Per-policy evaluation state.
#[derive(Default)]
struct PolicyRuntime {
    /// Serializes ticks per policy: an overlapping tick is skipped, never
    /// interleaved.
    tick_guard: tokio::sync::Mutex<()>,
    /// Cron occurrence already fired, for per-tick idempotence.
    last_cron_fire: Mutex<Option<DateTime<Utc>>>,
    /// Threshold latch: set while the scoped aggregate sits above the
    /// threshold, so crossings fire once (edge-triggered).
    above_threshold: AtomicBool,
}

/// What one policy evaluation did.
enum EvalOutcome {
    Idle,
    SkippedOverlap,
    Cancelled,
    Fired { created: u64, dispatched: u64 },
}

/// Which trigger satisfied, carried until post-commit state updates.
enum Firing {
    Cron(DateTime<Utc>),
    Threshold,
}

/// Stats from one engine tick.
#[derive(Debug, Default)]
pub struct TickStats {
    pub evaluated: u64,
    pub fired: u64,
    pub packages_created: u64,
    pub packages_dispatched: u64,
    pub skipped_overlap: u64,
    pub cancelled: u64,
    pub errors: u64,
}

impl fmt::Display for TickStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "evaluated={} fired={} packages_created={} packages_dispatched={} skipped_overlap={} cancelled={} errors={}",
            self.evaluated,
            self.fired,
            self.packages_created,
            self.packages_dispatched,
            self.skipped_overlap,
            self.cancelled,
            self.errors,
        )
    }
}

/// Evaluates packaging policies against grid aggregates and materializes
/// task packages.
pub struct PolicyEngine {
    grid: Arc<RwLock<GridIndex>>,
    taxonomy: Arc<PipelineTaxonomy>,
    policies: RwLock<PolicyStore>,
    runtime: Mutex<HashMap<Uuid, Arc<PolicyRuntime>>>,
    book: Mutex<TaskBook>,
    deps: EngineDeps,
    opts: EngineOptions,
}

impl PolicyEngine {
    pub fn new(
        grid: Arc<RwLock<GridIndex>>,
        taxonomy: Arc<PipelineTaxonomy>,
        policies: PolicyStore,
        deps: EngineDeps,
        opts: EngineOptions,
    ) -> Self {
        Self {
            grid,
            taxonomy,
            policies: RwLock::new(policies),
            runtime: Mutex::new(HashMap::new()),
            book: Mutex::new(TaskBook::new()),
            deps,
            opts,
        }
    }

    /// Evaluate every enabled policy once. Policies evaluate independently
    /// and concurrently; each works off its own grid snapshot.
    pub async fn tick(&self) -> TickStats {
        let now = self.deps.clock.now();
        let enabled: Vec<PackagingPolicy> = {
            let store = self.policies.read().expect("policy store lock");
            store.iter().filter(|p| p.enabled).cloned().collect()
        };

        let mut stats = TickStats {
            evaluated: enabled.len() as u64,
            ..TickStats::default()
        };
        let outcomes = join_all(
            enabled
                .into_iter()
                .map(|policy| self.evaluate_policy(policy, now)),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                Ok(EvalOutcome::Idle) => {}
                Ok(EvalOutcome::SkippedOverlap) => stats.skipped_overlap += 1,
                Ok(EvalOutcome::Cancelled) => stats.cancelled += 1,
                Ok(EvalOutcome::Fired { created, dispatched }) => {
                    stats.fired += 1;
                    stats.packages_created += created;
                    stats.packages_dispatched += dispatched;
                }
                // Already reported at the failure site; the policy stays
                // eligible for the next tick.
                Err(_) => stats.errors += 1,
            }
        }
        debug!(%stats, "Tick evaluated");
        stats
    }

    async fn evaluate_policy(
        &self,
        policy: PackagingPolicy,
        now: DateTime<Utc>,
    ) -> Result<EvalOutcome, MapOpsError> {
        let runtime = self.runtime_for(policy.id);
        let _guard = match runtime.tick_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    policy = policy.name.as_str(),
                    "Previous tick still running, skipping"
                );
                return Ok(EvalOutcome::SkippedOverlap);
            }
        };

        // One snapshot for the whole evaluation: trigger check, cell scope,
        // and totals all see the same grid state.
        let snapshot = self.grid.read().expect("grid lock").snapshot();

        let firing = match &policy.trigger {
            Trigger::Cron { schedule, .. } => {
                match due_occurrence(schedule, now, self.tick_window()) {
                    Some(occurrence) => {
                        let fired = *runtime.last_cron_fire.lock().expect("cron fire lock");
                        if fired == Some(occurrence) {
                            debug!(
                                policy = policy.name.as_str(),
                                "Scheduled tick already fired"
                            );
                            None
                        } else {
                            Some(Firing::Cron(occurrence))
                        }
                    }
                    None => None,
                }
            }
            Trigger::Threshold { value, .. } => {
                let aggregate = snapshot
                    .aggregate(|c| c.count_for(policy.metric) > 0)
                    .get(policy.metric);
                if aggregate <= *value {
                    runtime.above_threshold.store(false, Ordering::SeqCst);
                    None
                } else if runtime.above_threshold.load(Ordering::SeqCst) {
                    // Still above from an earlier crossing: level, not edge.
                    None
                } else {
                    Some(Firing::Threshold)
                }
            }
        };
        let Some(firing) = firing else {
            return Ok(EvalOutcome::Idle);
        };

        let cells = snapshot.cells_where(|c| c.count_for(policy.metric) > 0);
        if cells.is_empty() {
            debug!(
                policy = policy.name.as_str(),
                "Trigger satisfied but no cells in scope"
            );
            self.record_fire(&runtime, &firing);
            return Ok(EvalOutcome::Fired {
                created: 0,
                dispatched: 0,
            });
        }

        // Stage everything. Nothing below is visible until commit.
        let packages = match self.stage_packages(&policy, &snapshot, &cells, now).await {
            Ok(packages) => packages,
            Err(e) => {
                warn!(
                    policy = policy.name.as_str(),
                    error = %e,
                    "Policy firing failed, no packages created"
                );
                return Err(e);
            }
        };

        // Cancellation: a policy disabled mid-evaluation must not commit.
        {
            let store = self.policies.read().expect("policy store lock");
            let still_enabled = store.get(policy.id).map(|p| p.enabled).unwrap_or(false);
            if !still_enabled {
                info!(
                    policy = policy.name.as_str(),
                    staged = packages.len(),
                    "Policy disabled mid-tick, discarding staged packages"
                );
                return Ok(EvalOutcome::Cancelled);
            }
        }

        {
            let mut book = self.book.lock().expect("task book lock");
            for package in &packages {
                book.insert(package.clone());
            }
        }
        self.record_fire(&runtime, &firing);

        let mut dispatched = 0;
        if policy.action == PolicyAction::AutoPush {
            for package in &packages {
                match self.deps.dispatcher.dispatch(package).await {
                    Ok(ack) => {
                        self.book
                            .lock()
                            .expect("task book lock")
                            .mark_processing(package.id, ack.accepted_at)?;
                        dispatched += 1;
                    }
                    Err(e) => {
                        // The package stays Created — never silently
                        // Processing without a dispatch ack.
                        warn!(
                            policy = policy.name.as_str(),
                            package = package.name.as_str(),
                            error = %e,
                            "Dispatch failed, package left undispatched"
                        );
                    }
                }
            }
        }

        info!(
            policy = policy.name.as_str(),
            action = %policy.action,
            created = packages.len(),
            dispatched,
            "Policy fired"
        );
        Ok(EvalOutcome::Fired {
            created: packages.len() as u64,
            dispatched,
        })
    }

    async fn stage_packages(
        &self,
        policy: &PackagingPolicy,
        snapshot: &GridSnapshot,
        cells: &[CellId],
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskPackage>, MapOpsError> {
        let groups = match policy.strategy {
            SpatialStrategy::MapTile => tiling::group_contiguous(cells),
            SpatialStrategy::AdminDistrict => {
                self.external_groups(&*self.deps.district, "admin_district", cells)
                    .await?
            }
            SpatialStrategy::Topology => {
                self.external_groups(&*self.deps.topology, "topology", cells)
                    .await?
            }
        };

        let mut packages = Vec::new();
        for group in groups.into_iter().filter(|g| !g.is_empty()) {
            // An unknown cell id from the collaborator fails the whole
            // firing — all-or-nothing.
            let mut agg = CellAggregate::default();
            for id in &group {
                agg.add_cell(snapshot.cell(*id)?);
            }
            let id = Uuid::new_v4();
            packages.push(TaskPackage {
                id,
                name: format!("{}-{}", policy.name, packager::short_id(&id)),
                region: policy.name.clone(),
                cells: group,
                clue_total: agg.total,
                urgent_total: agg.urgent,
                road_total: agg.road,
                pipeline: policy.pipeline.clone(),
                state: TaskState::Created,
                progress_current: 0,
                progress_total: agg.total.try_into().unwrap_or(u32::MAX),
                created_at: now,
                dispatched_at: None,
                sla_deadline: now + Duration::hours(self.opts.default_sla_hours),
                failure_reason: None,
                source_policy: Some(policy.id),
                retry_of: None,
            });
        }
        Ok(packages)
    }

    async fn external_groups(
        &self,
        grouper: &dyn SpatialGrouper,
        label: &str,
        cells: &[CellId],
    ) -> Result<Vec<Vec<CellId>>, MapOpsError> {
        match tokio::time::timeout(self.opts.eval_timeout, grouper.group(cells)).await {
            Err(_) => Err(MapOpsError::EvaluationTimeout(format!(
                "{label} grouping exceeded {:?}",
                self.opts.eval_timeout
            ))),
            Ok(Err(e)) => Err(MapOpsError::Unavailable(format!("{label}: {e:#}"))),
            Ok(Ok(groups)) => Ok(groups),
        }
    }

    fn record_fire(&self, runtime: &PolicyRuntime, firing: &Firing) {
        match firing {
            Firing::Cron(occurrence) => {
                *runtime.last_cron_fire.lock().expect("cron fire lock") = Some(*occurrence);
            }
            Firing::Threshold => runtime.above_threshold.store(true, Ordering::SeqCst),
        }
    }

    fn runtime_for(&self, id: Uuid) -> Arc<PolicyRuntime> {
        self.runtime
            .lock()
            .expect("runtime lock")
            .entry(id)
            .or_default()
            .clone()
    }

    fn tick_window(&self) -> Duration {
        Duration::from_std(self.opts.tick_interval).unwrap_or_else(|_| Duration::seconds(60))
    }

    // --- Policy management ---

    pub fn add_policy(&self, policy: PackagingPolicy) {
        self.policies.write().expect("policy store lock").insert(policy);
    }

    pub fn set_policy_enabled(&self, id: Uuid, enabled: bool) -> Result<(), MapOpsError> {
        self.policies
            .write()
            .expect("policy store lock")
            .set_enabled(id, enabled)
    }

    pub fn remove_policy(&self, id: Uuid) -> Result<PackagingPolicy, MapOpsError> {
        self.policies.write().expect("policy store lock").remove(id)
    }

    /// Snapshot of all configured policies, in load order.
    pub fn policies(&self) -> Vec<PackagingPolicy> {
        self.policies
            .read()
            .expect("policy store lock")
            .iter()
            .cloned()
            .collect()
    }

    // --- Grid access ---

    pub fn grid(&self) -> Arc<RwLock<GridIndex>> {
        Arc::clone(&self.grid)
    }

    pub fn taxonomy(&self) -> &PipelineTaxonomy {
        &self.taxonomy
    }

    // --- Manual packaging and lifecycle ---

    /// Package the operator's current selection. Reports errors
    /// synchronously; on success the selection is cleared and the package is
    /// recorded as a draft awaiting `confirm`.
    pub fn package_manual(
        &self,
        selection: &mut SelectionSet,
        req: &PackageRequest,
    ) -> Result<TaskPackage, MapOpsError> {
        let now = self.deps.clock.now();
        let package = {
            let grid = self.grid.read().expect("grid lock");
            packager::package_from_selection(selection, &grid, &self.taxonomy, req, now)?
        };
        self.book
            .lock()
            .expect("task book lock")
            .insert(package.clone());
        Ok(package)
    }

    /// Manually dispatch a draft package.
    pub async fn confirm(&self, package_id: Uuid) -> Result<DispatchAck, MapOpsError> {
        let package = self
            .book
            .lock()
            .expect("task book lock")
            .get(package_id)?
            .clone();
        if package.state != TaskState::Created {
            return Err(MapOpsError::InvalidTransition(format!(
                "package {} is {}, only created packages can be confirmed",
                package.name, package.state
            )));
        }
        let ack = self
            .deps
            .dispatcher
            .dispatch(&package)
            .await
            .map_err(|e| MapOpsError::Unavailable(format!("dispatch: {e:#}")))?;
        self.book
            .lock()
            .expect("task book lock")
            .mark_processing(package_id, ack.accepted_at)?;
        Ok(ack)
    }

    pub fn package(&self, id: Uuid) -> Result<TaskPackage, MapOpsError> {
        Ok(self.book.lock().expect("task book lock").get(id)?.clone())
    }

    /// All packages in creation order.
    pub fn packages(&self) -> Vec<TaskPackage> {
        self.book
            .lock()
            .expect("task book lock")
            .all()
            .cloned()
            .collect()
    }

    pub fn advance(&self, id: Uuid, units: u32) -> Result<TaskState, MapOpsError> {
        self.book.lock().expect("task book lock").advance(id, units)
    }

    pub fn fail_package(&self, id: Uuid, reason: &str) -> Result<(), MapOpsError> {
        self.book.lock().expect("task book lock").fail(id, reason)
    }

    pub fn retry_package(&self, id: Uuid) -> Result<Uuid, MapOpsError> {
        let now = self.deps.clock.now();
        self.book
            .lock()
            .expect("task book lock")
            .retry(id, now, self.opts.default_sla_hours)
    }

    /// Open packages past their SLA deadline.
    pub fn sla_breached(&self) -> Vec<TaskPackage> {
        let now = self.deps.clock.now();
        self.book
            .lock()
            .expect("task book lock")
            .sla_breached(now)
            .into_iter()
            .cloned()
            .collect()
    }
}

/// The most recent scheduled occurrence inside `(now - window, now]`, if
/// any. This timestamp is the tick's identity for idempotent cron firing.
fn due_occurrence(
    schedule: &Schedule,
    now: DateTime<Utc>,
    window: Duration,
) -> Option<DateTime<Utc>> {
    let window_start = now - window;
    schedule.after(&window_start).next().filter(|t| *t <= now)
}
