//! Collaborator seams for the packaging engine.
//!
//! The district lookup, topology service, and downstream pipelines are
//! external systems. Everything the engine needs from them sits behind these
//! traits, so tests run with in-memory fakes: no network, no backends.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use mapops_common::{CellId, TaskPackage};

// ---------------------------------------------------------------------------
// Clock — injectable time source
// ---------------------------------------------------------------------------

/// Drives tick evaluation and SLA countdowns. Injected so tests can move
/// time by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// SpatialGrouper — external grouping backends
// ---------------------------------------------------------------------------

/// Groups a set of cells for the `admin_district` and `topology` spatial
/// strategies. Fails when the backing service cannot answer; the engine
/// treats that as the whole firing failing (all-or-nothing).
#[async_trait]
pub trait SpatialGrouper: Send + Sync {
    async fn group(&self, cells: &[CellId]) -> Result<Vec<Vec<CellId>>>;
}

/// Stand-in for a grouping backend that is not configured. Always fails, so
/// policies that need it surface Unavailable instead of silently packaging
/// nothing.
pub struct UnavailableGrouper {
    service: &'static str,
}

impl UnavailableGrouper {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }
}

#[async_trait]
impl SpatialGrouper for UnavailableGrouper {
    async fn group(&self, _cells: &[CellId]) -> Result<Vec<Vec<CellId>>> {
        bail!("{} backend is not configured", self.service)
    }
}

// ---------------------------------------------------------------------------
// PipelineDispatcher — hand-off to downstream pipelines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DispatchAck {
    pub package_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

/// Accepts a finalized task package for downstream processing.
#[async_trait]
pub trait PipelineDispatcher: Send + Sync {
    async fn dispatch(&self, package: &TaskPackage) -> Result<DispatchAck>;
}

/// Dispatcher that acknowledges every package and logs the hand-off. Wired
/// when no downstream pipeline is configured.
pub struct LogDispatcher;

#[async_trait]
impl PipelineDispatcher for LogDispatcher {
    async fn dispatch(&self, package: &TaskPackage) -> Result<DispatchAck> {
        info!(
            package = package.name.as_str(),
            cells = package.cells.len(),
            clues = package.clue_total,
            "Dispatching task package"
        );
        Ok(DispatchAck {
            package_id: package.id,
            accepted_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Arc blankets — let tests share a collaborator for assertions
// ---------------------------------------------------------------------------

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[async_trait]
impl<G: SpatialGrouper + ?Sized> SpatialGrouper for Arc<G> {
    async fn group(&self, cells: &[CellId]) -> Result<Vec<Vec<CellId>>> {
        (**self).group(cells).await
    }
}

#[async_trait]
impl<D: PipelineDispatcher + ?Sized> PipelineDispatcher for Arc<D> {
    async fn dispatch(&self, package: &TaskPackage) -> Result<DispatchAck> {
        (**self).dispatch(package).await
    }
}
