use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mapops_common::Config;
use mapops_engine::{
    DistrictTable, EngineDeps, EngineOptions, LogDispatcher, PolicyEngine, PolicyConfig,
    PolicyStore, SpatialGrouper, SystemClock, UnavailableGrouper,
};
use mapops_store::{CategoryConfig, GridIndex, PipelineTaxonomy};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mapops=info".parse()?))
        .init();

    info!("MapOps packaging engine starting...");

    // Load config
    let config = Config::from_env();

    // Load the pipeline taxonomy (partial load: bad entries are logged)
    let raw = std::fs::read_to_string(&config.taxonomy_file)?;
    let entries: Vec<CategoryConfig> = serde_json::from_str(&raw)?;
    let (taxonomy, rejects) = PipelineTaxonomy::load(entries);
    for (id, error) in &rejects {
        warn!(category = id.as_str(), error = %error, "Rejected taxonomy entry");
    }
    info!(
        categories = taxonomy.len(),
        rejected = rejects.len(),
        "Taxonomy loaded"
    );

    // Load packaging policies
    let raw = std::fs::read_to_string(&config.policy_file)?;
    let entries: Vec<PolicyConfig> = serde_json::from_str(&raw)?;
    let (policies, rejects) = PolicyStore::load(entries, &taxonomy);
    for (name, error) in &rejects {
        warn!(policy = name.as_str(), error = %error, "Rejected policy");
    }
    info!(
        policies = policies.len(),
        rejected = rejects.len(),
        "Policies loaded"
    );

    // The grid starts empty; ingestion fills it while the engine runs.
    let grid = Arc::new(RwLock::new(GridIndex::new(
        config.grid_cols,
        config.grid_rows,
    )));
    info!(
        cols = config.grid_cols,
        rows = config.grid_rows,
        "Grid initialized"
    );

    // District grouping: file-backed table if configured, otherwise the
    // admin_district strategy reports Unavailable.
    let district: Box<dyn SpatialGrouper> = match &config.district_file {
        Some(path) => {
            let table = DistrictTable::load(path)?;
            info!(path = path.as_str(), cells = table.len(), "District table loaded");
            Box::new(table)
        }
        None => {
            info!("No DISTRICT_FILE set, admin_district grouping disabled");
            Box::new(UnavailableGrouper::new("district lookup"))
        }
    };

    let deps = EngineDeps {
        district,
        topology: Box::new(UnavailableGrouper::new("topology grouping")),
        dispatcher: Box::new(LogDispatcher),
        clock: Arc::new(SystemClock),
    };
    let opts = EngineOptions {
        tick_interval: Duration::from_secs(config.tick_interval_secs),
        eval_timeout: Duration::from_secs(config.eval_timeout_secs),
        default_sla_hours: config.default_sla_hours,
    };
    let engine = PolicyEngine::new(grid, Arc::new(taxonomy), policies, deps, opts);

    let mut interval = tokio::time::interval(Duration::from_secs(config.tick_interval_secs));
    loop {
        interval.tick().await;
        let stats = engine.tick().await;
        info!("Tick complete. {stats}");
    }
}
