//! Packaging policies: config parsing, trigger validation, and the policy
//! store.
//!
//! A policy's `trigger_value` syntax must match its `trigger_type` — a cron
//! policy never holds a threshold expression and vice versa. Violations are
//! rejected at load, one policy at a time (partial load).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use cron::Schedule;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mapops_common::{AggregateMetric, MapOpsError, PolicyAction, SpatialStrategy};
use mapops_store::PipelineTaxonomy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Cron,
    Threshold,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron => write!(f, "cron"),
            Self::Threshold => write!(f, "threshold"),
        }
    }
}

/// One policy as it appears in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    pub trigger_type: TriggerKind,
    /// Cron expression for `cron` policies, `[metric] > N` for `threshold`.
    pub trigger_value: String,
    /// Scope metric for cron policies. Threshold policies may name the
    /// metric inside the expression instead.
    #[serde(default)]
    pub metric: Option<AggregateMetric>,
    /// Target pipeline category; must resolve against the taxonomy.
    #[serde(default)]
    pub pipeline: Option<String>,
    pub spatial_strategy: SpatialStrategy,
    pub action: PolicyAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Parsed trigger condition.
#[derive(Clone)]
pub enum Trigger {
    /// Fires when the clock crosses a scheduled occurrence.
    Cron { schedule: Schedule, raw: String },
    /// Fires when the scoped aggregate crosses above `value`. Edge-triggered:
    /// no re-fire while the aggregate stays above.
    Threshold { value: u64, raw: String },
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron { raw, .. } => write!(f, "Cron({raw})"),
            Self::Threshold { raw, .. } => write!(f, "Threshold({raw})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackagingPolicy {
    pub id: Uuid,
    pub name: String,
    pub trigger: Trigger,
    /// Which counter the policy scope aggregates, and which cells it selects
    /// (cells with a non-zero scoped count).
    pub metric: AggregateMetric,
    pub pipeline: Option<String>,
    pub strategy: SpatialStrategy,
    pub action: PolicyAction,
    pub enabled: bool,
}

impl PackagingPolicy {
    pub fn from_config(
        cfg: PolicyConfig,
        taxonomy: &PipelineTaxonomy,
    ) -> Result<Self, MapOpsError> {
        if let Some(pipeline) = &cfg.pipeline {
            taxonomy.resolve(pipeline)?;
        }
        let (trigger, metric) = match cfg.trigger_type {
            TriggerKind::Cron => {
                let schedule = Schedule::from_str(&cfg.trigger_value).map_err(|e| {
                    MapOpsError::Validation(format!(
                        "policy '{}': cron trigger holds non-cron value '{}': {e}",
                        cfg.name, cfg.trigger_value
                    ))
                })?;
                let trigger = Trigger::Cron {
                    schedule,
                    raw: cfg.trigger_value,
                };
                (trigger, cfg.metric.unwrap_or(AggregateMetric::Total))
            }
            TriggerKind::Threshold => {
                let (expr_metric, value) =
                    parse_threshold(&cfg.trigger_value).map_err(|e| {
                        MapOpsError::Validation(format!("policy '{}': {e}", cfg.name))
                    })?;
                let trigger = Trigger::Threshold {
                    value,
                    raw: cfg.trigger_value,
                };
                let metric = expr_metric
                    .or(cfg.metric)
                    .unwrap_or(AggregateMetric::Total);
                (trigger, metric)
            }
        };
        Ok(Self {
            id: Uuid::new_v4(),
            name: cfg.name,
            trigger,
            metric,
            pipeline: cfg.pipeline,
            strategy: cfg.spatial_strategy,
            action: cfg.action,
            enabled: cfg.enabled,
        })
    }
}

/// Parse a threshold expression: `[metric] > N`, e.g. `> 100` or
/// `urgent > 25`. Strictly greater — the policy fires on crossing above N.
fn parse_threshold(s: &str) -> Result<(Option<AggregateMetric>, u64), MapOpsError> {
    let (left, right) = s.split_once('>').ok_or_else(|| {
        MapOpsError::Validation(format!(
            "threshold expression '{s}' must be of the form '[metric] > N'"
        ))
    })?;
    if right.contains('>') {
        return Err(MapOpsError::Validation(format!(
            "threshold expression '{s}' has more than one '>'"
        )));
    }
    let metric = match left.trim() {
        "" => None,
        name => Some(name.parse()?),
    };
    let value = right.trim().parse::<u64>().map_err(|_| {
        MapOpsError::Validation(format!(
            "threshold expression '{s}' needs an integer bound"
        ))
    })?;
    Ok((metric, value))
}

/// All configured policies, id-indexed, iterated in load order.
#[derive(Debug, Default)]
pub struct PolicyStore {
    policies: HashMap<Uuid, PackagingPolicy>,
    order: Vec<Uuid>,
}

impl PolicyStore {
    /// Load policies with per-entry validation. Invalid entries are rejected
    /// and reported; valid ones still load.
    pub fn load(
        configs: Vec<PolicyConfig>,
        taxonomy: &PipelineTaxonomy,
    ) -> (Self, Vec<(String, MapOpsError)>) {
        let mut store = Self::default();
        let mut rejects = Vec::new();
        for cfg in configs {
            let name = cfg.name.clone();
            match PackagingPolicy::from_config(cfg, taxonomy) {
                Ok(policy) => store.insert(policy),
                Err(e) => rejects.push((name, e)),
            }
        }
        (store, rejects)
    }

    pub fn insert(&mut self, policy: PackagingPolicy) {
        self.order.push(policy.id);
        self.policies.insert(policy.id, policy);
    }

    pub fn get(&self, id: Uuid) -> Result<&PackagingPolicy, MapOpsError> {
        self.policies
            .get(&id)
            .ok_or_else(|| MapOpsError::NotFound(format!("policy {id}")))
    }

    /// Enable or disable a policy. Disabled policies never fire.
    pub fn set_enabled(&mut self, id: Uuid, enabled: bool) -> Result<(), MapOpsError> {
        self.policies
            .get_mut(&id)
            .ok_or_else(|| MapOpsError::NotFound(format!("policy {id}")))?
            .enabled = enabled;
        Ok(())
    }

    pub fn remove(&mut self, id: Uuid) -> Result<PackagingPolicy, MapOpsError> {
        let policy = self
            .policies
            .remove(&id)
            .ok_or_else(|| MapOpsError::NotFound(format!("policy {id}")))?;
        self.order.retain(|pid| *pid != id);
        Ok(policy)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackagingPolicy> {
        self.order.iter().filter_map(|id| self.policies.get(id))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapops_store::CategoryConfig;

    fn taxonomy() -> PipelineTaxonomy {
        let (taxonomy, rejects) = PipelineTaxonomy::load(vec![CategoryConfig {
            id: "road".into(),
            label: "Road".into(),
            color: "#1677ff".into(),
            group: Some("foundation".into()),
            parent: None,
        }]);
        assert!(rejects.is_empty());
        taxonomy
    }

    fn cfg(trigger_type: TriggerKind, trigger_value: &str) -> PolicyConfig {
        PolicyConfig {
            name: "P-test".into(),
            trigger_type,
            trigger_value: trigger_value.into(),
            metric: None,
            pipeline: Some("road".into()),
            spatial_strategy: SpatialStrategy::MapTile,
            action: PolicyAction::Draft,
            enabled: true,
        }
    }

    #[test]
    fn cron_policy_parses() {
        let policy =
            PackagingPolicy::from_config(cfg(TriggerKind::Cron, "0 0 * * * *"), &taxonomy())
                .unwrap();
        assert!(matches!(policy.trigger, Trigger::Cron { .. }));
        assert_eq!(policy.metric, AggregateMetric::Total);
    }

    #[test]
    fn threshold_policy_parses_with_metric() {
        let policy =
            PackagingPolicy::from_config(cfg(TriggerKind::Threshold, "urgent > 25"), &taxonomy())
                .unwrap();
        match policy.trigger {
            Trigger::Threshold { value, .. } => assert_eq!(value, 25),
            other => panic!("expected threshold trigger, got {other:?}"),
        }
        assert_eq!(policy.metric, AggregateMetric::Urgent);
    }

    #[test]
    fn trigger_value_syntax_must_match_trigger_type() {
        // Cron policy holding a threshold expression
        let err =
            PackagingPolicy::from_config(cfg(TriggerKind::Cron, "> 100"), &taxonomy()).unwrap_err();
        assert!(matches!(err, MapOpsError::Validation(_)));

        // Threshold policy holding a cron expression
        let err =
            PackagingPolicy::from_config(cfg(TriggerKind::Threshold, "0 0 * * * *"), &taxonomy())
                .unwrap_err();
        assert!(matches!(err, MapOpsError::Validation(_)));
    }

    #[test]
    fn unknown_pipeline_is_rejected() {
        let mut bad = cfg(TriggerKind::Threshold, "> 100");
        bad.pipeline = Some("submarine".into());
        let err = PackagingPolicy::from_config(bad, &taxonomy()).unwrap_err();
        assert!(matches!(err, MapOpsError::NotFound(_)));
    }

    #[test]
    fn load_is_partial() {
        let configs = vec![
            cfg(TriggerKind::Threshold, "> 100"),
            cfg(TriggerKind::Threshold, "over nine thousand"),
            cfg(TriggerKind::Cron, "0 30 4 * * *"),
        ];
        let (store, rejects) = PolicyStore::load(configs, &taxonomy());
        assert_eq!(store.len(), 2);
        assert_eq!(rejects.len(), 1);
    }

    #[test]
    fn disable_and_remove() {
        let (mut store, _) = PolicyStore::load(
            vec![cfg(TriggerKind::Threshold, "> 10")],
            &taxonomy(),
        );
        let id = store.iter().next().unwrap().id;
        store.set_enabled(id, false).unwrap();
        assert!(!store.get(id).unwrap().enabled);
        store.remove(id).unwrap();
        assert!(matches!(store.get(id), Err(MapOpsError::NotFound(_))));
        assert!(matches!(
            store.set_enabled(id, true),
            Err(MapOpsError::NotFound(_))
        ));
    }
}
